//! Cell-pointer array iteration and cell-body parsing for a single b-tree
//! page. A page's cell pointer array immediately follows its header;
//! pointers are big-endian u16 offsets in key order, left-most first.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor as IoCursor;

use crate::error::{Error, ErrorContext, Result};
use crate::header::{BtreePageHeader, BtreePageType};
use crate::varint::read_varint;

/// Offsets (into the page) of every cell, in the order the pointer array
/// lists them (ascending key order).
pub fn cell_offsets(page: &[u8], page_offset: usize, header: &BtreePageHeader) -> Result<Vec<usize>> {
    let array_start = page_offset + header.header_size();
    let op = "read cell pointer array";
    let mut c = IoCursor::new(page);
    c.set_position(array_start as u64);
    let mut offsets = Vec::with_capacity(header.cell_count as usize);
    for i in 0..header.cell_count {
        let off = c
            .read_u16::<BigEndian>()
            .map_err(|_| Error::corrupt_page("cell pointer array runs past page", ErrorContext::new(op).at_offset(array_start + i as usize * 2)))?;
        if (off as usize) >= page.len() {
            return Err(Error::corrupt_page("cell pointer outside page", ErrorContext::new(op)));
        }
        offsets.push(off as usize);
    }
    Ok(offsets)
}

/// A parsed table-leaf cell: `(rowid, payload-length, inline payload slice,
/// optional overflow page)`.
pub struct TableLeafCell<'a> {
    pub row_id: i64,
    pub payload_size: i64,
    pub inline_payload: &'a [u8],
    pub overflow_page: Option<u32>,
}

/// Reads just the payload-length and rowid varints of a table-leaf cell,
/// without touching the payload bytes -- used to compute the real inline
/// size before doing the full parse.
pub fn peek_table_leaf_cell(page: &[u8], offset: usize) -> Result<(i64, i64)> {
    let op = "parse table leaf cell";
    let bytes = page
        .get(offset..)
        .ok_or_else(|| Error::corrupt_page("cell offset outside page", ErrorContext::new(op)))?;
    let (payload_size, n1) = read_varint(bytes);
    if payload_size < 0 {
        return Err(Error::corrupt_page("negative payload length", ErrorContext::new(op)));
    }
    let (row_id, _) = read_varint(&bytes[n1..]);
    Ok((payload_size, row_id))
}

/// Reads just the payload-length varint of an index cell (leaf or
/// interior, past the left-child pointer if any).
pub fn peek_index_payload_size(page: &[u8], offset: usize) -> Result<i64> {
    let op = "parse index cell";
    let bytes = page
        .get(offset..)
        .ok_or_else(|| Error::corrupt_page("cell offset outside page", ErrorContext::new(op)))?;
    let (payload_size, _) = read_varint(bytes);
    if payload_size < 0 {
        return Err(Error::corrupt_page("negative payload length", ErrorContext::new(op)));
    }
    Ok(payload_size)
}

pub fn parse_table_leaf_cell(page: &[u8], offset: usize, local_size: usize) -> Result<TableLeafCell<'_>> {
    let op = "parse table leaf cell";
    let bytes = page
        .get(offset..)
        .ok_or_else(|| Error::corrupt_page("cell offset outside page", ErrorContext::new(op)))?;
    let (payload_size, n1) = read_varint(bytes);
    if payload_size < 0 {
        return Err(Error::corrupt_page("negative payload length", ErrorContext::new(op)));
    }
    let (row_id, n2) = read_varint(&bytes[n1..]);
    let body_start = n1 + n2;
    let inline_payload = bytes
        .get(body_start..body_start + local_size)
        .ok_or_else(|| Error::corrupt_page("inline payload runs past page", ErrorContext::new(op)))?;
    let overflow_page = if local_size < payload_size as usize {
        let p = bytes
            .get(body_start + local_size..body_start + local_size + 4)
            .ok_or_else(|| Error::corrupt_page("missing overflow pointer", ErrorContext::new(op)))?;
        Some(u32::from_be_bytes(p.try_into().unwrap()))
    } else {
        None
    };
    Ok(TableLeafCell {
        row_id,
        payload_size,
        inline_payload,
        overflow_page,
    })
}

/// A parsed table-interior cell: `(left child page, key)`. No payload.
pub struct TableInteriorCell {
    pub left_child: u32,
    pub key: i64,
}

pub fn parse_table_interior_cell(page: &[u8], offset: usize) -> Result<TableInteriorCell> {
    let op = "parse table interior cell";
    let bytes = page
        .get(offset..offset + 4)
        .ok_or_else(|| Error::corrupt_page("cell offset outside page", ErrorContext::new(op)))?;
    let left_child = u32::from_be_bytes(bytes.try_into().unwrap());
    let (key, _) = read_varint(&page[offset + 4..]);
    Ok(TableInteriorCell { left_child, key })
}

/// A parsed index-leaf cell: the key payload (inline + optional overflow
/// pointer), same shape as a table-leaf cell minus the rowid prefix.
pub struct IndexLeafCell<'a> {
    pub payload_size: i64,
    pub inline_payload: &'a [u8],
    pub overflow_page: Option<u32>,
}

pub fn parse_index_leaf_cell(page: &[u8], offset: usize, local_size: usize) -> Result<IndexLeafCell<'_>> {
    let op = "parse index leaf cell";
    let bytes = page
        .get(offset..)
        .ok_or_else(|| Error::corrupt_page("cell offset outside page", ErrorContext::new(op)))?;
    let (payload_size, n1) = read_varint(bytes);
    let inline_payload = bytes
        .get(n1..n1 + local_size)
        .ok_or_else(|| Error::corrupt_page("inline payload runs past page", ErrorContext::new(op)))?;
    let overflow_page = if local_size < payload_size as usize {
        let p = bytes
            .get(n1 + local_size..n1 + local_size + 4)
            .ok_or_else(|| Error::corrupt_page("missing overflow pointer", ErrorContext::new(op)))?;
        Some(u32::from_be_bytes(p.try_into().unwrap()))
    } else {
        None
    };
    Ok(IndexLeafCell {
        payload_size,
        inline_payload,
        overflow_page,
    })
}

/// A parsed index-interior cell: left child plus the same key-payload shape
/// as an index-leaf cell.
pub struct IndexInteriorCell<'a> {
    pub left_child: u32,
    pub payload_size: i64,
    pub inline_payload: &'a [u8],
    pub overflow_page: Option<u32>,
}

pub fn parse_index_interior_cell(page: &[u8], offset: usize, local_size: usize) -> Result<IndexInteriorCell<'_>> {
    let op = "parse index interior cell";
    let left_child_bytes = page
        .get(offset..offset + 4)
        .ok_or_else(|| Error::corrupt_page("cell offset outside page", ErrorContext::new(op)))?;
    let left_child = u32::from_be_bytes(left_child_bytes.try_into().unwrap());
    let rest = &page[offset + 4..];
    let (payload_size, n1) = read_varint(rest);
    let inline_payload = rest
        .get(n1..n1 + local_size)
        .ok_or_else(|| Error::corrupt_page("inline payload runs past page", ErrorContext::new(op)))?;
    let overflow_page = if local_size < payload_size as usize {
        let p = rest
            .get(n1 + local_size..n1 + local_size + 4)
            .ok_or_else(|| Error::corrupt_page("missing overflow pointer", ErrorContext::new(op)))?;
        Some(u32::from_be_bytes(p.try_into().unwrap()))
    } else {
        None
    };
    Ok(IndexInteriorCell {
        left_child,
        payload_size,
        inline_payload,
        overflow_page,
    })
}

pub fn page_type_expects_payload(t: BtreePageType) -> bool {
    !matches!(t, BtreePageType::InteriorTable)
}

#[cfg(test)]
mod tests {
    use super::*;

    // From a 512-byte table-leaf page with 10 one-byte-integer rows.
    const TEST_PAGE: &str = "0d00 0000 0a01 ce00 01fb 01f6 01f1 01ec
01e7 01e2 01dd 01d8 01d3 01ce 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 0000
0000 0000 0000 0000 0000 0000 0000 030a
020f 4a03 0902 0f49 0308 020f 4803 0702
0f47 0306 020f 4603 0502 0f45 0304 020f
4403 0302 0f43 0302 020f 4203 0102 0f41";

    fn test_page() -> Vec<u8> {
        use hex::FromHex;
        Vec::from_hex(TEST_PAGE.replace([' ', '\n'], "")).unwrap()
    }

    #[test]
    fn cell_pointer_array_lists_every_cell_in_key_order() {
        let page = test_page();
        let header = BtreePageHeader::parse(&page, 0, 1).unwrap();
        assert_eq!(header.cell_count, 10);
        let offsets = cell_offsets(&page, 0, &header).unwrap();
        assert_eq!(offsets.len(), 10);
        assert_eq!(offsets[0], 0x01ce);
    }

    #[test]
    fn parses_table_leaf_cells_at_each_offset() {
        // Cell bytes at offset 0x01ce: 03 01 02 0f 41
        // payload_size=3, rowid=1, then the 3-byte inline payload (no
        // overflow, since local_size == payload_size here).
        let page = test_page();
        let header = BtreePageHeader::parse(&page, 0, 1).unwrap();
        let offsets = cell_offsets(&page, 0, &header).unwrap();
        let first = parse_table_leaf_cell(&page, offsets[0], 3).unwrap();
        assert_eq!(first.row_id, 1);
        assert_eq!(first.payload_size, 3);
        assert_eq!(first.inline_payload, &[0x02, 0x0f, 0x41]);
        assert!(first.overflow_page.is_none());
    }
}
