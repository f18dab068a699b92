//! B-tree engine: cursors that traverse table and index
//! b-trees, including overflow chains, and a mutator that inserts through
//! page splits and a growing root.

pub mod cell;
pub mod cursor;
pub mod mutate;
pub mod overflow;

pub use cursor::Cursor;
pub use overflow::CellKind;

use crate::error::Result;
use crate::page::{PageSource, Pager};

/// Owns nothing beyond a borrow of the pager; `create_cursor` is the entry
/// point the schema and query layers use to start a scan.
pub struct Reader<'p, S: PageSource> {
    pager: &'p mut Pager<S>,
}

impl<'p, S: PageSource> Reader<'p, S> {
    pub fn new(pager: &'p mut Pager<S>) -> Self {
        Reader { pager }
    }

    pub fn create_table_cursor(&mut self, root_page: u32) -> Cursor<'_, S> {
        Cursor::new(self.pager, root_page, CellKind::TableLeaf)
    }

    pub fn create_index_cursor(&mut self, root_page: u32) -> Cursor<'_, S> {
        Cursor::new(self.pager, root_page, CellKind::Index)
    }

    pub fn pager(&mut self) -> &mut Pager<S> {
        self.pager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{MemorySource, PageTransform};

    fn single_leaf_page_db() -> Vec<u8> {
        // One table-leaf root page at page 1 (right after the 100-byte file
        // header), containing two rows: (rowid=1, "a"), (rowid=2, "bb").
        let page_size = 512usize;
        let mut page = vec![0u8; page_size];
        page[0..16].copy_from_slice(b"SQLite format 3\0");
        page[16..18].copy_from_slice(&(page_size as u16).to_be_bytes());
        page[18] = 1;
        page[19] = 1;
        page[21] = 64;
        page[22] = 32;
        page[23] = 32;
        page[28..32].copy_from_slice(&1u32.to_be_bytes());
        page[44..48].copy_from_slice(&4u32.to_be_bytes());
        page[56..60].copy_from_slice(&1u32.to_be_bytes());

        // B-tree leaf header starts at offset 100.
        let hdr = 100;
        page[hdr] = 0x0d;
        page[hdr + 3..hdr + 5].copy_from_slice(&2u16.to_be_bytes());

        // Cell 2: rowid=2, record = (Text "bb")
        let mut cell2 = Vec::new();
        let record2 = crate::record::encode_record(&[crate::record::ColumnValue::Text(b"bb".to_vec())], None);
        crate::varint::write_varint(record2.len() as i64, &mut cell2);
        crate::varint::write_varint(2, &mut cell2);
        cell2.extend_from_slice(&record2);
        let off2 = page_size - cell2.len();
        page[off2..off2 + cell2.len()].copy_from_slice(&cell2);

        // Cell 1: rowid=1, record = (Text "a")
        let mut cell1 = Vec::new();
        let record1 = crate::record::encode_record(&[crate::record::ColumnValue::Text(b"a".to_vec())], None);
        crate::varint::write_varint(record1.len() as i64, &mut cell1);
        crate::varint::write_varint(1, &mut cell1);
        cell1.extend_from_slice(&record1);
        let off1 = off2 - cell1.len();
        page[off1..off1 + cell1.len()].copy_from_slice(&cell1);

        page[hdr + 5..hdr + 7].copy_from_slice(&(off1 as u16).to_be_bytes());

        // Cell pointer array, key order (ascending rowid): cell1 then cell2.
        page[hdr + 8..hdr + 10].copy_from_slice(&(off1 as u16).to_be_bytes());
        page[hdr + 10..hdr + 12].copy_from_slice(&(off2 as u16).to_be_bytes());

        page
    }

    #[test]
    fn full_scan_visits_rows_in_ascending_rowid_order() {
        let page = single_leaf_page_db();
        let source = MemorySource::new(page, 512);
        let mut pager = Pager::open(source, PageTransform::Identity).unwrap();
        let mut reader = Reader::new(&mut pager);
        let mut cursor = reader.create_table_cursor(1);

        assert!(cursor.move_next().unwrap());
        assert_eq!(cursor.row_id(), Some(1));
        let row1 = crate::record::decode_record(cursor.payload().unwrap()).unwrap();
        assert_eq!(row1[0], crate::record::ColumnValue::Text(b"a".to_vec()));

        assert!(cursor.move_next().unwrap());
        assert_eq!(cursor.row_id(), Some(2));

        assert!(!cursor.move_next().unwrap());
        assert_eq!(cursor.row_id(), None);
    }

    #[test]
    fn seek_finds_an_exact_rowid_match() {
        let page = single_leaf_page_db();
        let source = MemorySource::new(page, 512);
        let mut pager = Pager::open(source, PageTransform::Identity).unwrap();
        let mut reader = Reader::new(&mut pager);
        let mut cursor = reader.create_table_cursor(1);

        assert!(cursor.seek(2).unwrap());
        assert_eq!(cursor.row_id(), Some(2));
        assert!(!cursor.seek(99).unwrap());
    }

    #[test]
    fn seek_first_lands_on_exact_match() {
        let page = single_leaf_page_db();
        let source = MemorySource::new(page, 512);
        let mut pager = Pager::open(source, PageTransform::Identity).unwrap();
        let mut reader = Reader::new(&mut pager);
        let mut cursor = reader.create_table_cursor(1);

        assert!(cursor.seek_first(2).unwrap());
        assert_eq!(cursor.row_id(), Some(2));
    }

    #[test]
    fn seek_first_lands_on_the_next_greater_key_and_a_scan_can_continue() {
        let page = single_leaf_page_db();
        let source = MemorySource::new(page, 512);
        let mut pager = Pager::open(source, PageTransform::Identity).unwrap();
        let mut reader = Reader::new(&mut pager);
        let mut cursor = reader.create_table_cursor(1);

        // No row has rowid 0; the leftmost key >= 0 is rowid 1.
        assert!(cursor.seek_first(0).unwrap());
        assert_eq!(cursor.row_id(), Some(1));

        // The cursor is left `AtCell`, so move_next continues the scan.
        assert!(cursor.move_next().unwrap());
        assert_eq!(cursor.row_id(), Some(2));
        assert!(!cursor.move_next().unwrap());
    }

    #[test]
    fn seek_first_past_every_key_is_exhausted() {
        let page = single_leaf_page_db();
        let source = MemorySource::new(page, 512);
        let mut pager = Pager::open(source, PageTransform::Identity).unwrap();
        let mut reader = Reader::new(&mut pager);
        let mut cursor = reader.create_table_cursor(1);

        assert!(!cursor.seek_first(99).unwrap());
        assert_eq!(cursor.row_id(), None);
        assert!(!cursor.move_next().unwrap());
    }
}
