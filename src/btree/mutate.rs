//! Page mutation: inserting and deleting table-leaf cells, splitting pages
//! when a new cell would overflow, and growing the root.
//!
//! Operates against a `writer::PageManager` rather than a read-only
//! `PageSource` -- the writer owns the mutable page buffers for the
//! duration of a transaction, and the mutator only ever touches those.

use crate::btree::cell;
use crate::error::{Error, ErrorContext, Result};
use crate::header::{BtreePageHeader, BtreePageType};
use crate::varint::write_varint;
use crate::page::PageSource;
use crate::writer::pagemgr::PageManager;

/// Builds the on-disk bytes of a table-leaf cell: payload-length varint,
/// rowid varint, inline payload. There is no overflow-chain writer, so the
/// payload must already fit inline -- callers check `fits_inline` first.
fn build_table_leaf_cell(row_id: i64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 18);
    write_varint(payload.len() as i64, &mut out);
    write_varint(row_id, &mut out);
    out.extend_from_slice(payload);
    out
}

/// Largest payload a single table-leaf cell can carry inline on a page of
/// `page_size` bytes, leaving room for the 8-byte leaf header and the
/// cell's own 2-byte pointer-array entry. A payload over this size has no
/// placement this mutator can produce -- splitting a page only reduces how
/// many cells share it, it can never shrink one cell that is already too
/// big for an empty page.
fn max_inline_payload_size(page_size: usize, row_id: i64) -> usize {
    let overhead = crate::varint::varint_len(row_id) + 9; // +9: worst-case payload-length varint
    page_size - 8 - 2 - overhead
}

fn check_fits_inline(page_size: usize, row_id: i64, payload_len: usize, op: &'static str) -> Result<()> {
    let max = max_inline_payload_size(page_size, row_id);
    if payload_len > max {
        return Err(Error::unsupported_feature(format!(
            "{op}: payload of {payload_len} bytes exceeds the {max}-byte inline limit for a {page_size}-byte page; overflow-page writes are not supported"
        )));
    }
    Ok(())
}

fn build_table_interior_cell(left_child: u32, key: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.extend_from_slice(&left_child.to_be_bytes());
    write_varint(key, &mut out);
    out
}

/// Rewrites a leaf or interior page from an ordered list of raw cell byte
/// strings plus (for interior pages) a rightmost pointer, laying the cell
/// pointer array immediately after the header and packing cell bodies
/// downward from the end of the page.
fn rebuild_page(
    page_size: usize,
    page_offset: usize,
    page_type: BtreePageType,
    cells: &[Vec<u8>],
    rightmost_pointer: Option<u32>,
) -> Vec<u8> {
    let mut page = vec![0u8; page_size];
    let header_size = if rightmost_pointer.is_some() { 12 } else { 8 };
    let type_byte = match page_type {
        BtreePageType::InteriorIndex => 0x02,
        BtreePageType::InteriorTable => 0x05,
        BtreePageType::LeafIndex => 0x0a,
        BtreePageType::LeafTable => 0x0d,
    };
    page[page_offset] = type_byte;
    page[page_offset + 3..page_offset + 5].copy_from_slice(&(cells.len() as u16).to_be_bytes());

    let mut content_start = page_size;
    let mut pointer_offset = page_offset + header_size;
    for cell_bytes in cells {
        content_start -= cell_bytes.len();
        page[content_start..content_start + cell_bytes.len()].copy_from_slice(cell_bytes);
        page[pointer_offset..pointer_offset + 2].copy_from_slice(&(content_start as u16).to_be_bytes());
        pointer_offset += 2;
    }
    let stored_content_start = if content_start == 65536 { 0 } else { content_start as u16 };
    page[page_offset + 5..page_offset + 7].copy_from_slice(&stored_content_start.to_be_bytes());

    if let Some(rp) = rightmost_pointer {
        page[page_offset + 8..page_offset + 12].copy_from_slice(&rp.to_be_bytes());
    }
    page
}

/// Inserts `(row_id, payload)` into the table b-tree rooted at `root_page`.
/// Splits leaf/interior pages bottom-up as needed and grows the root when
/// the whole tree is full.
pub fn insert_table_row<S: PageSource>(pages: &mut PageManager<S>, root_page: u32, row_id: i64, payload: &[u8]) -> Result<()> {
    check_fits_inline(pages.page_size() as usize, row_id, payload.len(), "insert row")?;
    let (current, path) = descend_to_leaf(pages, root_page, row_id, "insert row")?;
    insert_into_leaf(pages, current, row_id, payload, &path)
}

/// Descends from `root_page` to the leaf that does (or would) hold
/// `row_id`, recording `(page_number, index of the child we descended
/// through)` at each interior level.
fn descend_to_leaf<S: PageSource>(pages: &mut PageManager<S>, root_page: u32, row_id: i64, op: &'static str) -> Result<(u32, Vec<(u32, usize)>)> {
    let mut path = Vec::new();
    let mut current = root_page;
    loop {
        let page = pages.get(current)?.to_vec();
        let page_offset = if current == 1 { crate::header::DATABASE_HEADER_BYTES } else { 0 };
        let header = BtreePageHeader::parse(&page, page_offset, current)?;
        if header.page_type.is_leaf() {
            return Ok((current, path));
        }
        let offsets = cell::cell_offsets(&page, page_offset, &header)?;
        let mut next = header.rightmost_pointer;
        let mut idx = offsets.len();
        for (i, &off) in offsets.iter().enumerate() {
            let c = cell::parse_table_interior_cell(&page, off)?;
            if c.key >= row_id {
                next = Some(c.left_child);
                idx = i;
                break;
            }
        }
        path.push((current, idx));
        current = next.ok_or_else(|| Error::corrupt_page("interior page missing a child for new key", ErrorContext::new(op).at_page(current)))?;
    }
}

/// Removes the cell keyed on `row_id` from the table b-tree rooted at
/// `root_page`, if present. Rebuilds the leaf in place; underfull leaves
/// are left unmerged rather than rebalanced against a sibling -- a
/// best-effort simplification, the same one `insert_table_row` accepts on
/// the write side of this mutator.
pub fn delete_table_row<S: PageSource>(pages: &mut PageManager<S>, root_page: u32, row_id: i64) -> Result<bool> {
    let (leaf_page, _path) = descend_to_leaf(pages, root_page, row_id, "delete row")?;
    let page_size = pages.page_size() as usize;
    let page = pages.get(leaf_page)?.to_vec();
    let page_offset = if leaf_page == 1 { crate::header::DATABASE_HEADER_BYTES } else { 0 };
    let header = BtreePageHeader::parse(&page, page_offset, leaf_page)?;
    let offsets = cell::cell_offsets(&page, page_offset, &header)?;

    let mut cells: Vec<Vec<u8>> = Vec::with_capacity(offsets.len());
    let mut found = false;
    for &off in &offsets {
        let (payload_size, rid) = cell::peek_table_leaf_cell(&page, off)?;
        if rid == row_id {
            found = true;
            continue;
        }
        let local = crate::btree::overflow::local_payload_size(pages.usable_page_size(), payload_size, crate::btree::overflow::CellKind::TableLeaf);
        let c = cell::parse_table_leaf_cell(&page, off, local)?;
        cells.push(build_table_leaf_cell(rid, c.inline_payload));
    }

    if !found {
        return Ok(false);
    }

    let rebuilt = rebuild_page(page_size, page_offset, BtreePageType::LeafTable, &cells, None);
    pages.put(leaf_page, rebuilt);
    Ok(true)
}

fn insert_into_leaf<S: PageSource>(pages: &mut PageManager<S>, leaf_page: u32, row_id: i64, payload: &[u8], path: &[(u32, usize)]) -> Result<()> {
    let page_size = pages.page_size() as usize;
    let page = pages.get(leaf_page)?.to_vec();
    let page_offset = if leaf_page == 1 { crate::header::DATABASE_HEADER_BYTES } else { 0 };
    let header = BtreePageHeader::parse(&page, page_offset, leaf_page)?;
    let offsets = cell::cell_offsets(&page, page_offset, &header)?;

    let mut cells: Vec<Vec<u8>> = Vec::with_capacity(offsets.len() + 1);
    let mut inserted = false;
    for &off in &offsets {
        let (_, existing_row_id) = cell::peek_table_leaf_cell(&page, off)?;
        if !inserted && existing_row_id >= row_id {
            cells.push(build_table_leaf_cell(row_id, payload));
            inserted = true;
        }
        let (payload_size, rid) = cell::peek_table_leaf_cell(&page, off)?;
        let local = crate::btree::overflow::local_payload_size(pages.usable_page_size(), payload_size, crate::btree::overflow::CellKind::TableLeaf);
        let c = cell::parse_table_leaf_cell(&page, off, local)?;
        cells.push(build_table_leaf_cell(rid, c.inline_payload));
    }
    if !inserted {
        cells.push(build_table_leaf_cell(row_id, payload));
    }

    let header_size = 8;
    if fits(page_size, header_size, &cells) {
        let rebuilt = rebuild_page(page_size, page_offset, BtreePageType::LeafTable, &cells, None);
        pages.put(leaf_page, rebuilt);
        return Ok(());
    }

    // Split: median cell promotes to the parent; left/right halves keep
    // roughly equal numbers of cells.
    let mid = cells.len() / 2;
    let (left_cells, right_cells) = cells.split_at(mid);
    let left_page_bytes = rebuild_page(page_size, page_offset, BtreePageType::LeafTable, left_cells, None);
    let new_right_page = pages.alloc_page()?;
    let right_page_bytes = rebuild_page(page_size, 0, BtreePageType::LeafTable, right_cells, None);

    pages.put(leaf_page, left_page_bytes);
    pages.put(new_right_page, right_page_bytes);

    // The split key is the rowid of the first cell on the new right page --
    // every key on the left half is smaller than it.
    let (_, split_key) = cell::peek_table_leaf_cell(&right_cells[0], 0)?;

    insert_into_parent(pages, path, leaf_page, split_key, new_right_page)
}

fn fits(page_size: usize, header_size: usize, cells: &[Vec<u8>]) -> bool {
    let used: usize = cells.iter().map(|c| c.len() + 2).sum();
    header_size + used <= page_size
}

fn insert_into_parent<S: PageSource>(pages: &mut PageManager<S>, path: &[(u32, usize)], left_page: u32, split_key: i64, right_page: u32) -> Result<()> {
    let page_size = pages.page_size() as usize;
    match path.last() {
        None => {
            // The leaf we split was the root. Grow the tree: allocate a new
            // interior root pointing at the two halves.
            let new_root = pages.alloc_page()?;
            let cell = build_table_interior_cell(left_page, split_key);
            let rebuilt = rebuild_page(page_size, 0, BtreePageType::InteriorTable, &[cell], Some(right_page));
            pages.put(new_root, rebuilt);
            pages.set_table_root(new_root)?;
            Ok(())
        }
        Some(&(parent_page, _)) => {
            let parent_path = &path[..path.len() - 1];
            let page = pages.get(parent_page)?.to_vec();
            let page_offset = if parent_page == 1 { crate::header::DATABASE_HEADER_BYTES } else { 0 };
            let header = BtreePageHeader::parse(&page, page_offset, parent_page)?;
            let offsets = cell::cell_offsets(&page, page_offset, &header)?;

            let mut cells: Vec<Vec<u8>> = Vec::with_capacity(offsets.len() + 1);
            let mut inserted = false;
            for &off in &offsets {
                let c = cell::parse_table_interior_cell(&page, off)?;
                if !inserted && c.key >= split_key {
                    cells.push(build_table_interior_cell(left_page, split_key));
                    inserted = true;
                }
                cells.push(build_table_interior_cell(c.left_child, c.key));
            }
            let mut rightmost = header.rightmost_pointer;
            if !inserted {
                cells.push(build_table_interior_cell(left_page, split_key));
            }
            // The new right half becomes the pointer that follows
            // split_key: either the next cell's left_child (already correct
            // by construction above, since this parent's old pointer for
            // that slot pointed at the now-split leaf) or the rightmost
            // pointer if the split cell is now the last one.
            if cells.len() == offsets.len() + 1 {
                rightmost = Some(right_page);
            }

            if fits(page_size, 12, &cells) {
                let rebuilt = rebuild_page(page_size, page_offset, BtreePageType::InteriorTable, &cells, rightmost);
                pages.put(parent_page, rebuilt);
                return Ok(());
            }

            let mid = cells.len() / 2;
            let promoted = cell::parse_table_interior_cell(&cells[mid], 0)?;
            let (left_cells, right_rest) = cells.split_at(mid);
            let right_cells = &right_rest[1..];
            let left_bytes = rebuild_page(page_size, page_offset, BtreePageType::InteriorTable, left_cells, Some(promoted.left_child));
            let new_right_page = pages.alloc_page()?;
            let right_bytes = rebuild_page(page_size, 0, BtreePageType::InteriorTable, right_cells, rightmost);
            pages.put(parent_page, left_bytes);
            pages.put(new_right_page, right_bytes);
            insert_into_parent(pages, parent_path, parent_page, promoted.key, new_right_page)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_table_leaf_cell_bytes() {
        let bytes = build_table_leaf_cell(1, &[0x02, 0x0f, 0x41]);
        let (payload_size, row_id) = cell::peek_table_leaf_cell(&bytes, 0).unwrap();
        assert_eq!(payload_size, 3);
        assert_eq!(row_id, 1);
    }

    #[test]
    fn interior_cell_round_trips_left_child_and_key() {
        let bytes = build_table_interior_cell(7, 42);
        let c = cell::parse_table_interior_cell(&bytes, 0).unwrap();
        assert_eq!(c.left_child, 7);
        assert_eq!(c.key, 42);
    }

    #[test]
    fn oversize_payload_is_rejected_rather_than_corrupting_the_page() {
        let page_size = 512usize;
        let max = max_inline_payload_size(page_size, 1);
        assert!(check_fits_inline(page_size, 1, max, "insert row").is_ok());
        let err = check_fits_inline(page_size, 1, max + 1, "insert row").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature(_)));
    }
}
