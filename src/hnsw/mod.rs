//! HNSW vector index: a layered proximity graph persisted as a shadow table
//! `_hnsw_<table>_<column>`, kept current by observing transaction commits.

pub mod graph;
pub mod persist;
pub mod sync;

use crate::btree::Reader;
use crate::error::Result;
use crate::page::{PageSource, Pager};
use crate::record::ColumnValue;

pub use graph::{DistanceMetric, HnswConfig, HnswGraph};
pub use sync::{IndexSnapshot, IndexSync};

/// Resolves a rowid to its vector. This is the one deliberately open trait
/// in the crate: unlike `PageSource`/`PageTransform`, which are closed
/// sets dispatched through a jump table, a vector resolver legitimately
/// varies across callers (an in-memory map for tests, a disk-backed table
/// column for production) in a way that benefits from a real polymorphic
/// boundary instead of a new enum variant per source.
pub trait VectorSource {
    fn resolve(&mut self, row_id: i64) -> Result<Option<Vec<f32>>>;
}

/// An in-memory `VectorSource`, primarily for tests and for graphs built
/// from data that never touched disk.
pub struct MemoryVectorSource {
    vectors: std::collections::HashMap<i64, Vec<f32>>,
}

impl MemoryVectorSource {
    pub fn new(vectors: std::collections::HashMap<i64, Vec<f32>>) -> Self {
        MemoryVectorSource { vectors }
    }
}

impl VectorSource for MemoryVectorSource {
    fn resolve(&mut self, row_id: i64) -> Result<Option<Vec<f32>>> {
        Ok(self.vectors.get(&row_id).cloned())
    }
}

/// Resolves vectors by seeking into a table's b-tree and decoding a BLOB
/// column. The column is expected to hold a little-endian `f32` vector in
/// the format `persist::encode_vector` produces.
pub struct TableVectorSource<'p, S: PageSource> {
    pager: &'p mut Pager<S>,
    root_page: u32,
    column: usize,
}

impl<'p, S: PageSource> TableVectorSource<'p, S> {
    pub fn new(pager: &'p mut Pager<S>, root_page: u32, column: usize) -> Self {
        TableVectorSource { pager, root_page, column }
    }
}

impl<'p, S: PageSource> VectorSource for TableVectorSource<'p, S> {
    fn resolve(&mut self, row_id: i64) -> Result<Option<Vec<f32>>> {
        let mut reader = Reader::new(self.pager);
        let mut cursor = reader.create_table_cursor(self.root_page);
        if !cursor.seek(row_id)? {
            return Ok(None);
        }
        let row = crate::record::decode_record(cursor.payload().expect("seek succeeded"))?;
        match row.get(self.column) {
            Some(ColumnValue::Blob(bytes)) => Ok(Some(persist::decode_vector(bytes)?)),
            _ => Ok(None),
        }
    }
}

/// The shadow table's fixed shape: `id INTEGER PRIMARY KEY, graph_data
/// BLOB`, a single row at `id=1` carrying the serialized topology blob.
pub fn shadow_table_name(table: &str, column: &str) -> String {
    format!("_hnsw_{table}_{column}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{MemorySource, PageTransform};
    use std::collections::HashMap;

    #[test]
    fn shadow_table_name_is_prefixed_with_source_and_column() {
        assert_eq!(shadow_table_name("docs", "embedding"), "_hnsw_docs_embedding");
    }

    #[test]
    fn memory_vector_source_resolves_known_rows_and_none_for_unknown() {
        let mut source = MemoryVectorSource::new(HashMap::from([(1, vec![1.0, 2.0])]));
        assert_eq!(source.resolve(1).unwrap(), Some(vec![1.0, 2.0]));
        assert_eq!(source.resolve(2).unwrap(), None);
    }

    #[test]
    fn table_vector_source_decodes_blob_column() {
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

        let hdr = 100;
        page[hdr] = 0x0d;
        page[hdr + 3..hdr + 5].copy_from_slice(&1u16.to_be_bytes());

        let vector_bytes = persist::encode_vector(&[1.5, -2.0]);
        let mut cell = Vec::new();
        let record = crate::record::encode_record(&[ColumnValue::Blob(vector_bytes)], Some(0));
        crate::varint::write_varint(record.len() as i64, &mut cell);
        crate::varint::write_varint(1, &mut cell);
        cell.extend_from_slice(&record);
        let off = page_size - cell.len();
        page[off..off + cell.len()].copy_from_slice(&cell);
        page[hdr + 5..hdr + 7].copy_from_slice(&(off as u16).to_be_bytes());
        page[hdr + 8..hdr + 10].copy_from_slice(&(off as u16).to_be_bytes());

        let source = MemorySource::new(page, 512);
        let mut pager = Pager::open(source, PageTransform::Identity).unwrap();
        let mut resolver = TableVectorSource::new(&mut pager, 1, 0);
        assert_eq!(resolver.resolve(1).unwrap(), Some(vec![1.5, -2.0]));
        assert_eq!(resolver.resolve(99).unwrap(), None);
    }
}
