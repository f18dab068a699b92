//! Sharc: a read/write engine for databases stored in the SQLite 3 on-disk
//! format. `Database` is the facade every other component (`page`, `btree`,
//! `record`, `schema`, `query`, `writer`, `hnsw`, `crypto`) is assembled
//! behind; callers never touch a `Pager` or `PageSource` directly.

pub mod btree;
pub mod crypto;
pub mod error;
pub mod header;
pub mod hnsw;
pub mod page;
pub mod query;
pub mod record;
pub mod schema;
pub mod varint;
pub mod writer;

use std::fs::OpenOptions as FsOpenOptions;
use std::path::{Path, PathBuf};

use btree::{CellKind, Cursor};
use crypto::{derive_key, KdfParams, PageCipher};
use error::{Error, ErrorContext, Result};
use header::DatabaseHeader;
use hnsw::{shadow_table_name, HnswConfig, HnswGraph, IndexSync, TableVectorSource};
use page::{CachedSource, FileSource, MemorySource, PageSource, PageTransform, Pager};
use query::{Executor, QueryIntent};
use record::{decode_record, encode_record, ColumnValue};
use schema::{read_schema, SharcSchema, TableInfo};
use writer::{journal::Journal, CommitObserver, Transaction};

/// Password/KDF configuration for an encrypted database. Unlike an
/// unencrypted database, whose page size sits in the file's own (plaintext)
/// header bytes, an encrypted page 1 has its page-size field inside the
/// encrypted region -- the caller has to already know it.
pub struct EncryptionOptions {
    pub password: Vec<u8>,
    pub salt: Vec<u8>,
    pub kdf_params: KdfParams,
    pub trailer_len: usize,
    pub page_size: u32,
}

/// `open`/`open_memory` options.
pub struct OpenOptions {
    pub encryption: Option<EncryptionOptions>,
    pub cache_capacity: usize,
    pub read_only: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            encryption: None,
            cache_capacity: page::DEFAULT_CACHE_CAPACITY,
            read_only: false,
        }
    }
}

fn build_transform(encryption: &Option<EncryptionOptions>) -> Result<PageTransform> {
    match encryption {
        None => Ok(PageTransform::Identity),
        Some(enc) => {
            let key = derive_key(&enc.password, &enc.salt, enc.kdf_params)?;
            Ok(PageTransform::Decrypting(PageCipher::new(key, enc.trailer_len)))
        }
    }
}

/// Reads the 100-byte header straight off an unencrypted buffer to learn its
/// page size before a `FileSource`/`MemorySource` (which needs the page
/// size up front to compute per-page offsets) can be constructed.
fn detect_unencrypted_page_size(bytes: &[u8]) -> Result<u32> {
    Ok(DatabaseHeader::parse(bytes)?.page_size)
}

/// A live row cursor or a materialized query result, behind one interface:
/// `read`/`seek` plus the typed getters. A closed two-variant dispatch,
/// matching the rest of the crate's "enum over trait object" choices -- a
/// reader is either backed by a b-tree cursor or it isn't, and those are the
/// only two shapes a result ever takes.
pub enum SharcDataReader<'p, S: PageSource> {
    Table {
        cursor: Cursor<'p, S>,
        table: TableInfo,
        selected: Vec<usize>,
        current: Option<Vec<ColumnValue>>,
    },
    Materialized {
        columns: Vec<String>,
        rows: Vec<Vec<ColumnValue>>,
        position: Option<usize>,
    },
}

impl<'p, S: PageSource> SharcDataReader<'p, S> {
    /// Advances to the next row. `false` means exhausted; further calls
    /// stay `false`.
    pub fn read(&mut self) -> Result<bool> {
        match self {
            SharcDataReader::Table { cursor, table, current, .. } => {
                if !cursor.move_next()? {
                    *current = None;
                    return Ok(false);
                }
                let mut row = decode_record(cursor.payload().expect("move_next succeeded"))?;
                if let Some(alias) = table.rowid_alias_column {
                    if alias < row.len() {
                        row[alias] = ColumnValue::Integer(cursor.row_id().expect("positioned cursor has a rowid"));
                    }
                }
                *current = Some(row);
                Ok(true)
            }
            SharcDataReader::Materialized { rows, position, .. } => {
                let next = position.map_or(0, |p| p + 1);
                if next >= rows.len() {
                    *position = Some(rows.len());
                    return Ok(false);
                }
                *position = Some(next);
                Ok(true)
            }
        }
    }

    /// Seeks to an exact rowid. Only meaningful for a table-backed reader;
    /// a materialized query result has no single underlying key to seek on.
    pub fn seek(&mut self, row_id: i64) -> Result<bool> {
        match self {
            SharcDataReader::Table { cursor, table, current, .. } => {
                if !cursor.seek(row_id)? {
                    *current = None;
                    return Ok(false);
                }
                let mut row = decode_record(cursor.payload().expect("seek succeeded"))?;
                if let Some(alias) = table.rowid_alias_column {
                    if alias < row.len() {
                        row[alias] = ColumnValue::Integer(row_id);
                    }
                }
                *current = Some(row);
                Ok(true)
            }
            SharcDataReader::Materialized { .. } => Err(Error::unsupported_feature("seek on a materialized query result")),
        }
    }

    fn column_value(&self, ordinal: usize) -> Result<&ColumnValue> {
        match self {
            SharcDataReader::Table { selected, current, .. } => {
                let idx = *selected
                    .get(ordinal)
                    .ok_or_else(|| Error::argument_out_of_range(format!("column ordinal {ordinal} out of range")))?;
                current
                    .as_ref()
                    .and_then(|row| row.get(idx))
                    .ok_or_else(|| Error::argument_error("read or seek must return true before reading a column"))
            }
            SharcDataReader::Materialized { rows, position, .. } => {
                let pos = position.ok_or_else(|| Error::argument_error("read must return true before reading a column"))?;
                rows.get(pos)
                    .and_then(|row| row.get(ordinal))
                    .ok_or_else(|| Error::argument_out_of_range(format!("column ordinal {ordinal} out of range")))
            }
        }
    }

    pub fn is_null(&self, ordinal: usize) -> Result<bool> {
        Ok(matches!(self.column_value(ordinal)?, ColumnValue::Null))
    }

    pub fn get_int64(&self, ordinal: usize) -> Result<i64> {
        match self.column_value(ordinal)? {
            ColumnValue::Integer(v) => Ok(*v),
            ColumnValue::Float(v) => Ok(*v as i64),
            other => Err(Error::argument_error(format!("column {ordinal} is not an integer ({other:?})"))),
        }
    }

    pub fn get_double(&self, ordinal: usize) -> Result<f64> {
        match self.column_value(ordinal)? {
            ColumnValue::Float(v) => Ok(*v),
            ColumnValue::Integer(v) => Ok(*v as f64),
            other => Err(Error::argument_error(format!("column {ordinal} is not numeric ({other:?})"))),
        }
    }

    pub fn get_string(&self, ordinal: usize) -> Result<String> {
        match self.column_value(ordinal)? {
            ColumnValue::Text(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            other => Err(Error::argument_error(format!("column {ordinal} is not text ({other:?})"))),
        }
    }

    pub fn get_blob(&self, ordinal: usize) -> Result<Vec<u8>> {
        match self.column_value(ordinal)? {
            ColumnValue::Blob(bytes) => Ok(bytes.clone()),
            other => Err(Error::argument_error(format!("column {ordinal} is not a blob ({other:?})"))),
        }
    }

    pub fn column_count(&self) -> usize {
        match self {
            SharcDataReader::Table { selected, .. } => selected.len(),
            SharcDataReader::Materialized { columns, .. } => columns.len(),
        }
    }

    pub fn column_name(&self, ordinal: usize) -> Option<&str> {
        match self {
            SharcDataReader::Table { selected, table, .. } => {
                selected.get(ordinal).and_then(|&idx| table.columns.get(idx)).map(|c| c.name.as_str())
            }
            SharcDataReader::Materialized { columns, .. } => columns.get(ordinal).map(|s| s.as_str()),
        }
    }

    /// The declared SQL type for a table-backed column; `None` for a
    /// materialized result, whose projected expressions carry no single
    /// declared type.
    pub fn column_type(&self, ordinal: usize) -> Option<&str> {
        match self {
            SharcDataReader::Table { selected, table, .. } => {
                selected.get(ordinal).and_then(|&idx| table.columns.get(idx)).map(|c| c.declared_type.as_str())
            }
            SharcDataReader::Materialized { .. } => None,
        }
    }

    pub fn row_id(&self) -> Option<i64> {
        match self {
            SharcDataReader::Table { cursor, .. } => cursor.row_id(),
            SharcDataReader::Materialized { .. } => None,
        }
    }
}

/// A database handle: an open pager, its parsed schema, and whatever commit
/// observers are watching for row mutations.
pub struct Database<S: PageSource> {
    pager: Pager<S>,
    schema: SharcSchema,
    db_path: Option<PathBuf>,
    observers: Vec<CommitObserver>,
}

/// A file-backed handle: `FileSource` behind a bounded LRU cache.
pub type FileDatabase = Database<CachedSource<FileSource>>;
/// An in-memory handle (an opened `:memory:` database, or a small file read
/// whole), also behind the same cache so read paths share one code path.
pub type MemoryDatabase = Database<CachedSource<MemorySource>>;

impl FileDatabase {
    /// Opens `path`. If a `-journal` file is left over from a crashed
    /// commit, replays it onto the database file before the pager ever
    /// reads a page.
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let page_size = match &options.encryption {
            Some(enc) => enc.page_size,
            None => {
                let probe = std::fs::read(&path).map_err(|e| Error::io("probe database header", e))?;
                detect_unencrypted_page_size(&probe)?
            }
        };
        if let Some(preimages) = Journal::read_existing(&path)? {
            Journal::recover(&path, &preimages, page_size)?;
        }

        let file = FsOpenOptions::new()
            .read(true)
            .write(!options.read_only)
            .open(&path)
            .map_err(|e| Error::io("open database file", e))?;
        let source = FileSource::open(file, page_size)?;
        let cached = CachedSource::new(source, options.cache_capacity);
        let transform = build_transform(&options.encryption)?;
        let mut pager = Pager::open(cached, transform)?;
        let schema = read_schema(&mut pager)?;
        Ok(Database { pager, schema, db_path: Some(path), observers: Vec::new() })
    }
}

impl MemoryDatabase {
    pub fn open_memory(bytes: Vec<u8>, options: OpenOptions) -> Result<Self> {
        let page_size = match &options.encryption {
            Some(enc) => enc.page_size,
            None => detect_unencrypted_page_size(&bytes)?,
        };
        let source = MemorySource::new(bytes, page_size);
        let cached = CachedSource::new(source, options.cache_capacity);
        let transform = build_transform(&options.encryption)?;
        let mut pager = Pager::open(cached, transform)?;
        let schema = read_schema(&mut pager)?;
        Ok(Database { pager, schema, db_path: None, observers: Vec::new() })
    }
}

impl<S: PageSource> Database<S> {
    pub fn schema(&self) -> &SharcSchema {
        &self.schema
    }

    fn table_info(&self, name: &str) -> Result<&TableInfo> {
        self.schema.tables.get(name).ok_or_else(|| Error::argument_error(format!("unknown table {name}")))
    }

    /// Opens a cursor over `table`, projected to `columns` (all columns if
    /// empty). `read`/`seek` drive it; nothing is decoded until then.
    pub fn create_reader(&mut self, table: &str, columns: &[&str]) -> Result<SharcDataReader<'_, S>> {
        let info = self.table_info(table)?.clone();
        let selected = if columns.is_empty() {
            (0..info.columns.len()).collect()
        } else {
            columns
                .iter()
                .map(|name| info.column_index(name).ok_or_else(|| Error::argument_error(format!("unknown column {name}"))))
                .collect::<Result<Vec<_>>>()?
        };
        let cursor = Cursor::new(&mut self.pager, info.root_page, CellKind::TableLeaf);
        Ok(SharcDataReader::Table { cursor, table: info, selected, current: None })
    }

    /// Runs `intent` and materializes the whole result up front, wrapped in
    /// the same reader interface `create_reader` returns.
    pub fn query(&mut self, intent: &QueryIntent) -> Result<SharcDataReader<'static, S>> {
        let mut executor = Executor::new(&mut self.pager, &self.schema);
        let result = executor.execute(intent)?;
        Ok(SharcDataReader::Materialized { columns: result.columns, rows: result.rows, position: None })
    }

    pub fn begin_transaction(&mut self) -> Transaction<'_, S> {
        Transaction::begin(&mut self.pager, self.db_path.clone())
    }

    /// Makes `tx`'s changes durable: persists the journal (already done by
    /// `Transaction::commit`), writes every dirty page, fsyncs, truncates
    /// the journal, then runs every registered commit observer over the
    /// transaction's row mutation log.
    pub fn commit(&mut self, tx: Transaction<'_, S>) -> Result<()> {
        let mut outcome = tx.commit()?;
        if outcome.dirty_pages.is_empty() && outcome.mutations.is_empty() {
            return Ok(());
        }

        let grown_page_count = outcome.dirty_pages.keys().copied().max().unwrap_or(0).max(self.pager.page_count());
        if grown_page_count != self.pager.header().page_count {
            let mut header = self.pager.header().clone();
            header.page_count = grown_page_count;
            header.file_change_counter = header.file_change_counter.wrapping_add(1);
            let mut page_one = match outcome.dirty_pages.remove(&1) {
                Some(bytes) => bytes,
                None => self.pager.read(1)?,
            };
            page_one[0..header::DATABASE_HEADER_BYTES].copy_from_slice(&header.to_bytes());
            outcome.dirty_pages.insert(1, page_one);
        }

        for (&page_number, bytes) in &outcome.dirty_pages {
            self.pager.write(page_number, bytes)?;
        }
        self.pager.sync()?;
        outcome.journal.truncate()?;
        self.pager.refresh_header()?;

        for observer in &mut self.observers {
            observer(&outcome.mutations);
        }
        Ok(())
    }

    /// Discards `tx` without writing anything back.
    pub fn rollback(&mut self, tx: Transaction<'_, S>) {
        tx.rollback()
    }

    pub fn register_transaction_commit_observer(&mut self, observer: CommitObserver) {
        self.observers.push(observer);
    }

    /// Builds a fresh in-memory HNSW index over every row of `table` whose
    /// `column` holds a vector BLOB. Does not persist it -- pair with
    /// `persist_vector_index` to write the shadow table row.
    pub fn build_vector_index(&mut self, table: &str, column: &str, config: HnswConfig) -> Result<IndexSync> {
        let info = self.table_info(table)?.clone();
        let col = info.column_index(column).ok_or_else(|| Error::argument_error(format!("unknown column {column}")))?;
        let mut graph = HnswGraph::new(config)?;
        let mut cursor = Cursor::new(&mut self.pager, info.root_page, CellKind::TableLeaf);
        while cursor.move_next()? {
            let row_id = cursor.row_id().expect("positioned cursor has a rowid");
            let row = decode_record(cursor.payload().expect("move_next succeeded"))?;
            if let Some(ColumnValue::Blob(bytes)) = row.get(col) {
                let vector = hnsw::persist::decode_vector(bytes)?;
                graph.insert(row_id, vector);
            }
        }
        Ok(IndexSync::new(table, graph))
    }

    /// Loads a previously persisted index back from its shadow table,
    /// re-resolving every node's vector against the live table column (only
    /// the topology is persisted). Fails with `StaleIndex` if the persisted
    /// node count no longer matches the table.
    pub fn load_vector_index(&mut self, table: &str, column: &str) -> Result<IndexSync> {
        let info = self.table_info(table)?.clone();
        let col = info.column_index(column).ok_or_else(|| Error::argument_error(format!("unknown column {column}")))?;
        let shadow_name = shadow_table_name(table, column);
        let shadow = self
            .schema
            .tables
            .get(&shadow_name)
            .cloned()
            .ok_or_else(|| Error::argument_error(format!("no persisted vector index for {table}.{column}")))?;

        let blob = {
            let mut cursor = Cursor::new(&mut self.pager, shadow.root_page, CellKind::TableLeaf);
            if !cursor.seek(1)? {
                return Err(Error::invalid_database(
                    format!("shadow table {shadow_name} has no graph row"),
                    ErrorContext::new("load vector index"),
                ));
            }
            let row = decode_record(cursor.payload().expect("seek succeeded"))?;
            match row.get(1) {
                Some(ColumnValue::Blob(bytes)) => bytes.clone(),
                _ => {
                    return Err(Error::invalid_database(
                        format!("{shadow_name} row 1 has no graph_data blob"),
                        ErrorContext::new("load vector index"),
                    ))
                }
            }
        };

        let row_count = self.count_rows(info.root_page)?;
        let mut resolver = TableVectorSource::new(&mut self.pager, info.root_page, col);
        let graph = hnsw::persist::load(&blob, &mut resolver, &shadow_name, row_count)?;
        Ok(IndexSync::new(table, graph))
    }

    fn count_rows(&mut self, root_page: u32) -> Result<usize> {
        let mut cursor = Cursor::new(&mut self.pager, root_page, CellKind::TableLeaf);
        let mut count = 0;
        while cursor.move_next()? {
            count += 1;
        }
        Ok(count)
    }

    /// Writes `sync`'s current topology into its shadow table's `id=1` row
    /// within `tx`, inserting the row the first time. The shadow table
    /// itself -- `_hnsw_<table>_<column> (id INTEGER PRIMARY KEY, graph_data
    /// BLOB)` -- is expected to already exist in the schema; this engine has
    /// no DDL path to create one.
    pub fn persist_vector_index(&self, tx: &mut Transaction<'_, S>, table: &str, column: &str, sync: &IndexSync) -> Result<()> {
        let shadow_name = shadow_table_name(table, column);
        let shadow = self
            .schema
            .tables
            .get(&shadow_name)
            .ok_or_else(|| Error::argument_error(format!("no shadow table for {table}.{column}; create it before persisting")))?;
        let values = [ColumnValue::Null, ColumnValue::Blob(sync.serialize())];
        if !tx.update(shadow, 1, &values)? {
            tx.insert(shadow, 1, &values)?;
        }
        Ok(())
    }

    /// Finds the `k` nearest neighbors of `query` in `index`.
    pub fn vector_search(&self, index: &IndexSync, query: &[f32], k: usize, ef_search: Option<usize>) -> Vec<(i64, f32)> {
        index.graph().search(query, k, ef_search)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn two_row_table_db() -> Vec<u8> {
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
        page[hdr + 3..hdr + 5].copy_from_slice(&2u16.to_be_bytes());

        let mut cell2 = Vec::new();
        let record2 = encode_record(&[ColumnValue::Null, ColumnValue::Text(b"bob".to_vec())], Some(0));
        varint::write_varint(record2.len() as i64, &mut cell2);
        varint::write_varint(2, &mut cell2);
        cell2.extend_from_slice(&record2);
        let off2 = page_size - cell2.len();
        page[off2..off2 + cell2.len()].copy_from_slice(&cell2);

        let mut cell1 = Vec::new();
        let record1 = encode_record(&[ColumnValue::Null, ColumnValue::Text(b"alice".to_vec())], Some(0));
        varint::write_varint(record1.len() as i64, &mut cell1);
        varint::write_varint(1, &mut cell1);
        cell1.extend_from_slice(&record1);
        let off1 = off2 - cell1.len();
        page[off1..off1 + cell1.len()].copy_from_slice(&cell1);

        page[hdr + 5..hdr + 7].copy_from_slice(&(off1 as u16).to_be_bytes());
        page[hdr + 8..hdr + 10].copy_from_slice(&(off1 as u16).to_be_bytes());
        page[hdr + 10..hdr + 12].copy_from_slice(&(off2 as u16).to_be_bytes());

        page
    }

    fn people_schema() -> SharcSchema {
        let table = TableInfo {
            name: "people".to_string(),
            root_page: 1,
            columns: vec![
                schema::ColumnInfo { name: "id".to_string(), declared_type: "INTEGER".to_string(), constraints: vec![] },
                schema::ColumnInfo { name: "name".to_string(), declared_type: "TEXT".to_string(), constraints: vec![] },
            ],
            rowid_alias_column: Some(0),
            without_rowid: false,
        };
        SharcSchema { tables: HashMap::from([("people".to_string(), table)]) }
    }

    fn memory_db() -> MemoryDatabase {
        let source = MemorySource::new(two_row_table_db(), 512);
        let cached = CachedSource::new(source, page::DEFAULT_CACHE_CAPACITY);
        let pager = Pager::open(cached, PageTransform::Identity).unwrap();
        Database { pager, schema: people_schema(), db_path: None, observers: Vec::new() }
    }

    #[test]
    fn create_reader_seeks_and_reads_columns() {
        let mut db = memory_db();
        let mut reader = db.create_reader("people", &[]).unwrap();
        assert!(reader.seek(2).unwrap());
        assert_eq!(reader.get_int64(0).unwrap(), 2);
        assert_eq!(reader.get_string(1).unwrap(), "bob");
        assert!(!reader.seek(99).unwrap());
    }

    #[test]
    fn create_reader_full_scan_is_ascending_and_exhausts() {
        let mut db = memory_db();
        let mut reader = db.create_reader("people", &["name"]).unwrap();
        assert_eq!(reader.column_count(), 1);
        assert!(reader.read().unwrap());
        assert_eq!(reader.get_string(0).unwrap(), "alice");
        assert!(reader.read().unwrap());
        assert_eq!(reader.get_string(0).unwrap(), "bob");
        assert!(!reader.read().unwrap());
        assert!(!reader.read().unwrap());
    }

    #[test]
    fn create_reader_rejects_unknown_column() {
        let mut db = memory_db();
        assert!(db.create_reader("people", &["ghost"]).is_err());
    }

    #[test]
    fn query_runs_and_returns_a_materialized_reader() {
        let mut db = memory_db();
        let mut intent = QueryIntent::scan("people");
        intent.order_by = vec![query::intent::OrderByItem { column: 0, direction: query::intent::SortDirection::Descending }];
        let mut reader = db.query(&intent).unwrap();
        assert!(reader.read().unwrap());
        assert_eq!(reader.get_int64(0).unwrap(), 2);
        assert!(reader.seek(1).is_err());
    }

    #[test]
    fn insert_then_commit_is_visible_to_a_fresh_reader() {
        let mut db = memory_db();
        let table = db.table_info("people").unwrap().clone();
        let mut tx = db.begin_transaction();
        tx.insert(&table, 3, &[ColumnValue::Null, ColumnValue::Text(b"carol".to_vec())]).unwrap();
        db.commit(tx).unwrap();

        let mut reader = db.create_reader("people", &[]).unwrap();
        assert!(reader.seek(3).unwrap());
        assert_eq!(reader.get_string(1).unwrap(), "carol");
    }

    #[test]
    fn delete_then_rollback_keeps_all_rows() {
        let mut db = memory_db();
        let table = db.table_info("people").unwrap().clone();
        let mut tx = db.begin_transaction();
        assert!(tx.delete(&table, 1).unwrap());
        db.rollback(tx);

        let mut reader = db.create_reader("people", &[]).unwrap();
        assert!(reader.seek(1).unwrap());
        assert_eq!(reader.get_string(1).unwrap(), "alice");
    }

    #[test]
    fn commit_observer_sees_row_mutations() {
        let mut db = memory_db();
        let table = db.table_info("people").unwrap().clone();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in_observer = seen.clone();
        db.register_transaction_commit_observer(Box::new(move |mutations| {
            seen_in_observer.lock().unwrap().extend(mutations.iter().map(|m| m.row_id));
        }));

        let mut tx = db.begin_transaction();
        tx.insert(&table, 3, &[ColumnValue::Null, ColumnValue::Text(b"carol".to_vec())]).unwrap();
        db.commit(tx).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }

    #[test]
    fn build_vector_index_then_search_finds_nearest_row() {
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
        page[hdr + 3..hdr + 5].copy_from_slice(&2u16.to_be_bytes());

        let mut cell2 = Vec::new();
        let record2 = encode_record(&[ColumnValue::Null, ColumnValue::Blob(hnsw::persist::encode_vector(&[9.0, 9.0]))], Some(0));
        varint::write_varint(record2.len() as i64, &mut cell2);
        varint::write_varint(2, &mut cell2);
        cell2.extend_from_slice(&record2);
        let off2 = page_size - cell2.len();
        page[off2..off2 + cell2.len()].copy_from_slice(&cell2);

        let mut cell1 = Vec::new();
        let record1 = encode_record(&[ColumnValue::Null, ColumnValue::Blob(hnsw::persist::encode_vector(&[1.0, 1.0]))], Some(0));
        varint::write_varint(record1.len() as i64, &mut cell1);
        varint::write_varint(1, &mut cell1);
        cell1.extend_from_slice(&record1);
        let off1 = off2 - cell1.len();
        page[off1..off1 + cell1.len()].copy_from_slice(&cell1);

        page[hdr + 5..hdr + 7].copy_from_slice(&(off1 as u16).to_be_bytes());
        page[hdr + 8..hdr + 10].copy_from_slice(&(off1 as u16).to_be_bytes());
        page[hdr + 10..hdr + 12].copy_from_slice(&(off2 as u16).to_be_bytes());

        let table = TableInfo {
            name: "vectors".to_string(),
            root_page: 1,
            columns: vec![
                schema::ColumnInfo { name: "id".to_string(), declared_type: "INTEGER".to_string(), constraints: vec![] },
                schema::ColumnInfo { name: "embedding".to_string(), declared_type: "BLOB".to_string(), constraints: vec![] },
            ],
            rowid_alias_column: Some(0),
            without_rowid: false,
        };
        let source = MemorySource::new(page, 512);
        let cached = CachedSource::new(source, page::DEFAULT_CACHE_CAPACITY);
        let pager = Pager::open(cached, PageTransform::Identity).unwrap();
        let mut db = Database {
            pager,
            schema: SharcSchema { tables: HashMap::from([("vectors".to_string(), table)]) },
            db_path: None,
            observers: Vec::new(),
        };

        let config = HnswConfig { seed: 7, dimensions: 2, ..HnswConfig::default() };
        let index = db.build_vector_index("vectors", "embedding", config).unwrap();
        let hits = db.vector_search(&index, &[1.1, 1.1], 1, None);
        assert_eq!(hits[0].0, 1);
    }
}
