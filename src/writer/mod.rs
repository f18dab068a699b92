//! Writer and transactions: a single in-flight `Transaction`
//! per database handle, backed by a rollback journal and a page manager.

pub mod journal;
pub mod pagemgr;

use std::collections::HashMap;
use std::path::PathBuf;

use crate::btree::mutate;
use crate::error::Result;
use crate::page::PageSource;
use crate::record::{encode_record, ColumnValue};
use crate::schema::TableInfo;

use journal::Journal;
use pagemgr::PageManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Insert,
    Delete,
}

/// One row-level change made during a transaction, emitted to commit
/// observers after durable commit -- this is what keeps a
/// registered HNSW index in sync without it polling the table itself.
#[derive(Debug, Clone)]
pub struct RowMutation {
    pub table: String,
    pub row_id: i64,
    pub kind: MutationKind,
}

/// Called after a transaction durably commits, before control returns to
/// the caller. Registered per-handle via
/// `Database::register_transaction_commit_observer`.
pub type CommitObserver = Box<dyn FnMut(&[RowMutation]) + Send>;

/// One write transaction against a database handle. Holds the page
/// manager's dirty overlay and the rollback journal for the duration of
/// the transaction; nothing is durable until `commit`.
pub struct Transaction<'p, S: PageSource> {
    pages: PageManager<'p, S>,
    journal: Journal,
    mutations: Vec<RowMutation>,
}

/// Everything a handle needs to finish making a commit durable: the pages
/// this transaction actually wrote, the journal to truncate once those
/// pages are flushed, and the mutation log for commit observers.
pub struct CommitOutcome {
    pub dirty_pages: HashMap<u32, Vec<u8>>,
    pub mutations: Vec<RowMutation>,
    pub journal: Journal,
}

impl<'p, S: PageSource> Transaction<'p, S> {
    pub fn begin(pager: &'p mut crate::page::Pager<S>, db_path: Option<PathBuf>) -> Self {
        let journal = match &db_path {
            Some(p) => Journal::for_file(p),
            None => Journal::in_memory(),
        };
        Transaction {
            pages: PageManager::new(pager),
            journal,
            mutations: Vec::new(),
        }
    }

    fn touch(&mut self, page_number: u32) -> Result<()> {
        let bytes = self.pages.get(page_number)?;
        self.journal.capture(page_number, &bytes);
        Ok(())
    }

    /// Inserts a row into `table`. `values` excludes the rowid-alias
    /// column's stored value (it is always serial type 0); `row_id` is the
    /// integer key the cell is keyed on.
    pub fn insert(&mut self, table: &TableInfo, row_id: i64, values: &[ColumnValue]) -> Result<()> {
        self.touch(table.root_page)?;
        let payload = encode_record(values, table.rowid_alias_column);
        mutate::insert_table_row(&mut self.pages, table.root_page, row_id, &payload)?;
        self.mutations.push(RowMutation {
            table: table.name.clone(),
            row_id,
            kind: MutationKind::Insert,
        });
        Ok(())
    }

    /// Deletes the row keyed on `row_id` from `table`, if present.
    pub fn delete(&mut self, table: &TableInfo, row_id: i64) -> Result<bool> {
        self.touch(table.root_page)?;
        let removed = mutate::delete_table_row(&mut self.pages, table.root_page, row_id)?;
        if removed {
            self.mutations.push(RowMutation {
                table: table.name.clone(),
                row_id,
                kind: MutationKind::Delete,
            });
        }
        Ok(removed)
    }

    /// Replaces the row keyed on `row_id` in `table` with `values`.
    /// Equivalent to a delete followed by a re-insert at the same rowid;
    /// the b-tree mutator has no in-place record resize.
    pub fn update(&mut self, table: &TableInfo, row_id: i64, values: &[ColumnValue]) -> Result<bool> {
        if !self.delete(table, row_id)? {
            return Ok(false);
        }
        self.insert(table, row_id, values)?;
        Ok(true)
    }

    /// Persists the journal (fsynced) and hands the dirty page set and
    /// mutation log back to the caller. The concrete flush-to-disk step is
    /// handle-specific (memory vs. file-backed), so `Database::commit`
    /// performs it: write every dirty page, fsync, then truncate
    /// `outcome.journal` once that flush is durable, then run registered
    /// commit observers over `outcome.mutations`.
    pub fn commit(self) -> Result<CommitOutcome> {
        if self.journal.is_empty() {
            return Ok(CommitOutcome {
                dirty_pages: HashMap::new(),
                mutations: Vec::new(),
                journal: self.journal,
            });
        }
        self.journal.persist()?;
        Ok(CommitOutcome {
            dirty_pages: self.pages.take_dirty(),
            mutations: self.mutations,
            journal: self.journal,
        })
    }

    pub fn rollback(self) {
        // Dropping `self.pages` discards the in-memory dirty overlay; the
        // journal (if persisted) is left in place only if `commit` already
        // wrote it, which never happens before this point.
    }
}
