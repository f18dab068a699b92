//! Rollback journal: captures each page's pre-image the first time a
//! transaction touches it, persists those pre-images to a `-journal` file
//! before the main database file is touched, and truncates the journal
//! only after the database file itself is durable.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::{Error, Result};

/// In-memory pre-image capture plus, for file-backed databases, the
/// on-disk journal file mirroring it.
pub struct Journal {
    preimages: HashMap<u32, Vec<u8>>,
    path: Option<PathBuf>,
}

impl Journal {
    pub fn in_memory() -> Self {
        Journal {
            preimages: HashMap::new(),
            path: None,
        }
    }

    pub fn for_file(db_path: &Path) -> Self {
        let mut journal_path = db_path.as_os_str().to_owned();
        journal_path.push("-journal");
        Journal {
            preimages: HashMap::new(),
            path: Some(PathBuf::from(journal_path)),
        }
    }

    /// Records `bytes` as the pre-transaction content of `page_number`, the
    /// first time (and only the first time) the page is touched.
    pub fn capture(&mut self, page_number: u32, bytes: &[u8]) {
        self.preimages.entry(page_number).or_insert_with(|| bytes.to_vec());
    }

    pub fn is_empty(&self) -> bool {
        self.preimages.is_empty()
    }

    /// Writes the journal file and fsyncs it. Must happen before any dirty
    /// page is written to the main database file.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::io("write rollback journal", e))?;
        for (&page_number, bytes) in &self.preimages {
            file.write_u32::<BigEndian>(page_number).map_err(|e| Error::io("write rollback journal", e))?;
            file.write_u32::<BigEndian>(bytes.len() as u32).map_err(|e| Error::io("write rollback journal", e))?;
            file.write_all(bytes).map_err(|e| Error::io("write rollback journal", e))?;
        }
        file.sync_all().map_err(|e| Error::io("fsync rollback journal", e))?;
        Ok(())
    }

    /// Deletes the journal file after the main database file has itself
    /// been made durable. A journal still present on `open` means a crash
    /// happened mid-commit; the caller replays it before continuing.
    pub fn truncate(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        if path.exists() {
            fs::remove_file(path).map_err(|e| Error::io("truncate rollback journal", e))?;
        }
        Ok(())
    }

    pub fn preimages(&self) -> &HashMap<u32, Vec<u8>> {
        &self.preimages
    }

    /// Reads a leftover journal file, if any, for crash-recovery replay.
    pub fn read_existing(db_path: &Path) -> Result<Option<HashMap<u32, Vec<u8>>>> {
        let mut journal_path = db_path.as_os_str().to_owned();
        journal_path.push("-journal");
        let journal_path = PathBuf::from(journal_path);
        if !journal_path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&journal_path).map_err(|e| Error::io("read rollback journal", e))?;
        let mut preimages = HashMap::new();
        let mut offset = 0;
        while offset + 8 <= bytes.len() {
            let page_number = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());
            let len = u32::from_be_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;
            offset += 8;
            if offset + len > bytes.len() {
                break;
            }
            preimages.insert(page_number, bytes[offset..offset + len].to_vec());
            offset += len;
        }
        Ok(Some(preimages))
    }

    /// Replays a recovered journal onto the database file: writes every
    /// pre-image back, fsyncs, then removes the journal.
    pub fn recover(db_path: &Path, preimages: &HashMap<u32, Vec<u8>>, page_size: u32) -> Result<()> {
        use std::io::{Seek, SeekFrom};
        let mut file = OpenOptions::new()
            .write(true)
            .open(db_path)
            .map_err(|e| Error::io("recover database file", e))?;
        for (&page_number, bytes) in preimages {
            let offset = (page_number as u64 - 1) * page_size as u64;
            file.seek(SeekFrom::Start(offset)).map_err(|e| Error::io("recover database file", e))?;
            file.write_all(bytes).map_err(|e| Error::io("recover database file", e))?;
        }
        file.sync_all().map_err(|e| Error::io("fsync recovered database file", e))?;
        let mut journal_path = db_path.as_os_str().to_owned();
        journal_path.push("-journal");
        fs::remove_file(PathBuf::from(journal_path)).map_err(|e| Error::io("remove rollback journal after recovery", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_keeps_only_the_first_preimage() {
        let mut j = Journal::in_memory();
        j.capture(1, &[1, 1, 1]);
        j.capture(1, &[2, 2, 2]);
        assert_eq!(j.preimages()[&1], vec![1, 1, 1]);
    }

    #[test]
    fn in_memory_journal_persist_and_truncate_are_no_ops() {
        let j = Journal::in_memory();
        assert!(j.persist().is_ok());
        assert!(j.truncate().is_ok());
    }
}
