//! Parses the 100-byte database header, b-tree page headers, and (read-only)
//! WAL / WAL-frame headers. All multi-byte fields in the SQLite file format
//! are big-endian; see https://www.sqlite.org/fileformat2.html#the_database_header.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::error::{Error, ErrorContext, Result};

pub const DATABASE_HEADER_BYTES: usize = 100;

const MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Text encoding recorded in the database header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(TextEncoding::Utf8),
            2 => Ok(TextEncoding::Utf16Le),
            3 => Ok(TextEncoding::Utf16Be),
            other => Err(Error::invalid_database(
                format!("unsupported text encoding code {other}"),
                ErrorContext::new("parse database header").at_offset(56),
            )),
        }
    }
}

/// The 100-byte file header. Fields follow the on-disk layout; this struct
/// carries every field the format defines.
#[derive(Debug, Clone)]
pub struct DatabaseHeader {
    pub page_size: u32,
    pub write_version: u8,
    pub read_version: u8,
    pub reserved_bytes_per_page: u8,
    pub file_change_counter: u32,
    pub page_count: u32,
    pub first_freelist_page: u32,
    pub freelist_page_count: u32,
    pub schema_cookie: u32,
    pub schema_format: u32,
    pub default_cache_size: u32,
    pub largest_root_page: u32,
    pub text_encoding: TextEncoding,
    pub user_version: u32,
    pub incremental_vacuum: bool,
    pub application_id: u32,
    pub version_valid_for: u32,
    pub sqlite_version_number: u32,
}

impl DatabaseHeader {
    /// `UsablePageSize = PageSize - ReservedBytesPerPage`.
    pub fn usable_page_size(&self) -> u32 {
        self.page_size - self.reserved_bytes_per_page as u32
    }

    /// WAL mode iff the write-format version is 2.
    pub fn is_wal_mode(&self) -> bool {
        self.write_version == 2
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DATABASE_HEADER_BYTES {
            return Err(Error::invalid_database(
                "file shorter than the 100-byte database header",
                ErrorContext::new("parse database header"),
            ));
        }
        let mut c = Cursor::new(bytes);

        let mut magic = [0u8; 16];
        c.read_exact(&mut magic)
            .map_err(|e| Error::io("parse database header", e))?;
        if &magic != MAGIC {
            return Err(Error::invalid_database(
                "magic string mismatch",
                ErrorContext::new("parse database header").at_offset(0),
            ));
        }

        let raw_page_size = read_u16(&mut c, "parse database header", 16)?;
        let page_size: u32 = match raw_page_size {
            1 => 65536,
            n if n.is_power_of_two() && (512..=32768).contains(&n) => n as u32,
            n => {
                return Err(Error::invalid_database(
                    format!("unsupported page size {n}"),
                    ErrorContext::new("parse database header").at_offset(16),
                ))
            }
        };

        let write_version = read_u8(&mut c, "parse database header", 18)?;
        let read_version = read_u8(&mut c, "parse database header", 19)?;
        let reserved_bytes_per_page = read_u8(&mut c, "parse database header", 20)?;

        // Offsets 21..24: max/min embedded payload fraction, leaf payload
        // fraction. Fixed by the format at 64/32/32; SQLite itself never
        // varies these, so a mismatch means the file is not well-formed.
        let max_payload_fraction = read_u8(&mut c, "parse database header", 21)?;
        let min_payload_fraction = read_u8(&mut c, "parse database header", 22)?;
        let leaf_payload_fraction = read_u8(&mut c, "parse database header", 23)?;
        if (max_payload_fraction, min_payload_fraction, leaf_payload_fraction) != (64, 32, 32) {
            return Err(Error::invalid_database(
                "payload fraction bytes do not match the fixed SQLite constants",
                ErrorContext::new("parse database header").at_offset(21),
            ));
        }

        let file_change_counter = read_u32(&mut c, "parse database header", 24)?;
        let page_count = read_u32(&mut c, "parse database header", 28)?;
        let first_freelist_page = read_u32(&mut c, "parse database header", 32)?;
        let freelist_page_count = read_u32(&mut c, "parse database header", 36)?;
        let schema_cookie = read_u32(&mut c, "parse database header", 40)?;
        let schema_format = read_u32(&mut c, "parse database header", 44)?;
        if !(1..=4).contains(&schema_format) {
            return Err(Error::invalid_database(
                format!("unsupported schema format {schema_format}"),
                ErrorContext::new("parse database header").at_offset(44),
            ));
        }
        let default_cache_size = read_u32(&mut c, "parse database header", 48)?;
        let largest_root_page = read_u32(&mut c, "parse database header", 52)?;
        let text_encoding = TextEncoding::from_code(read_u32(&mut c, "parse database header", 56)?)?;
        let user_version = read_u32(&mut c, "parse database header", 60)?;
        let incremental_vacuum = read_u32(&mut c, "parse database header", 64)? != 0;
        let application_id = read_u32(&mut c, "parse database header", 68)?;

        // Offset 72..92: reserved for expansion, must be zero.
        c.seek(SeekFrom::Start(72))
            .map_err(|e| Error::io("parse database header", e))?;
        let mut reserved = [0u8; 20];
        c.read_exact(&mut reserved)
            .map_err(|e| Error::io("parse database header", e))?;
        if reserved != [0u8; 20] {
            return Err(Error::invalid_database(
                "reserved header region is not zeroed",
                ErrorContext::new("parse database header").at_offset(72),
            ));
        }

        let version_valid_for = read_u32(&mut c, "parse database header", 92)?;
        let sqlite_version_number = read_u32(&mut c, "parse database header", 96)?;

        Ok(DatabaseHeader {
            page_size,
            write_version,
            read_version,
            reserved_bytes_per_page,
            file_change_counter,
            page_count,
            first_freelist_page,
            freelist_page_count,
            schema_cookie,
            schema_format,
            default_cache_size,
            largest_root_page,
            text_encoding,
            user_version,
            incremental_vacuum,
            application_id,
            version_valid_for,
            sqlite_version_number,
        })
    }

    /// Serializes the header back to its 100-byte on-disk form. Used by the
    /// writer after bumping the change counter / page count.
    pub fn to_bytes(&self) -> [u8; DATABASE_HEADER_BYTES] {
        let mut buf = [0u8; DATABASE_HEADER_BYTES];
        buf[0..16].copy_from_slice(MAGIC);
        let page_size_code: u16 = if self.page_size == 65536 {
            1
        } else {
            self.page_size as u16
        };
        buf[16..18].copy_from_slice(&page_size_code.to_be_bytes());
        buf[18] = self.write_version;
        buf[19] = self.read_version;
        buf[20] = self.reserved_bytes_per_page;
        buf[21] = 64;
        buf[22] = 32;
        buf[23] = 32;
        buf[24..28].copy_from_slice(&self.file_change_counter.to_be_bytes());
        buf[28..32].copy_from_slice(&self.page_count.to_be_bytes());
        buf[32..36].copy_from_slice(&self.first_freelist_page.to_be_bytes());
        buf[36..40].copy_from_slice(&self.freelist_page_count.to_be_bytes());
        buf[40..44].copy_from_slice(&self.schema_cookie.to_be_bytes());
        buf[44..48].copy_from_slice(&self.schema_format.to_be_bytes());
        buf[48..52].copy_from_slice(&self.default_cache_size.to_be_bytes());
        buf[52..56].copy_from_slice(&self.largest_root_page.to_be_bytes());
        let enc_code: u32 = match self.text_encoding {
            TextEncoding::Utf8 => 1,
            TextEncoding::Utf16Le => 2,
            TextEncoding::Utf16Be => 3,
        };
        buf[56..60].copy_from_slice(&enc_code.to_be_bytes());
        buf[60..64].copy_from_slice(&self.user_version.to_be_bytes());
        buf[64..68].copy_from_slice(&(self.incremental_vacuum as u32).to_be_bytes());
        buf[68..72].copy_from_slice(&self.application_id.to_be_bytes());
        buf[92..96].copy_from_slice(&self.version_valid_for.to_be_bytes());
        buf[96..100].copy_from_slice(&self.sqlite_version_number.to_be_bytes());
        buf
    }
}

fn read_u8(c: &mut Cursor<&[u8]>, op: &'static str, offset: usize) -> Result<u8> {
    c.read_u8()
        .map_err(|e| Error::invalid_database(format!("truncated header: {e}"), ErrorContext::new(op).at_offset(offset)))
}

fn read_u16(c: &mut Cursor<&[u8]>, op: &'static str, offset: usize) -> Result<u16> {
    c.read_u16::<BigEndian>()
        .map_err(|e| Error::invalid_database(format!("truncated header: {e}"), ErrorContext::new(op).at_offset(offset)))
}

fn read_u32(c: &mut Cursor<&[u8]>, op: &'static str, offset: usize) -> Result<u32> {
    c.read_u32::<BigEndian>()
        .map_err(|e| Error::invalid_database(format!("truncated header: {e}"), ErrorContext::new(op).at_offset(offset)))
}

/// B-tree page type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtreePageType {
    InteriorIndex,
    InteriorTable,
    LeafIndex,
    LeafTable,
}

impl BtreePageType {
    pub fn is_leaf(self) -> bool {
        matches!(self, BtreePageType::LeafIndex | BtreePageType::LeafTable)
    }

    pub fn is_table(self) -> bool {
        matches!(self, BtreePageType::InteriorTable | BtreePageType::LeafTable)
    }

    fn from_byte(b: u8, page_number: u32) -> Result<Self> {
        match b {
            0x02 => Ok(BtreePageType::InteriorIndex),
            0x05 => Ok(BtreePageType::InteriorTable),
            0x0a => Ok(BtreePageType::LeafIndex),
            0x0d => Ok(BtreePageType::LeafTable),
            other => Err(Error::corrupt_page(
                format!("invalid b-tree page type byte 0x{other:02x}"),
                ErrorContext::new("parse b-tree page header").at_page(page_number),
            )),
        }
    }
}

/// The 8-byte (leaf) or 12-byte (interior) header at the start of every
/// b-tree page, immediately following the 100-byte file header on page 1.
#[derive(Debug, Clone, Copy)]
pub struct BtreePageHeader {
    pub page_type: BtreePageType,
    pub first_freeblock: u16,
    pub cell_count: u16,
    pub cell_content_start: u32,
    pub fragmented_free_bytes: u8,
    /// Present only on interior pages; `None` on leaf pages.
    pub rightmost_pointer: Option<u32>,
}

impl BtreePageHeader {
    /// Size in bytes of this header on disk: 12 for interior pages, 8 for
    /// leaf pages.
    pub fn header_size(&self) -> usize {
        if self.rightmost_pointer.is_some() {
            12
        } else {
            8
        }
    }

    /// Parses the header starting at `page_offset` within `page`
    /// (`page_offset` is 100 on page 1, 0 elsewhere).
    pub fn parse(page: &[u8], page_offset: usize, page_number: u32) -> Result<Self> {
        let op = "parse b-tree page header";
        let ctx = || ErrorContext::new(op).at_page(page_number);
        let byte_at = |off: usize| -> Result<u8> {
            page.get(off)
                .copied()
                .ok_or_else(|| Error::corrupt_page("page too short for b-tree header", ctx().at_offset(off)))
        };
        let page_type = BtreePageType::from_byte(byte_at(page_offset)?, page_number)?;

        let mut c = Cursor::new(page);
        c.seek(SeekFrom::Start(page_offset as u64 + 1))
            .map_err(|e| Error::io(op, e))?;
        let first_freeblock = c
            .read_u16::<BigEndian>()
            .map_err(|e| Error::corrupt_page(format!("{e}"), ctx().at_offset(page_offset + 1)))?;
        let cell_count = c
            .read_u16::<BigEndian>()
            .map_err(|e| Error::corrupt_page(format!("{e}"), ctx().at_offset(page_offset + 3)))?;
        // A stored value of 0 means the cell content area starts at 65536.
        let raw_content_start = c
            .read_u16::<BigEndian>()
            .map_err(|e| Error::corrupt_page(format!("{e}"), ctx().at_offset(page_offset + 5)))?;
        let cell_content_start = if raw_content_start == 0 { 65536 } else { raw_content_start as u32 };
        let fragmented_free_bytes = c
            .read_u8()
            .map_err(|e| Error::corrupt_page(format!("{e}"), ctx().at_offset(page_offset + 7)))?;

        let rightmost_pointer = if page_type.is_leaf() {
            None
        } else {
            Some(
                c.read_u32::<BigEndian>()
                    .map_err(|e| Error::corrupt_page(format!("{e}"), ctx().at_offset(page_offset + 8)))?,
            )
        };

        Ok(BtreePageHeader {
            page_type,
            first_freeblock,
            cell_count,
            cell_content_start,
            fragmented_free_bytes,
            rightmost_pointer,
        })
    }
}

/// Read-only WAL header and WAL-frame header parsing: lets a caller detect
/// and read through an active WAL file rather than rejecting the database
/// outright.
pub mod wal {
    use super::*;

    pub const WAL_HEADER_BYTES: usize = 32;
    pub const WAL_FRAME_HEADER_BYTES: usize = 24;

    const WAL_MAGIC_BE: u32 = 0x377f0683;
    const WAL_MAGIC_LE: u32 = 0x377f0682;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum WalByteOrder {
        Big,
        Little,
    }

    #[derive(Debug, Clone)]
    pub struct WalHeader {
        pub byte_order: WalByteOrder,
        pub format_version: u32,
        pub page_size: u32,
        pub checkpoint_sequence: u32,
        pub salt1: u32,
        pub salt2: u32,
        pub checksum1: u32,
        pub checksum2: u32,
    }

    impl WalHeader {
        pub fn parse(bytes: &[u8]) -> Result<Self> {
            let op = "parse WAL header";
            if bytes.len() < WAL_HEADER_BYTES {
                return Err(Error::invalid_database(
                    "file shorter than the 32-byte WAL header",
                    ErrorContext::new(op),
                ));
            }
            let magic = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
            let byte_order = match magic {
                WAL_MAGIC_BE => WalByteOrder::Big,
                WAL_MAGIC_LE => WalByteOrder::Little,
                other => {
                    return Err(Error::invalid_database(
                        format!("unrecognized WAL magic 0x{other:08x}"),
                        ErrorContext::new(op).at_offset(0),
                    ))
                }
            };
            let mut c = Cursor::new(bytes);
            c.seek(SeekFrom::Start(4)).map_err(|e| Error::io(op, e))?;
            let format_version = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            let page_size = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            let checkpoint_sequence = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            let salt1 = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            let salt2 = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            let checksum1 = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            let checksum2 = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            Ok(WalHeader {
                byte_order,
                format_version,
                page_size,
                checkpoint_sequence,
                salt1,
                salt2,
                checksum1,
                checksum2,
            })
        }
    }

    /// Per-frame header: page number, db size (nonzero only on a commit
    /// frame), salts matching the WAL header, and frame checksums.
    #[derive(Debug, Clone, Copy)]
    pub struct WalFrameHeader {
        pub page_number: u32,
        pub db_size_after_commit: u32,
        pub salt1: u32,
        pub salt2: u32,
        pub checksum1: u32,
        pub checksum2: u32,
    }

    impl WalFrameHeader {
        pub fn parse(bytes: &[u8]) -> Result<Self> {
            let op = "parse WAL frame header";
            if bytes.len() < WAL_FRAME_HEADER_BYTES {
                return Err(Error::invalid_database(
                    "buffer shorter than the 24-byte WAL frame header",
                    ErrorContext::new(op),
                ));
            }
            let mut c = Cursor::new(bytes);
            let page_number = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            let db_size_after_commit = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            let salt1 = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            let salt2 = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            let checksum1 = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            let checksum2 = c.read_u32::<BigEndian>().map_err(|e| Error::io(op, e))?;
            Ok(WalFrameHeader {
                page_number,
                db_size_after_commit,
                salt1,
                salt2,
                checksum1,
                checksum2,
            })
        }

        /// A frame with a nonzero `db_size_after_commit` ends a transaction.
        pub fn is_commit_frame(&self) -> bool {
            self.db_size_after_commit != 0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header_bytes() -> [u8; DATABASE_HEADER_BYTES] {
        let h = DatabaseHeader {
            page_size: 4096,
            write_version: 1,
            read_version: 1,
            reserved_bytes_per_page: 0,
            file_change_counter: 1,
            page_count: 2,
            first_freelist_page: 0,
            freelist_page_count: 0,
            schema_cookie: 1,
            schema_format: 4,
            default_cache_size: 0,
            largest_root_page: 0,
            text_encoding: TextEncoding::Utf8,
            user_version: 0,
            incremental_vacuum: false,
            application_id: 0,
            version_valid_for: 1,
            sqlite_version_number: 3045000,
        };
        h.to_bytes()
    }

    #[test]
    fn parses_a_well_formed_header() {
        let bytes = sample_header_bytes();
        let h = DatabaseHeader::parse(&bytes).unwrap();
        assert_eq!(h.page_size, 4096);
        assert_eq!(h.usable_page_size(), 4096);
        assert!(!h.is_wal_mode());
        assert_eq!(h.text_encoding, TextEncoding::Utf8);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample_header_bytes();
        bytes[0] = b'X';
        assert!(DatabaseHeader::parse(&bytes).is_err());
    }

    #[test]
    fn page_size_code_one_means_65536() {
        let mut h_bytes = sample_header_bytes();
        h_bytes[16] = 0;
        h_bytes[17] = 1;
        let h = DatabaseHeader::parse(&h_bytes).unwrap();
        assert_eq!(h.page_size, 65536);
    }

    #[test]
    fn leaf_table_header_has_no_rightmost_pointer() {
        let mut page = vec![0u8; 8];
        page[0] = 0x0d;
        page[3] = 0; // cell count hi
        page[4] = 5; // cell count lo
        let header = BtreePageHeader::parse(&page, 0, 1).unwrap();
        assert_eq!(header.page_type, BtreePageType::LeafTable);
        assert_eq!(header.cell_count, 5);
        assert!(header.rightmost_pointer.is_none());
        assert_eq!(header.header_size(), 8);
    }

    #[test]
    fn interior_table_header_reads_rightmost_pointer() {
        let mut page = vec![0u8; 12];
        page[0] = 0x05;
        page[8..12].copy_from_slice(&42u32.to_be_bytes());
        let header = BtreePageHeader::parse(&page, 0, 1).unwrap();
        assert_eq!(header.page_type, BtreePageType::InteriorTable);
        assert_eq!(header.rightmost_pointer, Some(42));
        assert_eq!(header.header_size(), 12);
    }

    #[test]
    fn rejects_unknown_page_type_byte() {
        let page = vec![0u8; 12];
        assert!(BtreePageHeader::parse(&page, 0, 1).is_err());
    }
}
