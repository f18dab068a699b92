//! Record codec: the SQLite "record format" used for every
//! table and index cell body -- a header of serial-type varints followed by
//! the concatenated column bodies.

use enum_as_inner::EnumAsInner;

use crate::error::{Error, ErrorContext, Result};
use crate::varint::read_varint;

/// A decoded column value. The rowid-alias column decodes as `Null` when
/// its serial type is 0 -- callers that need the actual value read it off
/// the cell's rowid instead.
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum ColumnValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

fn op() -> &'static str {
    "decode record"
}

/// Number of body bytes a serial type occupies, or `None` for the two
/// values SQLite reserves and never produces (10, 11).
fn serial_type_body_len(serial_type: i64) -> Option<usize> {
    match serial_type {
        0 | 8 | 9 => Some(0),
        1 => Some(1),
        2 => Some(2),
        3 => Some(3),
        4 => Some(4),
        5 => Some(6),
        6 | 7 => Some(8),
        10 | 11 => None,
        n if n >= 12 && n % 2 == 0 => Some(((n - 12) / 2) as usize),
        n if n >= 13 => Some(((n - 13) / 2) as usize),
        _ => None,
    }
}

/// Sign-extends an N-byte big-endian two's-complement integer into an
/// `i64`. N is one of the widths SQLite's integer serial types use: 1, 2,
/// 3, 4, 6, or 8.
fn decode_signed_be(bytes: &[u8]) -> i64 {
    let mut value: i64 = 0;
    for &b in bytes {
        value = (value << 8) | b as i64;
    }
    let bits = bytes.len() * 8;
    if bits < 64 && (value & (1 << (bits - 1))) != 0 {
        value -= 1 << bits;
    }
    value
}

fn decode_value(serial_type: i64, body: &[u8]) -> Result<ColumnValue> {
    match serial_type {
        0 => Ok(ColumnValue::Null),
        1..=6 => Ok(ColumnValue::Integer(decode_signed_be(body))),
        7 => {
            let bits = u64::from_be_bytes(
                body.try_into()
                    .map_err(|_| Error::corrupt_page("float64 serial type with wrong body length", ErrorContext::new(op())))?,
            );
            Ok(ColumnValue::Float(f64::from_bits(bits)))
        }
        8 => Ok(ColumnValue::Integer(0)),
        9 => Ok(ColumnValue::Integer(1)),
        10 | 11 => Err(Error::corrupt_page(
            format!("reserved serial type {serial_type} encountered"),
            ErrorContext::new(op()),
        )),
        n if n >= 12 && n % 2 == 0 => Ok(ColumnValue::Blob(body.to_vec())),
        n if n >= 13 => Ok(ColumnValue::Text(body.to_vec())),
        n => Err(Error::corrupt_page(format!("negative serial type {n}"), ErrorContext::new(op()))),
    }
}

/// One `(serial_type, body_offset, body_len)` triple, produced while
/// scanning the record header.
struct ColumnSlot {
    serial_type: i64,
    offset: usize,
    len: usize,
}

/// Walks the record header, returning the column slots. Shared by
/// `decode_record`, `decode_column`, and `column_count` so none of them
/// duplicate the varint walk.
fn scan_header(bytes: &[u8]) -> Result<Vec<ColumnSlot>> {
    if bytes.is_empty() {
        return Err(Error::corrupt_page("empty record", ErrorContext::new(op())));
    }
    let (header_len, header_len_size) = read_varint(bytes);
    let header_len = header_len as usize;
    if header_len > bytes.len() {
        return Err(Error::corrupt_page(
            "record header length exceeds record size",
            ErrorContext::new(op()),
        ));
    }

    let mut slots = Vec::new();
    let mut cursor = header_len_size;
    let mut body_offset = header_len;
    while cursor < header_len {
        let (serial_type, n) = read_varint(&bytes[cursor..header_len]);
        cursor += n;
        let body_len = serial_type_body_len(serial_type)
            .ok_or_else(|| Error::corrupt_page(format!("invalid serial type {serial_type}"), ErrorContext::new(op())))?;
        if body_offset + body_len > bytes.len() {
            return Err(Error::corrupt_page("column body runs past end of record", ErrorContext::new(op())));
        }
        slots.push(ColumnSlot {
            serial_type,
            offset: body_offset,
            len: body_len,
        });
        body_offset += body_len;
    }
    Ok(slots)
}

/// Decodes every column of a record.
pub fn decode_record(bytes: &[u8]) -> Result<Vec<ColumnValue>> {
    let slots = scan_header(bytes)?;
    slots
        .into_iter()
        .map(|slot| decode_value(slot.serial_type, &bytes[slot.offset..slot.offset + slot.len]))
        .collect()
}

/// Decodes just column `index`, without materializing columns before or
/// after it. An index past the last column decodes as `Null` (schema
/// evolution: a row written before a column was added).
pub fn decode_column(bytes: &[u8], index: usize) -> Result<ColumnValue> {
    let slots = scan_header(bytes)?;
    match slots.get(index) {
        Some(slot) => decode_value(slot.serial_type, &bytes[slot.offset..slot.offset + slot.len]),
        None => Ok(ColumnValue::Null),
    }
}

/// Number of columns encoded in the record.
pub fn column_count(bytes: &[u8]) -> Result<usize> {
    Ok(scan_header(bytes)?.len())
}

fn serial_type_for(value: &ColumnValue) -> (i64, usize) {
    match value {
        ColumnValue::Null => (0, 0),
        ColumnValue::Integer(0) => (8, 0),
        ColumnValue::Integer(1) => (9, 0),
        ColumnValue::Integer(v) => {
            let v = *v;
            if (-128..=127).contains(&v) {
                (1, 1)
            } else if (-32768..=32767).contains(&v) {
                (2, 2)
            } else if (-8_388_608..=8_388_607).contains(&v) {
                (3, 3)
            } else if (-2_147_483_648..=2_147_483_647).contains(&v) {
                (4, 4)
            } else if (-(1i64 << 47)..(1i64 << 47)).contains(&v) {
                (5, 6)
            } else {
                (6, 8)
            }
        }
        ColumnValue::Float(_) => (7, 8),
        ColumnValue::Blob(b) => (12 + 2 * b.len() as i64, b.len()),
        ColumnValue::Text(t) => (13 + 2 * t.len() as i64, t.len()),
    }
}

fn write_body(value: &ColumnValue, width: usize, out: &mut Vec<u8>) {
    match value {
        ColumnValue::Null | ColumnValue::Integer(0) | ColumnValue::Integer(1) => {}
        ColumnValue::Integer(v) => {
            let bytes = v.to_be_bytes();
            out.extend_from_slice(&bytes[8 - width..]);
        }
        ColumnValue::Float(f) => out.extend_from_slice(&f.to_bits().to_be_bytes()),
        ColumnValue::Blob(b) => out.extend_from_slice(b),
        ColumnValue::Text(t) => out.extend_from_slice(t),
    }
}

/// Encodes `values` as a record. `rowid_alias_column` (if any) is the
/// ordinal of the column declared `INTEGER PRIMARY KEY`, which is always
/// written as serial type 0 -- its value is recovered from the cell's
/// rowid instead.
pub fn encode_record(values: &[ColumnValue], rowid_alias_column: Option<usize>) -> Vec<u8> {
    let mut serial_types = Vec::with_capacity(values.len());
    let mut widths = Vec::with_capacity(values.len());
    for (i, v) in values.iter().enumerate() {
        if Some(i) == rowid_alias_column {
            serial_types.push(0);
            widths.push(0);
        } else {
            let (st, w) = serial_type_for(v);
            serial_types.push(st);
            widths.push(w);
        }
    }

    let mut header_body = Vec::new();
    for st in &serial_types {
        crate::varint::write_varint(*st, &mut header_body);
    }

    // The header-length varint's own size can itself grow when the header
    // body is long enough to need a wider encoding; fixed-point iterate
    // until the declared length matches the actual total.
    let mut header_len = header_body.len();
    loop {
        let total = crate::varint::varint_len(header_len as i64) + header_body.len();
        if total == header_len {
            break;
        }
        header_len = total;
    }

    let mut out = Vec::new();
    crate::varint::write_varint(header_len as i64, &mut out);
    out.extend_from_slice(&header_body);
    for (i, v) in values.iter().enumerate() {
        if Some(i) != rowid_alias_column {
            write_body(v, widths[i], &mut out);
        }
    }
    out
}
