//! Set operations: `UNION ALL` is a plain concatenation; `UNION` /
//! `INTERSECT` / `EXCEPT` materialize into a hash map keyed on the full row
//! tuple to dedup.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::query::intent::SetOpKind;
use crate::record::ColumnValue;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey(Vec<RowKeyPart>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKeyPart {
    Null,
    Integer(i64),
    FloatBits(u64),
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

fn row_key(row: &[ColumnValue]) -> RowKey {
    RowKey(
        row.iter()
            .map(|v| match v {
                ColumnValue::Null => RowKeyPart::Null,
                ColumnValue::Integer(i) => RowKeyPart::Integer(*i),
                ColumnValue::Float(f) => RowKeyPart::FloatBits(f.to_bits()),
                ColumnValue::Text(t) => RowKeyPart::Text(t.clone()),
                ColumnValue::Blob(b) => RowKeyPart::Blob(b.clone()),
            })
            .collect(),
    )
}

/// Applies `op` to combine `left` and `right`, which must have the same
/// column count.
pub fn apply(op: SetOpKind, left: Vec<Vec<ColumnValue>>, right: Vec<Vec<ColumnValue>>) -> Result<Vec<Vec<ColumnValue>>> {
    if let (Some(l), Some(r)) = (left.first(), right.first()) {
        if l.len() != r.len() {
            return Err(Error::argument_error(format!(
                "set operation column count mismatch: {} vs {}",
                l.len(),
                r.len()
            )));
        }
    }

    Ok(match op {
        SetOpKind::UnionAll => {
            let mut out = left;
            out.extend(right);
            out
        }
        SetOpKind::Union => {
            let mut seen: HashMap<RowKey, ()> = HashMap::new();
            let mut out = Vec::new();
            for row in left.into_iter().chain(right) {
                let key = row_key(&row);
                if seen.insert(key, ()).is_none() {
                    out.push(row);
                }
            }
            out
        }
        SetOpKind::Intersect => {
            let right_keys: std::collections::HashSet<RowKey> = right.iter().map(|r| row_key(r)).collect();
            let mut seen = std::collections::HashSet::new();
            left.into_iter()
                .filter(|row| {
                    let key = row_key(row);
                    right_keys.contains(&key) && seen.insert(key)
                })
                .collect()
        }
        SetOpKind::Except => {
            let right_keys: std::collections::HashSet<RowKey> = right.iter().map(|r| row_key(r)).collect();
            let mut seen = std::collections::HashSet::new();
            left.into_iter()
                .filter(|row| {
                    let key = row_key(row);
                    !right_keys.contains(&key) && seen.insert(key)
                })
                .collect()
        }
    })
}
