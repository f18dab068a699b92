//! Hash join: build an index over the right side (required for
//! LEFT/CROSS, and reused for INNER/FULL OUTER for a single code path),
//! probe the left side, and track which right-side rows matched using a
//! tracker sized to the build side.

use std::collections::{HashMap, HashSet};

use crate::query::intent::JoinKind;
use crate::record::ColumnValue;

/// A join key: `ColumnValue` is not `Hash`/`Eq` (it carries an `f64`
/// variant), so join keys normalize to this smaller, hashable shape.
/// Float keys compare by bit pattern, consistent with joins only ever
/// being meaningful on keys with exact equality semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum JoinKey {
    Integer(i64),
    FloatBits(u64),
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

fn join_key(value: &ColumnValue) -> Option<JoinKey> {
    match value {
        ColumnValue::Null => None,
        ColumnValue::Integer(v) => Some(JoinKey::Integer(*v)),
        ColumnValue::Float(v) => Some(JoinKey::FloatBits(v.to_bits())),
        ColumnValue::Text(v) => Some(JoinKey::Text(v.clone())),
        ColumnValue::Blob(v) => Some(JoinKey::Blob(v.clone())),
    }
}

/// Marks which build-side row indices have been matched by at least one
/// probe row, sized to the build side per's three tiers. All three
/// tiers support the same `mark`/`is_marked` operations; callers never see
/// which representation backs a given join.
enum MatchTracker {
    /// <=256 build rows: a fixed 32-byte bit array.
    Bits(Vec<u8>),
    /// <=8192 build rows: a pooled bit-packed word array (<=1 KiB).
    Packed(Vec<u64>),
    /// >8192 build rows: an open-addressed set of matched indices rather
    /// than a multi-kilobyte bit array.
    OpenAddressed(HashSet<usize>),
}

impl MatchTracker {
    fn new(build_len: usize) -> Self {
        if build_len <= 256 {
            MatchTracker::Bits(vec![0u8; 32])
        } else if build_len <= 8192 {
            MatchTracker::Packed(vec![0u64; build_len.div_ceil(64)])
        } else {
            MatchTracker::OpenAddressed(HashSet::new())
        }
    }

    fn mark(&mut self, index: usize) {
        match self {
            MatchTracker::Bits(bits) => bits[index / 8] |= 1 << (index % 8),
            MatchTracker::Packed(words) => words[index / 64] |= 1 << (index % 64),
            MatchTracker::OpenAddressed(set) => {
                set.insert(index);
            }
        }
    }

    fn is_marked(&self, index: usize) -> bool {
        match self {
            MatchTracker::Bits(bits) => bits[index / 8] & (1 << (index % 8)) != 0,
            MatchTracker::Packed(words) => words[index / 64] & (1 << (index % 64)) != 0,
            MatchTracker::OpenAddressed(set) => set.contains(&index),
        }
    }
}

/// Joins `left` against `right` on the given key columns. Always emits
/// `left_row ++ right_row`; the right side is the hash build side for
/// every kind. NULL keys never match anything (SQL null <> null).
pub fn hash_join(
    left: &[Vec<ColumnValue>],
    right: &[Vec<ColumnValue>],
    left_key_col: usize,
    right_key_col: usize,
    kind: JoinKind,
) -> Vec<Vec<ColumnValue>> {
    if kind == JoinKind::Cross {
        let mut out = Vec::with_capacity(left.len() * right.len());
        for l in left {
            for r in right {
                out.push(concat_rows(l, r));
            }
        }
        return out;
    }

    let mut index: HashMap<JoinKey, Vec<usize>> = HashMap::new();
    for (i, row) in right.iter().enumerate() {
        if let Some(key) = row.get(right_key_col).and_then(join_key) {
            index.entry(key).or_default().push(i);
        }
    }

    let mut tracker = MatchTracker::new(right.len());
    let right_width = right.first().map_or(0, |r| r.len());
    let mut out = Vec::new();

    for left_row in left {
        let key = left_row.get(left_key_col).and_then(join_key);
        let matches = key.as_ref().and_then(|k| index.get(k));
        match matches {
            Some(right_indices) if !right_indices.is_empty() => {
                for &ri in right_indices {
                    tracker.mark(ri);
                    out.push(concat_rows(left_row, &right[ri]));
                }
            }
            _ => {
                if matches!(kind, JoinKind::Left | JoinKind::FullOuter) {
                    out.push(concat_rows(left_row, &null_row(right_width)));
                }
            }
        }
    }

    if kind == JoinKind::FullOuter {
        let left_width = left.first().map_or(0, |r| r.len());
        for (i, row) in right.iter().enumerate() {
            if !tracker.is_marked(i) {
                out.push(concat_rows(&null_row(left_width), row));
            }
        }
    }

    out
}

fn concat_rows(left: &[ColumnValue], right: &[ColumnValue]) -> Vec<ColumnValue> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    out.extend_from_slice(left);
    out.extend_from_slice(right);
    out
}

fn null_row(width: usize) -> Vec<ColumnValue> {
    vec![ColumnValue::Null; width]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Vec<Vec<ColumnValue>> {
        vec![
            vec![ColumnValue::Integer(1), ColumnValue::Integer(10)],
            vec![ColumnValue::Integer(2), ColumnValue::Integer(10)],
            vec![ColumnValue::Integer(3), ColumnValue::Integer(20)],
            vec![ColumnValue::Integer(4), ColumnValue::Null],
            vec![ColumnValue::Integer(5), ColumnValue::Integer(30)],
        ]
    }

    fn depts() -> Vec<Vec<ColumnValue>> {
        vec![
            vec![ColumnValue::Integer(10), ColumnValue::Text(b"eng".to_vec())],
            vec![ColumnValue::Integer(20), ColumnValue::Text(b"sales".to_vec())],
            vec![ColumnValue::Integer(40), ColumnValue::Text(b"legal".to_vec())],
        ]
    }

    #[test]
    fn inner_join_matches_on_shared_key() {
        let result = hash_join(&users(), &depts(), 1, 0, JoinKind::Inner);
        // Users 1,2 -> eng; user 3 -> sales; user 4 has a NULL key; user 5's
        // dept 30 has no matching department row.
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn left_join_null_pads_unmatched_left_rows() {
        let result = hash_join(&users(), &depts(), 1, 0, JoinKind::Left);
        assert_eq!(result.len(), 5);
        let unmatched = result.iter().find(|r| r[0] == ColumnValue::Integer(4)).unwrap();
        assert_eq!(unmatched[2], ColumnValue::Null);
    }

    #[test]
    fn full_outer_also_emits_unmatched_right_rows() {
        let result = hash_join(&users(), &depts(), 1, 0, JoinKind::FullOuter);
        // Plus the unmatched "legal" department row, null-padded on the user side.
        assert_eq!(result.len(), 6);
        let legal = result.iter().find(|r| r[2] == ColumnValue::Integer(40)).unwrap();
        assert_eq!(legal[0], ColumnValue::Null);
    }

    #[test]
    fn cross_join_is_the_full_cartesian_product() {
        let result = hash_join(&users(), &depts(), 1, 0, JoinKind::Cross);
        assert_eq!(result.len(), users().len() * depts().len());
    }

    #[test]
    fn null_keys_never_match() {
        let left = vec![vec![ColumnValue::Null, ColumnValue::Integer(1)]];
        let right = vec![vec![ColumnValue::Null, ColumnValue::Integer(2)]];
        let result = hash_join(&left, &right, 0, 0, JoinKind::Inner);
        assert!(result.is_empty());
    }
}
