//! Three-valued filter evaluation: `IS NULL` is the only operator
//! that evaluates true against a NULL column; every other comparison
//! evaluates to NULL (propagated through `AND`/`OR`/`NOT`) when either
//! operand is NULL.

use crate::query::intent::{FilterTree, IntentValue, PredicateNode};
use crate::record::ColumnValue;

/// Evaluates `tree` against `row`, returning `None` for NULL (unknown).
/// A row passes a `WHERE`/`HAVING` clause iff this returns `Some(true)`.
pub fn evaluate(tree: &FilterTree, row: &[ColumnValue]) -> Option<bool> {
    match tree.root {
        None => Some(true),
        Some(root) => eval_node(tree, root, row),
    }
}

fn eval_node(tree: &FilterTree, index: usize, row: &[ColumnValue]) -> Option<bool> {
    match &tree.nodes[index] {
        PredicateNode::And(a, b) => tri_and(eval_node(tree, *a, row), eval_node(tree, *b, row)),
        PredicateNode::Or(a, b) => tri_or(eval_node(tree, *a, row), eval_node(tree, *b, row)),
        PredicateNode::Not(a) => eval_node(tree, *a, row).map(|v| !v),
        PredicateNode::Eq(col, v) => cmp(row, *col, v, |o| o == std::cmp::Ordering::Equal),
        PredicateNode::Neq(col, v) => cmp(row, *col, v, |o| o != std::cmp::Ordering::Equal),
        PredicateNode::Gt(col, v) => cmp(row, *col, v, |o| o == std::cmp::Ordering::Greater),
        PredicateNode::Gte(col, v) => cmp(row, *col, v, |o| o != std::cmp::Ordering::Less),
        PredicateNode::Lt(col, v) => cmp(row, *col, v, |o| o == std::cmp::Ordering::Less),
        PredicateNode::Lte(col, v) => cmp(row, *col, v, |o| o != std::cmp::Ordering::Greater),
        PredicateNode::IsNull(col) => Some(matches!(row.get(*col), Some(ColumnValue::Null) | None)),
        PredicateNode::IsNotNull(col) => Some(!matches!(row.get(*col), Some(ColumnValue::Null) | None)),
        PredicateNode::Between(col, lo, hi) => {
            tri_and(cmp(row, *col, lo, |o| o != std::cmp::Ordering::Less), cmp(row, *col, hi, |o| o != std::cmp::Ordering::Greater))
        }
        PredicateNode::In(col, set) => eval_in(row, *col, set).map(|v| v),
        PredicateNode::NotIn(col, set) => eval_in(row, *col, set).map(|v| !v),
        PredicateNode::Like(col, pattern) => text_op(row, *col, |t| like_match(t, pattern)),
        PredicateNode::NotLike(col, pattern) => text_op(row, *col, |t| !like_match(t, pattern)),
        PredicateNode::StartsWith(col, prefix) => text_op(row, *col, |t| t.starts_with(prefix.as_str())),
        PredicateNode::EndsWith(col, suffix) => text_op(row, *col, |t| t.ends_with(suffix.as_str())),
        PredicateNode::Contains(col, needle) => text_op(row, *col, |t| t.contains(needle.as_str())),
    }
}

fn tri_and(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn tri_or(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn cmp(row: &[ColumnValue], col: usize, value: &IntentValue, accept: impl Fn(std::cmp::Ordering) -> bool) -> Option<bool> {
    let column = row.get(col)?;
    value.partial_cmp_column(column).map(accept)
}

fn eval_in(row: &[ColumnValue], col: usize, set: &IntentValue) -> Option<bool> {
    let column = row.get(col)?;
    if matches!(column, ColumnValue::Null) {
        return None;
    }
    match set {
        IntentValue::Signed64Set(values) => match column {
            ColumnValue::Integer(v) => Some(values.contains(v)),
            ColumnValue::Float(v) => Some(values.iter().any(|x| *x as f64 == *v)),
            _ => Some(false),
        },
        IntentValue::TextSet(values) => match column {
            ColumnValue::Text(t) => {
                let text = String::from_utf8_lossy(t);
                Some(values.iter().any(|v| v == text.as_ref()))
            }
            _ => Some(false),
        },
        _ => Some(false),
    }
}

fn text_op(row: &[ColumnValue], col: usize, check: impl Fn(&str) -> bool) -> Option<bool> {
    match row.get(col) {
        Some(ColumnValue::Text(bytes)) => Some(check(&String::from_utf8_lossy(bytes))),
        Some(ColumnValue::Null) | None => None,
        Some(_) => Some(false),
    }
}

/// `%` matches any run of characters, `_` matches exactly one. No escape
/// character support.
fn like_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    like_rec(&t, &p)
}

fn like_rec(t: &[char], p: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('%') => like_rec(t, &p[1..]) || (!t.is_empty() && like_rec(&t[1..], p)),
        Some('_') => !t.is_empty() && like_rec(&t[1..], &p[1..]),
        Some(c) => !t.is_empty() && t[0] == *c && like_rec(&t[1..], &p[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::intent::PredicateNode;

    fn row() -> Vec<ColumnValue> {
        vec![ColumnValue::Integer(5), ColumnValue::Text(b"hello world".to_vec()), ColumnValue::Null]
    }

    #[test]
    fn eq_and_gt_evaluate() {
        let tree = FilterTree {
            nodes: vec![PredicateNode::Eq(0, IntentValue::Signed64(5))],
            root: Some(0),
        };
        assert_eq!(evaluate(&tree, &row()), Some(true));
    }

    #[test]
    fn is_null_is_the_only_true_comparison_against_null() {
        let tree = FilterTree {
            nodes: vec![PredicateNode::IsNull(2)],
            root: Some(0),
        };
        assert_eq!(evaluate(&tree, &row()), Some(true));

        let tree_eq = FilterTree {
            nodes: vec![PredicateNode::Eq(2, IntentValue::Signed64(1))],
            root: Some(0),
        };
        assert_eq!(evaluate(&tree_eq, &row()), None);
    }

    #[test]
    fn three_valued_and_or() {
        assert_eq!(tri_and(Some(false), None), Some(false));
        assert_eq!(tri_or(Some(true), None), Some(true));
        assert_eq!(tri_and(Some(true), None), None);
        assert_eq!(tri_or(Some(false), None), None);
    }

    #[test]
    fn like_wildcards() {
        assert!(like_match("hello world", "hel%"));
        assert!(like_match("hello world", "h_llo%"));
        assert!(!like_match("hello world", "bye%"));
    }

    #[test]
    fn in_set_membership() {
        let tree = FilterTree {
            nodes: vec![PredicateNode::In(0, IntentValue::Signed64Set(vec![1, 5, 9]))],
            root: Some(0),
        };
        assert_eq!(evaluate(&tree, &row()), Some(true));
    }
}
