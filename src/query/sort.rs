//! ORDER BY with LIMIT: a bounded max-heap of size `limit + offset`
//! keeps worst-case memory at `O(limit)` instead of materializing and
//! sorting the whole stream.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::query::intent::{OrderByItem, SortDirection};
use crate::record::ColumnValue;

fn column_cmp(a: &ColumnValue, b: &ColumnValue) -> Ordering {
    match (a, b) {
        (ColumnValue::Null, ColumnValue::Null) => Ordering::Equal,
        (ColumnValue::Null, _) => Ordering::Less,
        (_, ColumnValue::Null) => Ordering::Greater,
        (ColumnValue::Integer(x), ColumnValue::Integer(y)) => x.cmp(y),
        (ColumnValue::Integer(x), ColumnValue::Float(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (ColumnValue::Float(x), ColumnValue::Integer(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (ColumnValue::Float(x), ColumnValue::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (ColumnValue::Text(x), ColumnValue::Text(y)) => x.cmp(y),
        (ColumnValue::Blob(x), ColumnValue::Blob(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn row_cmp(order_by: &[OrderByItem], a: &[ColumnValue], b: &[ColumnValue]) -> Ordering {
    for item in order_by {
        let ord = column_cmp(&a[item.column], &b[item.column]);
        let ord = if item.direction == SortDirection::Descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Wraps a row so `BinaryHeap` (a max-heap) can use `row_cmp` while still
/// keeping the heap's *worst* element (by the requested ordering) on top,
/// letting a full heap evict in O(log n) as better rows arrive.
struct HeapEntry<'a> {
    row: Vec<ColumnValue>,
    order_by: &'a [OrderByItem],
    sequence: usize,
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        row_cmp(self.order_by, &self.row, &other.row) == Ordering::Equal
    }
}
impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: the heap's max (worst-ranked row) is the first one we
        // want to evict when a better row shows up.
        row_cmp(self.order_by, &self.row, &other.row).reverse().then(self.sequence.cmp(&other.sequence).reverse())
    }
}

/// Streams `rows` through a heap capped at `limit + offset`, then returns
/// the fully sorted, offset-skipped, limit-truncated result.
pub fn top_n(rows: impl Iterator<Item = Vec<ColumnValue>>, order_by: &[OrderByItem], limit: Option<usize>, offset: usize) -> Vec<Vec<ColumnValue>> {
    let cap = limit.map(|l| l + offset);

    match cap {
        None => {
            let mut all: Vec<Vec<ColumnValue>> = rows.collect();
            all.sort_by(|a, b| row_cmp(order_by, a, b));
            all.into_iter().skip(offset).collect()
        }
        Some(cap) if cap == 0 => Vec::new(),
        Some(cap) => {
            let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(cap + 1);
            for (sequence, row) in rows.enumerate() {
                heap.push(HeapEntry { row, order_by, sequence });
                if heap.len() > cap {
                    heap.pop();
                }
            }
            let mut sorted: Vec<Vec<ColumnValue>> = heap.into_sorted_vec().into_iter().map(|e| e.row).collect();
            // `into_sorted_vec` yields ascending-by-`Ord` order, which is
            // the reverse of the ranking we want since `Ord` was inverted
            // to make the heap evict the worst row.
            sorted.reverse();
            sorted.into_iter().skip(offset).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_n_keeps_only_the_best_rows() {
        let rows = (1..=10).map(|n| vec![ColumnValue::Integer(n)]);
        let order_by = vec![OrderByItem { column: 0, direction: SortDirection::Descending }];
        let result = top_n(rows, &order_by, Some(3), 0);
        assert_eq!(result, vec![vec![ColumnValue::Integer(10)], vec![ColumnValue::Integer(9)], vec![ColumnValue::Integer(8)]]);
    }

    #[test]
    fn offset_skips_leading_rows_after_sort() {
        let rows = (1..=5).map(|n| vec![ColumnValue::Integer(n)]);
        let order_by = vec![OrderByItem { column: 0, direction: SortDirection::Ascending }];
        let result = top_n(rows, &order_by, Some(2), 2);
        assert_eq!(result, vec![vec![ColumnValue::Integer(3)], vec![ColumnValue::Integer(4)]]);
    }

    #[test]
    fn no_limit_sorts_everything() {
        let rows = vec![vec![ColumnValue::Integer(3)], vec![ColumnValue::Integer(1)], vec![ColumnValue::Integer(2)]].into_iter();
        let order_by = vec![OrderByItem { column: 0, direction: SortDirection::Ascending }];
        let result = top_n(rows, &order_by, None, 0);
        assert_eq!(result, vec![vec![ColumnValue::Integer(1)], vec![ColumnValue::Integer(2)], vec![ColumnValue::Integer(3)]]);
    }
}
