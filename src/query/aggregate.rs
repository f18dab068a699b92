//! Streaming hash aggregation: one accumulator per distinct
//! `GROUP BY` tuple, folded incrementally as rows arrive rather than
//! materializing the whole input first.

use std::collections::HashMap;

use crate::query::intent::{AggregateFn, AggregateSpec};
use crate::record::ColumnValue;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey(Vec<GroupKeyPart>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKeyPart {
    Null,
    Integer(i64),
    FloatBits(u64),
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

fn group_key_part(value: &ColumnValue) -> GroupKeyPart {
    match value {
        ColumnValue::Null => GroupKeyPart::Null,
        ColumnValue::Integer(v) => GroupKeyPart::Integer(*v),
        ColumnValue::Float(v) => GroupKeyPart::FloatBits(v.to_bits()),
        ColumnValue::Text(v) => GroupKeyPart::Text(v.clone()),
        ColumnValue::Blob(v) => GroupKeyPart::Blob(v.clone()),
    }
}

/// Running state for one aggregate expression within one group. `Sum`
/// starts as an integer accumulator and promotes to float the first time
/// it would overflow or sees a float input.
#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    SumInt(i64),
    SumFloat(f64),
    Min(Option<ColumnValue>),
    Max(Option<ColumnValue>),
    Avg { sum: f64, count: i64 },
}

impl Accumulator {
    fn new(func: AggregateFn) -> Self {
        match func {
            AggregateFn::Count => Accumulator::Count(0),
            AggregateFn::Sum => Accumulator::SumInt(0),
            AggregateFn::Min => Accumulator::Min(None),
            AggregateFn::Max => Accumulator::Max(None),
            AggregateFn::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
        }
    }

    fn feed(&mut self, value: &ColumnValue) {
        if matches!(value, ColumnValue::Null) {
            return;
        }
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::SumInt(n) => match value {
                ColumnValue::Integer(v) => match n.checked_add(*v) {
                    Some(sum) => *n = sum,
                    None => *self = Accumulator::SumFloat(*n as f64 + *v as f64),
                },
                ColumnValue::Float(v) => *self = Accumulator::SumFloat(*n as f64 + v),
                _ => {}
            },
            Accumulator::SumFloat(f) => {
                if let Some(v) = as_f64(value) {
                    *f += v;
                }
            }
            Accumulator::Min(current) => {
                let replace = match current.as_ref() {
                    None => true,
                    Some(c) => compare(value, c) == std::cmp::Ordering::Less,
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
            Accumulator::Max(current) => {
                let replace = match current.as_ref() {
                    None => true,
                    Some(c) => compare(value, c) == std::cmp::Ordering::Greater,
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
            Accumulator::Avg { sum, count } => {
                if let Some(v) = as_f64(value) {
                    *sum += v;
                    *count += 1;
                }
            }
        }
    }

    fn finish(self) -> ColumnValue {
        match self {
            Accumulator::Count(n) => ColumnValue::Integer(n),
            Accumulator::SumInt(n) => ColumnValue::Integer(n),
            Accumulator::SumFloat(f) => ColumnValue::Float(f),
            Accumulator::Min(v) => v.unwrap_or(ColumnValue::Null),
            Accumulator::Max(v) => v.unwrap_or(ColumnValue::Null),
            Accumulator::Avg { sum, count } => {
                if count == 0 {
                    ColumnValue::Null
                } else {
                    ColumnValue::Float(sum / count as f64)
                }
            }
        }
    }
}

fn as_f64(value: &ColumnValue) -> Option<f64> {
    match value {
        ColumnValue::Integer(v) => Some(*v as f64),
        ColumnValue::Float(v) => Some(*v),
        _ => None,
    }
}

fn compare(a: &ColumnValue, b: &ColumnValue) -> std::cmp::Ordering {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => match (a, b) {
            (ColumnValue::Text(x), ColumnValue::Text(y)) => x.cmp(y),
            (ColumnValue::Blob(x), ColumnValue::Blob(y)) => x.cmp(y),
            _ => std::cmp::Ordering::Equal,
        },
    }
}

/// Folds `rows` into one output row per distinct `group_by` tuple, with
/// `aggregates` evaluated per group. An empty `group_by` with at least one
/// aggregate yields exactly one output row.
pub fn aggregate(rows: &[Vec<ColumnValue>], group_by: &[usize], aggregates: &[AggregateSpec]) -> Vec<Vec<ColumnValue>> {
    if group_by.is_empty() && !aggregates.is_empty() {
        let mut accs: Vec<Accumulator> = aggregates.iter().map(|spec| Accumulator::new(spec.func)).collect();
        for row in rows {
            for (acc, spec) in accs.iter_mut().zip(aggregates) {
                if let Some(v) = row.get(spec.source_column) {
                    acc.feed(v);
                }
            }
        }
        return vec![accs.into_iter().map(Accumulator::finish).collect()];
    }

    let mut groups: HashMap<GroupKey, (Vec<ColumnValue>, Vec<Accumulator>)> = HashMap::new();
    let mut order: Vec<GroupKey> = Vec::new();
    for row in rows {
        let key = GroupKey(group_by.iter().map(|&c| group_key_part(&row[c])).collect());
        let entry = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            let key_values = group_by.iter().map(|&c| row[c].clone()).collect();
            let accs = aggregates.iter().map(|spec| Accumulator::new(spec.func)).collect();
            (key_values, accs)
        });
        for (acc, spec) in entry.1.iter_mut().zip(aggregates) {
            if let Some(v) = row.get(spec.source_column) {
                acc.feed(v);
            }
        }
    }

    order
        .into_iter()
        .map(|key| {
            let (key_values, accs) = groups.remove(&key).unwrap();
            let mut out = key_values;
            out.extend(accs.into_iter().map(Accumulator::finish));
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_and_counts() {
        let rows = vec![
            vec![ColumnValue::Text(b"eng".to_vec()), ColumnValue::Integer(1)],
            vec![ColumnValue::Text(b"eng".to_vec()), ColumnValue::Integer(2)],
            vec![ColumnValue::Text(b"sales".to_vec()), ColumnValue::Integer(5)],
        ];
        let result = aggregate(
            &rows,
            &[0],
            &[AggregateSpec { func: AggregateFn::Count, source_column: 1 }, AggregateSpec { func: AggregateFn::Sum, source_column: 1 }],
        );
        assert_eq!(result.len(), 2);
        let eng = result.iter().find(|r| r[0] == ColumnValue::Text(b"eng".to_vec())).unwrap();
        assert_eq!(eng[1], ColumnValue::Integer(2));
        assert_eq!(eng[2], ColumnValue::Integer(3));
    }

    #[test]
    fn ungrouped_aggregate_yields_one_row() {
        let rows = vec![vec![ColumnValue::Integer(1)], vec![ColumnValue::Integer(2)], vec![ColumnValue::Integer(3)]];
        let result = aggregate(&rows, &[], &[AggregateSpec { func: AggregateFn::Avg, source_column: 0 }]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0][0], ColumnValue::Float(2.0));
    }

    #[test]
    fn sum_promotes_to_float_on_overflow() {
        let rows = vec![vec![ColumnValue::Integer(i64::MAX)], vec![ColumnValue::Integer(1)]];
        let result = aggregate(&rows, &[], &[AggregateSpec { func: AggregateFn::Sum, source_column: 0 }]);
        assert!(matches!(result[0][0], ColumnValue::Float(_)));
    }

    #[test]
    fn nulls_are_skipped_not_counted() {
        let rows = vec![vec![ColumnValue::Integer(1)], vec![ColumnValue::Null], vec![ColumnValue::Integer(3)]];
        let result = aggregate(&rows, &[], &[AggregateSpec { func: AggregateFn::Count, source_column: 0 }]);
        assert_eq!(result[0][0], ColumnValue::Integer(2));
    }
}
