//! The query boundary: `QueryIntent` and the filter-tree/value types
//! a caller builds instead of handing the executor raw SQL text.

use crate::record::ColumnValue;

/// A literal or bound-parameter value appearing in a filter tree. Distinct
/// from `ColumnValue` (which only ever describes decoded row data) because
/// a filter also needs set literals for `IN`/`NOT IN`.
#[derive(Debug, Clone, PartialEq)]
pub enum IntentValue {
    Signed64(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Signed64Set(Vec<i64>),
    TextSet(Vec<String>),
}

impl IntentValue {
    /// Compares against a decoded column value with int<->double promotion
    /// and ordinal text comparison. Returns `None` if either side is
    /// a NULL column, or if the two types are not comparable at all.
    pub fn partial_cmp_column(&self, column: &ColumnValue) -> Option<std::cmp::Ordering> {
        use std::cmp::Ordering;
        match (self, column) {
            (_, ColumnValue::Null) => None,
            (IntentValue::Signed64(a), ColumnValue::Integer(b)) => a.partial_cmp(b),
            (IntentValue::Signed64(a), ColumnValue::Float(b)) => (*a as f64).partial_cmp(b),
            (IntentValue::Real(a), ColumnValue::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (IntentValue::Real(a), ColumnValue::Float(b)) => a.partial_cmp(b),
            (IntentValue::Text(a), ColumnValue::Text(b)) => a.as_bytes().partial_cmp(b.as_slice()),
            (IntentValue::Blob(a), ColumnValue::Blob(b)) => a.partial_cmp(b),
            _ => None,
        }
        .map(|o: Ordering| o)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            IntentValue::Signed64(v) => Some(*v as f64),
            IntentValue::Real(v) => Some(*v),
            _ => None,
        }
    }
}

/// One node of the flat filter-tree array. `Eq`..`Contains` are leaf
/// comparison operators referencing a column by ordinal within the row
/// being filtered; `And`/`Or`/`Not` combine child node indices.
#[derive(Debug, Clone)]
pub enum PredicateNode {
    And(usize, usize),
    Or(usize, usize),
    Not(usize),
    Eq(usize, IntentValue),
    Neq(usize, IntentValue),
    Gt(usize, IntentValue),
    Gte(usize, IntentValue),
    Lt(usize, IntentValue),
    Lte(usize, IntentValue),
    IsNull(usize),
    IsNotNull(usize),
    Between(usize, IntentValue, IntentValue),
    In(usize, IntentValue),
    NotIn(usize, IntentValue),
    Like(usize, String),
    NotLike(usize, String),
    StartsWith(usize, String),
    EndsWith(usize, String),
    Contains(usize, String),
}

/// A flat array of nodes plus the index of the root. Column ordinals in
/// leaf nodes are resolved against whichever row schema the filter is
/// evaluated over (the single table's columns, or the joined row's).
#[derive(Debug, Clone, Default)]
pub struct FilterTree {
    pub nodes: Vec<PredicateNode>,
    pub root: Option<usize>,
}

impl FilterTree {
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
    FullOuter,
}

#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub kind: JoinKind,
    pub right_table: String,
    pub right_alias: String,
    /// Column ordinal on the left (already-joined) side and the right side
    /// that the join key is drawn from.
    pub left_key_column: usize,
    pub right_key_column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub func: AggregateFn,
    pub source_column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct OrderByItem {
    pub column: usize,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    UnionAll,
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone)]
pub struct CoteBinding {
    pub name: String,
    pub intent: Box<QueryIntent>,
}

/// The query boundary: a pre-parsed description of a single SELECT,
/// built by a caller rather than produced by parsing SQL text here.
#[derive(Debug, Clone)]
pub struct QueryIntent {
    pub table: String,
    pub alias: String,
    pub projected_columns: Vec<usize>,
    pub filter: FilterTree,
    pub joins: Vec<JoinSpec>,
    pub group_by: Vec<usize>,
    pub aggregates: Vec<AggregateSpec>,
    pub having: FilterTree,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub set_op: Option<(SetOpKind, Box<QueryIntent>)>,
    pub cotes: Vec<CoteBinding>,
}

impl QueryIntent {
    pub fn scan(table: impl Into<String>) -> Self {
        let table = table.into();
        QueryIntent {
            alias: table.clone(),
            table,
            projected_columns: Vec::new(),
            filter: FilterTree::default(),
            joins: Vec::new(),
            group_by: Vec::new(),
            aggregates: Vec::new(),
            having: FilterTree::default(),
            order_by: Vec::new(),
            limit: None,
            offset: 0,
            set_op: None,
            cotes: Vec::new(),
        }
    }
}
