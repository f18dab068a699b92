//! Query executor: turns a pre-parsed `QueryIntent`
//! into rows, without ever parsing SQL text itself -- that stays an
//! external collaborator's job.

pub mod aggregate;
pub mod cote;
pub mod filter;
pub mod intent;
pub mod join;
pub mod setops;
pub mod sort;

use crate::btree::Reader;
use crate::error::{Error, Result};
use crate::page::{PageSource, Pager};
use crate::record::{decode_record, ColumnValue};
use crate::schema::{SharcSchema, TableInfo};

use cote::CoteMap;
pub use intent::QueryIntent;

pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ColumnValue>>,
}

/// Runs one `QueryIntent` against a schema and page source. Holds a
/// cooperative cancellation check: when set, it's polled between rows
/// on the base-table scan and a cancellation discards whatever partial
/// result has accumulated so far, matching "no checkpointing of in-flight
/// query state".
pub struct Executor<'p, S: PageSource> {
    pager: &'p mut Pager<S>,
    schema: &'p SharcSchema,
    cancel: Option<Box<dyn Fn() -> bool + 'p>>,
}

impl<'p, S: PageSource> Executor<'p, S> {
    pub fn new(pager: &'p mut Pager<S>, schema: &'p SharcSchema) -> Self {
        Executor { pager, schema, cancel: None }
    }

    pub fn with_cancel(mut self, cancel: impl Fn() -> bool + 'p) -> Self {
        self.cancel = Some(Box::new(cancel));
        self
    }

    fn table_info(&self, name: &str) -> Result<&TableInfo> {
        self.schema
            .tables
            .get(name)
            .ok_or_else(|| Error::argument_error(format!("unknown table {name}")))
    }

    /// Reads every row of `name` off disk, synthesizing the rowid-alias
    /// column's value from the cell's rowid (it is stored as serial type
    /// 0). Resolves against `cotes` first -- a materialized CTE shadows a
    /// same-named base table.
    fn materialize_table(&mut self, name: &str, cotes: &CoteMap) -> Result<(Vec<String>, Vec<Vec<ColumnValue>>)> {
        if let Some((columns, rows)) = cotes.get(name) {
            return Ok((columns.clone(), rows.clone()));
        }

        let table = self.table_info(name)?.clone();
        let columns = table.columns.iter().map(|c| c.name.clone()).collect();
        let mut reader = Reader::new(self.pager);
        let mut cursor = reader.create_table_cursor(table.root_page);
        let mut rows = Vec::new();
        while cursor.move_next()? {
            if let Some(cancel) = &self.cancel {
                if cancel() {
                    return Err(Error::argument_error("query cancelled"));
                }
            }
            let mut row = decode_record(cursor.payload().expect("move_next succeeded"))?;
            if let Some(alias) = table.rowid_alias_column {
                if alias < row.len() {
                    row[alias] = ColumnValue::Integer(cursor.row_id().expect("positioned cursor has a rowid"));
                }
            }
            rows.push(row);
        }
        Ok((columns, rows))
    }

    pub fn execute(&mut self, intent: &QueryIntent) -> Result<QueryResult> {
        let mut cotes = CoteMap::new();
        for binding in &intent.cotes {
            let result = self.execute(&binding.intent)?;
            cotes.bind(binding.name.clone(), result.columns, result.rows);
        }

        let (mut columns, mut rows) = self.materialize_table(&intent.table, &cotes)?;

        for join in &intent.joins {
            let (right_columns, right_rows) = self.materialize_table(&join.right_table, &cotes)?;
            rows = join::hash_join(&rows, &right_rows, join.left_key_column, join.right_key_column, join.kind);
            columns.extend(right_columns);
        }

        if !intent.filter.is_empty() {
            rows.retain(|row| filter::evaluate(&intent.filter, row) == Some(true));
        }

        if !intent.group_by.is_empty() || !intent.aggregates.is_empty() {
            rows = aggregate::aggregate(&rows, &intent.group_by, &intent.aggregates);
            let mut new_columns: Vec<String> = intent.group_by.iter().map(|&i| columns[i].clone()).collect();
            for (i, spec) in intent.aggregates.iter().enumerate() {
                new_columns.push(format!("{:?}({})", spec.func, columns.get(spec.source_column).cloned().unwrap_or_default()).to_lowercase());
                let _ = i;
            }
            columns = new_columns;
            if !intent.having.is_empty() {
                rows.retain(|row| filter::evaluate(&intent.having, row) == Some(true));
            }
        }

        if let Some((op, other)) = &intent.set_op {
            let other_result = {
                let mut sub_executor = Executor { pager: self.pager, schema: self.schema, cancel: None };
                sub_executor.execute(other)?
            };
            rows = setops::apply(*op, rows, other_result.rows)?;
        }

        for item in &intent.order_by {
            if item.column >= columns.len() {
                return Err(Error::argument_out_of_range(format!("ORDER BY references unknown column {}", item.column)));
            }
        }
        if !intent.order_by.is_empty() || intent.limit.is_some() {
            rows = sort::top_n(rows.into_iter(), &intent.order_by, intent.limit, intent.offset);
        } else if intent.offset > 0 {
            rows = rows.into_iter().skip(intent.offset).collect();
        }

        if !intent.projected_columns.is_empty() {
            columns = intent.projected_columns.iter().map(|&i| columns.get(i).cloned().unwrap_or_default()).collect();
            rows = rows
                .into_iter()
                .map(|row| intent.projected_columns.iter().map(|&i| row.get(i).cloned().unwrap_or(ColumnValue::Null)).collect())
                .collect();
        }

        Ok(QueryResult { columns, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{MemorySource, PageTransform};
    use crate::schema::{ColumnInfo, SharcSchema};
    use crate::varint;
    use std::collections::HashMap;

    fn two_row_table_db() -> Vec<u8> {
        let page_size = 512usize;
        let mut page = vec![0u8; page_size];
        page[0..16].copy_from_slice(b"SQLite format 3\0");
        page[16..18].copy_from_slice(&(page_size as u16).to_be_bytes());
        page[18] = 1;
        page[19] = 1;
        page[21] = 64;
        page[22] = 32;
        page[23] = 32;
        page[28..32].copy_from_slice(&1u32.to_be_bytes());
        page[44..48].copy_from_slice(&4u32.to_be_bytes());
        page[56..60].copy_from_slice(&1u32.to_be_bytes());

        let hdr = 100;
        page[hdr] = 0x0d;
        page[hdr + 3..hdr + 5].copy_from_slice(&2u16.to_be_bytes());

        let mut cell2 = Vec::new();
        let record2 = crate::record::encode_record(&[ColumnValue::Null, ColumnValue::Text(b"bob".to_vec())], Some(0));
        varint::write_varint(record2.len() as i64, &mut cell2);
        varint::write_varint(2, &mut cell2);
        cell2.extend_from_slice(&record2);
        let off2 = page_size - cell2.len();
        page[off2..off2 + cell2.len()].copy_from_slice(&cell2);

        let mut cell1 = Vec::new();
        let record1 = crate::record::encode_record(&[ColumnValue::Null, ColumnValue::Text(b"alice".to_vec())], Some(0));
        varint::write_varint(record1.len() as i64, &mut cell1);
        varint::write_varint(1, &mut cell1);
        cell1.extend_from_slice(&record1);
        let off1 = off2 - cell1.len();
        page[off1..off1 + cell1.len()].copy_from_slice(&cell1);

        page[hdr + 5..hdr + 7].copy_from_slice(&(off1 as u16).to_be_bytes());
        page[hdr + 8..hdr + 10].copy_from_slice(&(off1 as u16).to_be_bytes());
        page[hdr + 10..hdr + 12].copy_from_slice(&(off2 as u16).to_be_bytes());

        page
    }

    fn people_table() -> TableInfo {
        TableInfo {
            name: "people".to_string(),
            root_page: 1,
            columns: vec![
                ColumnInfo { name: "id".to_string(), declared_type: "INTEGER".to_string(), constraints: vec![] },
                ColumnInfo { name: "name".to_string(), declared_type: "TEXT".to_string(), constraints: vec![] },
            ],
            rowid_alias_column: Some(0),
            without_rowid: false,
        }
    }

    #[test]
    fn single_table_scan_synthesizes_rowid_alias_and_filters() {
        let page = two_row_table_db();
        let source = MemorySource::new(page, 512);
        let mut pager = Pager::open(source, PageTransform::Identity).unwrap();
        let mut tables = HashMap::new();
        tables.insert("people".to_string(), people_table());
        let schema = SharcSchema { tables };

        let mut intent = QueryIntent::scan("people");
        intent.filter = crate::query::intent::FilterTree {
            nodes: vec![crate::query::intent::PredicateNode::Gt(0, crate::query::intent::IntentValue::Signed64(1))],
            root: Some(0),
        };

        let mut executor = Executor::new(&mut pager, &schema);
        let result = executor.execute(&intent).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], ColumnValue::Integer(2));
        assert_eq!(result.rows[0][1], ColumnValue::Text(b"bob".to_vec()));
    }

    #[test]
    fn limit_and_order_by_trim_and_sort() {
        let page = two_row_table_db();
        let source = MemorySource::new(page, 512);
        let mut pager = Pager::open(source, PageTransform::Identity).unwrap();
        let mut tables = HashMap::new();
        tables.insert("people".to_string(), people_table());
        let schema = SharcSchema { tables };

        let mut intent = QueryIntent::scan("people");
        intent.order_by = vec![crate::query::intent::OrderByItem { column: 0, direction: crate::query::intent::SortDirection::Descending }];
        intent.limit = Some(1);

        let mut executor = Executor::new(&mut pager, &schema);
        let result = executor.execute(&intent).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], ColumnValue::Integer(2));
    }

    #[test]
    fn unknown_table_is_an_argument_error() {
        let page = two_row_table_db();
        let source = MemorySource::new(page, 512);
        let mut pager = Pager::open(source, PageTransform::Identity).unwrap();
        let schema = SharcSchema::default();
        let mut executor = Executor::new(&mut pager, &schema);
        assert!(executor.execute(&QueryIntent::scan("ghost")).is_err());
    }
}
