//! Non-recursive CTE materialization: a cote binding runs once and
//! its result set is held in memory; references elsewhere in the plan read
//! from the materialized rows instead of a disk cursor.

use std::collections::HashMap;

use crate::record::ColumnValue;

pub struct CoteMap {
    tables: HashMap<String, (Vec<String>, Vec<Vec<ColumnValue>>)>,
}

impl CoteMap {
    pub fn new() -> Self {
        CoteMap { tables: HashMap::new() }
    }

    pub fn bind(&mut self, name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<ColumnValue>>) {
        self.tables.insert(name.into(), (columns, rows));
    }

    pub fn get(&self, name: &str) -> Option<&(Vec<String>, Vec<Vec<ColumnValue>>)> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

impl Default for CoteMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_cote_is_retrievable_by_name() {
        let mut cotes = CoteMap::new();
        cotes.bind("recent", vec!["id".to_string()], vec![vec![ColumnValue::Integer(1)]]);
        assert!(cotes.contains("recent"));
        let (cols, rows) = cotes.get("recent").unwrap();
        assert_eq!(cols, &["id".to_string()]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn unbound_name_is_absent() {
        let cotes = CoteMap::new();
        assert!(!cotes.contains("missing"));
    }
}
