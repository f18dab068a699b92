//! Schema reader: walks the `sqlite_schema` table (root page
//! 1) and tokenizes each table's `CREATE TABLE` SQL into a `TableInfo`.

use std::collections::HashMap;

use crate::btree::{CellKind, Cursor};
use crate::error::{Error, ErrorContext, Result};
use crate::page::{PageSource, Pager};
use crate::record::{decode_record, ColumnValue};

pub const SQLITE_SCHEMA_ROOT_PAGE: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnConstraint {
    PrimaryKey,
    NotNull,
    Default(ColumnValue),
    References(String),
    Collate(String),
}

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub constraints: Vec<ColumnConstraint>,
}

impl ColumnInfo {
    pub fn is_primary_key(&self) -> bool {
        self.constraints.contains(&ColumnConstraint::PrimaryKey)
    }
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub root_page: u32,
    pub columns: Vec<ColumnInfo>,
    /// Ordinal of the column that aliases the rowid.
    pub rowid_alias_column: Option<usize>,
    pub without_rowid: bool,
}

impl TableInfo {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharcSchema {
    pub tables: HashMap<String, TableInfo>,
}

/// Reads every `table` row out of `sqlite_schema` and parses its
/// `CREATE TABLE` statement.
pub fn read_schema<S: PageSource>(pager: &mut Pager<S>) -> Result<SharcSchema> {
    let mut tables = HashMap::new();
    let mut cursor = Cursor::new(pager, SQLITE_SCHEMA_ROOT_PAGE, CellKind::TableLeaf);
    while cursor.move_next()? {
        let row = decode_record(cursor.payload().expect("move_next succeeded"))?;
        // (type, name, tbl_name, rootpage, sql)
        let kind = text_of(&row, 0)?;
        if kind != "table" {
            continue;
        }
        let name = text_of(&row, 1)?;
        let root_page = match row.get(3) {
            Some(ColumnValue::Integer(n)) => *n as u32,
            _ => {
                return Err(Error::invalid_database(
                    format!("sqlite_schema row for {name} has no root page"),
                    ErrorContext::new("read schema"),
                ))
            }
        };
        let sql = text_of(&row, 4)?;
        let table = parse_create_table(&sql, root_page)?;
        tables.insert(name, table);
    }
    Ok(SharcSchema { tables })
}

fn text_of(row: &[ColumnValue], index: usize) -> Result<String> {
    match row.get(index) {
        Some(ColumnValue::Text(bytes)) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        Some(ColumnValue::Null) | None => Ok(String::new()),
        other => Err(Error::invalid_database(
            format!("expected text in sqlite_schema column {index}, found {other:?}"),
            ErrorContext::new("read schema"),
        )),
    }
}

/// Hand-rolled `CREATE TABLE` tokenizer: tolerant of `"`/`[]`/backtick
/// identifier quoting, the `IF NOT EXISTS` clause, and reserved words used
/// as quoted identifiers. Parses just enough of the grammar spec names:
/// identifier, declared type, and PRIMARY KEY / NOT NULL / DEFAULT /
/// REFERENCES / COLLATE constraints.
pub fn parse_create_table(sql: &str, root_page: u32) -> Result<TableInfo> {
    let tokens = tokenize(sql)?;
    let mut iter = tokens.iter().peekable();

    expect_keyword(&mut iter, "CREATE")?;
    expect_keyword(&mut iter, "TABLE")?;
    if matches_keyword(iter.peek(), "IF") {
        iter.next();
        expect_keyword(&mut iter, "NOT")?;
        expect_keyword(&mut iter, "EXISTS")?;
    }
    let name = match iter.next() {
        Some(Token::Ident(n)) => n.clone(),
        other => return Err(parse_error(format!("expected table name, found {other:?}"))),
    };

    match iter.next() {
        Some(Token::Punct('(')) => {}
        other => return Err(parse_error(format!("expected '(' after table name, found {other:?}"))),
    }

    let mut columns = Vec::new();
    let mut without_rowid = false;
    let mut depth = 1;
    let mut pending: Vec<Token> = Vec::new();
    for tok in iter {
        match tok {
            Token::Punct('(') => {
                depth += 1;
                pending.push(tok.clone());
            }
            Token::Punct(')') => {
                depth -= 1;
                if depth == 0 {
                    if !pending.is_empty() {
                        if let Some(col) = parse_column_def(&pending)? {
                            columns.push(col);
                        }
                    }
                    break;
                }
                pending.push(tok.clone());
            }
            Token::Punct(',') if depth == 1 => {
                if !pending.is_empty() {
                    if let Some(col) = parse_column_def(&pending)? {
                        columns.push(col);
                    }
                }
                pending.clear();
            }
            _ => pending.push(tok.clone()),
        }
    }

    // Trailing `) WITHOUT ROWID` (or other table options) is outside the
    // outer parens; scan whatever tokens remain for the WITHOUT ROWID
    // clause specifically.
    let rest = tokens
        .windows(2)
        .any(|w| matches!((&w[0], &w[1]), (Token::Ident(a), Token::Ident(b)) if a.eq_ignore_ascii_case("WITHOUT") && b.eq_ignore_ascii_case("ROWID")));
    without_rowid = without_rowid || rest;

    let rowid_alias_column = if without_rowid {
        None
    } else {
        let candidates: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary_key() && c.declared_type.eq_ignore_ascii_case("INTEGER"))
            .map(|(i, _)| i)
            .collect();
        if candidates.len() == 1 {
            Some(candidates[0])
        } else {
            None
        }
    };

    Ok(TableInfo {
        name,
        root_page,
        columns,
        rowid_alias_column,
        without_rowid,
    })
}

fn parse_column_def(tokens: &[Token]) -> Result<Option<ColumnInfo>> {
    let mut iter = tokens.iter().peekable();
    let name = match iter.next() {
        Some(Token::Ident(n)) => n.clone(),
        // A table-level constraint clause (PRIMARY KEY(...), FOREIGN KEY, etc.)
        // starts with a keyword rather than a column name; skip it.
        Some(Token::Keyword(k)) if ["PRIMARY", "FOREIGN", "UNIQUE", "CHECK", "CONSTRAINT"].contains(&k.as_str()) => {
            return Ok(None)
        }
        other => return Err(parse_error(format!("expected column name, found {other:?}"))),
    };

    let mut declared_type = String::new();
    while let Some(Token::Ident(t)) = iter.peek() {
        if !declared_type.is_empty() {
            declared_type.push(' ');
        }
        declared_type.push_str(t);
        iter.next();
    }

    let mut constraints = Vec::new();
    while let Some(tok) = iter.next() {
        match tok {
            Token::Keyword(k) if k.eq_ignore_ascii_case("PRIMARY") => {
                if matches!(iter.peek(), Some(Token::Keyword(k2)) if k2.eq_ignore_ascii_case("KEY")) {
                    iter.next();
                }
                constraints.push(ColumnConstraint::PrimaryKey);
            }
            Token::Keyword(k) if k.eq_ignore_ascii_case("NOT") => {
                if matches!(iter.peek(), Some(Token::Keyword(k2)) if k2.eq_ignore_ascii_case("NULL")) {
                    iter.next();
                }
                constraints.push(ColumnConstraint::NotNull);
            }
            Token::Keyword(k) if k.eq_ignore_ascii_case("DEFAULT") => {
                let value = match iter.next() {
                    Some(Token::Number(n)) => ColumnValue::Integer(*n),
                    Some(Token::StringLit(s)) => ColumnValue::Text(s.clone().into_bytes()),
                    Some(Token::Keyword(k2)) if k2.eq_ignore_ascii_case("NULL") => ColumnValue::Null,
                    other => return Err(parse_error(format!("unsupported DEFAULT value {other:?}"))),
                };
                constraints.push(ColumnConstraint::Default(value));
            }
            Token::Keyword(k) if k.eq_ignore_ascii_case("REFERENCES") => {
                if let Some(Token::Ident(target)) = iter.next() {
                    constraints.push(ColumnConstraint::References(target.clone()));
                }
                // Skip an optional `(col)` after the referenced table.
                if matches!(iter.peek(), Some(Token::Punct('('))) {
                    for t in iter.by_ref() {
                        if matches!(t, Token::Punct(')')) {
                            break;
                        }
                    }
                }
            }
            Token::Keyword(k) if k.eq_ignore_ascii_case("COLLATE") => {
                if let Some(Token::Ident(name)) = iter.next() {
                    constraints.push(ColumnConstraint::Collate(name.clone()));
                }
            }
            _ => {}
        }
    }

    Ok(Some(ColumnInfo {
        name,
        declared_type,
        constraints,
    }))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Keyword(String),
    Number(i64),
    StringLit(String),
    Punct(char),
}

const KEYWORDS: &[&str] = &[
    "CREATE", "TABLE", "IF", "NOT", "EXISTS", "PRIMARY", "KEY", "NULL", "DEFAULT", "REFERENCES", "COLLATE", "UNIQUE",
    "CHECK", "CONSTRAINT", "FOREIGN", "WITHOUT", "ROWID", "AUTOINCREMENT",
];

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' | ')' | ',' => {
                tokens.push(Token::Punct(c));
                i += 1;
            }
            '"' | '`' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                i += 1; // closing quote
                tokens.push(Token::Ident(s));
            }
            '[' => {
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != ']' {
                    s.push(chars[i]);
                    i += 1;
                }
                i += 1;
                tokens.push(Token::Ident(s));
            }
            '\'' => {
                let mut s = String::new();
                i += 1;
                while i < chars.len() {
                    if chars[i] == '\'' && chars.get(i + 1) == Some(&'\'') {
                        s.push('\'');
                        i += 2;
                        continue;
                    }
                    if chars[i] == '\'' {
                        break;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                i += 1;
                tokens.push(Token::StringLit(s));
            }
            '-' if chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let n: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(n.parse().map_err(|_| parse_error("malformed numeric literal"))?));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let n: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(n.parse().map_err(|_| parse_error("malformed numeric literal"))?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let upper = word.to_ascii_uppercase();
                if KEYWORDS.contains(&upper.as_str()) {
                    tokens.push(Token::Keyword(upper));
                } else {
                    tokens.push(Token::Ident(word));
                }
            }
            _ => {
                i += 1;
            }
        }
    }
    Ok(tokens)
}

fn matches_keyword(tok: Option<&&Token>, kw: &str) -> bool {
    matches!(tok, Some(Token::Keyword(k)) if k.eq_ignore_ascii_case(kw))
}

fn expect_keyword<'a, I: Iterator<Item = &'a Token>>(iter: &mut std::iter::Peekable<I>, kw: &str) -> Result<()> {
    match iter.next() {
        Some(Token::Keyword(k)) if k.eq_ignore_ascii_case(kw) => Ok(()),
        other => Err(parse_error(format!("expected keyword {kw}, found {other:?}"))),
    }
}

fn parse_error(reason: impl Into<String>) -> Error {
    Error::invalid_database(reason.into(), ErrorContext::new("parse CREATE TABLE statement"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_table() {
        let t = parse_create_table("CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT NOT NULL)", 2).unwrap();
        assert_eq!(t.name, "widgets");
        assert_eq!(t.columns.len(), 2);
        assert_eq!(t.rowid_alias_column, Some(0));
        assert!(t.columns[1].constraints.contains(&ColumnConstraint::NotNull));
    }

    #[test]
    fn tolerates_if_not_exists_and_quoted_identifiers() {
        let t = parse_create_table(r#"CREATE TABLE IF NOT EXISTS "my table" ("id" INTEGER PRIMARY KEY)"#, 3).unwrap();
        assert_eq!(t.name, "my table");
        assert_eq!(t.rowid_alias_column, Some(0));
    }

    #[test]
    fn without_rowid_disables_rowid_alias() {
        let t = parse_create_table("CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT) WITHOUT ROWID", 4).unwrap();
        assert!(t.without_rowid);
        assert_eq!(t.rowid_alias_column, None);
    }

    #[test]
    fn default_and_collate_and_references_are_captured() {
        let t = parse_create_table(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, status TEXT DEFAULT 'open' COLLATE NOCASE, customer_id INTEGER REFERENCES customers(id))",
            5,
        )
        .unwrap();
        assert!(t.columns[1]
            .constraints
            .contains(&ColumnConstraint::Default(ColumnValue::Text(b"open".to_vec()))));
        assert!(t.columns[1].constraints.contains(&ColumnConstraint::Collate("NOCASE".to_string())));
        assert!(t.columns[2]
            .constraints
            .iter()
            .any(|c| matches!(c, ColumnConstraint::References(r) if r == "customers")));
    }

    #[test]
    fn reserved_word_as_quoted_identifier() {
        let t = parse_create_table(r#"CREATE TABLE "table" ("key" TEXT)"#, 6).unwrap();
        assert_eq!(t.name, "table");
        assert_eq!(t.columns[0].name, "key");
    }
}
