//! A scripted backend for exercising the engine without a database.

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use quadsql_model::{QuadIds, StorageError};
use quadsql_storage::{SpaceBackend, SqlRow, SqlRowStream, SqlValue, TableSet};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Serves canned result sets (FIFO, one per `fetch` call) and records every
/// statement plus the quad batches handed to the mutator.
pub struct MockBackend {
    fetches: Mutex<VecDeque<Vec<SqlRow>>>,
    statements: Mutex<Vec<String>>,
    inserted: Mutex<Vec<QuadIds>>,
    deleted: Mutex<Vec<QuadIds>>,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn new(fetches: Vec<Vec<SqlRow>>) -> Self {
        Self {
            fetches: Mutex::new(fetches.into()),
            statements: Mutex::new(Vec::new()),
            inserted: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn inserted(&self) -> Vec<QuadIds> {
        self.inserted.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<QuadIds> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpaceBackend for MockBackend {
    fn tables(&self, space_id: &str) -> TableSet {
        TableSet {
            quad: format!("{space_id}__rdf_quad"),
            term: format!("{space_id}__rdf_term"),
            graph: format!("{space_id}__rdf_graph"),
        }
    }

    async fn fetch(&self, _space_id: &str, sql: &str) -> Result<SqlRowStream, StorageError> {
        self.statements.lock().unwrap().push(sql.to_owned());
        let rows = self.fetches.lock().unwrap().pop_front().unwrap_or_default();
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn execute(&self, _space_id: &str, sql: &str) -> Result<u64, StorageError> {
        self.statements.lock().unwrap().push(sql.to_owned());
        Ok(1)
    }

    async fn insert_quads(
        &self,
        _space_id: &str,
        quads: &[QuadIds],
    ) -> Result<u64, StorageError> {
        self.inserted.lock().unwrap().extend_from_slice(quads);
        Ok(quads.len() as u64)
    }

    async fn delete_quads(
        &self,
        _space_id: &str,
        quads: &[QuadIds],
    ) -> Result<u64, StorageError> {
        self.deleted.lock().unwrap().extend_from_slice(quads);
        Ok(quads.len() as u64)
    }
}

/// A row of the term table: `term_id, term_text, term_type, lang, datatype_id`.
#[allow(dead_code)]
pub fn term_row(id: i64, text: &str, kind: &str) -> SqlRow {
    vec![
        SqlValue::Int(id),
        SqlValue::Text(text.to_owned()),
        SqlValue::Text(kind.to_owned()),
        SqlValue::Null,
        SqlValue::Null,
    ]
}

/// The four result columns of one term-shaped projection.
#[allow(dead_code)]
pub fn bound_term(text: &str, kind: &str, lang: Option<&str>, datatype: Option<&str>) -> Vec<SqlValue> {
    vec![
        SqlValue::Text(text.to_owned()),
        SqlValue::Text(kind.to_owned()),
        lang.map_or(SqlValue::Null, |l| SqlValue::Text(l.to_owned())),
        datatype.map_or(SqlValue::Null, |d| SqlValue::Text(d.to_owned())),
    ]
}

/// Four NULL columns: a term-shaped projection left unbound.
#[allow(dead_code)]
pub fn unbound_term() -> Vec<SqlValue> {
    vec![SqlValue::Null, SqlValue::Null, SqlValue::Null, SqlValue::Null]
}

/// Parentheses must balance outside string literals.
#[allow(dead_code)]
pub fn assert_balanced_parens(sql: &str) {
    let mut depth: i64 = 0;
    let mut in_string = false;
    for c in sql.chars() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                assert!(depth >= 0, "unbalanced parentheses in: {sql}");
            }
            _ => {}
        }
    }
    assert_eq!(depth, 0, "unbalanced parentheses in: {sql}");
    assert!(!in_string, "unterminated string literal in: {sql}");
}

/// Every alias referenced as `alias.column` must have been declared earlier
/// (`AS alias`, or the `FROM table alias` shorthand).
#[allow(dead_code)]
pub fn assert_aliases_declared(sql: &str) {
    let mut cleaned = String::with_capacity(sql.len());
    let mut in_string = false;
    for c in sql.chars() {
        match c {
            '\'' => {
                in_string = !in_string;
                cleaned.push(' ');
            }
            _ if in_string => cleaned.push(' '),
            _ => cleaned.push(c),
        }
    }

    let tokens: Vec<&str> = cleaned
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .collect();
    let mut declared = std::collections::HashSet::new();
    for window in tokens.windows(3) {
        if window[0] == "AS" {
            declared.insert(window[1]);
        }
        // FROM/JOIN table alias
        if (window[0] == "FROM" || window[0] == "JOIN") && window[2] != "ON" {
            declared.insert(window[2]);
        }
    }

    let bytes = cleaned.as_bytes();
    for (index, c) in cleaned.char_indices() {
        if c != '.' {
            continue;
        }
        let mut start = index;
        while start > 0 {
            let prev = bytes[start - 1] as char;
            if prev.is_alphanumeric() || prev == '_' {
                start -= 1;
            } else {
                break;
            }
        }
        let alias = &cleaned[start..index];
        if alias.is_empty() || alias.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        assert!(
            declared.contains(alias),
            "alias {alias} referenced before declaration in: {sql}"
        );
    }
}
