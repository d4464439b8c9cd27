use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use quadsql_model::{QuadIds, StorageError};

/// The tables backing one space.
///
/// The backend owns the naming scheme (spaces are usually prefixed table
/// families); the engine only ever interpolates these names.
#[derive(Clone, Debug)]
pub struct TableSet {
    /// Quad table: `quad_id, subject_id, predicate_id, object_id, context_id`.
    pub quad: String,
    /// Term table: `term_id, term_text, term_type, lang, datatype_id`.
    pub term: String,
    /// Graph registry table keyed by `graph_uri`.
    pub graph: String,
}

/// A scalar cell of a result row.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

pub type SqlRow = Vec<SqlValue>;

/// A lazily produced stream of result rows. Dropping the stream releases the
/// backend cursor.
pub type SqlRowStream = BoxStream<'static, Result<SqlRow, StorageError>>;

/// The capability a relational backend must offer for one or more spaces.
///
/// Implementations are expected to scope a connection to a single call; the
/// engine never shares connections across tasks.
#[async_trait]
pub trait SpaceBackend: Send + Sync {
    /// Returns the table names for the given space.
    fn tables(&self, space_id: &str) -> TableSet;

    /// Executes a SQL query and streams its rows.
    async fn fetch(&self, space_id: &str, sql: &str) -> Result<SqlRowStream, StorageError>;

    /// Executes a SQL statement and returns the affected-row count.
    async fn execute(&self, space_id: &str, sql: &str) -> Result<u64, StorageError>;

    /// Inserts a batch of quads at the id level.
    async fn insert_quads(
        &self,
        space_id: &str,
        quads: &[QuadIds],
    ) -> Result<u64, StorageError>;

    /// Deletes a batch of quads at the id level.
    async fn delete_quads(
        &self,
        space_id: &str,
        quads: &[QuadIds],
    ) -> Result<u64, StorageError>;
}

/// Drains a row stream into memory. Intended for internal bookkeeping
/// queries; query results proper stay streamed.
pub async fn collect_rows(stream: SqlRowStream) -> Result<Vec<SqlRow>, StorageError> {
    stream.try_collect().await
}
