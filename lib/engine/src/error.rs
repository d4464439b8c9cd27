use oxrdfio::RdfParseError;
use quadsql_model::{NamedNode, StorageError};
use std::time::Duration;

/// An error raised while evaluating a SPARQL query or update.
///
/// The kinds mirror the stages of the pipeline: parsing, translation, the
/// backend call, and the update-specific rules. Messages identify the
/// offending construct but never contain generated SQL.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Malformed SPARQL.
    #[error(transparent)]
    Parsing(#[from] spargebra::SparqlSyntaxError),
    /// A construct the engine has no lowering for.
    #[error("SPARQL feature is not supported: {0}")]
    Unsupported(String),
    /// A term id could not be obtained for a term the plan requires bound.
    #[error("could not resolve a term id for {0}")]
    TermResolution(String),
    /// The algebra was parseable but translation produced an invalid plan.
    #[error("translation produced an invalid plan: {0}")]
    Translation(String),
    /// The backend failed to execute a statement.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The per-query wall-clock deadline was exceeded.
    #[error("query did not complete within {0:?}")]
    Timeout(Duration),
    /// A `LOAD` fetch failed or was rejected.
    #[error("transfer failed: {0}")]
    Transfer(String),
    /// An error while parsing RDF fetched by `LOAD`.
    #[error(transparent)]
    GraphParsing(#[from] RdfParseError),
    /// A graph-management rule was violated.
    #[error(transparent)]
    Update(#[from] UpdateError),
    /// A bug in quadsql.
    #[error("an internal error that likely indicates a bug in quadsql: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn internal<T>(cause: impl Into<String>) -> Result<T, Self> {
        Err(EngineError::Internal(cause.into()))
    }
}

/// Violations of the SPARQL 1.1 graph-management rules.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// `CREATE` of a graph that already exists (without `SILENT`).
    #[error("the graph {0} already exists")]
    GraphAlreadyExists(NamedNode),
    /// `DROP`/`CLEAR` of a graph that does not exist (without `SILENT`).
    #[error("the graph {0} does not exist")]
    GraphDoesNotExist(NamedNode),
}
