use quadsql_common::EngineConfig;
use quadsql_engine::{EngineError, QueryResults, SparqlEngine, UpdateOutcome};
use quadsql_storage::SpaceBackend;
use std::sync::Arc;

/// A SPARQL view over a relational quad store.
///
/// The store is cheap to clone-by-reference (wrap it in an [`Arc`]) and
/// serves any number of spaces and concurrent requests; per-request state
/// lives on the stack of the call.
pub struct SqlQuadStore {
    engine: SparqlEngine,
}

impl SqlQuadStore {
    /// Creates a store over `backend` with the default configuration.
    pub fn new(backend: Arc<dyn SpaceBackend>) -> Self {
        Self::new_with_config(backend, EngineConfig::default())
    }

    /// Creates a store over `backend` with an explicit configuration.
    pub fn new_with_config(backend: Arc<dyn SpaceBackend>, config: EngineConfig) -> Self {
        Self {
            engine: SparqlEngine::new(backend, config),
        }
    }

    /// Provides access to the underlying engine.
    pub fn engine(&self) -> &SparqlEngine {
        &self.engine
    }

    /// Executes a [SPARQL 1.1 query](https://www.w3.org/TR/sparql11-query/)
    /// against the given space.
    pub async fn query(
        &self,
        space_id: &str,
        query: &str,
    ) -> Result<QueryResults, EngineError> {
        self.engine.execute_query(space_id, query).await
    }

    /// Executes a [SPARQL 1.1 update](https://www.w3.org/TR/sparql11-update/)
    /// against the given space.
    pub async fn update(
        &self,
        space_id: &str,
        update: &str,
    ) -> Result<UpdateOutcome, EngineError> {
        self.engine.execute_update(space_id, update).await
    }
}
