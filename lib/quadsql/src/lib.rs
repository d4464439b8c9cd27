//! quadsql is a SPARQL 1.1 query and update engine that compiles queries
//! into SQL statements over a relational quad store with an interned term
//! dictionary.
//!
//! The crate is a facade over the quadsql workspace:
//! - [`model`]: term identifiers, quads and the RDF data model,
//! - [`storage`]: the [`SpaceBackend`](storage::SpaceBackend) capability,
//!   the term-dictionary cache and the graph registry,
//! - [`engine`]: the translator, update evaluator and result marshalling.
//!
//! The entry point is [`SqlQuadStore`].

mod store;

pub use store::SqlQuadStore;

pub mod model {
    pub use quadsql_model::*;
}

pub mod storage {
    pub use quadsql_storage::*;
}

pub mod engine {
    pub use quadsql_engine::*;
}

pub use quadsql_common::EngineConfig;
pub use quadsql_engine::{
    EngineError, QueryResults, QuerySolution, QuerySolutionStream, QueryTripleStream,
    UpdateOutcome,
};
