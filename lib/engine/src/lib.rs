//! The quadsql engine: compiles SPARQL 1.1 queries into SQL over an
//! interned quad store, executes them through a [`SpaceBackend`] and
//! marshals the rows back into SPARQL result shapes; updates dispatch to
//! specialised handlers backed by the batch quad mutator.
//!
//! The entry point is [`SparqlEngine`].
//!
//! [`SpaceBackend`]: quadsql_storage::SpaceBackend

mod engine;
mod error;
pub mod results;
pub mod translator;
mod update;

pub use engine::SparqlEngine;
pub use error::{EngineError, UpdateError};
pub use results::{QueryResults, QuerySolution, QuerySolutionStream, QueryTripleStream};
pub use update::UpdateOutcome;
