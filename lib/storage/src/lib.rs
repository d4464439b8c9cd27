//! Storage access for the quadsql engine.
//!
//! This crate defines the [`SpaceBackend`] capability the engine executes
//! against, the term-dictionary cache with its batch resolver, and the
//! named-graph registry cache. All I/O flows through the backend trait; the
//! caches never hold a lock across an await point.

mod backend;
mod graph_registry;
mod term_cache;
mod term_resolver;

pub use backend::{
    collect_rows, SpaceBackend, SqlRow, SqlRowStream, SqlValue, TableSet,
};
pub use graph_registry::{GraphInfo, GraphRegistry};
pub use term_cache::TermCache;
pub use term_resolver::TermResolver;
