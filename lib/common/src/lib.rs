//! Shared infrastructure for the quadsql engine: the SQL alias generator,
//! the engine configuration, and literal/identifier quoting helpers.

mod alias;
mod config;
pub mod sql;

pub use alias::{AliasGenerator, AliasKind};
pub use config::EngineConfig;
