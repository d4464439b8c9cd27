use std::time::Duration;

/// Configuration recognised by the engine core.
///
/// Everything here has a workable default; callers override single fields
/// with struct update syntax.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Maximum number of entries in the term-dictionary LRU cache.
    pub term_cache_capacity: usize,
    /// Recursion cap for property-path CTEs.
    pub path_max_depth: u32,
    /// Per-query wall-clock ceiling for the backend call.
    pub query_timeout: Duration,
    /// Byte ceiling for `LOAD` fetches.
    pub load_max_size: u64,
    /// Independent timeout for the `LOAD` fetch.
    pub load_timeout: Duration,
    /// URI schemes `LOAD` may dereference.
    pub load_allowed_schemes: Vec<String>,
    /// Optional allow-list of hosts for `LOAD`. `None` admits any host.
    pub load_allowed_hosts: Option<Vec<String>>,
    /// The IRI standing in for the default graph.
    pub global_graph_iri: String,
    /// Whether the backend exposes `DIGEST` (pgcrypto). When disabled,
    /// `SHA1` lowers to `MD5` and the other SHA builtins are unsupported.
    pub digest_functions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            term_cache_capacity: 50_000,
            path_max_depth: 10,
            query_timeout: Duration::from_secs(30),
            load_max_size: 128 * 1024 * 1024,
            load_timeout: Duration::from_secs(60),
            load_allowed_schemes: vec!["http".to_owned(), "https".to_owned()],
            load_allowed_hosts: None,
            global_graph_iri: "urn:___GLOBAL".to_owned(),
            digest_functions: true,
        }
    }
}
