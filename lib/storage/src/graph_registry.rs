use crate::backend::{collect_rows, SpaceBackend};
use dashmap::DashMap;
use quadsql_common::sql::quote_str;
use quadsql_model::StorageError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Metadata carried for a registered named graph.
#[derive(Clone, Debug, Default)]
pub struct GraphInfo {
    pub triple_count: Option<i64>,
}

/// Per-space cache of the known named graphs.
///
/// The cache is a write-through view over the persisted registry table. It
/// is loaded lazily on first use per space and may be invalidated at any
/// time. Reads are lock-free; the load itself happens outside any lock, so
/// no lock is ever held across I/O.
#[derive(Default)]
pub struct GraphRegistry {
    spaces: DashMap<String, Arc<SpaceGraphs>>,
}

#[derive(Default)]
struct SpaceGraphs {
    loaded: AtomicBool,
    graphs: DashMap<String, GraphInfo>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `iri` is a registered named graph.
    pub async fn contains(
        &self,
        backend: &dyn SpaceBackend,
        space_id: &str,
        iri: &str,
    ) -> Result<bool, StorageError> {
        let space = self.ensure_loaded(backend, space_id).await?;
        Ok(space.graphs.contains_key(iri))
    }

    /// All registered graph IRIs of a space.
    pub async fn known_graphs(
        &self,
        backend: &dyn SpaceBackend,
        space_id: &str,
    ) -> Result<Vec<String>, StorageError> {
        let space = self.ensure_loaded(backend, space_id).await?;
        Ok(space.graphs.iter().map(|e| e.key().clone()).collect())
    }

    /// Registers the graphs among `iris` that are not yet known.
    ///
    /// Only the truly new entries are written: the cache diff is checked
    /// against the registry table first, then missing rows are inserted in
    /// one statement. Returns the number of newly registered graphs.
    pub async fn register_batch(
        &self,
        backend: &dyn SpaceBackend,
        space_id: &str,
        iris: &[String],
    ) -> Result<usize, StorageError> {
        let space = self.ensure_loaded(backend, space_id).await?;
        let mut candidates: Vec<&String> = iris
            .iter()
            .filter(|iri| !space.graphs.contains_key(*iri))
            .collect();
        candidates.sort();
        candidates.dedup();
        if candidates.is_empty() {
            return Ok(0);
        }

        let tables = backend.tables(space_id);
        let in_list = candidates
            .iter()
            .map(|iri| quote_str(iri))
            .collect::<Vec<_>>()
            .join(", ");
        let existing = collect_rows(
            backend
                .fetch(
                    space_id,
                    &format!(
                        "SELECT graph_uri FROM {} WHERE graph_uri IN ({in_list})",
                        tables.graph
                    ),
                )
                .await?,
        )
        .await?;
        let existing: Vec<String> = existing
            .iter()
            .filter_map(|row| row.first().and_then(|v| v.as_str()).map(ToOwned::to_owned))
            .collect();

        let new_graphs: Vec<&&String> = candidates
            .iter()
            .filter(|iri| !existing.contains(**iri))
            .collect();
        if !new_graphs.is_empty() {
            let values = new_graphs
                .iter()
                .map(|iri| format!("({}, 0, NOW(), NOW())", quote_str(iri)))
                .collect::<Vec<_>>()
                .join(", ");
            backend
                .execute(
                    space_id,
                    &format!(
                        "INSERT INTO {} (graph_uri, triple_count, created_time, updated_time) \
                         VALUES {values} ON CONFLICT DO NOTHING",
                        tables.graph
                    ),
                )
                .await?;
        }

        let inserted = new_graphs.len();
        for iri in candidates {
            space.graphs.insert(iri.clone(), GraphInfo::default());
        }
        Ok(inserted)
    }

    /// Removes a graph from the registry. Returns whether it was known.
    pub async fn unregister(
        &self,
        backend: &dyn SpaceBackend,
        space_id: &str,
        iri: &str,
    ) -> Result<bool, StorageError> {
        let space = self.ensure_loaded(backend, space_id).await?;
        let tables = backend.tables(space_id);
        let affected = backend
            .execute(
                space_id,
                &format!(
                    "DELETE FROM {} WHERE graph_uri = {}",
                    tables.graph,
                    quote_str(iri)
                ),
            )
            .await?;
        let known = space.graphs.remove(iri).is_some();
        Ok(known || affected > 0)
    }

    /// Drops the cached registry of a space; the next use reloads it.
    pub fn invalidate(&self, space_id: &str) {
        self.spaces.remove(space_id);
    }

    async fn ensure_loaded(
        &self,
        backend: &dyn SpaceBackend,
        space_id: &str,
    ) -> Result<Arc<SpaceGraphs>, StorageError> {
        let space = self
            .spaces
            .entry(space_id.to_owned())
            .or_default()
            .clone();
        if space.loaded.load(Ordering::Acquire) {
            return Ok(space);
        }

        let tables = backend.tables(space_id);
        let rows = collect_rows(
            backend
                .fetch(
                    space_id,
                    &format!("SELECT graph_uri, triple_count FROM {}", tables.graph),
                )
                .await?,
        )
        .await?;
        for row in rows {
            let Some(uri) = row.first().and_then(|v| v.as_str()) else {
                continue;
            };
            space.graphs.insert(
                uri.to_owned(),
                GraphInfo {
                    triple_count: row.get(1).and_then(|v| v.as_i64()),
                },
            );
        }
        space.loaded.store(true, Ordering::Release);
        Ok(space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SqlRow, SqlRowStream, SqlValue, TableSet};
    use async_trait::async_trait;
    use futures::stream;
    use futures::StreamExt;
    use quadsql_model::QuadIds;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedBackend {
        fetches: Mutex<VecDeque<Vec<SqlRow>>>,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(fetches: Vec<Vec<SqlRow>>) -> Self {
            Self {
                fetches: Mutex::new(fetches.into()),
                log: Mutex::new(Vec::new()),
            }
        }

        fn statements(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SpaceBackend for ScriptedBackend {
        fn tables(&self, space_id: &str) -> TableSet {
            TableSet {
                quad: format!("{space_id}__rdf_quad"),
                term: format!("{space_id}__rdf_term"),
                graph: format!("{space_id}__rdf_graph"),
            }
        }

        async fn fetch(
            &self,
            _space_id: &str,
            sql: &str,
        ) -> Result<SqlRowStream, StorageError> {
            self.log.lock().unwrap().push(sql.to_owned());
            let rows = self.fetches.lock().unwrap().pop_front().unwrap_or_default();
            Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
        }

        async fn execute(&self, _space_id: &str, sql: &str) -> Result<u64, StorageError> {
            self.log.lock().unwrap().push(sql.to_owned());
            Ok(1)
        }

        async fn insert_quads(
            &self,
            _space_id: &str,
            _quads: &[QuadIds],
        ) -> Result<u64, StorageError> {
            Ok(0)
        }

        async fn delete_quads(
            &self,
            _space_id: &str,
            _quads: &[QuadIds],
        ) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    fn graph_row(uri: &str) -> SqlRow {
        vec![SqlValue::Text(uri.to_owned()), SqlValue::Int(0)]
    }

    #[tokio::test]
    async fn loads_lazily_once_per_space() {
        let backend =
            ScriptedBackend::new(vec![vec![graph_row("http://example.com/g1")]]);
        let registry = GraphRegistry::new();

        assert!(registry
            .contains(&backend, "s", "http://example.com/g1")
            .await
            .unwrap());
        assert!(!registry
            .contains(&backend, "s", "http://example.com/g2")
            .await
            .unwrap());
        // Only the initial load touched the backend.
        assert_eq!(backend.statements().len(), 1);
    }

    #[tokio::test]
    async fn register_batch_upserts_only_new_graphs() {
        let backend = ScriptedBackend::new(vec![
            // Initial load: g1 known.
            vec![graph_row("g1")],
            // Existence check: g2 already persisted, g3 not.
            vec![graph_row("g2")],
        ]);
        let registry = GraphRegistry::new();

        let inserted = registry
            .register_batch(
                &backend,
                "s",
                &["g1".to_owned(), "g2".to_owned(), "g3".to_owned()],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let statements = backend.statements();
        let insert = statements.last().unwrap();
        assert!(insert.contains("INSERT INTO s__rdf_graph"));
        assert!(insert.contains("'g3'"));
        assert!(!insert.contains("'g2'"));

        // All three are cached now; a repeat round-trips nothing.
        let count = backend.statements().len();
        let inserted = registry
            .register_batch(&backend, "s", &["g2".to_owned(), "g3".to_owned()])
            .await
            .unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(backend.statements().len(), count);
    }

    #[tokio::test]
    async fn unregister_removes_cache_entry_and_row() {
        let backend = ScriptedBackend::new(vec![vec![graph_row("g1")]]);
        let registry = GraphRegistry::new();

        assert!(registry.unregister(&backend, "s", "g1").await.unwrap());
        assert!(!registry.contains(&backend, "s", "g1").await.unwrap());
        assert!(backend
            .statements()
            .last()
            .unwrap()
            .starts_with("DELETE FROM s__rdf_graph"));
    }
}
