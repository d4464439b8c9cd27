use crate::backend::{collect_rows, SpaceBackend, SqlRow, TableSet};
use crate::term_cache::TermCache;
use quadsql_common::sql::quote_str;
use quadsql_model::{CorruptionError, StorageError, TermId, TermKey, TermKind};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Batch resolution of term texts to dictionary ids.
///
/// All id lookups the engine performs go through this type: the full set of
/// keys is collected first, the cache is consulted, and only the misses hit
/// the database. Typed literals resolve in two phases (their datatype IRIs
/// first), so one query never costs more than two dictionary round-trips.
pub struct TermResolver {
    cache: Arc<TermCache>,
}

/// One decoded row of the term table.
struct TermRow {
    id: TermId,
    text: String,
    kind: TermKind,
    lang: Option<String>,
    datatype_id: Option<TermId>,
}

impl TermResolver {
    pub fn new(cache: Arc<TermCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &TermCache {
        &self.cache
    }

    /// Resolves ids for the given keys without writing to the dictionary.
    ///
    /// Keys absent from the dictionary are simply missing from the result;
    /// the query translator compiles such terms into never-match conditions.
    /// The returned map also contains the datatype IRIs that had to be
    /// resolved on the way.
    pub async fn lookup_batch(
        &self,
        backend: &dyn SpaceBackend,
        space_id: &str,
        keys: &[TermKey],
    ) -> Result<FxHashMap<TermKey, TermId>, StorageError> {
        let keys = expand_with_datatype_iris(keys);
        let mut resolved = self.cache.get_batch(keys.iter());

        let plain_misses = phase_misses(&keys, &resolved, Phase::Plain);
        if !plain_misses.is_empty() {
            let tables = backend.tables(space_id);
            let rows = fetch_term_rows(
                backend,
                space_id,
                &pair_lookup_sql(&tables, &plain_misses),
            )
            .await?;
            merge_matches(&mut resolved, &rows, &plain_misses, &FxHashMap::default());
        }

        let typed_misses = phase_misses(&keys, &resolved, Phase::Typed);
        if !typed_misses.is_empty() {
            let datatype_ids = datatype_id_index(&resolved);
            let sql = typed_lookup_sql(&backend.tables(space_id), &typed_misses, &datatype_ids);
            if let Some(sql) = sql {
                let rows = fetch_term_rows(backend, space_id, &sql).await?;
                merge_matches(&mut resolved, &rows, &typed_misses, &datatype_ids);
            }
        }

        self.cache
            .put_batch(resolved.iter().map(|(k, v)| (k.clone(), *v)));
        Ok(resolved)
    }

    /// Resolves ids for the given keys, inserting missing terms.
    ///
    /// Inserts use `ON CONFLICT DO NOTHING` followed by an authoritative
    /// re-select, so concurrent writers converge on the same ids.
    pub async fn ensure_batch(
        &self,
        backend: &dyn SpaceBackend,
        space_id: &str,
        keys: &[TermKey],
    ) -> Result<FxHashMap<TermKey, TermId>, StorageError> {
        let expanded = expand_with_datatype_iris(keys);
        let mut resolved = self.lookup_batch(backend, space_id, &expanded).await?;
        let tables = backend.tables(space_id);

        let plain_misses = phase_misses(&expanded, &resolved, Phase::Plain);
        if !plain_misses.is_empty() {
            backend
                .execute(space_id, &insert_terms_sql(&tables, &plain_misses, &FxHashMap::default()))
                .await?;
            let rows = fetch_term_rows(
                backend,
                space_id,
                &pair_lookup_sql(&tables, &plain_misses),
            )
            .await?;
            merge_matches(&mut resolved, &rows, &plain_misses, &FxHashMap::default());
        }

        let typed_misses = phase_misses(&expanded, &resolved, Phase::Typed);
        if !typed_misses.is_empty() {
            let datatype_ids = datatype_id_index(&resolved);
            // Only literals whose datatype id is known can be written.
            let insertable: Vec<&TermKey> = typed_misses
                .iter()
                .copied()
                .filter(|k| {
                    k.datatype
                        .as_deref()
                        .is_some_and(|d| datatype_ids.contains_key(d))
                })
                .collect();
            if !insertable.is_empty() {
                backend
                    .execute(space_id, &insert_terms_sql(&tables, &insertable, &datatype_ids))
                    .await?;
                if let Some(sql) = typed_lookup_sql(&tables, &insertable, &datatype_ids) {
                    let rows = fetch_term_rows(backend, space_id, &sql).await?;
                    merge_matches(&mut resolved, &rows, &insertable, &datatype_ids);
                }
            }
        }

        for key in &expanded {
            if !resolved.contains_key(key) {
                return Err(CorruptionError::msg(format!(
                    "term did not resolve to an id after insertion: {:?} ({})",
                    key.text,
                    key.kind.code()
                ))
                .into());
            }
        }

        self.cache
            .put_batch(resolved.iter().map(|(k, v)| (k.clone(), *v)));
        Ok(resolved)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Phase {
    /// Terms without a datatype reference (IRIs, blanks, plain literals).
    Plain,
    /// Literals that reference a datatype id.
    Typed,
}

/// Deduplicates the requested keys and appends the datatype IRIs typed
/// literals depend on.
fn expand_with_datatype_iris(keys: &[TermKey]) -> Vec<TermKey> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        if seen.insert(key.clone()) {
            out.push(key.clone());
        }
    }
    for key in keys {
        if let Some(datatype) = &key.datatype {
            let dt_key = TermKey::iri(datatype.clone());
            if seen.insert(dt_key.clone()) {
                out.push(dt_key);
            }
        }
    }
    out
}

fn phase_misses<'a>(
    keys: &'a [TermKey],
    resolved: &FxHashMap<TermKey, TermId>,
    phase: Phase,
) -> Vec<&'a TermKey> {
    keys.iter()
        .filter(|k| {
            let key_phase = if k.datatype.is_none() {
                Phase::Plain
            } else {
                Phase::Typed
            };
            key_phase == phase && !resolved.contains_key(*k)
        })
        .collect()
}

/// Index from datatype IRI text to its resolved id.
fn datatype_id_index(resolved: &FxHashMap<TermKey, TermId>) -> FxHashMap<String, TermId> {
    resolved
        .iter()
        .filter(|(k, _)| k.kind == TermKind::Iri)
        .map(|(k, v)| (k.text.clone(), *v))
        .collect()
}

fn pair_lookup_sql(tables: &TableSet, keys: &[&TermKey]) -> String {
    let mut pairs: Vec<String> = keys
        .iter()
        .map(|k| format!("({}, {})", quote_str(&k.text), quote_str(k.kind.code())))
        .collect();
    pairs.sort();
    pairs.dedup();
    format!(
        "SELECT term_id, term_text, term_type, lang, datatype_id FROM {} \
         WHERE (term_text, term_type) IN ({})",
        tables.term,
        pairs.join(", ")
    )
}

/// Lookup for typed literals. Returns `None` when no key has a resolvable
/// datatype (the literals then cannot exist in the dictionary either).
fn typed_lookup_sql(
    tables: &TableSet,
    keys: &[&TermKey],
    datatype_ids: &FxHashMap<String, TermId>,
) -> Option<String> {
    let mut tuples: Vec<String> = keys
        .iter()
        .filter_map(|k| {
            let datatype = k.datatype.as_deref()?;
            let datatype_id = datatype_ids.get(datatype)?;
            Some(format!(
                "({}, {}, {})",
                quote_str(&k.text),
                quote_str(k.kind.code()),
                datatype_id
            ))
        })
        .collect();
    if tuples.is_empty() {
        return None;
    }
    tuples.sort();
    tuples.dedup();
    Some(format!(
        "SELECT term_id, term_text, term_type, lang, datatype_id FROM {} \
         WHERE (term_text, term_type, datatype_id) IN ({})",
        tables.term,
        tuples.join(", ")
    ))
}

fn insert_terms_sql(
    tables: &TableSet,
    keys: &[&TermKey],
    datatype_ids: &FxHashMap<String, TermId>,
) -> String {
    let mut values: Vec<String> = keys
        .iter()
        .map(|k| {
            let lang = match &k.lang {
                Some(lang) => quote_str(lang),
                None => "NULL".to_owned(),
            };
            let datatype = match k
                .datatype
                .as_deref()
                .and_then(|d| datatype_ids.get(d))
            {
                Some(id) => id.to_string(),
                None => "NULL".to_owned(),
            };
            format!(
                "({}, {}, {}, {})",
                quote_str(&k.text),
                quote_str(k.kind.code()),
                lang,
                datatype
            )
        })
        .collect();
    values.sort();
    values.dedup();
    format!(
        "INSERT INTO {} (term_text, term_type, lang, datatype_id) VALUES {} \
         ON CONFLICT DO NOTHING",
        tables.term,
        values.join(", ")
    )
}

async fn fetch_term_rows(
    backend: &dyn SpaceBackend,
    space_id: &str,
    sql: &str,
) -> Result<Vec<TermRow>, StorageError> {
    tracing::debug!(space_id, "term dictionary round-trip");
    let rows = collect_rows(backend.fetch(space_id, sql).await?).await?;
    rows.iter().map(decode_term_row).collect()
}

fn decode_term_row(row: &SqlRow) -> Result<TermRow, StorageError> {
    let corrupt = || CorruptionError::msg("malformed term dictionary row");
    if row.len() != 5 {
        return Err(corrupt().into());
    }
    Ok(TermRow {
        id: TermId(row[0].as_i64().ok_or_else(corrupt)?),
        text: row[1].as_str().ok_or_else(corrupt)?.to_owned(),
        kind: TermKind::from_code(row[2].as_str().ok_or_else(corrupt)?)
            .ok_or_else(corrupt)?,
        lang: row[3].as_str().map(ToOwned::to_owned),
        datatype_id: row[4].as_i64().map(TermId),
    })
}

/// Matches fetched rows against the keys of one phase and records the ids.
fn merge_matches(
    resolved: &mut FxHashMap<TermKey, TermId>,
    rows: &[TermRow],
    keys: &[&TermKey],
    datatype_ids: &FxHashMap<String, TermId>,
) {
    for key in keys {
        let wanted_datatype = key
            .datatype
            .as_deref()
            .map(|d| datatype_ids.get(d).copied());
        let row = rows.iter().find(|r| {
            r.text == key.text
                && r.kind == key.kind
                && r.lang.as_deref() == key.lang.as_deref()
                && match &wanted_datatype {
                    // Key has a datatype: the row must carry that exact id.
                    Some(Some(id)) => r.datatype_id == Some(*id),
                    // Key has a datatype the dictionary does not know.
                    Some(None) => false,
                    None => r.datatype_id.is_none(),
                }
        });
        if let Some(row) = row {
            resolved.insert((*key).clone(), row.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SqlRowStream, SqlValue};
    use async_trait::async_trait;
    use futures::stream;
    use futures::StreamExt;
    use quadsql_model::QuadIds;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves scripted result sets and records every statement.
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
            Ok(0)
        }

        async fn insert_quads(
            &self,
            _space_id: &str,
            quads: &[QuadIds],
        ) -> Result<u64, StorageError> {
            Ok(quads.len() as u64)
        }

        async fn delete_quads(
            &self,
            _space_id: &str,
            quads: &[QuadIds],
        ) -> Result<u64, StorageError> {
            Ok(quads.len() as u64)
        }
    }

    fn term_row(id: i64, text: &str, kind: &str) -> SqlRow {
        vec![
            SqlValue::Int(id),
            SqlValue::Text(text.to_owned()),
            SqlValue::Text(kind.to_owned()),
            SqlValue::Null,
            SqlValue::Null,
        ]
    }

    #[tokio::test]
    async fn cache_hits_skip_the_database() {
        let backend = ScriptedBackend::new(vec![]);
        let resolver = TermResolver::new(Arc::new(TermCache::new(16)));
        resolver
            .cache()
            .put(TermKey::iri("http://example.com/a"), TermId(7));

        let resolved = resolver
            .lookup_batch(&backend, "s", &[TermKey::iri("http://example.com/a")])
            .await
            .unwrap();
        assert_eq!(
            resolved.get(&TermKey::iri("http://example.com/a")),
            Some(&TermId(7))
        );
        assert!(backend.statements().is_empty());
    }

    #[tokio::test]
    async fn misses_are_fetched_in_one_batch_and_cached() {
        let backend = ScriptedBackend::new(vec![vec![
            term_row(1, "http://example.com/a", "U"),
            term_row(2, "http://example.com/b", "U"),
        ]]);
        let resolver = TermResolver::new(Arc::new(TermCache::new(16)));
        let keys = [
            TermKey::iri("http://example.com/a"),
            TermKey::iri("http://example.com/b"),
        ];

        let resolved = resolver.lookup_batch(&backend, "s", &keys).await.unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(backend.statements().len(), 1);
        assert!(backend.statements()[0].contains("s__rdf_term"));

        // Second lookup is served entirely from the cache.
        let resolved = resolver.lookup_batch(&backend, "s", &keys).await.unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(backend.statements().len(), 1);
    }

    #[tokio::test]
    async fn unknown_terms_are_absent_from_the_result() {
        let backend = ScriptedBackend::new(vec![vec![]]);
        let resolver = TermResolver::new(Arc::new(TermCache::new(16)));
        let resolved = resolver
            .lookup_batch(&backend, "s", &[TermKey::iri("http://example.com/missing")])
            .await
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn language_literals_resolve_by_full_identity() {
        let mut en = term_row(10, "hello", "L");
        en[3] = SqlValue::Text("en".to_owned());
        let mut fr = term_row(11, "hello", "L");
        fr[3] = SqlValue::Text("fr".to_owned());
        let backend = ScriptedBackend::new(vec![vec![en, fr]]);
        let resolver = TermResolver::new(Arc::new(TermCache::new(16)));

        let key = TermKey {
            text: "hello".to_owned(),
            kind: TermKind::Literal,
            lang: Some("en".to_owned()),
            datatype: None,
        };
        let resolved = resolver
            .lookup_batch(&backend, "s", std::slice::from_ref(&key))
            .await
            .unwrap();
        assert_eq!(resolved.get(&key), Some(&TermId(10)));
    }

    #[tokio::test]
    async fn typed_literals_resolve_their_datatype_first() {
        let integer_iri = "http://www.w3.org/2001/XMLSchema#integer";
        let mut typed = term_row(21, "5", "L");
        typed[4] = SqlValue::Int(20);
        let backend = ScriptedBackend::new(vec![
            // Phase one resolves the datatype IRI.
            vec![term_row(20, integer_iri, "U")],
            // Phase two resolves the literal against the datatype id.
            vec![typed],
        ]);
        let resolver = TermResolver::new(Arc::new(TermCache::new(16)));

        let key = TermKey {
            text: "5".to_owned(),
            kind: TermKind::Literal,
            lang: None,
            datatype: Some(integer_iri.to_owned()),
        };
        let resolved = resolver
            .lookup_batch(&backend, "s", std::slice::from_ref(&key))
            .await
            .unwrap();
        assert_eq!(resolved.get(&key), Some(&TermId(21)));
        assert_eq!(backend.statements().len(), 2);
        assert!(backend.statements()[1].contains("datatype_id"));
    }

    #[tokio::test]
    async fn ensure_batch_inserts_then_reselects() {
        let backend = ScriptedBackend::new(vec![
            // lookup_batch: nothing known yet.
            vec![],
            // re-select after the insert.
            vec![term_row(31, "http://example.com/new", "U")],
        ]);
        let resolver = TermResolver::new(Arc::new(TermCache::new(16)));
        let key = TermKey::iri("http://example.com/new");

        let resolved = resolver
            .ensure_batch(&backend, "s", std::slice::from_ref(&key))
            .await
            .unwrap();
        assert_eq!(resolved.get(&key), Some(&TermId(31)));

        let statements = backend.statements();
        assert_eq!(statements.len(), 3);
        assert!(statements[1].starts_with("INSERT INTO s__rdf_term"));
        assert!(statements[1].ends_with("ON CONFLICT DO NOTHING"));
    }
}
