use crate::results::{decode_term, QueryResults, QuerySolutionStream, QueryTripleStream};
use crate::translator::{collect_query_term_keys, PatternTranslator};
use crate::update::load::LoadClient;
use crate::EngineError;
use futures::StreamExt;
use quadsql_common::{AliasGenerator, EngineConfig};
use quadsql_model::{NamedNode, Term, TermKey, Triple};
use quadsql_storage::{
    collect_rows, GraphRegistry, SpaceBackend, SqlRowStream, TermCache, TermResolver,
};
use std::sync::Arc;

/// The SPARQL engine over one relational backend.
///
/// Stateless across requests apart from the two soft caches (term dictionary
/// and graph registry). One instance serves any number of spaces and
/// concurrent requests.
pub struct SparqlEngine {
    pub(crate) backend: Arc<dyn SpaceBackend>,
    pub(crate) config: EngineConfig,
    pub(crate) term_cache: Arc<TermCache>,
    pub(crate) resolver: TermResolver,
    pub(crate) registry: GraphRegistry,
    pub(crate) load_client: LoadClient,
}

impl SparqlEngine {
    pub fn new(backend: Arc<dyn SpaceBackend>, config: EngineConfig) -> Self {
        let term_cache = Arc::new(TermCache::new(config.term_cache_capacity));
        let resolver = TermResolver::new(Arc::clone(&term_cache));
        let load_client = LoadClient::new(&config);
        Self {
            backend,
            config,
            term_cache,
            resolver,
            registry: GraphRegistry::new(),
            load_client,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn term_cache(&self) -> &TermCache {
        &self.term_cache
    }

    pub fn graph_registry(&self) -> &GraphRegistry {
        &self.registry
    }

    /// Executes a SPARQL 1.1 query and returns its results in the shape the
    /// query form dictates.
    pub async fn execute_query(
        &self,
        space_id: &str,
        query: &str,
    ) -> Result<QueryResults, EngineError> {
        let parsed = spargebra::Query::parse(query, None)?;
        let dataset = match &parsed {
            spargebra::Query::Select { dataset, .. }
            | spargebra::Query::Construct { dataset, .. }
            | spargebra::Query::Describe { dataset, .. }
            | spargebra::Query::Ask { dataset, .. } => dataset,
        };
        if dataset.is_some() {
            // The dataset is fixed: the union of all graphs, narrowed by
            // GRAPH clauses.
            return Err(EngineError::Unsupported(
                "FROM / FROM NAMED dataset clauses".to_owned(),
            ));
        }

        let keys = collect_query_term_keys(&parsed);
        let term_ids = self
            .resolver
            .lookup_batch(self.backend.as_ref(), space_id, &keys)
            .await?;
        let tables = self.backend.tables(space_id);
        let translator = PatternTranslator::new(&tables, &term_ids, &self.config);
        let mut aliases = AliasGenerator::new();

        match &parsed {
            spargebra::Query::Select { pattern, .. } => {
                let select = translator.translate_query(pattern, &mut aliases)?;
                let rows = self.fetch_with_timeout(space_id, &select.sql).await?;
                Ok(QueryResults::Solutions(QuerySolutionStream::new(
                    select.projection,
                    rows,
                )))
            }
            spargebra::Query::Ask { pattern, .. } => {
                let select = translator.translate_ask(pattern, &mut aliases)?;
                let mut rows = self.fetch_with_timeout(space_id, &select.sql).await?;
                let answer = rows.next().await.transpose()?.is_some();
                Ok(QueryResults::Boolean(answer))
            }
            spargebra::Query::Construct {
                template, pattern, ..
            } => {
                let select = translator.translate_query(pattern, &mut aliases)?;
                let rows = self.fetch_with_timeout(space_id, &select.sql).await?;
                let solutions = QuerySolutionStream::new(select.projection, rows);
                Ok(QueryResults::Graph(QueryTripleStream::new(
                    template.clone(),
                    solutions,
                )))
            }
            spargebra::Query::Describe { pattern, .. } => {
                let triples = self
                    .evaluate_describe(space_id, query, pattern, &translator, &mut aliases)
                    .await?;
                Ok(QueryResults::Graph(QueryTripleStream::from_triples(triples)))
            }
        }
    }

    /// DESCRIBE: all quads (as triples) whose subject is one of the
    /// described IRIs, across every graph. Described IRIs are the ones named
    /// in the query text plus the IRIs bound by the WHERE clause.
    async fn evaluate_describe(
        &self,
        space_id: &str,
        query_text: &str,
        pattern: &spargebra::algebra::GraphPattern,
        translator: &PatternTranslator<'_>,
        aliases: &mut AliasGenerator,
    ) -> Result<Vec<Triple>, EngineError> {
        let mut iris = parse_describe_iris(query_text);

        let select = translator.translate_query(pattern, aliases)?;
        if !select.projection.is_empty() {
            let rows = self.fetch_with_timeout(space_id, &select.sql).await?;
            let mut solutions = QuerySolutionStream::new(select.projection, rows);
            while let Some(solution) = solutions.next().await {
                let solution = solution?;
                for (_, term) in solution.iter() {
                    if let Term::NamedNode(n) = term {
                        iris.push(n.as_str().to_owned());
                    }
                }
            }
        }
        iris.sort();
        iris.dedup();
        if iris.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<TermKey> = iris.iter().map(TermKey::iri).collect();
        let ids = self
            .resolver
            .lookup_batch(self.backend.as_ref(), space_id, &keys)
            .await?;
        let id_list: Vec<String> = keys
            .iter()
            .filter_map(|key| ids.get(key))
            .map(ToString::to_string)
            .collect();
        if id_list.is_empty() {
            return Ok(Vec::new());
        }

        let tables = self.backend.tables(space_id);
        let sql = format!(
            "SELECT s_term.term_text, s_term.term_type, p_term.term_text, \
             o_term.term_text, o_term.term_type, o_term.lang, o_dt.term_text \
             FROM {quad} quad_0 \
             JOIN {term} s_term ON s_term.term_id = quad_0.subject_id \
             JOIN {term} p_term ON p_term.term_id = quad_0.predicate_id \
             JOIN {term} o_term ON o_term.term_id = quad_0.object_id \
             LEFT JOIN {term} o_dt ON o_dt.term_id = o_term.datatype_id \
             WHERE quad_0.subject_id IN ({ids})",
            quad = tables.quad,
            term = tables.term,
            ids = id_list.join(", ")
        );
        let rows = collect_rows(self.fetch_with_timeout(space_id, &sql).await?).await?;

        let mut triples = Vec::with_capacity(rows.len());
        for row in &rows {
            if row.len() != 7 {
                return EngineError::internal("malformed DESCRIBE row");
            }
            let Some(subject) = decode_term(&row[0], &row[1], &quadsql_storage::SqlValue::Null, &quadsql_storage::SqlValue::Null)
            else {
                continue;
            };
            let subject = match subject {
                Term::NamedNode(n) => n.into(),
                Term::BlankNode(b) => quadsql_model::Subject::from(b),
                Term::Literal(_) => continue,
            };
            let Some(predicate) = row[2].as_str().map(NamedNode::new_unchecked) else {
                continue;
            };
            let Some(object) = decode_term(&row[3], &row[4], &row[5], &row[6]) else {
                continue;
            };
            triples.push(Triple::new(subject, predicate, object));
        }
        Ok(triples)
    }

    pub(crate) async fn fetch_with_timeout(
        &self,
        space_id: &str,
        sql: &str,
    ) -> Result<SqlRowStream, EngineError> {
        tracing::debug!(space_id, sql, "executing translated statement");
        match tokio::time::timeout(self.config.query_timeout, self.backend.fetch(space_id, sql))
            .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(EngineError::Timeout(self.config.query_timeout)),
        }
    }

    pub(crate) async fn execute_with_timeout(
        &self,
        space_id: &str,
        sql: &str,
    ) -> Result<u64, EngineError> {
        tracing::debug!(space_id, sql, "executing translated statement");
        match tokio::time::timeout(self.config.query_timeout, self.backend.execute(space_id, sql))
            .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(EngineError::Timeout(self.config.query_timeout)),
        }
    }
}

/// Recovers the IRIs named between `DESCRIBE` and the WHERE clause. The
/// parsed algebra does not preserve them.
fn parse_describe_iris(query: &str) -> Vec<String> {
    let upper = query.to_uppercase();
    let Some(start) = upper.find("DESCRIBE") else {
        return Vec::new();
    };
    let rest = &query[start + "DESCRIBE".len()..];

    let mut iris = Vec::new();
    let mut chars = rest.char_indices().peekable();
    while let Some((index, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        if c == '{' {
            break;
        }
        if c == '<' {
            let iri: String = chars
                .by_ref()
                .map(|(_, c)| c)
                .take_while(|c| *c != '>')
                .collect();
            iris.push(iri);
            continue;
        }
        // A bare word: stop at WHERE, otherwise skip the token (variables,
        // `*`, prefixed names).
        let token: String = rest[index..]
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != '{')
            .collect();
        if token.eq_ignore_ascii_case("WHERE") {
            break;
        }
        for _ in 0..token.chars().count().saturating_sub(1) {
            chars.next();
        }
    }
    iris
}
