//! The SPARQL Update dispatcher.
//!
//! Operations of one request run sequentially; each dispatches to a
//! specialised handler. Ground data flows through the batch quad mutator,
//! modify-with-WHERE evaluates its pattern as a SELECT and instantiates the
//! templates per solution. `COPY`/`MOVE`/`ADD` arrive from the parser
//! already desugared into these primitives.

pub(crate) mod load;
mod template;

use crate::engine::SparqlEngine;
use crate::results::QuerySolutionStream;
use crate::translator::{collect_pattern_term_keys, PatternTranslator};
use crate::{EngineError, UpdateError};
use futures::TryStreamExt;
use load::parse_fetched_rdf;
use quadsql_common::sql::quote_str;
use quadsql_common::AliasGenerator;
use quadsql_model::{
    BlankNode, GraphName, NamedNode, Quad, QuadIds, Subject, Term, TermKey,
};
use rustc_hash::{FxHashMap, FxHashSet};
use spargebra::algebra::GraphTarget;
use spargebra::term::{GroundQuad, GroundSubject, GroundTerm};
use spargebra::GraphUpdateOperation;
use template::{fill_ground_quad_pattern, fill_quad_pattern};
use uuid::Uuid;

/// The outcome of a successfully executed update request.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateOutcome {
    /// Total rows affected across the request's operations.
    pub affected: u64,
}

impl SparqlEngine {
    /// Executes a SPARQL 1.1 update request.
    pub async fn execute_update(
        &self,
        space_id: &str,
        update: &str,
    ) -> Result<UpdateOutcome, EngineError> {
        let update = spargebra::Update::parse(update, None)?;
        let mut outcome = UpdateOutcome::default();
        for operation in &update.operations {
            self.apply_operation(space_id, operation, &mut outcome).await?;
        }
        Ok(outcome)
    }

    async fn apply_operation(
        &self,
        space_id: &str,
        operation: &GraphUpdateOperation,
        outcome: &mut UpdateOutcome,
    ) -> Result<(), EngineError> {
        match operation {
            GraphUpdateOperation::InsertData { data } => {
                let data: Vec<Quad> = data.iter().map(term_quad_to_quad).collect();
                let quads = rename_blank_nodes(&data);
                outcome.affected += self.insert_term_quads(space_id, &quads).await?;
            }
            GraphUpdateOperation::DeleteData { data } => {
                let quads: Vec<Quad> = data.iter().map(ground_quad_to_quad).collect();
                outcome.affected += self.delete_term_quads(space_id, &quads).await?;
            }
            GraphUpdateOperation::DeleteInsert {
                delete,
                insert,
                using,
                pattern,
            } => {
                if using.is_some() {
                    return Err(EngineError::Unsupported(
                        "USING clauses in DELETE/INSERT".to_owned(),
                    ));
                }
                let solutions = self.evaluate_where(space_id, pattern).await?;

                let mut deletes = Vec::new();
                let mut inserts = Vec::new();
                let mut bnodes = FxHashMap::default();
                for solution in &solutions {
                    for quad in delete {
                        if let Some(quad) = fill_ground_quad_pattern(quad, solution) {
                            deletes.push(quad);
                        }
                    }
                    for quad in insert {
                        if let Some(quad) = fill_quad_pattern(quad, solution, &mut bnodes) {
                            inserts.push(quad);
                        }
                    }
                    bnodes.clear();
                }

                if !deletes.is_empty() {
                    outcome.affected += self.delete_term_quads(space_id, &deletes).await?;
                }
                if !inserts.is_empty() {
                    outcome.affected += self.insert_term_quads(space_id, &inserts).await?;
                }
            }
            GraphUpdateOperation::Load {
                silent,
                source,
                destination,
            } => match self
                .eval_load(space_id, source, &graph_name_to_model(destination))
                .await
            {
                Ok(affected) => outcome.affected += affected,
                Err(error) if *silent => {
                    tracing::warn!(
                        source = source.as_str(),
                        %error,
                        "LOAD SILENT ignored a failure"
                    );
                }
                Err(error) => return Err(error),
            },
            GraphUpdateOperation::Clear { silent, graph } => {
                outcome.affected += self.eval_clear(space_id, graph, *silent).await?;
            }
            GraphUpdateOperation::Create { silent, graph } => {
                self.eval_create(space_id, graph, *silent).await?;
            }
            GraphUpdateOperation::Drop { silent, graph } => {
                outcome.affected += self.eval_drop(space_id, graph, *silent).await?;
            }
        }
        Ok(())
    }

    /// Evaluates a modify-WHERE pattern as a SELECT with every in-scope
    /// variable projected, materialising the solutions.
    async fn evaluate_where(
        &self,
        space_id: &str,
        pattern: &spargebra::algebra::GraphPattern,
    ) -> Result<Vec<sparesults::QuerySolution>, EngineError> {
        let mut keys = Vec::new();
        collect_pattern_term_keys(pattern, &mut keys);
        let term_ids = self
            .resolver
            .lookup_batch(self.backend.as_ref(), space_id, &keys)
            .await?;
        let tables = self.backend.tables(space_id);
        let translator = PatternTranslator::new(&tables, &term_ids, &self.config);
        let mut aliases = AliasGenerator::new();
        let select = translator.translate_query(pattern, &mut aliases)?;
        let rows = self.fetch_with_timeout(space_id, &select.sql).await?;
        QuerySolutionStream::new(select.projection, rows)
            .try_collect()
            .await
    }

    /// Resolves term ids (minting where needed), registers new graphs and
    /// hands the id quads to the batch mutator.
    pub(crate) async fn insert_term_quads(
        &self,
        space_id: &str,
        quads: &[Quad],
    ) -> Result<u64, EngineError> {
        if quads.is_empty() {
            return Ok(0);
        }
        let keys: Vec<TermKey> = quads.iter().flat_map(|q| self.quad_keys(q)).collect();
        let term_ids = self
            .resolver
            .ensure_batch(self.backend.as_ref(), space_id, &keys)
            .await?;

        let mut ids = Vec::with_capacity(quads.len());
        for quad in quads {
            let [s, p, o, g] = self.quad_keys(quad);
            ids.push(QuadIds {
                subject: resolved(&term_ids, &s)?,
                predicate: resolved(&term_ids, &p)?,
                object: resolved(&term_ids, &o)?,
                graph: resolved(&term_ids, &g)?,
            });
        }

        let graphs: Vec<String> = quads
            .iter()
            .filter_map(|q| match &q.graph_name {
                GraphName::NamedNode(n) if n.as_str() != self.config.global_graph_iri => {
                    Some(n.as_str().to_owned())
                }
                _ => None,
            })
            .collect::<FxHashSet<_>>()
            .into_iter()
            .collect();
        if !graphs.is_empty() {
            self.registry
                .register_batch(self.backend.as_ref(), space_id, &graphs)
                .await?;
        }

        Ok(self.backend.insert_quads(space_id, &ids).await?)
    }

    /// Deletes the given quads. Quads whose terms are absent from the
    /// dictionary cannot exist and are skipped.
    async fn delete_term_quads(
        &self,
        space_id: &str,
        quads: &[Quad],
    ) -> Result<u64, EngineError> {
        if quads.is_empty() {
            return Ok(0);
        }
        let keys: Vec<TermKey> = quads.iter().flat_map(|q| self.quad_keys(q)).collect();
        let term_ids = self
            .resolver
            .lookup_batch(self.backend.as_ref(), space_id, &keys)
            .await?;

        let mut ids = Vec::new();
        for quad in quads {
            let [s, p, o, g] = self.quad_keys(quad);
            let resolved = [
                term_ids.get(&s),
                term_ids.get(&p),
                term_ids.get(&o),
                term_ids.get(&g),
            ];
            if let [Some(s), Some(p), Some(o), Some(g)] = resolved {
                ids.push(QuadIds {
                    subject: *s,
                    predicate: *p,
                    object: *o,
                    graph: *g,
                });
            }
        }
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(self.backend.delete_quads(space_id, &ids).await?)
    }

    async fn eval_load(
        &self,
        space_id: &str,
        source: &NamedNode,
        destination: &GraphName,
    ) -> Result<u64, EngineError> {
        let (bytes, content_type) = self
            .load_client
            .fetch(&self.config, source.as_str())
            .await?;
        let quads = parse_fetched_rdf(
            &bytes,
            content_type.as_deref(),
            source.as_str(),
            destination,
            &self.config.global_graph_iri,
        )?;
        self.insert_term_quads(space_id, &quads).await
    }

    async fn eval_create(
        &self,
        space_id: &str,
        graph: &NamedNode,
        silent: bool,
    ) -> Result<(), EngineError> {
        let exists = graph.as_str() == self.config.global_graph_iri
            || self
                .registry
                .contains(self.backend.as_ref(), space_id, graph.as_str())
                .await?;
        if exists {
            if silent {
                return Ok(());
            }
            return Err(UpdateError::GraphAlreadyExists(graph.clone()).into());
        }
        self.registry
            .register_batch(self.backend.as_ref(), space_id, &[graph.as_str().to_owned()])
            .await?;
        Ok(())
    }

    async fn eval_clear(
        &self,
        space_id: &str,
        graph: &GraphTarget,
        silent: bool,
    ) -> Result<u64, EngineError> {
        match graph {
            GraphTarget::NamedNode(graph) => {
                let exists = self
                    .registry
                    .contains(self.backend.as_ref(), space_id, graph.as_str())
                    .await?;
                if !exists {
                    if silent {
                        return Ok(0);
                    }
                    return Err(UpdateError::GraphDoesNotExist(graph.clone()).into());
                }
                self.delete_graph_quads(space_id, graph.as_str()).await
            }
            GraphTarget::DefaultGraph => {
                let global = self.config.global_graph_iri.clone();
                self.delete_graph_quads(space_id, &global).await
            }
            GraphTarget::NamedGraphs => self.delete_named_graph_quads(space_id).await,
            GraphTarget::AllGraphs => self.delete_all_quads(space_id).await,
        }
    }

    async fn eval_drop(
        &self,
        space_id: &str,
        graph: &GraphTarget,
        silent: bool,
    ) -> Result<u64, EngineError> {
        match graph {
            GraphTarget::NamedNode(graph) => {
                let exists = self
                    .registry
                    .contains(self.backend.as_ref(), space_id, graph.as_str())
                    .await?;
                if !exists {
                    if silent {
                        return Ok(0);
                    }
                    return Err(UpdateError::GraphDoesNotExist(graph.clone()).into());
                }
                let affected = self.delete_graph_quads(space_id, graph.as_str()).await?;
                self.registry
                    .unregister(self.backend.as_ref(), space_id, graph.as_str())
                    .await?;
                Ok(affected)
            }
            // The default graph always exists and is never unregistered.
            GraphTarget::DefaultGraph => {
                let global = self.config.global_graph_iri.clone();
                self.delete_graph_quads(space_id, &global).await
            }
            GraphTarget::NamedGraphs => {
                let affected = self.delete_named_graph_quads(space_id).await?;
                self.drop_registry(space_id).await?;
                Ok(affected)
            }
            GraphTarget::AllGraphs => {
                let affected = self.delete_all_quads(space_id).await?;
                self.drop_registry(space_id).await?;
                Ok(affected)
            }
        }
    }

    async fn delete_graph_quads(
        &self,
        space_id: &str,
        graph_iri: &str,
    ) -> Result<u64, EngineError> {
        let tables = self.backend.tables(space_id);
        let sql = format!(
            "DELETE FROM {} WHERE context_id IN \
             (SELECT term_id FROM {} WHERE term_text = {} AND term_type = 'U')",
            tables.quad,
            tables.term,
            quote_str(graph_iri)
        );
        self.execute_with_timeout(space_id, &sql).await
    }

    async fn delete_named_graph_quads(&self, space_id: &str) -> Result<u64, EngineError> {
        let tables = self.backend.tables(space_id);
        let sql = format!(
            "DELETE FROM {} WHERE context_id NOT IN \
             (SELECT term_id FROM {} WHERE term_text = {} AND term_type = 'U')",
            tables.quad,
            tables.term,
            quote_str(&self.config.global_graph_iri)
        );
        self.execute_with_timeout(space_id, &sql).await
    }

    async fn delete_all_quads(&self, space_id: &str) -> Result<u64, EngineError> {
        let tables = self.backend.tables(space_id);
        let sql = format!("DELETE FROM {}", tables.quad);
        self.execute_with_timeout(space_id, &sql).await
    }

    async fn drop_registry(&self, space_id: &str) -> Result<(), EngineError> {
        let tables = self.backend.tables(space_id);
        self.execute_with_timeout(space_id, &format!("DELETE FROM {}", tables.graph))
            .await?;
        self.registry.invalidate(space_id);
        Ok(())
    }

    /// The dictionary keys of a quad's four components.
    fn quad_keys(&self, quad: &Quad) -> [TermKey; 4] {
        [
            TermKey::from_subject(quad.subject.as_ref()),
            TermKey::iri(quad.predicate.as_str()),
            TermKey::from_term(quad.object.as_ref()),
            TermKey::from_graph_name(quad.graph_name.as_ref(), &self.config.global_graph_iri),
        ]
    }
}

fn resolved(
    term_ids: &FxHashMap<TermKey, quadsql_model::TermId>,
    key: &TermKey,
) -> Result<quadsql_model::TermId, EngineError> {
    term_ids
        .get(key)
        .copied()
        .ok_or_else(|| EngineError::TermResolution(key.text.clone()))
}

/// Blank nodes in `INSERT DATA` denote fresh nodes per operation.
fn rename_blank_nodes(quads: &[Quad]) -> Vec<Quad> {
    let mut renames: FxHashMap<BlankNode, BlankNode> = FxHashMap::default();
    let mut fresh = |b: &BlankNode| {
        renames
            .entry(b.clone())
            .or_insert_with(|| {
                BlankNode::new_unchecked(Uuid::new_v4().simple().to_string())
            })
            .clone()
    };
    quads
        .iter()
        .map(|quad| {
            let subject = match &quad.subject {
                Subject::NamedNode(n) => Subject::from(n.clone()),
                Subject::BlankNode(b) => Subject::from(fresh(b)),
            };
            let object = match &quad.object {
                Term::BlankNode(b) => Term::from(fresh(b)),
                other => other.clone(),
            };
            Quad::new(subject, quad.predicate.clone(), object, quad.graph_name.clone())
        })
        .collect()
}

/// `DELETE DATA` quads are ground; convert them to oxrdf quads.
fn ground_quad_to_quad(quad: &GroundQuad) -> Quad {
    let subject = match &quad.subject {
        GroundSubject::NamedNode(n) => Subject::from(n.clone()),
    };
    let object = match &quad.object {
        GroundTerm::NamedNode(n) => Term::from(n.clone()),
        GroundTerm::Literal(l) => Term::from(l.clone()),
    };
    Quad::new(
        subject,
        quad.predicate.clone(),
        object,
        graph_name_to_model(&quad.graph_name),
    )
}

/// `INSERT DATA` quads carry spargebra's own `Quad`/`GraphName` types;
/// convert them to the oxrdf-backed types used by the rest of the engine.
fn term_quad_to_quad(quad: &spargebra::term::Quad) -> Quad {
    Quad::new(
        quad.subject.clone(),
        quad.predicate.clone(),
        quad.object.clone(),
        graph_name_to_model(&quad.graph_name),
    )
}

/// Converts spargebra's `GraphName` to the oxrdf-backed one re-exported by
/// `quadsql_model`.
fn graph_name_to_model(graph_name: &spargebra::term::GraphName) -> GraphName {
    match graph_name {
        spargebra::term::GraphName::NamedNode(n) => GraphName::from(n.clone()),
        spargebra::term::GraphName::DefaultGraph => GraphName::DefaultGraph,
    }
}
