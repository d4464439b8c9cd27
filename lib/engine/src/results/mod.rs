//! Marshalling of SQL rows into SPARQL result shapes.

use crate::translator::{ProjectedVar, ProjectionShape};
use crate::EngineError;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use quadsql_model::vocab::xsd;
use quadsql_model::{BlankNode, Literal, NamedNode, Subject, Term, Triple, Variable};
use rustc_hash::{FxHashMap, FxHashSet};
use quadsql_storage::{SqlRow, SqlValue};
pub use sparesults::QuerySolution;
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

/// The results of a SPARQL query evaluation.
pub enum QueryResults {
    /// Solutions of a `SELECT`.
    Solutions(QuerySolutionStream),
    /// Triples of a `CONSTRUCT` or `DESCRIBE`.
    Graph(QueryTripleStream),
    /// An `ASK` answer.
    Boolean(bool),
}

impl std::fmt::Debug for QueryResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solutions(_) => f.write_str("QueryResults::Solutions(..)"),
            Self::Graph(_) => f.write_str("QueryResults::Graph(..)"),
            Self::Boolean(b) => write!(f, "QueryResults::Boolean({b})"),
        }
    }
}

/// A stream over [`QuerySolution`]s decoded from backend rows.
pub struct QuerySolutionStream {
    variables: Arc<[Variable]>,
    projection: Arc<[ProjectedVar]>,
    inner: BoxStream<'static, Result<SqlRow, quadsql_model::StorageError>>,
}

impl QuerySolutionStream {
    pub fn new(
        projection: Vec<ProjectedVar>,
        inner: BoxStream<'static, Result<SqlRow, quadsql_model::StorageError>>,
    ) -> Self {
        let variables: Arc<[Variable]> = projection
            .iter()
            .map(|p| p.variable.clone())
            .collect::<Vec<_>>()
            .into();
        Self {
            variables,
            projection: projection.into(),
            inner,
        }
    }

    /// A stream with no solutions at all.
    pub fn empty() -> Self {
        Self::new(Vec::new(), futures::stream::empty().boxed())
    }

    /// The variables used in the solutions.
    #[inline]
    pub fn variables(&self) -> &[Variable] {
        self.variables.as_ref()
    }
}

impl Stream for QuerySolutionStream {
    type Item = Result<QuerySolution, EngineError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match ready!(self.inner.poll_next_unpin(cx)) {
            None => Poll::Ready(None),
            Some(Err(error)) => Poll::Ready(Some(Err(error.into()))),
            Some(Ok(row)) => Poll::Ready(Some(decode_row(
                &self.variables,
                &self.projection,
                &row,
            ))),
        }
    }
}

fn decode_row(
    variables: &Arc<[Variable]>,
    projection: &[ProjectedVar],
    row: &SqlRow,
) -> Result<QuerySolution, EngineError> {
    let expected: usize = projection.iter().map(|p| p.shape.width()).sum();
    if row.len() != expected.max(1) {
        return EngineError::internal(format!(
            "result row has {} columns, schema expects {expected}",
            row.len()
        ));
    }
    let mut terms = Vec::with_capacity(projection.len());
    let mut cursor = 0;
    for projected in projection {
        match projected.shape {
            ProjectionShape::Term => {
                terms.push(decode_term(
                    &row[cursor],
                    &row[cursor + 1],
                    &row[cursor + 2],
                    &row[cursor + 3],
                ));
                cursor += 4;
            }
            ProjectionShape::Value => {
                terms.push(decode_value(&row[cursor]));
                cursor += 1;
            }
            ProjectionShape::Unbound => {
                terms.push(None);
                cursor += 1;
            }
        }
    }
    Ok(QuerySolution::from((Arc::clone(variables), terms)))
}

/// Reconstructs a term from its text/kind/lang/datatype columns. A NULL text
/// column means the variable is unbound in this solution.
pub(crate) fn decode_term(
    text: &SqlValue,
    kind: &SqlValue,
    lang: &SqlValue,
    datatype: &SqlValue,
) -> Option<Term> {
    if text.is_null() {
        return None;
    }
    match kind.as_str() {
        Some("U") => Some(NamedNode::new_unchecked(text_of(text)).into()),
        Some("B") => Some(BlankNode::new_unchecked(text_of(text)).into()),
        // NULL kinds come from computed columns routed through a derived
        // table; they are literals by construction.
        Some(_) | None => {
            if let Some(lang) = lang.as_str() {
                return Some(
                    Literal::new_language_tagged_literal_unchecked(text_of(text), lang).into(),
                );
            }
            if let Some(datatype) = datatype.as_str() {
                return Some(
                    Literal::new_typed_literal(
                        text_of(text),
                        NamedNode::new_unchecked(datatype),
                    )
                    .into(),
                );
            }
            decode_value(text)
        }
    }
}

/// Maps a bare SQL value to a typed literal.
fn decode_value(value: &SqlValue) -> Option<Term> {
    match value {
        SqlValue::Null => None,
        SqlValue::Bool(b) => Some(Literal::new_typed_literal(b.to_string(), xsd::BOOLEAN).into()),
        SqlValue::Int(i) => Some(Literal::new_typed_literal(i.to_string(), xsd::INTEGER).into()),
        SqlValue::Float(f) => Some(Literal::new_typed_literal(f.to_string(), xsd::DOUBLE).into()),
        SqlValue::Text(s) => Some(Literal::new_simple_literal(s.clone()).into()),
    }
}

fn text_of(value: &SqlValue) -> String {
    match value {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::Null => String::new(),
    }
}

/// A stream of triples instantiated from a `CONSTRUCT` template (or a
/// pre-computed `DESCRIBE` listing). RDF graphs are sets, so duplicates are
/// dropped.
pub struct QueryTripleStream {
    template: Vec<TriplePattern>,
    solutions: QuerySolutionStream,
    buffer: VecDeque<Triple>,
    seen: FxHashSet<Triple>,
}

impl QueryTripleStream {
    pub fn new(template: Vec<TriplePattern>, solutions: QuerySolutionStream) -> Self {
        Self {
            template,
            solutions,
            buffer: VecDeque::new(),
            seen: FxHashSet::default(),
        }
    }

    /// A stream over an already materialised triple listing.
    pub fn from_triples(triples: Vec<Triple>) -> Self {
        let mut seen = FxHashSet::default();
        let buffer = triples
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        Self {
            template: Vec::new(),
            solutions: QuerySolutionStream::empty(),
            buffer,
            seen,
        }
    }
}

impl Stream for QueryTripleStream {
    type Item = Result<Triple, EngineError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(triple) = self.buffer.pop_front() {
                return Poll::Ready(Some(Ok(triple)));
            }
            match ready!(self.solutions.poll_next_unpin(cx)) {
                None => return Poll::Ready(None),
                Some(Err(error)) => return Poll::Ready(Some(Err(error))),
                Some(Ok(solution)) => {
                    let mut bnodes = FxHashMap::default();
                    let this = self.as_mut().get_mut();
                    for pattern in &this.template {
                        if let Some(triple) =
                            instantiate_triple(pattern, &solution, &mut bnodes)
                        {
                            if this.seen.insert(triple.clone()) {
                                this.buffer.push_back(triple);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Instantiates one template triple against a solution. Any unbound position
/// or invalid term-in-position drops the triple.
fn instantiate_triple(
    pattern: &TriplePattern,
    solution: &QuerySolution,
    bnodes: &mut FxHashMap<BlankNode, BlankNode>,
) -> Option<Triple> {
    let subject: Subject = match &pattern.subject {
        TermPattern::NamedNode(n) => n.clone().into(),
        TermPattern::BlankNode(b) => fresh_bnode(b, bnodes).into(),
        TermPattern::Literal(_) => return None,
        TermPattern::Variable(v) => match solution.get(v)? {
            Term::NamedNode(n) => n.clone().into(),
            Term::BlankNode(b) => b.clone().into(),
            Term::Literal(_) => return None,
        },
    };
    let predicate = match &pattern.predicate {
        NamedNodePattern::NamedNode(n) => n.clone(),
        NamedNodePattern::Variable(v) => match solution.get(v)? {
            Term::NamedNode(n) => n.clone(),
            _ => return None,
        },
    };
    let object = match &pattern.object {
        TermPattern::NamedNode(n) => Term::from(n.clone()),
        TermPattern::BlankNode(b) => fresh_bnode(b, bnodes).into(),
        TermPattern::Literal(l) => l.clone().into(),
        TermPattern::Variable(v) => solution.get(v)?.clone(),
    };
    Some(Triple::new(subject, predicate, object))
}

/// Template blank nodes are renamed per solution.
fn fresh_bnode(label: &BlankNode, bnodes: &mut FxHashMap<BlankNode, BlankNode>) -> BlankNode {
    bnodes
        .entry(label.clone())
        .or_insert_with(BlankNode::default)
        .clone()
}
