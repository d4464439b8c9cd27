//! Instantiation of DELETE/INSERT templates against WHERE solutions.

use quadsql_model::{BlankNode, GraphName, NamedNode, Quad, Subject, Term};
use rustc_hash::FxHashMap;
use sparesults::QuerySolution;
use spargebra::term::{
    GraphNamePattern, GroundQuadPattern, GroundTermPattern, NamedNodePattern, QuadPattern,
    TermPattern,
};

/// Instantiates an INSERT template quad. Blank nodes are renamed once per
/// solution through `bnodes`. Returns `None` when a variable is unbound or a
/// term is invalid for its position.
pub(crate) fn fill_quad_pattern(
    pattern: &QuadPattern,
    solution: &QuerySolution,
    bnodes: &mut FxHashMap<BlankNode, BlankNode>,
) -> Option<Quad> {
    let subject = match fill_term_pattern(&pattern.subject, solution, bnodes)? {
        Term::NamedNode(n) => Subject::from(n),
        Term::BlankNode(b) => Subject::from(b),
        Term::Literal(_) => return None,
    };
    let predicate = fill_named_node_pattern(&pattern.predicate, solution)?;
    let object = fill_term_pattern(&pattern.object, solution, bnodes)?;
    let graph_name = fill_graph_name_pattern(&pattern.graph_name, solution)?;
    Some(Quad::new(subject, predicate, object, graph_name))
}

/// Instantiates a DELETE template quad (ground patterns cannot contain blank
/// nodes).
pub(crate) fn fill_ground_quad_pattern(
    pattern: &GroundQuadPattern,
    solution: &QuerySolution,
) -> Option<Quad> {
    let subject = match fill_ground_term_pattern(&pattern.subject, solution)? {
        Term::NamedNode(n) => Subject::from(n),
        Term::BlankNode(b) => Subject::from(b),
        Term::Literal(_) => return None,
    };
    let predicate = fill_named_node_pattern(&pattern.predicate, solution)?;
    let object = fill_ground_term_pattern(&pattern.object, solution)?;
    let graph_name = fill_graph_name_pattern(&pattern.graph_name, solution)?;
    Some(Quad::new(subject, predicate, object, graph_name))
}

fn fill_term_pattern(
    pattern: &TermPattern,
    solution: &QuerySolution,
    bnodes: &mut FxHashMap<BlankNode, BlankNode>,
) -> Option<Term> {
    Some(match pattern {
        TermPattern::NamedNode(n) => n.clone().into(),
        TermPattern::BlankNode(b) => bnodes
            .entry(b.clone())
            .or_insert_with(BlankNode::default)
            .clone()
            .into(),
        TermPattern::Literal(l) => l.clone().into(),
        TermPattern::Variable(v) => solution.get(v)?.clone(),
    })
}

fn fill_ground_term_pattern(
    pattern: &GroundTermPattern,
    solution: &QuerySolution,
) -> Option<Term> {
    Some(match pattern {
        GroundTermPattern::NamedNode(n) => n.clone().into(),
        GroundTermPattern::Literal(l) => l.clone().into(),
        GroundTermPattern::Variable(v) => solution.get(v)?.clone(),
    })
}

fn fill_named_node_pattern(
    pattern: &NamedNodePattern,
    solution: &QuerySolution,
) -> Option<NamedNode> {
    match pattern {
        NamedNodePattern::NamedNode(n) => Some(n.clone()),
        NamedNodePattern::Variable(v) => match solution.get(v)? {
            Term::NamedNode(n) => Some(n.clone()),
            _ => None,
        },
    }
}

fn fill_graph_name_pattern(
    pattern: &GraphNamePattern,
    solution: &QuerySolution,
) -> Option<GraphName> {
    match pattern {
        GraphNamePattern::NamedNode(n) => Some(n.clone().into()),
        GraphNamePattern::DefaultGraph => Some(GraphName::DefaultGraph),
        GraphNamePattern::Variable(v) => match solution.get(v)? {
            Term::NamedNode(n) => Some(n.clone().into()),
            Term::BlankNode(b) => Some(b.clone().into()),
            Term::Literal(_) => None,
        },
    }
}
