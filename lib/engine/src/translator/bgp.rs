use crate::translator::fragment::{
    JoinClause, JoinType, SqlFragment, TermColumns, VarBinding,
};
use crate::translator::{GraphContext, PatternTranslator};
use crate::EngineError;
use quadsql_common::{AliasGenerator, AliasKind};
use quadsql_model::{TermKey, Variable};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};

/// The quad-table position a pattern component constrains.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Position {
    Subject,
    Predicate,
    Object,
    Graph,
}

impl Position {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Position::Subject => "subject_id",
            Position::Predicate => "predicate_id",
            Position::Object => "object_id",
            Position::Graph => "context_id",
        }
    }

    fn term_alias_kind(self) -> AliasKind {
        match self {
            Position::Subject => AliasKind::SubjectTerm,
            Position::Predicate => AliasKind::PredicateTerm,
            Position::Object => AliasKind::ObjectTerm,
            Position::Graph => AliasKind::GraphTerm,
        }
    }
}

/// A pattern component: either ground (resolved through the dictionary) or a
/// variable to expose.
pub(crate) enum PatternSlot {
    Bound(TermKey),
    Var(Variable),
}

pub(crate) fn slot_of_term_pattern(pattern: &TermPattern) -> PatternSlot {
    match pattern {
        TermPattern::NamedNode(n) => PatternSlot::Bound(TermKey::iri(n.as_str())),
        TermPattern::Literal(l) => PatternSlot::Bound(TermKey::from_literal(l.as_ref())),
        // Blank nodes in query patterns act as non-distinguished variables.
        TermPattern::BlankNode(b) => PatternSlot::Var(bnode_variable(b.as_str())),
        TermPattern::Variable(v) => PatternSlot::Var(v.clone()),
    }
}

pub(crate) fn slot_of_named_node_pattern(pattern: &NamedNodePattern) -> PatternSlot {
    match pattern {
        NamedNodePattern::NamedNode(n) => PatternSlot::Bound(TermKey::iri(n.as_str())),
        NamedNodePattern::Variable(v) => PatternSlot::Var(v.clone()),
    }
}

pub(crate) fn bnode_variable(label: &str) -> Variable {
    Variable::new_unchecked(format!("__bnode_{label}"))
}

impl PatternTranslator<'_> {
    /// Translates a basic graph pattern into a quad-table join tree.
    pub(crate) fn translate_bgp(
        &self,
        patterns: &[TriplePattern],
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<SqlFragment, EngineError> {
        let mut fragment = SqlFragment::default();
        for pattern in patterns {
            let quad_alias = aliases.next(AliasKind::Quad);
            if fragment.root.is_none() {
                fragment.root = Some((self.tables.quad.clone(), quad_alias.clone()));
            } else {
                fragment.joins.push(JoinClause {
                    join_type: JoinType::Cross,
                    table: self.tables.quad.clone(),
                    alias: quad_alias.clone(),
                    on: Vec::new(),
                });
            }

            let slots = [
                (Position::Subject, slot_of_term_pattern(&pattern.subject)),
                (
                    Position::Predicate,
                    slot_of_named_node_pattern(&pattern.predicate),
                ),
                (Position::Object, slot_of_term_pattern(&pattern.object)),
            ];
            for (position, slot) in slots {
                let column = format!("{quad_alias}.{}", position.column());
                self.constrain_slot(&mut fragment, slot, column, position, aliases);
            }

            match graph {
                GraphContext::DefaultUnion => {}
                GraphContext::Fixed(id) => fragment
                    .conditions
                    .push(format!("{quad_alias}.context_id = {id}")),
                GraphContext::NeverMatch => fragment.conditions.push("1 = 0".to_owned()),
                GraphContext::Var(v) => {
                    let column = format!("{quad_alias}.{}", Position::Graph.column());
                    self.constrain_slot(
                        &mut fragment,
                        PatternSlot::Var(v.clone()),
                        column,
                        Position::Graph,
                        aliases,
                    );
                }
            }
        }
        Ok(fragment)
    }

    /// Applies one pattern slot to `id_column`: ground slots become equality
    /// (or never-match) conditions, first-occurrence variables join the term
    /// table, repeated variables become id equalities.
    pub(crate) fn constrain_slot(
        &self,
        fragment: &mut SqlFragment,
        slot: PatternSlot,
        id_column: String,
        position: Position,
        aliases: &mut AliasGenerator,
    ) {
        match slot {
            PatternSlot::Bound(key) => match self.term_ids.get(&key) {
                Some(id) => fragment.conditions.push(format!("{id_column} = {id}")),
                None => {
                    tracing::debug!(
                        term = %key.text,
                        "bound term is not in the dictionary, compiling never-match"
                    );
                    fragment.conditions.push("1 = 0".to_owned());
                }
            },
            PatternSlot::Var(variable) => {
                if let Some(existing) = fragment.vars.get(&variable) {
                    if let Some(id) = existing.id_expr() {
                        fragment.conditions.push(format!("{id_column} = {id}"));
                    }
                    return;
                }
                let term_alias = aliases.next(position.term_alias_kind());
                fragment.joins.push(JoinClause {
                    join_type: JoinType::Inner,
                    table: self.tables.term.clone(),
                    alias: term_alias.clone(),
                    on: vec![format!("{term_alias}.term_id = {id_column}")],
                });
                let (lang, datatype) = if position == Position::Object {
                    // Only objects can be literals; resolve the datatype IRI
                    // through a left join so marshalling stays single-pass.
                    let dt_alias = aliases.next(AliasKind::ObjectDatatype);
                    fragment.joins.push(JoinClause {
                        join_type: JoinType::Left,
                        table: self.tables.term.clone(),
                        alias: dt_alias.clone(),
                        on: vec![format!("{dt_alias}.term_id = {term_alias}.datatype_id")],
                    });
                    (
                        format!("{term_alias}.lang"),
                        format!("{dt_alias}.term_text"),
                    )
                } else {
                    ("NULL".to_owned(), "NULL".to_owned())
                };
                fragment.vars.insert(
                    variable,
                    VarBinding::Term(TermColumns {
                        id: id_column,
                        text: format!("{term_alias}.term_text"),
                        kind: format!("{term_alias}.term_type"),
                        lang,
                        datatype,
                    }),
                );
            }
        }
    }
}
