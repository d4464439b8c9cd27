use crate::translator::bgp::{slot_of_term_pattern, Position};
use crate::translator::fragment::SqlFragment;
use crate::translator::{GraphContext, PatternTranslator};
use crate::EngineError;
use quadsql_common::{AliasGenerator, AliasKind};
use quadsql_model::{NamedNode, TermId, TermKey};
use spargebra::algebra::PropertyPathExpression;
use spargebra::term::TermPattern;

impl PatternTranslator<'_> {
    /// Translates a property-path pattern by compiling the path into a
    /// derived table exposing `start_node` / `end_node` term ids and then
    /// binding the endpoints like a BGP triple.
    pub(crate) fn translate_path(
        &self,
        subject: &TermPattern,
        path: &PropertyPathExpression,
        object: &TermPattern,
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<SqlFragment, EngineError> {
        let graph_id = match graph {
            GraphContext::DefaultUnion => None,
            GraphContext::Fixed(id) => Some(*id),
            GraphContext::NeverMatch => None,
            GraphContext::Var(_) => {
                return Err(EngineError::Unsupported(
                    "property path inside GRAPH with a variable graph name".to_owned(),
                ))
            }
        };

        let table = self.compile_path(path, aliases, graph_id)?;
        let alias = aliases.next(AliasKind::Path);
        let mut fragment = SqlFragment {
            root: Some((table, alias.clone())),
            ..Default::default()
        };
        if matches!(graph, GraphContext::NeverMatch) {
            fragment.conditions.push("1 = 0".to_owned());
        }
        self.constrain_slot(
            &mut fragment,
            slot_of_term_pattern(subject),
            format!("{alias}.start_node"),
            Position::Subject,
            aliases,
        );
        self.constrain_slot(
            &mut fragment,
            slot_of_term_pattern(object),
            format!("{alias}.end_node"),
            Position::Object,
            aliases,
        );
        Ok(fragment)
    }

    /// Compiles a path expression into a parenthesised derived table with
    /// the columns `start_node, end_node`.
    fn compile_path(
        &self,
        path: &PropertyPathExpression,
        aliases: &mut AliasGenerator,
        graph_id: Option<TermId>,
    ) -> Result<String, EngineError> {
        match path {
            PropertyPathExpression::NamedNode(predicate) => {
                Ok(self.hop(predicate, false, graph_id))
            }
            PropertyPathExpression::Reverse(inner) => {
                if let PropertyPathExpression::NamedNode(predicate) = inner.as_ref() {
                    return Ok(self.hop(predicate, true, graph_id));
                }
                let inner = self.compile_path(inner, aliases, graph_id)?;
                let alias = aliases.next(AliasKind::Path);
                Ok(format!(
                    "(SELECT {alias}.end_node AS start_node, {alias}.start_node AS end_node \
                     FROM {inner} AS {alias})"
                ))
            }
            PropertyPathExpression::Sequence(left, right) => {
                let left = self.compile_path(left, aliases, graph_id)?;
                let right = self.compile_path(right, aliases, graph_id)?;
                let left_alias = aliases.next(AliasKind::Path);
                let right_alias = aliases.next(AliasKind::Path);
                Ok(format!(
                    "(SELECT {left_alias}.start_node AS start_node, \
                     {right_alias}.end_node AS end_node \
                     FROM {left} AS {left_alias} \
                     JOIN {right} AS {right_alias} \
                     ON {right_alias}.start_node = {left_alias}.end_node)"
                ))
            }
            PropertyPathExpression::Alternative(left, right) => {
                let left = self.compile_path(left, aliases, graph_id)?;
                let right = self.compile_path(right, aliases, graph_id)?;
                let left_alias = aliases.next(AliasKind::Path);
                let right_alias = aliases.next(AliasKind::Path);
                Ok(format!(
                    "(SELECT {left_alias}.start_node AS start_node, \
                     {left_alias}.end_node AS end_node FROM {left} AS {left_alias} \
                     UNION ALL \
                     SELECT {right_alias}.start_node, {right_alias}.end_node \
                     FROM {right} AS {right_alias})"
                ))
            }
            PropertyPathExpression::ZeroOrOne(inner) => {
                let inner = self.compile_path(inner, aliases, graph_id)?;
                let reflexive_alias = aliases.next(AliasKind::Path);
                let hop_alias = aliases.next(AliasKind::Path);
                Ok(format!(
                    "(SELECT {reflexive_alias}.start_node AS start_node, \
                     {reflexive_alias}.start_node AS end_node \
                     FROM {inner} AS {reflexive_alias} \
                     UNION \
                     SELECT {hop_alias}.start_node, {hop_alias}.end_node \
                     FROM {inner} AS {hop_alias})"
                ))
            }
            PropertyPathExpression::ZeroOrMore(inner) => {
                self.compile_closure(inner, aliases, graph_id, true)
            }
            PropertyPathExpression::OneOrMore(inner) => {
                self.compile_closure(inner, aliases, graph_id, false)
            }
            PropertyPathExpression::NegatedPropertySet(predicates) => {
                Ok(self.compile_negated(predicates, graph_id))
            }
        }
    }

    /// A single hop along a predicate, optionally inverted.
    fn hop(&self, predicate: &NamedNode, inverse: bool, graph_id: Option<TermId>) -> String {
        let Some(id) = self.term_ids.get(&TermKey::iri(predicate.as_str())) else {
            return self.empty_path_table();
        };
        let (start, end) = if inverse {
            ("object_id", "subject_id")
        } else {
            ("subject_id", "object_id")
        };
        let graph = graph_condition(graph_id, "");
        format!(
            "(SELECT {start} AS start_node, {end} AS end_node FROM {} \
             WHERE predicate_id = {id}{graph})",
            self.tables.quad
        )
    }

    /// Transitive closure over a single predicate (or its inverse) as a
    /// recursive CTE. The path array rules out cycles; the configured depth
    /// cap bounds recursion.
    fn compile_closure(
        &self,
        inner: &PropertyPathExpression,
        aliases: &mut AliasGenerator,
        graph_id: Option<TermId>,
        reflexive: bool,
    ) -> Result<String, EngineError> {
        let (predicate, inverse) = match inner {
            PropertyPathExpression::NamedNode(p) => (p, false),
            PropertyPathExpression::Reverse(boxed) => match boxed.as_ref() {
                PropertyPathExpression::NamedNode(p) => (p, true),
                _ => {
                    return Err(EngineError::Unsupported(
                        "property path closure over a composite sub-path".to_owned(),
                    ))
                }
            },
            _ => {
                return Err(EngineError::Unsupported(
                    "property path closure over a composite sub-path".to_owned(),
                ))
            }
        };
        let Some(id) = self.term_ids.get(&TermKey::iri(predicate.as_str())) else {
            return Ok(self.empty_path_table());
        };

        let (start, end) = if inverse {
            ("object_id", "subject_id")
        } else {
            ("subject_id", "object_id")
        };
        let quad = &self.tables.quad;
        let cte = aliases.next(AliasKind::PathCte);
        let base_graph = graph_condition(graph_id, "");
        let step_graph = graph_condition(graph_id, "q.");
        let base = if reflexive {
            format!(
                "SELECT {start} AS start_node, {start} AS end_node, \
                 ARRAY[{start}] AS path, 0 AS depth \
                 FROM {quad} WHERE predicate_id = {id}{base_graph}"
            )
        } else {
            format!(
                "SELECT {start} AS start_node, {end} AS end_node, \
                 ARRAY[{start}, {end}] AS path, 1 AS depth \
                 FROM {quad} WHERE predicate_id = {id}{base_graph}"
            )
        };
        let max_depth = self.config.path_max_depth;
        Ok(format!(
            "(WITH RECURSIVE {cte} (start_node, end_node, path, depth) AS (\
             {base} \
             UNION ALL \
             SELECT r.start_node, q.{end}, r.path || q.{end}, r.depth + 1 \
             FROM {cte} r JOIN {quad} q ON q.{start} = r.end_node \
             WHERE q.predicate_id = {id}{step_graph} \
             AND r.depth < {max_depth} \
             AND NOT (q.{end} = ANY(r.path))\
             ) SELECT DISTINCT start_node, end_node FROM {cte})"
        ))
    }

    /// Pairs adjacent under some predicate outside the negated set. The
    /// filter is per edge: a pair stays in as long as one of its edges uses
    /// a non-negated predicate. Negated predicates absent from the
    /// dictionary rule out nothing.
    fn compile_negated(&self, predicates: &[NamedNode], graph_id: Option<TermId>) -> String {
        let quad = &self.tables.quad;
        let mut conditions = Vec::new();
        let negated_ids: Vec<String> = predicates
            .iter()
            .filter_map(|p| self.term_ids.get(&TermKey::iri(p.as_str())))
            .map(ToString::to_string)
            .collect();
        if !negated_ids.is_empty() {
            conditions.push(format!(
                "predicate_id NOT IN ({})",
                negated_ids.join(", ")
            ));
        }
        if let Some(condition) = graph_id.map(|id| format!("context_id = {id}")) {
            conditions.push(condition);
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        format!(
            "(SELECT DISTINCT subject_id AS start_node, object_id AS end_node \
             FROM {quad}{where_clause})"
        )
    }

    /// A well-typed derived table that matches nothing, used when a path
    /// predicate is absent from the dictionary.
    fn empty_path_table(&self) -> String {
        format!(
            "(SELECT subject_id AS start_node, object_id AS end_node FROM {} WHERE 1 = 0)",
            self.tables.quad
        )
    }
}

fn graph_condition(graph_id: Option<TermId>, qualifier: &str) -> String {
    graph_id
        .map(|id| format!(" AND {qualifier}context_id = {id}"))
        .unwrap_or_default()
}
