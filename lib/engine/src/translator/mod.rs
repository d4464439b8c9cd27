//! The SPARQL-to-SQL pattern translator.
//!
//! [`PatternTranslator`] dispatches on the spargebra algebra tree and
//! assembles [`SqlFragment`]s bottom-up. Binary patterns translate their
//! operands under independently derived alias generators, so the two operand
//! alias spaces can never collide.

mod bgp;
mod expression;
pub mod fragment;
mod paths;
mod select;
mod terms;

use crate::EngineError;
use expression::{expression_variables, ExprLowerer};
use fragment::{derived_vars, JoinClause, JoinType, SqlFragment, VarBinding, VarMap};
use quadsql_common::sql::quote_str;
use quadsql_common::{AliasGenerator, AliasKind, EngineConfig};
use quadsql_storage::TableSet;
use quadsql_model::{TermId, TermKey, Variable};
use rustc_hash::FxHashMap;
use spargebra::algebra::{
    AggregateExpression, Expression, GraphPattern, OrderExpression,
};
use spargebra::term::{GroundTerm, NamedNodePattern};

pub use select::{ProjectedVar, ProjectionShape, SelectQuery};
pub use terms::{collect_pattern_term_keys, collect_query_term_keys};

use select::{render_branch, render_exists, render_final, render_nested, SelectParts};

/// The graph constraint an enclosing `GRAPH` clause imposes on quad scans.
#[derive(Clone, Debug)]
pub enum GraphContext {
    /// No `GRAPH` clause: match quads of every graph.
    DefaultUnion,
    /// `GRAPH <iri>` resolved to a context id.
    Fixed(TermId),
    /// `GRAPH <iri>` naming a graph absent from the dictionary.
    NeverMatch,
    /// `GRAPH ?var`: expose the context as a variable.
    Var(Variable),
}

/// Translates one query's WHERE tree. Stateless across queries; the bound
/// term ids are resolved in one batch before translation starts.
pub struct PatternTranslator<'a> {
    pub(crate) tables: &'a TableSet,
    pub(crate) term_ids: &'a FxHashMap<TermKey, TermId>,
    pub(crate) config: &'a EngineConfig,
}

impl<'a> PatternTranslator<'a> {
    pub fn new(
        tables: &'a TableSet,
        term_ids: &'a FxHashMap<TermKey, TermId>,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            tables,
            term_ids,
            config,
        }
    }

    /// Translates a complete WHERE tree into the outer SELECT.
    pub fn translate_query(
        &self,
        pattern: &GraphPattern,
        aliases: &mut AliasGenerator,
    ) -> Result<SelectQuery, EngineError> {
        let parts = self.build_select_parts(pattern, aliases, &GraphContext::DefaultUnion)?;
        Ok(render_final(&parts))
    }

    /// Like [`Self::translate_query`] but with an extra `LIMIT 1`, for ASK.
    pub fn translate_ask(
        &self,
        pattern: &GraphPattern,
        aliases: &mut AliasGenerator,
    ) -> Result<SelectQuery, EngineError> {
        let mut parts = self.build_select_parts(pattern, aliases, &GraphContext::DefaultUnion)?;
        parts.limit = Some(1);
        parts.offset = 0;
        Ok(render_final(&parts))
    }

    /// Peels the solution modifiers off the top of a pattern and translates
    /// the core below them.
    fn build_select_parts(
        &self,
        pattern: &GraphPattern,
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<SelectParts, EngineError> {
        let mut distinct = false;
        let mut saw_slice = false;
        let mut limit = None;
        let mut offset = 0;
        let mut projection: Option<Vec<Variable>> = None;
        let mut order: Option<&[OrderExpression]> = None;

        let mut current = pattern;
        loop {
            match current {
                GraphPattern::Slice {
                    inner,
                    start,
                    length,
                } if !saw_slice => {
                    saw_slice = true;
                    limit = *length;
                    offset = *start;
                    current = inner;
                }
                GraphPattern::Distinct { inner } | GraphPattern::Reduced { inner }
                    if !distinct =>
                {
                    distinct = true;
                    current = inner;
                }
                GraphPattern::Project { inner, variables } if projection.is_none() => {
                    projection = Some(variables.clone());
                    current = inner;
                }
                GraphPattern::OrderBy { inner, expression } if order.is_none() => {
                    order = Some(expression);
                    current = inner;
                }
                _ => break,
            }
        }

        let fragment = self.translate_pattern(current, aliases, graph)?;
        let projection =
            projection.unwrap_or_else(|| fragment.vars.keys().cloned().collect());
        let mut order_by = Vec::new();
        for expression in order.unwrap_or_default() {
            let (inner, ascending) = match expression {
                OrderExpression::Asc(e) => (e, true),
                OrderExpression::Desc(e) => (e, false),
            };
            let sql = self.lower_expression(inner, &fragment.vars, aliases, graph)?;
            order_by.push(if ascending { sql } else { format!("{sql} DESC") });
        }

        Ok(SelectParts {
            fragment,
            projection,
            distinct,
            order_by,
            limit,
            offset,
        })
    }

    pub(crate) fn translate_pattern(
        &self,
        pattern: &GraphPattern,
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<SqlFragment, EngineError> {
        match pattern {
            GraphPattern::Bgp { patterns } => self.translate_bgp(patterns, aliases, graph),
            GraphPattern::Path {
                subject,
                path,
                object,
            } => self.translate_path(subject, path, object, aliases, graph),
            GraphPattern::Join { left, right } => {
                self.translate_join(left, right, aliases, graph)
            }
            GraphPattern::LeftJoin {
                left,
                right,
                expression,
            } => self.translate_left_join(left, right, expression.as_ref(), aliases, graph),
            GraphPattern::Filter { expr, inner } => {
                let mut fragment = self.translate_pattern(inner, aliases, graph)?;
                let sql = self.lower_expression_as_condition(
                    expr,
                    &fragment.vars,
                    aliases,
                    graph,
                )?;
                let references = expression_variables(expr);
                if references.iter().any(|v| fragment.agg_vars.contains(v)) {
                    fragment.having.push(sql);
                } else {
                    fragment.conditions.push(sql);
                }
                Ok(fragment)
            }
            GraphPattern::Union { left, right } => {
                self.translate_union(left, right, aliases, graph)
            }
            GraphPattern::Graph { name, inner } => {
                let context = match name {
                    NamedNodePattern::NamedNode(n) => {
                        match self.term_ids.get(&TermKey::iri(n.as_str())) {
                            Some(id) => GraphContext::Fixed(*id),
                            None => {
                                tracing::debug!(
                                    graph = n.as_str(),
                                    "unknown graph, compiling never-match"
                                );
                                GraphContext::NeverMatch
                            }
                        }
                    }
                    NamedNodePattern::Variable(v) => GraphContext::Var(v.clone()),
                };
                self.translate_pattern(inner, aliases, &context)
            }
            GraphPattern::Extend {
                inner,
                variable,
                expression,
            } => {
                let mut fragment = self.translate_pattern(inner, aliases, graph)?;
                let sql =
                    self.lower_expression(expression, &fragment.vars, aliases, graph)?;
                let references = expression_variables(expression);
                if references.iter().any(|v| fragment.agg_vars.contains(v)) {
                    fragment.agg_vars.insert(variable.clone());
                }
                fragment.vars.insert(variable.clone(), VarBinding::Value(sql));
                Ok(fragment)
            }
            GraphPattern::Minus { left, right } => {
                self.translate_minus(left, right, aliases, graph)
            }
            GraphPattern::Values {
                variables,
                bindings,
            } => self.translate_values(variables, bindings, aliases),
            GraphPattern::Group {
                inner,
                variables,
                aggregates,
            } => self.translate_group(inner, variables, aggregates, aliases, graph),
            GraphPattern::OrderBy { .. }
            | GraphPattern::Project { .. }
            | GraphPattern::Distinct { .. }
            | GraphPattern::Reduced { .. }
            | GraphPattern::Slice { .. } => self.translate_subquery(pattern, aliases, graph),
            GraphPattern::Service { .. } => Err(EngineError::Unsupported(
                "SERVICE (federated queries)".to_owned(),
            )),
        }
    }

    /// A nested SELECT (subquery or solution modifiers below the top level)
    /// becomes a derived table with an isolated alias space.
    fn translate_subquery(
        &self,
        pattern: &GraphPattern,
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<SqlFragment, EngineError> {
        let mut child = aliases.child();
        let parts = self.build_select_parts(pattern, &mut child, graph)?;
        let sql = render_nested(&parts);
        let alias = aliases.next(AliasKind::Subquery);
        let vars = derived_vars(parts.projection.iter(), &alias);
        Ok(SqlFragment {
            root: Some((sql, alias)),
            vars,
            ..Default::default()
        })
    }

    fn translate_join(
        &self,
        left: &GraphPattern,
        right: &GraphPattern,
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<SqlFragment, EngineError> {
        let mut left_child = aliases.child();
        let mut right_child = aliases.child();
        let mut left = self.translate_pattern(left, &mut left_child, graph)?;
        let right = self.translate_pattern(right, &mut right_child, graph)?;
        let shared = shared_var_conditions(&left.vars, &right.vars);
        merge_cross(&mut left, right);
        left.conditions.extend(shared);
        Ok(left)
    }

    fn translate_left_join(
        &self,
        left: &GraphPattern,
        right: &GraphPattern,
        expression: Option<&Expression>,
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<SqlFragment, EngineError> {
        let mut left_child = aliases.child();
        let mut right_child = aliases.child();
        let mut left = self.translate_pattern(left, &mut left_child, graph)?;
        let mut right = self.translate_pattern(right, &mut right_child, graph)?;

        if right.root.is_none()
            && right.joins.is_empty()
            && right.conditions.is_empty()
            && right.vars.is_empty()
        {
            return Ok(left);
        }
        if left.root.is_none() && left.joins.is_empty() {
            // OPTIONAL over the empty solution: left joins hang off a
            // one-row relation.
            left.root = Some(("(SELECT 1)".to_owned(), aliases.next(AliasKind::Subquery)));
        }
        let root = match right.root.take() {
            Some(root) => root,
            // An optional side without a row source (only filters): join a
            // one-row table so the conditions have somewhere to live.
            None if right.joins.is_empty() => {
                ("(SELECT 1)".to_owned(), aliases.next(AliasKind::Subquery))
            }
            None => {
                return EngineError::internal("optional fragment has joins but no root")
            }
        };

        // Everything that must hold for the optional row: shared-variable
        // equalities, the optional side's own conditions, and the OPTIONAL
        // filter expression. All of it goes into ON clauses; WHERE placement
        // would drop required-side rows through NULL comparisons.
        let mut on_conditions = shared_var_conditions(&left.vars, &right.vars);
        on_conditions.append(&mut right.conditions);
        if let Some(expression) = expression {
            let mut combined = right.vars.clone();
            for (v, b) in &left.vars {
                combined.insert(v.clone(), b.clone());
            }
            on_conditions.push(self.lower_expression_as_condition(
                expression,
                &combined,
                aliases,
                graph,
            )?);
        }

        let mut optional_aliases = vec![root.1.clone()];
        optional_aliases.extend(right.joins.iter().map(|j| j.alias.clone()));
        let mut optional_joins: Vec<JoinClause> = right
            .joins
            .into_iter()
            .map(|mut join| {
                join.join_type = JoinType::Left;
                join
            })
            .collect();
        let mut root_on = Vec::new();
        for condition in on_conditions {
            match last_referenced(&condition, &optional_aliases) {
                Some(0) | None => root_on.push(condition),
                Some(index) => optional_joins[index - 1].on.push(condition),
            }
        }

        left.joins.push(JoinClause {
            join_type: JoinType::Left,
            table: root.0,
            alias: root.1,
            on: root_on,
        });
        left.joins.extend(optional_joins);
        for (variable, binding) in right.vars {
            left.vars.entry(variable).or_insert(binding);
        }
        left.agg_vars.extend(right.agg_vars);
        Ok(left)
    }

    fn translate_union(
        &self,
        left: &GraphPattern,
        right: &GraphPattern,
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<SqlFragment, EngineError> {
        let mut left_child = aliases.child();
        let mut right_child = aliases.child();
        let left = self.translate_pattern(left, &mut left_child, graph)?;
        let right = self.translate_pattern(right, &mut right_child, graph)?;

        let mut variables: Vec<Variable> = left.vars.keys().cloned().collect();
        for variable in right.vars.keys() {
            if !variables.contains(variable) {
                variables.push(variable.clone());
            }
        }

        // UNION ALL throughout; an enclosing DISTINCT dedupes at the outer
        // SELECT.
        let left_select = render_branch(&left, &variables);
        let right_select = render_branch(&right, &variables);
        let alias = aliases.next(AliasKind::Union);
        let vars = derived_vars(variables.iter(), &alias);
        Ok(SqlFragment {
            root: Some((
                format!("({left_select} UNION ALL {right_select})"),
                alias,
            )),
            vars,
            ..Default::default()
        })
    }

    fn translate_minus(
        &self,
        left: &GraphPattern,
        right: &GraphPattern,
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<SqlFragment, EngineError> {
        let mut left_child = aliases.child();
        let mut right_child = aliases.child();
        let mut keep = self.translate_pattern(left, &mut left_child, graph)?;
        let exclude = self.translate_pattern(right, &mut right_child, graph)?;

        let shared = shared_var_conditions(&keep.vars, &exclude.vars);
        if shared.is_empty() {
            // MINUS with disjoint domains removes nothing.
            return Ok(keep);
        }
        keep.conditions
            .push(format!("NOT EXISTS ({})", render_exists(&exclude, &shared)));
        Ok(keep)
    }

    fn translate_values(
        &self,
        variables: &[Variable],
        bindings: &[Vec<Option<GroundTerm>>],
        aliases: &mut AliasGenerator,
    ) -> Result<SqlFragment, EngineError> {
        let alias = aliases.next(AliasKind::Subquery);
        let mut selects = Vec::new();
        for (row_index, row) in bindings.iter().enumerate() {
            let mut columns = Vec::new();
            for (column_index, variable) in variables.iter().enumerate() {
                let cell = row.get(column_index).and_then(Option::as_ref);
                let (id, text, kind, lang, datatype) = match cell {
                    Some(term) => {
                        let key = TermKey::from_ground_term(term);
                        let id = self
                            .term_ids
                            .get(&key)
                            .map_or_else(|| "NULL".to_owned(), ToString::to_string);
                        let lang = key
                            .lang
                            .as_deref()
                            .map_or_else(|| "NULL".to_owned(), quote_str);
                        let datatype = key
                            .datatype
                            .as_deref()
                            .map_or_else(|| "NULL".to_owned(), quote_str);
                        (
                            id,
                            quote_str(&key.text),
                            quote_str(key.kind.code()),
                            lang,
                            datatype,
                        )
                    }
                    None => (
                        "NULL".to_owned(),
                        "NULL".to_owned(),
                        "NULL".to_owned(),
                        "NULL".to_owned(),
                        "NULL".to_owned(),
                    ),
                };
                if row_index == 0 {
                    columns.push(format!(
                        "{id} AS {}, {text} AS {}, {kind} AS {}, {lang} AS {}, {datatype} AS {}",
                        fragment::derived_column(variable, "id"),
                        fragment::derived_column(variable, "text"),
                        fragment::derived_column(variable, "kind"),
                        fragment::derived_column(variable, "lang"),
                        fragment::derived_column(variable, "dt"),
                    ));
                } else {
                    columns.push(format!("{id}, {text}, {kind}, {lang}, {datatype}"));
                }
            }
            let list = if columns.is_empty() {
                "1".to_owned()
            } else {
                columns.join(", ")
            };
            selects.push(format!("SELECT {list}"));
        }

        let body = if selects.is_empty() {
            // VALUES with zero rows: an empty relation with the right shape.
            let columns: Vec<String> = variables
                .iter()
                .map(|v| fragment::derived_projection(v, None))
                .collect();
            let list = if columns.is_empty() {
                "1".to_owned()
            } else {
                columns.join(", ")
            };
            format!("SELECT {list} WHERE 1 = 0")
        } else {
            selects.join(" UNION ALL ")
        };

        let vars = derived_vars(variables.iter(), &alias);
        Ok(SqlFragment {
            root: Some((format!("({body})"), alias)),
            vars,
            ..Default::default()
        })
    }

    fn translate_group(
        &self,
        inner: &GraphPattern,
        variables: &[Variable],
        aggregates: &[(Variable, AggregateExpression)],
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<SqlFragment, EngineError> {
        let mut fragment = self.translate_pattern(inner, aliases, graph)?;

        let mut group_by = Vec::new();
        for variable in variables {
            if let Some(binding) = fragment.vars.get(variable) {
                match binding {
                    VarBinding::Term(c) => {
                        for expr in [&c.id, &c.text, &c.kind, &c.lang, &c.datatype] {
                            if expr != "NULL" {
                                group_by.push(expr.clone());
                            }
                        }
                    }
                    VarBinding::Value(expr) => group_by.push(expr.clone()),
                }
            }
        }
        fragment.group_by = group_by;

        for (variable, aggregate) in aggregates {
            let sql = self.lower_aggregate(aggregate, &fragment.vars, aliases, graph)?;
            fragment.vars.insert(variable.clone(), VarBinding::Value(sql));
            fragment.agg_vars.insert(variable.clone());
        }

        // Only grouping variables and aggregate results stay in scope.
        let agg_vars = fragment.agg_vars.clone();
        fragment
            .vars
            .retain(|v, _| variables.contains(v) || agg_vars.contains(v));
        Ok(fragment)
    }

    fn lower_expression(
        &self,
        expression: &Expression,
        vars: &VarMap,
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<String, EngineError> {
        let mut lowerer = ExprLowerer {
            translator: self,
            vars,
            aliases,
            graph,
        };
        lowerer.lower(expression)
    }

    fn lower_expression_as_condition(
        &self,
        expression: &Expression,
        vars: &VarMap,
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<String, EngineError> {
        let mut lowerer = ExprLowerer {
            translator: self,
            vars,
            aliases,
            graph,
        };
        lowerer.boolean(expression)
    }
}

/// Equality predicates for the variables two fragments share. Term-bound
/// variables compare by id, computed values by value.
pub(crate) fn shared_var_conditions(left: &VarMap, right: &VarMap) -> Vec<String> {
    right
        .iter()
        .filter_map(|(variable, right_binding)| {
            left.get(variable).map(|left_binding| {
                match (left_binding.id_expr(), right_binding.id_expr()) {
                    (Some(l), Some(r)) => format!("{l} = {r}"),
                    _ => format!(
                        "{} = {}",
                        left_binding.value_expr(),
                        right_binding.value_expr()
                    ),
                }
            })
        })
        .collect()
}

/// Appends `src` to `dst` with a CROSS JOIN at the seam.
fn merge_cross(dst: &mut SqlFragment, src: SqlFragment) {
    if let Some((table, alias)) = src.root {
        if dst.root.is_none() && dst.joins.is_empty() {
            dst.root = Some((table, alias));
        } else {
            dst.joins.push(JoinClause {
                join_type: JoinType::Cross,
                table,
                alias,
                on: Vec::new(),
            });
        }
    }
    dst.joins.extend(src.joins);
    dst.conditions.extend(src.conditions);
    dst.group_by.extend(src.group_by);
    dst.having.extend(src.having);
    dst.agg_vars.extend(src.agg_vars);
    for (variable, binding) in src.vars {
        dst.vars.entry(variable).or_insert(binding);
    }
}

/// The index of the last alias in `aliases` that `condition` references.
fn last_referenced(condition: &str, aliases: &[String]) -> Option<usize> {
    aliases
        .iter()
        .enumerate()
        .rev()
        .find(|(_, alias)| condition.contains(&format!("{alias}.")))
        .map(|(index, _)| index)
}
