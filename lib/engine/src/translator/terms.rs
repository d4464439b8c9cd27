//! Pre-pass that collects every dictionary key a query can need, so the
//! resolver is consulted exactly once per query.

use quadsql_model::TermKey;
use spargebra::algebra::{
    AggregateExpression, Expression, GraphPattern, OrderExpression, PropertyPathExpression,
};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};

/// Bound term keys of a whole query.
pub fn collect_query_term_keys(query: &spargebra::Query) -> Vec<TermKey> {
    let mut out = Vec::new();
    match query {
        spargebra::Query::Select { pattern, .. }
        | spargebra::Query::Construct { pattern, .. }
        | spargebra::Query::Describe { pattern, .. }
        | spargebra::Query::Ask { pattern, .. } => {
            collect_pattern_term_keys(pattern, &mut out);
        }
    }
    out
}

/// Bound term keys of one graph pattern subtree.
pub fn collect_pattern_term_keys(pattern: &GraphPattern, out: &mut Vec<TermKey>) {
    match pattern {
        GraphPattern::Bgp { patterns } => {
            for pattern in patterns {
                collect_triple_pattern(pattern, out);
            }
        }
        GraphPattern::Path {
            subject,
            path,
            object,
        } => {
            collect_term_pattern(subject, out);
            collect_term_pattern(object, out);
            collect_path(path, out);
        }
        GraphPattern::Join { left, right }
        | GraphPattern::Union { left, right }
        | GraphPattern::Minus { left, right } => {
            collect_pattern_term_keys(left, out);
            collect_pattern_term_keys(right, out);
        }
        GraphPattern::LeftJoin {
            left,
            right,
            expression,
        } => {
            collect_pattern_term_keys(left, out);
            collect_pattern_term_keys(right, out);
            if let Some(expression) = expression {
                collect_expression(expression, out);
            }
        }
        GraphPattern::Filter { expr, inner } => {
            collect_expression(expr, out);
            collect_pattern_term_keys(inner, out);
        }
        GraphPattern::Extend {
            inner, expression, ..
        } => {
            collect_expression(expression, out);
            collect_pattern_term_keys(inner, out);
        }
        GraphPattern::Graph { name, inner } => {
            if let NamedNodePattern::NamedNode(n) = name {
                out.push(TermKey::iri(n.as_str()));
            }
            collect_pattern_term_keys(inner, out);
        }
        GraphPattern::Values { bindings, .. } => {
            for row in bindings {
                for cell in row.iter().flatten() {
                    out.push(TermKey::from_ground_term(cell));
                }
            }
        }
        GraphPattern::Group {
            inner, aggregates, ..
        } => {
            for (_, aggregate) in aggregates {
                if let AggregateExpression::FunctionCall { expr, .. } = aggregate {
                    collect_expression(expr, out);
                }
            }
            collect_pattern_term_keys(inner, out);
        }
        GraphPattern::OrderBy { inner, expression } => {
            for expression in expression {
                let (OrderExpression::Asc(e) | OrderExpression::Desc(e)) = expression;
                collect_expression(e, out);
            }
            collect_pattern_term_keys(inner, out);
        }
        GraphPattern::Project { inner, .. }
        | GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::Slice { inner, .. } => collect_pattern_term_keys(inner, out),
        GraphPattern::Service { .. } => {}
    }
}

fn collect_triple_pattern(pattern: &TriplePattern, out: &mut Vec<TermKey>) {
    collect_term_pattern(&pattern.subject, out);
    if let NamedNodePattern::NamedNode(n) = &pattern.predicate {
        out.push(TermKey::iri(n.as_str()));
    }
    collect_term_pattern(&pattern.object, out);
}

fn collect_term_pattern(pattern: &TermPattern, out: &mut Vec<TermKey>) {
    match pattern {
        TermPattern::NamedNode(n) => out.push(TermKey::iri(n.as_str())),
        TermPattern::Literal(l) => out.push(TermKey::from_literal(l.as_ref())),
        // Blank nodes act as variables and literals bound elsewhere.
        TermPattern::BlankNode(_) | TermPattern::Variable(_) => {}
    }
}

fn collect_path(path: &PropertyPathExpression, out: &mut Vec<TermKey>) {
    match path {
        PropertyPathExpression::NamedNode(n) => out.push(TermKey::iri(n.as_str())),
        PropertyPathExpression::Reverse(inner)
        | PropertyPathExpression::ZeroOrMore(inner)
        | PropertyPathExpression::OneOrMore(inner)
        | PropertyPathExpression::ZeroOrOne(inner) => collect_path(inner, out),
        PropertyPathExpression::Sequence(left, right)
        | PropertyPathExpression::Alternative(left, right) => {
            collect_path(left, out);
            collect_path(right, out);
        }
        PropertyPathExpression::NegatedPropertySet(predicates) => {
            out.extend(predicates.iter().map(|p| TermKey::iri(p.as_str())));
        }
    }
}

/// Terms whose ids expressions need: `sameTerm` constants plus everything
/// inside `EXISTS` patterns.
fn collect_expression(expression: &Expression, out: &mut Vec<TermKey>) {
    match expression {
        Expression::SameTerm(lhs, rhs) => {
            for side in [lhs.as_ref(), rhs.as_ref()] {
                match side {
                    Expression::NamedNode(n) => out.push(TermKey::iri(n.as_str())),
                    Expression::Literal(l) => out.push(TermKey::from_literal(l.as_ref())),
                    other => collect_expression(other, out),
                }
            }
        }
        Expression::Exists(pattern) => collect_pattern_term_keys(pattern, out),
        Expression::Or(a, b)
        | Expression::And(a, b)
        | Expression::Equal(a, b)
        | Expression::Greater(a, b)
        | Expression::GreaterOrEqual(a, b)
        | Expression::Less(a, b)
        | Expression::LessOrEqual(a, b)
        | Expression::Add(a, b)
        | Expression::Subtract(a, b)
        | Expression::Multiply(a, b)
        | Expression::Divide(a, b) => {
            collect_expression(a, out);
            collect_expression(b, out);
        }
        Expression::UnaryPlus(a) | Expression::UnaryMinus(a) | Expression::Not(a) => {
            collect_expression(a, out);
        }
        Expression::In(a, items) => {
            collect_expression(a, out);
            for item in items {
                collect_expression(item, out);
            }
        }
        Expression::If(a, b, c) => {
            collect_expression(a, out);
            collect_expression(b, out);
            collect_expression(c, out);
        }
        Expression::Coalesce(items) => {
            for item in items {
                collect_expression(item, out);
            }
        }
        Expression::FunctionCall(_, args) => {
            for arg in args {
                collect_expression(arg, out);
            }
        }
        Expression::NamedNode(_)
        | Expression::Literal(_)
        | Expression::Variable(_)
        | Expression::Bound(_) => {}
    }
}
