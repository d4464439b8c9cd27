use crate::translator::fragment::{derived_projection, SqlFragment, VarBinding};
use quadsql_common::sql::quote_ident;
use quadsql_model::Variable;

/// Everything needed to render one SELECT statement.
#[derive(Clone, Debug)]
pub struct SelectParts {
    pub fragment: SqlFragment,
    pub projection: Vec<Variable>,
    pub distinct: bool,
    pub order_by: Vec<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// How a projected variable appears in the produced row schema.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProjectionShape {
    /// Four columns: text, kind, language, datatype.
    Term,
    /// One computed column.
    Value,
    /// One constant NULL column (the variable is never bound).
    Unbound,
}

impl ProjectionShape {
    /// The number of SQL columns this shape occupies.
    pub fn width(self) -> usize {
        match self {
            ProjectionShape::Term => 4,
            ProjectionShape::Value | ProjectionShape::Unbound => 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProjectedVar {
    pub variable: Variable,
    pub shape: ProjectionShape,
}

/// A fully rendered query plus the schema of its rows.
#[derive(Clone, Debug)]
pub struct SelectQuery {
    pub sql: String,
    pub projection: Vec<ProjectedVar>,
}

/// Renders the outermost SELECT, projecting the result-facing columns.
pub fn render_final(parts: &SelectParts) -> SelectQuery {
    let mut columns = Vec::new();
    let mut projection = Vec::new();
    for variable in &parts.projection {
        let name = variable.as_str();
        let shape = match parts.fragment.vars.get(variable) {
            Some(VarBinding::Term(c)) => {
                columns.push(format!("{} AS {}", c.text, quote_ident(name)));
                columns.push(format!("{} AS {}", c.kind, quote_ident(&format!("{name}__kind"))));
                columns.push(format!("{} AS {}", c.lang, quote_ident(&format!("{name}__lang"))));
                columns.push(format!(
                    "{} AS {}",
                    c.datatype,
                    quote_ident(&format!("{name}__datatype"))
                ));
                ProjectionShape::Term
            }
            Some(VarBinding::Value(expr)) => {
                columns.push(format!("{expr} AS {}", quote_ident(name)));
                ProjectionShape::Value
            }
            None => {
                columns.push(format!("NULL AS {}", quote_ident(name)));
                ProjectionShape::Unbound
            }
        };
        projection.push(ProjectedVar {
            variable: variable.clone(),
            shape,
        });
    }
    let select_list = if columns.is_empty() {
        "1".to_owned()
    } else {
        columns.join(", ")
    };
    SelectQuery {
        sql: assemble(parts, &select_list),
        projection,
    }
}

/// Renders a SELECT for use as a derived table, exposing the canonical
/// five-column shape per projected variable.
pub fn render_nested(parts: &SelectParts) -> String {
    let columns: Vec<String> = parts
        .projection
        .iter()
        .map(|v| derived_projection(v, parts.fragment.vars.get(v)))
        .collect();
    let select_list = if columns.is_empty() {
        "1".to_owned()
    } else {
        columns.join(", ")
    };
    format!("({})", assemble(parts, &select_list))
}

/// Renders one UNION branch, exposing `variables` in the canonical derived
/// shape. Variables the branch does not bind are padded with NULLs.
pub fn render_branch(fragment: &SqlFragment, variables: &[Variable]) -> String {
    let columns: Vec<String> = variables
        .iter()
        .map(|v| derived_projection(v, fragment.vars.get(v)))
        .collect();
    let select_list = if columns.is_empty() {
        "1".to_owned()
    } else {
        columns.join(", ")
    };
    let parts = SelectParts {
        fragment: fragment.clone(),
        projection: Vec::new(),
        distinct: false,
        order_by: Vec::new(),
        limit: None,
        offset: 0,
    };
    assemble(&parts, &select_list)
}

/// Renders a `SELECT 1` over a fragment, for EXISTS / NOT EXISTS subqueries.
/// `extra_conditions` carries the correlation predicates.
pub fn render_exists(fragment: &SqlFragment, extra_conditions: &[String]) -> String {
    let mut sql = String::from("SELECT 1");
    if let Some(from) = fragment.render_from() {
        sql.push_str(" FROM ");
        sql.push_str(&from);
    }
    let conditions: Vec<&String> = fragment
        .conditions
        .iter()
        .chain(extra_conditions.iter())
        .collect();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(
            &conditions
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(" AND "),
        );
    }
    sql
}

fn assemble(parts: &SelectParts, select_list: &str) -> String {
    let mut sql = String::from("SELECT ");
    if parts.distinct {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(select_list);
    if let Some(from) = parts.fragment.render_from() {
        sql.push_str(" FROM ");
        sql.push_str(&from);
    }
    if !parts.fragment.conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&parts.fragment.conditions.join(" AND "));
    }
    if !parts.fragment.group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&parts.fragment.group_by.join(", "));
    }
    if !parts.fragment.having.is_empty() {
        sql.push_str(" HAVING ");
        sql.push_str(&parts.fragment.having.join(" AND "));
    }
    if !parts.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&parts.order_by.join(", "));
    }
    if let Some(limit) = parts.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if parts.offset > 0 {
        sql.push_str(&format!(" OFFSET {}", parts.offset));
    }
    sql
}
