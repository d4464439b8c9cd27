use indexmap::IndexMap;
use quadsql_common::sql::quote_ident;
use quadsql_model::Variable;
use rustc_hash::FxHashSet;

/// How a table participates in the FROM clause.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinType {
    Inner,
    Cross,
    Left,
}

/// One JOIN of a FROM clause. `table` is either a table name or an already
/// parenthesised derived table.
#[derive(Clone, Debug)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: String,
    pub alias: String,
    pub on: Vec<String>,
}

impl JoinClause {
    fn render(&self) -> String {
        match self.join_type {
            JoinType::Cross => format!("CROSS JOIN {} AS {}", self.table, self.alias),
            JoinType::Inner => {
                format!(
                    "JOIN {} AS {} ON {}",
                    self.table,
                    self.alias,
                    render_on(&self.on)
                )
            }
            JoinType::Left => {
                format!(
                    "LEFT JOIN {} AS {} ON {}",
                    self.table,
                    self.alias,
                    render_on(&self.on)
                )
            }
        }
    }
}

fn render_on(conditions: &[String]) -> String {
    if conditions.is_empty() {
        "TRUE".to_owned()
    } else {
        conditions.join(" AND ")
    }
}

/// The SQL column expressions representing one RDF term.
///
/// `lang` and `datatype` are `NULL` literals for positions that cannot hold
/// literals (subject, predicate, graph).
#[derive(Clone, Debug)]
pub struct TermColumns {
    pub id: String,
    pub text: String,
    pub kind: String,
    pub lang: String,
    pub datatype: String,
}

/// What a SPARQL variable maps to at the current point of the walk.
#[derive(Clone, Debug)]
pub enum VarBinding {
    /// A term exposed through the term table (or a derived table thereof).
    Term(TermColumns),
    /// A computed scalar (BIND expression or aggregate result).
    Value(String),
}

impl VarBinding {
    /// The expression carrying the comparable value of the binding.
    pub fn value_expr(&self) -> &str {
        match self {
            VarBinding::Term(columns) => &columns.text,
            VarBinding::Value(expr) => expr,
        }
    }

    /// The term-id expression, when the binding has one.
    pub fn id_expr(&self) -> Option<&str> {
        match self {
            VarBinding::Term(columns) => Some(&columns.id),
            VarBinding::Value(_) => None,
        }
    }
}

pub type VarMap = IndexMap<Variable, VarBinding>;

/// The translation result for one algebra subtree.
///
/// Invariants: every alias referenced by `conditions` or a join's `on` list
/// is declared by `root` or an earlier join; `vars` entries are valid column
/// references in the scope formed by `root` plus `joins`.
#[derive(Clone, Debug, Default)]
pub struct SqlFragment {
    /// Root of the FROM clause: `(table-or-derived, alias)`. `None` means
    /// the subtree needs no FROM at all (empty BGP).
    pub root: Option<(String, String)>,
    pub joins: Vec<JoinClause>,
    pub conditions: Vec<String>,
    pub group_by: Vec<String>,
    pub having: Vec<String>,
    /// Variables whose binding is an aggregate expression. Filters over
    /// these become HAVING predicates.
    pub agg_vars: FxHashSet<Variable>,
    pub vars: VarMap,
}

impl SqlFragment {
    /// Renders the FROM clause body, or `None` when the fragment has no
    /// table at all.
    pub fn render_from(&self) -> Option<String> {
        let (table, alias) = self.root.as_ref()?;
        let mut out = format!("{table} AS {alias}");
        for join in &self.joins {
            out.push(' ');
            out.push_str(&join.render());
        }
        Some(out)
    }

    /// The aliases declared by this fragment, in declaration order.
    pub fn declared_aliases(&self) -> Vec<&str> {
        self.root
            .iter()
            .map(|(_, alias)| alias.as_str())
            .chain(self.joins.iter().map(|j| j.alias.as_str()))
            .collect()
    }
}

/// Canonical column name of one exposed term column inside derived tables.
pub fn derived_column(variable: &Variable, part: &str) -> String {
    quote_ident(&format!("{}__{part}", variable.as_str()))
}

/// Select-list items exposing `binding` under the canonical derived-table
/// columns for `variable`.
pub fn derived_projection(variable: &Variable, binding: Option<&VarBinding>) -> String {
    let (id, text, kind, lang, datatype) = match binding {
        Some(VarBinding::Term(c)) => (
            c.id.as_str(),
            c.text.as_str(),
            c.kind.as_str(),
            c.lang.as_str(),
            c.datatype.as_str(),
        ),
        Some(VarBinding::Value(v)) => ("NULL", v.as_str(), "NULL", "NULL", "NULL"),
        None => ("NULL", "NULL", "NULL", "NULL", "NULL"),
    };
    format!(
        "{id} AS {}, {text} AS {}, {kind} AS {}, {lang} AS {}, {datatype} AS {}",
        derived_column(variable, "id"),
        derived_column(variable, "text"),
        derived_column(variable, "kind"),
        derived_column(variable, "lang"),
        derived_column(variable, "dt"),
    )
}

/// The var map seen from outside a derived table that exposed `variables`
/// through [`derived_projection`].
pub fn derived_vars<'a>(
    variables: impl IntoIterator<Item = &'a Variable>,
    alias: &str,
) -> VarMap {
    variables
        .into_iter()
        .map(|v| {
            let column = |part| format!("{alias}.{}", derived_column(v, part));
            (
                v.clone(),
                VarBinding::Term(TermColumns {
                    id: column("id"),
                    text: column("text"),
                    kind: column("kind"),
                    lang: column("lang"),
                    datatype: column("dt"),
                }),
            )
        })
        .collect()
}
