use crate::translator::fragment::{VarBinding, VarMap};
use crate::translator::select::render_exists;
use crate::translator::{shared_var_conditions, GraphContext, PatternTranslator};
use crate::EngineError;
use quadsql_common::sql::quote_str;
use quadsql_common::AliasGenerator;
use quadsql_model::vocab::xsd;
use quadsql_model::{TermKey, Variable};
use rustc_hash::FxHashSet;
use spargebra::algebra::{AggregateExpression, AggregateFunction, Expression, Function};

/// Percent-encodings emitted for `ENCODE_FOR_URI`. `%` must come first so
/// later replacements do not double-encode.
const URI_ESCAPES: &[(&str, &str)] = &[
    ("%", "%25"),
    (" ", "%20"),
    ("\"", "%22"),
    ("#", "%23"),
    ("$", "%24"),
    ("&", "%26"),
    ("'", "%27"),
    ("+", "%2B"),
    (",", "%2C"),
    ("/", "%2F"),
    (":", "%3A"),
    (";", "%3B"),
    ("<", "%3C"),
    ("=", "%3D"),
    (">", "%3E"),
    ("?", "%3F"),
    ("@", "%40"),
    ("[", "%5B"),
    ("]", "%5D"),
];

/// Lowers SPARQL expressions to PostgreSQL scalar expressions against the
/// current variable map. Unsupported constructs lower to `NULL` so SPARQL
/// error propagation (row drops) falls out of SQL NULL semantics.
pub(crate) struct ExprLowerer<'t, 'e> {
    pub translator: &'e PatternTranslator<'t>,
    pub vars: &'e VarMap,
    pub aliases: &'e mut AliasGenerator,
    pub graph: &'e GraphContext,
}

impl ExprLowerer<'_, '_> {
    /// Lowers an expression in value position.
    pub fn lower(&mut self, expression: &Expression) -> Result<String, EngineError> {
        match expression {
            Expression::NamedNode(n) => Ok(quote_str(n.as_str())),
            Expression::Literal(l) => Ok(quote_str(l.value())),
            Expression::Variable(v) => Ok(self.variable_value(v)),
            Expression::Or(lhs, rhs) => {
                Ok(format!("({} OR {})", self.boolean(lhs)?, self.boolean(rhs)?))
            }
            Expression::And(lhs, rhs) => {
                Ok(format!("({} AND {})", self.boolean(lhs)?, self.boolean(rhs)?))
            }
            Expression::Not(inner) => Ok(format!("(NOT {})", self.boolean(inner)?)),
            Expression::Equal(lhs, rhs) => self.equality(lhs, rhs),
            Expression::SameTerm(lhs, rhs) => self.same_term(lhs, rhs),
            Expression::Greater(lhs, rhs) => self.ordered(lhs, rhs, ">"),
            Expression::GreaterOrEqual(lhs, rhs) => self.ordered(lhs, rhs, ">="),
            Expression::Less(lhs, rhs) => self.ordered(lhs, rhs, "<"),
            Expression::LessOrEqual(lhs, rhs) => self.ordered(lhs, rhs, "<="),
            Expression::In(needle, haystack) => self.in_list(needle, haystack),
            Expression::Add(lhs, rhs) => self.arithmetic(lhs, rhs, "+"),
            Expression::Subtract(lhs, rhs) => self.arithmetic(lhs, rhs, "-"),
            Expression::Multiply(lhs, rhs) => self.arithmetic(lhs, rhs, "*"),
            Expression::Divide(lhs, rhs) => {
                let lhs = self.numeric(lhs)?;
                let rhs = self.numeric(rhs)?;
                Ok(format!("({lhs} / NULLIF({rhs}, 0))"))
            }
            Expression::UnaryPlus(inner) => self.numeric(inner),
            Expression::UnaryMinus(inner) => Ok(format!("(-{})", self.numeric(inner)?)),
            Expression::Bound(variable) => match self.vars.get(variable) {
                Some(binding) => Ok(format!("({} IS NOT NULL)", binding.value_expr())),
                None => Ok("FALSE".to_owned()),
            },
            Expression::If(test, if_true, if_false) => Ok(format!(
                "CASE WHEN {} THEN {} ELSE {} END",
                self.boolean(test)?,
                self.lower(if_true)?,
                self.lower(if_false)?
            )),
            Expression::Coalesce(args) => {
                let args = args
                    .iter()
                    .map(|a| self.lower(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("COALESCE({})", args.join(", ")))
            }
            Expression::Exists(pattern) => self.exists(pattern),
            Expression::FunctionCall(function, args) => self.function_call(function, args),
        }
    }

    /// Lowers an expression in boolean position, wrapping non-boolean
    /// results in an effective-boolean-value test.
    pub fn boolean(&mut self, expression: &Expression) -> Result<String, EngineError> {
        let sql = self.lower(expression)?;
        if is_boolean_shaped(expression) {
            Ok(sql)
        } else {
            Ok(format!("({sql} IN ('true', '1'))"))
        }
    }

    fn variable_value(&self, variable: &Variable) -> String {
        match self.vars.get(variable) {
            Some(binding) => binding.value_expr().to_owned(),
            None => {
                tracing::debug!(variable = variable.as_str(), "unbound variable in expression");
                "NULL".to_owned()
            }
        }
    }

    /// Numeric coercion for ordered comparisons and arithmetic.
    fn numeric(&mut self, expression: &Expression) -> Result<String, EngineError> {
        if let Expression::Literal(l) = expression {
            if is_numeric_datatype(l.datatype().as_str()) {
                return Ok(format!("CAST({} AS DECIMAL)", quote_str(l.value())));
            }
        }
        Ok(format!("CAST({} AS DECIMAL)", self.lower(expression)?))
    }

    fn equality(&mut self, lhs: &Expression, rhs: &Expression) -> Result<String, EngineError> {
        if is_numeric_literal(lhs) || is_numeric_literal(rhs) {
            let lhs = self.numeric(lhs)?;
            let rhs = self.numeric(rhs)?;
            Ok(format!("({lhs} = {rhs})"))
        } else {
            let lhs = self.lower(lhs)?;
            let rhs = self.lower(rhs)?;
            Ok(format!("({lhs} = {rhs})"))
        }
    }

    fn ordered(
        &mut self,
        lhs: &Expression,
        rhs: &Expression,
        operator: &str,
    ) -> Result<String, EngineError> {
        let lhs = self.numeric(lhs)?;
        let rhs = self.numeric(rhs)?;
        Ok(format!("({lhs} {operator} {rhs})"))
    }

    fn arithmetic(
        &mut self,
        lhs: &Expression,
        rhs: &Expression,
        operator: &str,
    ) -> Result<String, EngineError> {
        let lhs = self.numeric(lhs)?;
        let rhs = self.numeric(rhs)?;
        Ok(format!("({lhs} {operator} {rhs})"))
    }

    fn in_list(
        &mut self,
        needle: &Expression,
        haystack: &[Expression],
    ) -> Result<String, EngineError> {
        if haystack.is_empty() {
            return Ok("FALSE".to_owned());
        }
        let needle = self.lower(needle)?;
        let items = haystack
            .iter()
            .map(|e| self.lower(e))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("({needle} IN ({}))", items.join(", ")))
    }

    /// `sameTerm` compares term ids, not texts.
    fn same_term(&mut self, lhs: &Expression, rhs: &Expression) -> Result<String, EngineError> {
        match (self.term_id_expr(lhs), self.term_id_expr(rhs)) {
            (Some(lhs), Some(rhs)) => Ok(format!("({lhs} = {rhs})")),
            // One side has no id (computed value or unknown term): fall back
            // to value equality.
            _ => {
                let lhs = self.lower(lhs)?;
                let rhs = self.lower(rhs)?;
                Ok(format!("({lhs} = {rhs})"))
            }
        }
    }

    fn term_id_expr(&self, expression: &Expression) -> Option<String> {
        match expression {
            Expression::Variable(v) => self
                .vars
                .get(v)
                .and_then(|b| b.id_expr())
                .map(ToOwned::to_owned),
            Expression::NamedNode(n) => self
                .translator
                .term_ids
                .get(&TermKey::iri(n.as_str()))
                .map(ToString::to_string),
            Expression::Literal(l) => self
                .translator
                .term_ids
                .get(&TermKey::from_literal(l.as_ref()))
                .map(ToString::to_string),
            _ => None,
        }
    }

    /// `EXISTS { … }` becomes a correlated subquery translated under a fresh
    /// child alias generator.
    fn exists(
        &mut self,
        pattern: &spargebra::algebra::GraphPattern,
    ) -> Result<String, EngineError> {
        let mut child = self.aliases.child();
        let fragment = self
            .translator
            .translate_pattern(pattern, &mut child, self.graph)?;
        let correlation = shared_var_conditions(self.vars, &fragment.vars);
        Ok(format!("EXISTS ({})", render_exists(&fragment, &correlation)))
    }

    fn function_call(
        &mut self,
        function: &Function,
        args: &[Expression],
    ) -> Result<String, EngineError> {
        match function {
            Function::Str => self.lower(&args[0]),
            Function::Lang => Ok(match self.term_columns(&args[0]) {
                Some(columns) => format!("COALESCE({}, '')", columns.1),
                None => "''".to_owned(),
            }),
            Function::Datatype => Ok(match self.term_columns(&args[0]) {
                Some(columns) => format!(
                    "COALESCE({}, {})",
                    columns.2,
                    quote_str(xsd::STRING.as_str())
                ),
                None => quote_str(xsd::STRING.as_str()),
            }),
            Function::Iri => self.lower(&args[0]),
            Function::BNode => Ok(if args.is_empty() {
                "MD5(RANDOM()::TEXT || CLOCK_TIMESTAMP()::TEXT)".to_owned()
            } else {
                format!("MD5({})", self.lower(&args[0])?)
            }),
            Function::Rand => Ok("RANDOM()".to_owned()),
            Function::Abs => Ok(format!("ABS({})", self.numeric(&args[0])?)),
            Function::Ceil => Ok(format!("CEIL({})", self.numeric(&args[0])?)),
            Function::Floor => Ok(format!("FLOOR({})", self.numeric(&args[0])?)),
            Function::Round => Ok(format!("ROUND({})", self.numeric(&args[0])?)),
            Function::Concat => {
                let parts = args
                    .iter()
                    .map(|a| self.lower(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(" || ")))
            }
            Function::SubStr => {
                let source = self.lower(&args[0])?;
                let start = format!("CAST({} AS INTEGER)", self.lower(&args[1])?);
                Ok(match args.get(2) {
                    Some(length) => {
                        let length = format!("CAST({} AS INTEGER)", self.lower(length)?);
                        format!("SUBSTRING({source} FROM {start} FOR {length})")
                    }
                    None => format!("SUBSTRING({source} FROM {start})"),
                })
            }
            Function::StrLen => Ok(format!("LENGTH({})", self.lower(&args[0])?)),
            Function::Replace => {
                let Some(pattern) = constant_string(&args[1]) else {
                    return self.unsupported("REPLACE with a non-constant pattern");
                };
                if regex::Regex::new(&pattern).is_err() {
                    tracing::warn!(%pattern, "invalid REPLACE pattern, lowering to FALSE");
                    return Ok("FALSE".to_owned());
                }
                let source = self.lower(&args[0])?;
                let replacement = self.lower(&args[2])?;
                let flags = match args.get(3).and_then(constant_string) {
                    Some(flags) if flags.contains('i') => "'gi'",
                    _ => "'g'",
                };
                Ok(format!(
                    "REGEXP_REPLACE({source}, {}, {replacement}, {flags})",
                    quote_str(&pattern)
                ))
            }
            Function::UCase => Ok(format!("UPPER({})", self.lower(&args[0])?)),
            Function::LCase => Ok(format!("LOWER({})", self.lower(&args[0])?)),
            Function::EncodeForUri => {
                let mut sql = self.lower(&args[0])?;
                for (from, to) in URI_ESCAPES {
                    sql = format!("REPLACE({sql}, {}, {})", quote_str(from), quote_str(to));
                }
                Ok(sql)
            }
            Function::Contains => {
                let haystack = self.lower(&args[0])?;
                let needle = self.lower(&args[1])?;
                Ok(format!("(POSITION({needle} IN {haystack}) > 0)"))
            }
            Function::StrStarts => {
                let source = self.lower(&args[0])?;
                let prefix = self.lower(&args[1])?;
                Ok(format!("(LEFT({source}, LENGTH({prefix})) = {prefix})"))
            }
            Function::StrEnds => {
                let source = self.lower(&args[0])?;
                let suffix = self.lower(&args[1])?;
                Ok(format!("(RIGHT({source}, LENGTH({suffix})) = {suffix})"))
            }
            Function::StrBefore => {
                let source = self.lower(&args[0])?;
                let needle = self.lower(&args[1])?;
                Ok(format!(
                    "CASE WHEN POSITION({needle} IN {source}) > 0 \
                     THEN LEFT({source}, POSITION({needle} IN {source}) - 1) \
                     ELSE '' END"
                ))
            }
            Function::StrAfter => {
                let source = self.lower(&args[0])?;
                let needle = self.lower(&args[1])?;
                Ok(format!(
                    "CASE WHEN POSITION({needle} IN {source}) > 0 \
                     THEN SUBSTRING({source} FROM POSITION({needle} IN {source}) + LENGTH({needle})) \
                     ELSE '' END"
                ))
            }
            Function::LangMatches => {
                let lang = self.lower(&args[0])?;
                match constant_string(&args[1]) {
                    Some(range) if range == "*" => Ok(format!("({lang} <> '')")),
                    _ => {
                        let range = self.lower(&args[1])?;
                        Ok(format!(
                            "(LOWER({lang}) = LOWER({range}) \
                             OR LOWER({lang}) LIKE LOWER({range}) || '-%')"
                        ))
                    }
                }
            }
            Function::Regex => {
                if let Some(pattern) = constant_string(&args[1]) {
                    if regex::Regex::new(&pattern).is_err() {
                        tracing::warn!(%pattern, "invalid REGEX pattern, lowering to FALSE");
                        return Ok("FALSE".to_owned());
                    }
                }
                let subject = self.lower(&args[0])?;
                let pattern = self.lower(&args[1])?;
                let case_insensitive = args
                    .get(2)
                    .and_then(constant_string)
                    .is_some_and(|f| f.contains('i'));
                let operator = if case_insensitive { "~*" } else { "~" };
                Ok(format!("({subject} {operator} {pattern})"))
            }
            Function::Year => self.extract_field("YEAR", &args[0]),
            Function::Month => self.extract_field("MONTH", &args[0]),
            Function::Day => self.extract_field("DAY", &args[0]),
            Function::Hours => self.extract_field("HOUR", &args[0]),
            Function::Minutes => self.extract_field("MINUTE", &args[0]),
            Function::Seconds => self.extract_field("SECOND", &args[0]),
            Function::Now => Ok("NOW()".to_owned()),
            Function::Timezone | Function::Tz => self.unsupported("TIMEZONE/TZ"),
            Function::Md5 => Ok(format!("MD5({})", self.lower(&args[0])?)),
            Function::Sha1 => {
                let arg = self.lower(&args[0])?;
                if self.translator.config.digest_functions {
                    Ok(format!("ENCODE(DIGEST({arg}, 'sha1'), 'hex')"))
                } else {
                    // Digest extension unavailable: MD5 keeps the builtin total.
                    Ok(format!("MD5({arg})"))
                }
            }
            Function::Sha256 => self.digest(&args[0], "sha256"),
            Function::Sha384 => self.digest(&args[0], "sha384"),
            Function::Sha512 => self.digest(&args[0], "sha512"),
            Function::Uuid => Ok("('urn:uuid:' || GEN_RANDOM_UUID()::TEXT)".to_owned()),
            Function::StrUuid => Ok("GEN_RANDOM_UUID()::TEXT".to_owned()),
            Function::StrDt | Function::StrLang => self.lower(&args[0]),
            Function::IsIri => self.kind_test(&args[0], "U"),
            Function::IsBlank => self.kind_test(&args[0], "B"),
            Function::IsLiteral => self.kind_test(&args[0], "L"),
            Function::IsNumeric => {
                let value = self.lower(&args[0])?;
                let pattern = quote_str("^[+-]?[0-9]+(\\.[0-9]*)?([eE][+-]?[0-9]+)?$");
                Ok(format!("({value} ~ {pattern})"))
            }
            Function::Custom(name) => {
                self.unsupported(&format!("custom function {}", name.as_str()))
            }
        }
    }

    fn digest(&mut self, arg: &Expression, algorithm: &str) -> Result<String, EngineError> {
        if !self.translator.config.digest_functions {
            return self.unsupported(&format!("{algorithm} without digest functions"));
        }
        let arg = self.lower(arg)?;
        Ok(format!("ENCODE(DIGEST({arg}, '{algorithm}'), 'hex')"))
    }

    fn extract_field(&mut self, field: &str, arg: &Expression) -> Result<String, EngineError> {
        let value = self.lower(arg)?;
        Ok(format!("EXTRACT({field} FROM CAST({value} AS TIMESTAMP))"))
    }

    /// Type tests inspect the term-kind column. Computed values and plain
    /// literals count as literals.
    fn kind_test(&mut self, arg: &Expression, code: &str) -> Result<String, EngineError> {
        match arg {
            Expression::Variable(v) => Ok(match self.vars.get(v) {
                Some(VarBinding::Term(c)) => {
                    format!("(COALESCE({}, 'L') = '{code}')", c.kind)
                }
                Some(VarBinding::Value(_)) => bool_literal(code == "L"),
                None => "NULL".to_owned(),
            }),
            Expression::NamedNode(_) => Ok(bool_literal(code == "U")),
            Expression::Literal(_) => Ok(bool_literal(code == "L")),
            _ => Ok(bool_literal(code == "L")),
        }
    }

    /// `(lang, datatype)` column expressions of a term-bound variable.
    fn term_columns(&self, arg: &Expression) -> Option<(String, String, String)> {
        if let Expression::Variable(v) = arg {
            if let Some(VarBinding::Term(c)) = self.vars.get(v) {
                return Some((c.text.clone(), c.lang.clone(), c.datatype.clone()));
            }
        }
        if let Expression::Literal(l) = arg {
            let lang = l
                .language()
                .map(quote_str)
                .unwrap_or_else(|| "NULL".to_owned());
            let datatype = quote_str(l.datatype().as_str());
            return Some((quote_str(l.value()), lang, datatype));
        }
        None
    }

    fn unsupported(&self, what: &str) -> Result<String, EngineError> {
        tracing::warn!(construct = what, "unsupported expression, lowering to NULL");
        Ok("NULL".to_owned())
    }
}

fn bool_literal(value: bool) -> String {
    if value { "TRUE" } else { "FALSE" }.to_owned()
}

fn constant_string(expression: &Expression) -> Option<String> {
    match expression {
        Expression::Literal(l) => Some(l.value().to_owned()),
        _ => None,
    }
}

fn is_numeric_literal(expression: &Expression) -> bool {
    match expression {
        Expression::Literal(l) => is_numeric_datatype(l.datatype().as_str()),
        _ => false,
    }
}

fn is_numeric_datatype(datatype: &str) -> bool {
    matches!(
        datatype,
        "http://www.w3.org/2001/XMLSchema#integer"
            | "http://www.w3.org/2001/XMLSchema#decimal"
            | "http://www.w3.org/2001/XMLSchema#double"
            | "http://www.w3.org/2001/XMLSchema#float"
            | "http://www.w3.org/2001/XMLSchema#int"
            | "http://www.w3.org/2001/XMLSchema#long"
            | "http://www.w3.org/2001/XMLSchema#short"
            | "http://www.w3.org/2001/XMLSchema#byte"
            | "http://www.w3.org/2001/XMLSchema#nonNegativeInteger"
            | "http://www.w3.org/2001/XMLSchema#positiveInteger"
            | "http://www.w3.org/2001/XMLSchema#negativeInteger"
            | "http://www.w3.org/2001/XMLSchema#nonPositiveInteger"
            | "http://www.w3.org/2001/XMLSchema#unsignedInt"
            | "http://www.w3.org/2001/XMLSchema#unsignedLong"
            | "http://www.w3.org/2001/XMLSchema#unsignedShort"
            | "http://www.w3.org/2001/XMLSchema#unsignedByte"
    )
}

/// Whether the lowered SQL of an expression is already a boolean.
fn is_boolean_shaped(expression: &Expression) -> bool {
    match expression {
        Expression::Or(..)
        | Expression::And(..)
        | Expression::Not(..)
        | Expression::Equal(..)
        | Expression::SameTerm(..)
        | Expression::Greater(..)
        | Expression::GreaterOrEqual(..)
        | Expression::Less(..)
        | Expression::LessOrEqual(..)
        | Expression::In(..)
        | Expression::Bound(..)
        | Expression::Exists(..) => true,
        Expression::FunctionCall(function, _) => matches!(
            function,
            Function::Regex
                | Function::Contains
                | Function::StrStarts
                | Function::StrEnds
                | Function::LangMatches
                | Function::IsIri
                | Function::IsBlank
                | Function::IsLiteral
                | Function::IsNumeric
        ),
        _ => false,
    }
}

/// The variables an expression references, not descending into `EXISTS`
/// patterns (their variables live in their own scope).
pub(crate) fn expression_variables(expression: &Expression) -> FxHashSet<Variable> {
    let mut out = FxHashSet::default();
    collect_expression_variables(expression, &mut out);
    out
}

fn collect_expression_variables(expression: &Expression, out: &mut FxHashSet<Variable>) {
    match expression {
        Expression::Variable(v) | Expression::Bound(v) => {
            out.insert(v.clone());
        }
        Expression::Or(a, b)
        | Expression::And(a, b)
        | Expression::Equal(a, b)
        | Expression::SameTerm(a, b)
        | Expression::Greater(a, b)
        | Expression::GreaterOrEqual(a, b)
        | Expression::Less(a, b)
        | Expression::LessOrEqual(a, b)
        | Expression::Add(a, b)
        | Expression::Subtract(a, b)
        | Expression::Multiply(a, b)
        | Expression::Divide(a, b) => {
            collect_expression_variables(a, out);
            collect_expression_variables(b, out);
        }
        Expression::UnaryPlus(a) | Expression::UnaryMinus(a) | Expression::Not(a) => {
            collect_expression_variables(a, out);
        }
        Expression::In(a, items) => {
            collect_expression_variables(a, out);
            for item in items {
                collect_expression_variables(item, out);
            }
        }
        Expression::If(a, b, c) => {
            collect_expression_variables(a, out);
            collect_expression_variables(b, out);
            collect_expression_variables(c, out);
        }
        Expression::Coalesce(items) => {
            for item in items {
                collect_expression_variables(item, out);
            }
        }
        Expression::FunctionCall(_, args) => {
            for arg in args {
                collect_expression_variables(arg, out);
            }
        }
        Expression::NamedNode(_) | Expression::Literal(_) | Expression::Exists(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::fragment::TermColumns;
    use quadsql_common::EngineConfig;
    use quadsql_model::{Literal, NamedNode};
    use quadsql_storage::TableSet;
    use rustc_hash::FxHashMap;
    use spargebra::algebra::Function;

    fn tables() -> TableSet {
        TableSet {
            quad: "quads".to_owned(),
            term: "terms".to_owned(),
            graph: "graphs".to_owned(),
        }
    }

    fn term_var(name: &str) -> (Variable, VarBinding) {
        (
            Variable::new_unchecked(name),
            VarBinding::Term(TermColumns {
                id: "quad_0.object_id".to_owned(),
                text: "o_term_0.term_text".to_owned(),
                kind: "o_term_0.term_type".to_owned(),
                lang: "o_term_0.lang".to_owned(),
                datatype: "o_dt_0.term_text".to_owned(),
            }),
        )
    }

    fn lower_with(
        vars: &VarMap,
        term_ids: &FxHashMap<TermKey, quadsql_model::TermId>,
        expression: &Expression,
    ) -> String {
        let tables = tables();
        let config = EngineConfig::default();
        let translator = PatternTranslator::new(&tables, term_ids, &config);
        let mut aliases = quadsql_common::AliasGenerator::new();
        let mut lowerer = ExprLowerer {
            translator: &translator,
            vars,
            aliases: &mut aliases,
            graph: &GraphContext::DefaultUnion,
        };
        lowerer.lower(expression).unwrap()
    }

    #[test]
    fn division_guards_the_divisor() {
        let vars = VarMap::from_iter([term_var("v")]);
        let sql = lower_with(
            &vars,
            &FxHashMap::default(),
            &Expression::Divide(
                Box::new(Expression::Variable(Variable::new_unchecked("v"))),
                Box::new(Expression::Literal(Literal::from(0))),
            ),
        );
        assert!(sql.contains("NULLIF"));
    }

    #[test]
    fn invalid_regex_patterns_lower_to_false() {
        let vars = VarMap::from_iter([term_var("v")]);
        let sql = lower_with(
            &vars,
            &FxHashMap::default(),
            &Expression::FunctionCall(
                Function::Regex,
                vec![
                    Expression::Variable(Variable::new_unchecked("v")),
                    Expression::Literal(Literal::new_simple_literal("[")),
                ],
            ),
        );
        assert_eq!(sql, "FALSE");
    }

    #[test]
    fn regex_materialises_the_subject_once() {
        let vars = VarMap::from_iter([term_var("v")]);
        let sql = lower_with(
            &vars,
            &FxHashMap::default(),
            &Expression::FunctionCall(
                Function::Regex,
                vec![
                    Expression::Variable(Variable::new_unchecked("v")),
                    Expression::Literal(Literal::new_simple_literal("^x")),
                ],
            ),
        );
        assert_eq!(sql.matches("o_term_0.term_text").count(), 1);
        assert!(sql.contains(" ~ "));
    }

    #[test]
    fn empty_in_lists_are_false() {
        let vars = VarMap::from_iter([term_var("v")]);
        let sql = lower_with(
            &vars,
            &FxHashMap::default(),
            &Expression::In(
                Box::new(Expression::Variable(Variable::new_unchecked("v"))),
                vec![],
            ),
        );
        assert_eq!(sql, "FALSE");
    }

    #[test]
    fn same_term_compares_ids() {
        let vars = VarMap::from_iter([term_var("v")]);
        let mut term_ids = FxHashMap::default();
        term_ids.insert(TermKey::iri("http://ex/a"), quadsql_model::TermId(7));
        let sql = lower_with(
            &vars,
            &term_ids,
            &Expression::SameTerm(
                Box::new(Expression::Variable(Variable::new_unchecked("v"))),
                Box::new(Expression::NamedNode(NamedNode::new_unchecked(
                    "http://ex/a",
                ))),
            ),
        );
        assert_eq!(sql, "(quad_0.object_id = 7)");
    }

    #[test]
    fn unbound_variables_lower_to_null() {
        let sql = lower_with(
            &VarMap::new(),
            &FxHashMap::default(),
            &Expression::Variable(Variable::new_unchecked("nowhere")),
        );
        assert_eq!(sql, "NULL");
    }

    #[test]
    fn unsupported_functions_lower_to_null() {
        let vars = VarMap::from_iter([term_var("v")]);
        let sql = lower_with(
            &vars,
            &FxHashMap::default(),
            &Expression::FunctionCall(
                Function::Tz,
                vec![Expression::Variable(Variable::new_unchecked("v"))],
            ),
        );
        assert_eq!(sql, "NULL");
    }
}

impl PatternTranslator<'_> {
    /// Lowers an aggregate expression to its SQL aggregate function.
    pub(crate) fn lower_aggregate(
        &self,
        aggregate: &AggregateExpression,
        vars: &VarMap,
        aliases: &mut AliasGenerator,
        graph: &GraphContext,
    ) -> Result<String, EngineError> {
        match aggregate {
            AggregateExpression::CountSolutions { distinct } => {
                if !*distinct {
                    return Ok("COUNT(*)".to_owned());
                }
                let columns: Vec<&str> = vars.values().map(VarBinding::value_expr).collect();
                if columns.is_empty() {
                    Ok("COUNT(*)".to_owned())
                } else {
                    Ok(format!("COUNT(DISTINCT ({}))", columns.join(", ")))
                }
            }
            AggregateExpression::FunctionCall {
                name,
                expr,
                distinct,
            } => {
                let mut lowerer = ExprLowerer {
                    translator: self,
                    vars,
                    aliases,
                    graph,
                };
                let value = lowerer.lower(expr)?;
                let distinct = if *distinct { "DISTINCT " } else { "" };
                Ok(match name {
                    AggregateFunction::Count => format!("COUNT({distinct}{value})"),
                    AggregateFunction::Sum => {
                        format!("SUM({distinct}CAST({value} AS DECIMAL))")
                    }
                    AggregateFunction::Avg => {
                        format!("AVG({distinct}CAST({value} AS DECIMAL))")
                    }
                    AggregateFunction::Min => format!("MIN({value})"),
                    AggregateFunction::Max => format!("MAX({value})"),
                    // A bare column reference is not legal under GROUP BY;
                    // MIN picks a deterministic witness.
                    AggregateFunction::Sample => format!("MIN({value})"),
                    AggregateFunction::GroupConcat { separator } => {
                        let separator = quote_str(separator.as_deref().unwrap_or(" "));
                        format!("STRING_AGG({distinct}CAST({value} AS TEXT), {separator})")
                    }
                    AggregateFunction::Custom(name) => {
                        return Err(EngineError::Unsupported(format!(
                            "custom aggregate function {}",
                            name.as_str()
                        )))
                    }
                })
            }
        }
    }
}
