//! Quoting helpers for generated SQL.
//!
//! The backend contract only guarantees safe literal quoting, so every piece
//! of user-controlled text that ends up in a statement goes through
//! [`quote_str`]. Identifiers derived from SPARQL variable names are quoted
//! with [`quote_ident`] to preserve case.

/// Quotes a string as a SQL literal, doubling embedded single quotes.
pub fn quote_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Quotes an identifier, preserving case and escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for c in name.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_str_doubles_single_quotes() {
        assert_eq!(quote_str("it's"), "'it''s'");
        assert_eq!(quote_str(""), "''");
    }

    #[test]
    fn quote_ident_preserves_case() {
        assert_eq!(quote_ident("camelCase"), "\"camelCase\"");
    }
}
