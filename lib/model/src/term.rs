use oxrdf::vocab::xsd;
use oxrdf::{GraphNameRef, LiteralRef, SubjectRef, TermRef};
use spargebra::term::GroundTerm;
use std::fmt;

/// The identifier of a term in the term dictionary.
///
/// Ids are minted by the database when a term is first inserted and are never
/// reused afterwards.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TermId(pub i64);

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The coarse kind of a dictionary entry, as persisted in the `term_type`
/// column.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TermKind {
    Iri,
    Literal,
    Blank,
}

impl TermKind {
    /// The single-character code stored in the term table.
    pub fn code(self) -> &'static str {
        match self {
            TermKind::Iri => "U",
            TermKind::Literal => "L",
            TermKind::Blank => "B",
        }
    }

    /// Parses the persisted single-character code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "U" => Some(TermKind::Iri),
            "L" => Some(TermKind::Literal),
            "B" => Some(TermKind::Blank),
            _ => None,
        }
    }
}

/// The full dictionary identity of a term.
///
/// Two literals that differ only in language tag or datatype are distinct
/// dictionary entries, so both are part of the key. A datatype of `None`
/// means `xsd:string` (the dictionary does not materialise the default).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TermKey {
    pub text: String,
    pub kind: TermKind,
    pub lang: Option<String>,
    pub datatype: Option<String>,
}

impl TermKey {
    pub fn iri(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: TermKind::Iri,
            lang: None,
            datatype: None,
        }
    }

    pub fn blank(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: TermKind::Blank,
            lang: None,
            datatype: None,
        }
    }

    pub fn simple_literal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: TermKind::Literal,
            lang: None,
            datatype: None,
        }
    }

    pub fn from_literal(literal: LiteralRef<'_>) -> Self {
        let datatype = literal.datatype();
        Self {
            text: literal.value().to_owned(),
            kind: TermKind::Literal,
            lang: literal.language().map(ToOwned::to_owned),
            datatype: (literal.language().is_none() && datatype != xsd::STRING)
                .then(|| datatype.as_str().to_owned()),
        }
    }

    pub fn from_term(term: TermRef<'_>) -> Self {
        match term {
            TermRef::NamedNode(n) => Self::iri(n.as_str()),
            TermRef::BlankNode(b) => Self::blank(b.as_str()),
            TermRef::Literal(l) => Self::from_literal(l),
        }
    }

    pub fn from_subject(subject: SubjectRef<'_>) -> Self {
        match subject {
            SubjectRef::NamedNode(n) => Self::iri(n.as_str()),
            SubjectRef::BlankNode(b) => Self::blank(b.as_str()),
        }
    }

    pub fn from_ground_term(term: &GroundTerm) -> Self {
        match term {
            GroundTerm::NamedNode(n) => Self::iri(n.as_str()),
            GroundTerm::Literal(l) => Self::from_literal(l.as_ref()),
        }
    }

    /// The key of the graph component of a quad. The default graph maps to
    /// the configured global sentinel.
    pub fn from_graph_name(graph: GraphNameRef<'_>, global_graph_iri: &str) -> Self {
        match graph {
            GraphNameRef::NamedNode(n) => Self::iri(n.as_str()),
            GraphNameRef::BlankNode(b) => Self::blank(b.as_str()),
            GraphNameRef::DefaultGraph => Self::iri(global_graph_iri),
        }
    }
}

/// A quad at the id level, the unit the batch quad mutator consumes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct QuadIds {
    pub subject: TermId,
    pub predicate: TermId,
    pub object: TermId,
    pub graph: TermId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::Literal;

    #[test]
    fn term_kind_codes_round_trip() {
        for kind in [TermKind::Iri, TermKind::Literal, TermKind::Blank] {
            assert_eq!(TermKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(TermKind::from_code("X"), None);
    }

    #[test]
    fn simple_literal_has_no_materialised_datatype() {
        let key = TermKey::from_literal(Literal::new_simple_literal("x").as_ref());
        assert_eq!(key.lang, None);
        assert_eq!(key.datatype, None);
    }

    #[test]
    fn language_literals_are_distinct_keys() {
        let en = TermKey::from_literal(
            Literal::new_language_tagged_literal_unchecked("x", "en").as_ref(),
        );
        let fr = TermKey::from_literal(
            Literal::new_language_tagged_literal_unchecked("x", "fr").as_ref(),
        );
        assert_ne!(en, fr);
    }

    #[test]
    fn typed_literal_keeps_its_datatype() {
        let key =
            TermKey::from_literal(Literal::new_typed_literal("42", xsd::INTEGER).as_ref());
        assert_eq!(
            key.datatype.as_deref(),
            Some("http://www.w3.org/2001/XMLSchema#integer")
        );
    }

    #[test]
    fn default_graph_maps_to_the_global_sentinel() {
        let key = TermKey::from_graph_name(GraphNameRef::DefaultGraph, "urn:___GLOBAL");
        assert_eq!(key.text, "urn:___GLOBAL");
        assert_eq!(key.kind, TermKind::Iri);
    }
}
