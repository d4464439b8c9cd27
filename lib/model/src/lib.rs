//! This crate contains the quadsql data model: identifiers for interned RDF
//! terms, id-level quads as handed to the batch quad mutator, and the storage
//! error types shared by all layers.
//!
//! The RDF term types themselves are re-exported from
//! [Oxigraph](https://github.com/oxigraph/oxigraph).

mod error;
mod term;

pub use error::*;
pub use term::*;

// Re-export some oxrdf types.
pub use oxiri::Iri;
pub use oxrdf::vocab;
pub use oxrdf::{
    BlankNode, BlankNodeRef, GraphName, GraphNameRef, IriParseError, Literal,
    LiteralRef, NamedNode, NamedNodeRef, NamedOrBlankNode, NamedOrBlankNodeRef, Quad,
    QuadRef, Subject, SubjectRef, Term, TermParseError, TermRef, Triple, TripleRef,
    Variable, VariableNameParseError, VariableRef,
};
pub use spargebra::algebra::PropertyPathExpression;
pub use spargebra::term::{GroundTerm, NamedNodePattern, TermPattern, TriplePattern};

/// The graph IRI that stands in for the default graph when none is given.
///
/// Ground data written without an explicit `GRAPH` clause lands here. The
/// sentinel can be overridden through the engine configuration.
pub const GLOBAL_GRAPH_IRI: &str = "urn:___GLOBAL";
