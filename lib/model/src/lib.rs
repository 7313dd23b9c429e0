mod json;
pub mod vocab;

pub use json::*;

// Re-export some oxrdf types.
pub use oxiri::{Iri, IriParseError};
pub use oxrdf::{
    BlankNode, BlankNodeIdParseError, Literal, LiteralRef, NamedNode, NamedNodeRef,
    NamedOrBlankNode, Subject, Term, TermRef, Triple, TripleRef, Variable, VariableRef,
};

// Re-export the SPARQL algebra, as the rewriting operates directly on it.
pub use sparesults::QuerySolution;
pub use spargebra::algebra::{
    AggregateExpression, AggregateFunction, Expression, Function, GraphPattern, OrderExpression,
    PropertyPathExpression, QueryDataset,
};
pub use spargebra::term::{GroundTerm, NamedNodePattern, TermPattern, TriplePattern};
pub use spargebra::{Query as SparqlQuery, SparqlSyntaxError};
