use otfc_model::{NamedNode, PropertyPathExpression, SparqlSyntaxError};
use std::fmt;
use thiserror::Error;

/// A query that cannot be handled by the computation pipeline.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValidationError {
    #[error(transparent)]
    Syntax(#[from] SparqlSyntaxError),
    #[error("group patterns are not supported")]
    GroupPatternUnsupported,
    #[error("property paths are not supported, found {0}")]
    PropertyPathUnsupported(Box<PropertyPathExpression>),
}

/// An error raised while rewriting virtual predicates into their templates.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubstitutionError {
    #[error(transparent)]
    Syntax(#[from] SparqlSyntaxError),
    #[error("Substitution of predicate {predicate} is not possible in path with '{operator}'")]
    PathOperator {
        predicate: NamedNode,
        operator: PathOperator,
    },
    #[error("Substitution of predicate {predicate} cannot bind {term} in this position")]
    InvalidBoundary { predicate: NamedNode, term: String },
    #[error("Substitution of predicate {predicate} did not terminate after {limit} expansions")]
    ExpansionLimit { predicate: NamedNode, limit: usize },
}

/// A substitution template that cannot be registered.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TemplateError {
    #[error(transparent)]
    Syntax(#[from] SparqlSyntaxError),
    #[error("substitution templates must be SELECT queries")]
    NotSelect,
    #[error("the template does not use the boundary variable ?{0}")]
    MissingBoundaryVariable(&'static str),
}

/// The property path operator that encloses a virtual predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathOperator {
    Link,
    Inverse,
    Alternative,
    Sequence,
    ZeroOrMore,
    OneOrMore,
    ZeroOrOne,
    NegatedPropertySet,
}

impl fmt::Display for PathOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Link => "link",
            Self::Inverse => "inv ^",
            Self::Alternative => "alt |",
            Self::Sequence => "seq /",
            Self::ZeroOrMore => "ZeroOrMorePath *",
            Self::OneOrMore => "OneOrMorePath +",
            Self::ZeroOrOne => "ZeroOrOnePath ?",
            Self::NegatedPropertySet => "NegatedPropertySet !",
        })
    }
}
