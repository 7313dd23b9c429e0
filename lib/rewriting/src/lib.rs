//! Query rewriting for virtual predicates.
//!
//! - [query] decomposes SPARQL queries into the elements of their `WHERE` clause.
//! - [substitution] replaces substitutable predicates by their template patterns.
//! - [merge] mines constraints from a user query to narrow down a compute predicate's template.
//! - [federation] splits a query around the subjects of computed predicates.

pub mod algebra;
mod error;
pub mod federation;
pub mod merge;
pub mod query;
pub mod substitution;

pub use error::*;
pub use query::{Query, QueryForm, TriplePredicate, WhereElement, WhereTriple};
pub use substitution::{substitute, Substitution, SubstitutionTemplate, TemplateLookup};

/// The template variable that is bound to the subject of a virtual predicate.
pub const SUBJECT_PLACEHOLDER: &str = "_s";
/// The template variable that is bound to the object of a virtual predicate.
pub const OBJECT_PLACEHOLDER: &str = "_o";
