use otfc_model::{NamedNode, SparqlSyntaxError};
use otfc_rewriting::{SubstitutionError, TemplateError, ValidationError};
use oxrdfio::RdfParseError;
use sparesults::QueryResultsParseError;
use std::time::Duration;

/// Errors raised by the [PredicateCatalog](crate::PredicateCatalog).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("The predicate {0} is already registered")]
    DuplicatePredicate(NamedNode),
    #[error("The template of {predicate} is invalid: {source}")]
    InvalidTemplate {
        predicate: NamedNode,
        #[source]
        source: TemplateError,
    },
    #[error("The query of {predicate} is not a valid SPARQL query: {source}")]
    InvalidQuery {
        predicate: NamedNode,
        #[source]
        source: SparqlSyntaxError,
    },
    #[error("The query of {predicate} does not bind the subject variable ?{subject}")]
    MissingSubjectVariable { predicate: NamedNode, subject: String },
    /// A predicate of the query is not registered as expected.
    #[error("No compute predicate is registered for {0}")]
    Lookup(NamedNode),
}

/// Errors raised while computing the triples of a compute predicate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ComputationError {
    #[error("The computation of {predicate} did not finish within {timeout:?}")]
    Timeout {
        predicate: NamedNode,
        timeout: Duration,
    },
    #[error("The compute service could not be reached: {0}")]
    Request(#[from] reqwest::Error),
    #[error("The compute service responded with status {0}")]
    Status(reqwest::StatusCode),
    #[error("The compute service returned a malformed result: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    /// A local compute function failed.
    #[error("{0}")]
    Handler(String),
}

/// Errors raised by a [QueryEvaluator](crate::evaluation::QueryEvaluator).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EvaluationError {
    #[error("Exactly one data source is supported, found {0}")]
    UnsupportedSources(usize),
    #[error("The SPARQL endpoint could not be reached: {0}")]
    Request(#[from] reqwest::Error),
    #[error("The SPARQL endpoint responded with status {0}")]
    Status(reqwest::StatusCode),
    #[error(transparent)]
    ResultsParsing(#[from] QueryResultsParseError),
    #[error(transparent)]
    GraphParsing(#[from] RdfParseError),
    #[error(transparent)]
    Store(#[from] oxigraph::sparql::EvaluationError),
    #[error(transparent)]
    Storage(#[from] oxigraph::store::StorageError),
    /// The query returned a different kind of results than requested.
    #[error("The query results are not {0}")]
    UnexpectedResults(&'static str),
}

/// A predicate source that could not be loaded.
///
/// Registry failures never abort the engine. They are returned to the caller and logged.
#[derive(Debug, thiserror::Error)]
pub enum RegistryLoadWarning {
    #[error("Unable to load predicates from {url} after {attempts} attempt(s): {source}")]
    Unreachable {
        url: String,
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },
    #[error("Skipped predicate {predicate} from {url}: {reason}")]
    InvalidEntry {
        url: String,
        predicate: String,
        reason: String,
    },
}

/// An error that aborts the handling of a query.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HandleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Substitution(#[from] SubstitutionError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Computation(#[from] ComputationError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

impl HandleError {
    /// Whether the error is caused by the query rather than by the engine.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Substitution(_) | Self::Computation(_)
        )
    }
}

impl From<SparqlSyntaxError> for HandleError {
    fn from(error: SparqlSyntaxError) -> Self {
        Self::Validation(error.into())
    }
}
