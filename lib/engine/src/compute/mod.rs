//! Capabilities that produce the triples of compute predicates.

mod rest;

pub use rest::RestCapability;

use crate::error::ComputationError;
use crate::evaluation::{collect_bindings, EvaluationContext, QueryEvaluator};
use async_trait::async_trait;
use otfc_model::{NamedNode, QuerySolution, Triple};
use otfc_rewriting::Query;
use std::fmt;

/// Computes the triples of a compute predicate.
///
/// `query` is the template of the predicate, narrowed down by the constraints of the user query.
/// Implementations usually evaluate it to obtain their input rows.
#[async_trait]
pub trait ComputeCapability: Send + Sync {
    async fn compute(
        &self,
        predicate: &NamedNode,
        query: &Query,
        context: &EvaluationContext,
        evaluator: &dyn QueryEvaluator,
    ) -> Result<Vec<Triple>, ComputationError>;
}

/// A [ComputeCapability] that passes the solutions of the narrowed template to a local function.
pub struct FnCapability<F> {
    function: F,
}

impl<F> FnCapability<F>
where
    F: Fn(&NamedNode, Vec<QuerySolution>) -> Result<Vec<Triple>, ComputationError> + Send + Sync,
{
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

#[async_trait]
impl<F> ComputeCapability for FnCapability<F>
where
    F: Fn(&NamedNode, Vec<QuerySolution>) -> Result<Vec<Triple>, ComputationError> + Send + Sync,
{
    async fn compute(
        &self,
        predicate: &NamedNode,
        query: &Query,
        context: &EvaluationContext,
        evaluator: &dyn QueryEvaluator,
    ) -> Result<Vec<Triple>, ComputationError> {
        let input = collect_bindings(evaluator, &query.to_string(), context).await?;
        (self.function)(predicate, input)
    }
}

impl<F> fmt::Debug for FnCapability<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCapability").finish_non_exhaustive()
    }
}
