use crate::error::EvaluationError;
use crate::evaluation::{EvaluationContext, QueryEvaluator};
use crate::store::OffloadStore;
use futures::{StreamExt, TryStreamExt};
use otfc_model::{NamedNode, QuerySolution};
use otfc_rewriting::federation::{capped, FederationPlan};
use otfc_rewriting::Query;

/// Builds the query that copies the data `query` needs besides the `computed` predicates.
///
/// The subjects of the computed triples are sampled from `local`, the context of the offload
/// store. If at most `sample_limit - 1` rows are found, the offload query is restricted to the
/// sampled subjects.
pub async fn plan_offload(
    query: &Query,
    computed: &[NamedNode],
    evaluator: &dyn QueryEvaluator,
    local: &EvaluationContext,
    sample_limit: usize,
) -> Result<Option<Query>, EvaluationError> {
    let Some(plan) = FederationPlan::new(query, computed) else {
        return Ok(None);
    };
    let sample = match plan.probe() {
        Some(probe) => sample_subjects(evaluator, &probe.to_string(), local, sample_limit).await?,
        None => None,
    };
    if sample.is_none() && !plan.subjects().is_empty() {
        tracing::debug!("Too many computed subjects, offloading without restriction");
    }
    Ok(Some(plan.finish(sample.as_deref())))
}

async fn sample_subjects(
    evaluator: &dyn QueryEvaluator,
    probe: &str,
    local: &EvaluationContext,
    limit: usize,
) -> Result<Option<Vec<QuerySolution>>, EvaluationError> {
    let rows = evaluator
        .evaluate_bindings(probe, local)
        .await?
        .take(limit)
        .try_collect::<Vec<_>>()
        .await?;
    Ok(capped(rows, limit))
}

/// Evaluates the `CONSTRUCT` query `offload` against `source` and inserts its triples into
/// `store`. Returns the number of triples received.
pub async fn offload(
    offload: &Query,
    evaluator: &dyn QueryEvaluator,
    source: &EvaluationContext,
    store: &OffloadStore,
) -> Result<usize, EvaluationError> {
    tracing::debug!("Offloading\n{offload}");
    let mut triples = evaluator
        .evaluate_triples(&offload.to_string(), source)
        .await?;
    let mut count = 0;
    while let Some(triple) = triples.try_next().await? {
        store.insert(triple)?;
        count += 1;
    }
    tracing::info!("Cached {count} triples");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HTTP_TIMEOUT;
    use crate::evaluation::{DataSource, DefaultEvaluator};
    use crate::transport::Transport;
    use otfc_model::{Expression, Literal, Triple};
    use std::error::Error;
    use std::sync::Arc;

    const QUERY: &str = "PREFIX : <http://example.com/>
        SELECT * WHERE { ?a :name ?n . ?a :rating ?r }";

    fn iri(name: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.com/{name}"))
    }

    fn local(subjects: usize) -> Result<EvaluationContext, Box<dyn Error>> {
        let store = OffloadStore::new()?;
        store.extend((0..subjects).map(|i| {
            Triple::new(
                iri(&format!("b{i}")),
                iri("rating"),
                Literal::new_simple_literal("AAA"),
            )
        }))?;
        Ok(EvaluationContext::new(
            vec![DataSource::Offload(store)],
            Arc::new(Transport::new(HTTP_TIMEOUT)?),
            HTTP_TIMEOUT,
        ))
    }

    fn restrictions(query: &Query) -> usize {
        query
            .where_filters()
            .filter(|filter| matches!(filter, Expression::In(..)))
            .count()
    }

    #[tokio::test]
    async fn small_samples_restrict_the_offload_query() -> Result<(), Box<dyn Error>> {
        let query = Query::parse(QUERY)?;
        let offload = plan_offload(&query, &[iri("rating")], &DefaultEvaluator, &local(2)?, 3)
            .await?
            .ok_or("nothing to offload")?;
        assert_eq!(restrictions(&offload), 1);
        Ok(())
    }

    #[tokio::test]
    async fn full_samples_leave_the_offload_query_unrestricted() -> Result<(), Box<dyn Error>> {
        let query = Query::parse(QUERY)?;
        let offload = plan_offload(&query, &[iri("rating")], &DefaultEvaluator, &local(3)?, 3)
            .await?
            .ok_or("nothing to offload")?;
        assert_eq!(restrictions(&offload), 0);
        Ok(())
    }

    #[tokio::test]
    async fn offloaded_triples_are_cached() -> Result<(), Box<dyn Error>> {
        let source = local(2)?;
        let target = OffloadStore::new()?;
        let query = Query::parse_unvalidated(
            "CONSTRUCT { ?s <http://example.com/copy> ?o } WHERE { ?s ?p ?o }",
        )?;
        let count = offload(&query, &DefaultEvaluator, &source, &target).await?;
        assert_eq!(count, 2);
        assert_eq!(target.len()?, 2);
        Ok(())
    }
}
