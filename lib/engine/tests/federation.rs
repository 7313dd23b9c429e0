use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use otfc_engine::config::HTTP_TIMEOUT;
use otfc_engine::error::EvaluationError;
use otfc_engine::evaluation::{
    EvaluationContext, QueryEvaluator, SolutionStream, TripleStream,
};
use otfc_engine::federation::plan_offload;
use otfc_engine::Transport;
use otfc_model::{Expression, NamedNode, QuerySolution, Term, Variable};
use otfc_rewriting::federation::SAMPLE_LIMIT;
use otfc_rewriting::Query;
use std::error::Error;
use std::sync::{Arc, Mutex};

/// Answers every `SELECT` query with `rows` distinct subjects bound to `?a`.
struct SubjectsEvaluator {
    rows: usize,
    queries: Mutex<Vec<String>>,
}

impl SubjectsEvaluator {
    fn new(rows: usize) -> Self {
        Self {
            rows,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl QueryEvaluator for SubjectsEvaluator {
    async fn evaluate_bindings(
        &self,
        query: &str,
        _context: &EvaluationContext,
    ) -> Result<SolutionStream, EvaluationError> {
        self.queries
            .lock()
            .map_err(|_| EvaluationError::UnexpectedResults("a usable mock"))?
            .push(query.to_owned());
        let variable = Variable::new_unchecked("a");
        let solutions = (0..self.rows).map(move |i| {
            let subject = NamedNode::new_unchecked(format!("http://example.com/s{i}"));
            Ok(QuerySolution::from((
                vec![variable.clone()],
                vec![Some(Term::from(subject))],
            )))
        });
        Ok(stream::iter(solutions).boxed())
    }

    async fn evaluate_triples(
        &self,
        _query: &str,
        _context: &EvaluationContext,
    ) -> Result<TripleStream, EvaluationError> {
        Ok(stream::empty().boxed())
    }
}

const QUERY: &str = "PREFIX : <http://example.com/>
    SELECT * WHERE { ?a :name ?n . ?a :rating ?r . FILTER(?n != \"x\") }";

fn rating() -> NamedNode {
    NamedNode::new_unchecked("http://example.com/rating")
}

fn context() -> Result<EvaluationContext, reqwest::Error> {
    Ok(EvaluationContext::new(
        Vec::new(),
        Arc::new(Transport::new(HTTP_TIMEOUT)?),
        HTTP_TIMEOUT,
    ))
}

fn subject_restriction(query: &Query) -> Option<usize> {
    query.where_filters().find_map(|filter| match filter {
        Expression::In(_, values) => Some(values.len()),
        _ => None,
    })
}

#[tokio::test]
async fn exactly_sample_limit_subjects_leave_the_offload_unrestricted() -> Result<(), Box<dyn Error>>
{
    let query = Query::parse(QUERY)?;
    let evaluator = SubjectsEvaluator::new(SAMPLE_LIMIT);
    let offload = plan_offload(&query, &[rating()], &evaluator, &context()?, SAMPLE_LIMIT)
        .await?
        .ok_or("nothing to offload")?;
    assert_eq!(subject_restriction(&offload), None);
    assert_eq!(offload.where_filters().count(), 1);
    Ok(())
}

#[tokio::test]
async fn fewer_subjects_restrict_the_offload() -> Result<(), Box<dyn Error>> {
    let query = Query::parse(QUERY)?;
    let evaluator = SubjectsEvaluator::new(SAMPLE_LIMIT - 1);
    let offload = plan_offload(&query, &[rating()], &evaluator, &context()?, SAMPLE_LIMIT)
        .await?
        .ok_or("nothing to offload")?;
    assert_eq!(subject_restriction(&offload), Some(SAMPLE_LIMIT - 1));
    Ok(())
}

#[tokio::test]
async fn the_probe_selects_the_computed_triples() -> Result<(), Box<dyn Error>> {
    let query = Query::parse(QUERY)?;
    let evaluator = SubjectsEvaluator::new(1);
    plan_offload(&query, &[rating()], &evaluator, &context()?, SAMPLE_LIMIT).await?;

    let queries = evaluator.queries.lock().map_err(|e| e.to_string())?.clone();
    assert_eq!(queries.len(), 1);
    let probe = Query::parse(&queries[0])?;
    assert_eq!(probe.where_triples().count(), 1);
    assert_eq!(probe.where_filters().count(), 0);
    Ok(())
}
