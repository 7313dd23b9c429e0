//! The contract between the engine and the query engine that evaluates rewritten queries.

mod default;

pub use default::DefaultEvaluator;

use crate::error::EvaluationError;
use crate::store::OffloadStore;
use crate::transport::Transport;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use futures::TryStreamExt;
use itertools::Either;
use otfc_model::{QuerySolution, Triple};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// The number of results a producer may run ahead of the consumer of its stream.
pub const STREAM_BUFFER: usize = 64;

/// A stream of query solutions.
pub type SolutionStream = BoxStream<'static, Result<QuerySolution, EvaluationError>>;
/// A stream of constructed triples.
pub type TripleStream = BoxStream<'static, Result<Triple, EvaluationError>>;

/// A data source a query is evaluated against.
#[derive(Clone, Debug)]
pub enum DataSource {
    /// A SPARQL endpoint, identified by its URL.
    Endpoint(String),
    /// The offload store of a query that uses compute predicates.
    Offload(OffloadStore),
}

/// Everything an evaluation needs besides the query itself.
#[derive(Clone, Debug)]
pub struct EvaluationContext {
    pub sources: Vec<DataSource>,
    pub transport: Arc<Transport>,
    pub timeout: Duration,
    pub read_only: bool,
}

impl EvaluationContext {
    /// Creates a read-only context for the given `sources`.
    pub fn new(sources: Vec<DataSource>, transport: Arc<Transport>, timeout: Duration) -> Self {
        Self {
            sources,
            transport,
            timeout,
            read_only: true,
        }
    }

    /// Returns a copy of this context that evaluates against `sources` instead.
    #[must_use]
    pub fn with_sources(&self, sources: Vec<DataSource>) -> Self {
        Self {
            sources,
            ..self.clone()
        }
    }
}

/// Evaluates SPARQL queries.
#[async_trait]
pub trait QueryEvaluator: Send + Sync {
    /// Evaluates a `SELECT` query.
    async fn evaluate_bindings(
        &self,
        query: &str,
        context: &EvaluationContext,
    ) -> Result<SolutionStream, EvaluationError>;

    /// Evaluates a `CONSTRUCT` query.
    async fn evaluate_triples(
        &self,
        query: &str,
        context: &EvaluationContext,
    ) -> Result<TripleStream, EvaluationError>;
}

/// Evaluates a `SELECT` query and collects all of its solutions.
pub async fn collect_bindings(
    evaluator: &dyn QueryEvaluator,
    query: &str,
    context: &EvaluationContext,
) -> Result<Vec<QuerySolution>, EvaluationError> {
    evaluator
        .evaluate_bindings(query, context)
        .await?
        .try_collect()
        .await
}

/// Runs `produce` on a blocking thread and streams the items of the iterator it returns.
///
/// The iterator is advanced at most [STREAM_BUFFER] items ahead of the consumer and is dropped
/// once the stream is dropped. An error that `produce` or the first item reports is returned
/// directly instead of being streamed.
pub(crate) async fn blocking_stream<T, I, F>(
    produce: F,
) -> Result<BoxStream<'static, Result<T, EvaluationError>>, EvaluationError>
where
    T: Send + 'static,
    I: IntoIterator<Item = Result<T, EvaluationError>>,
    F: FnOnce() -> Result<I, EvaluationError> + Send + 'static,
{
    let (sender, mut receiver) = mpsc::channel(STREAM_BUFFER);
    tokio::task::spawn_blocking(move || {
        let rows = match produce() {
            Ok(rows) => Either::Left(rows.into_iter()),
            Err(error) => Either::Right(std::iter::once(Err(error))),
        };
        for row in rows {
            if sender.blocking_send(row).is_err() {
                // The stream has been dropped.
                break;
            }
        }
    });

    let first = match receiver.recv().await {
        Some(Err(error)) => return Err(error),
        first => first,
    };
    let rest = stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|row| (row, receiver))
    });
    Ok(stream::iter(first).chain(rest).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn dropped_streams_stop_the_producer() -> Result<(), EvaluationError> {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let rows = blocking_stream(move || {
            Ok((0_usize..).map(move |row| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, EvaluationError>(row)
            }))
        })
        .await?;

        let taken = rows.take(3).try_collect::<Vec<_>>().await?;
        assert_eq!(taken, [0, 1, 2]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let before = pulled.load(Ordering::SeqCst);
        assert!(before <= STREAM_BUFFER + 5, "pulled {before} rows");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pulled.load(Ordering::SeqCst), before);
        Ok(())
    }

    #[tokio::test]
    async fn setup_errors_are_returned_directly() {
        let result = blocking_stream(|| {
            Err::<Vec<Result<usize, EvaluationError>>, _>(EvaluationError::UnexpectedResults(
                "solutions",
            ))
        })
        .await;
        assert!(matches!(
            result,
            Err(EvaluationError::UnexpectedResults("solutions"))
        ));
    }
}
