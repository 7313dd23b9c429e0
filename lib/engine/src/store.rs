use crate::error::EvaluationError;
use crate::evaluation::{blocking_stream, SolutionStream, TripleStream};
use otfc_model::Triple;
use oxigraph::model::GraphName;
use oxigraph::sparql::QueryResults;
use oxigraph::store::{StorageError, Store};
use std::fmt;

/// The query-scoped in-memory store that holds computed and offloaded triples.
///
/// Cloning an [OffloadStore] yields a handle to the same store.
#[derive(Clone)]
pub struct OffloadStore {
    store: Store,
}

impl OffloadStore {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            store: Store::new()?,
        })
    }

    /// Inserts `triple` into the default graph. Returns whether it was not yet present.
    pub fn insert(&self, triple: Triple) -> Result<bool, StorageError> {
        self.store.insert(&triple.in_graph(GraphName::DefaultGraph))
    }

    /// Inserts all `triples` and returns how many of them were new.
    pub fn extend(&self, triples: impl IntoIterator<Item = Triple>) -> Result<usize, StorageError> {
        let mut count = 0;
        for triple in triples {
            if self.insert(triple)? {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        self.store.is_empty()
    }

    /// Evaluates a `SELECT` query. Solutions are computed as the stream is polled.
    pub async fn select(&self, query: &str) -> Result<SolutionStream, EvaluationError> {
        let store = self.store.clone();
        let query = query.to_owned();
        blocking_stream(move || match store.query(query.as_str())? {
            QueryResults::Solutions(solutions) => {
                Ok(solutions.map(|solution| solution.map_err(EvaluationError::from)))
            }
            QueryResults::Boolean(_) | QueryResults::Graph(_) => {
                Err(EvaluationError::UnexpectedResults("solutions"))
            }
        })
        .await
    }

    /// Evaluates a `CONSTRUCT` or `DESCRIBE` query. Triples are computed as the stream is polled.
    pub async fn construct(&self, query: &str) -> Result<TripleStream, EvaluationError> {
        let store = self.store.clone();
        let query = query.to_owned();
        blocking_stream(move || match store.query(query.as_str())? {
            QueryResults::Graph(triples) => {
                Ok(triples.map(|triple| triple.map_err(EvaluationError::from)))
            }
            QueryResults::Boolean(_) | QueryResults::Solutions(_) => {
                Err(EvaluationError::UnexpectedResults("a graph"))
            }
        })
        .await
    }
}

impl fmt::Debug for OffloadStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadStore").finish_non_exhaustive()
    }
}
