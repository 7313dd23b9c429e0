use crate::error::EvaluationError;
use crate::evaluation::{
    blocking_stream, DataSource, EvaluationContext, QueryEvaluator, SolutionStream, TripleStream,
};
use async_trait::async_trait;
use otfc_model::{QuerySolution, Triple};
use oxrdfio::{RdfFormat, RdfParser};
use reqwest::header::ACCEPT;
use reqwest::Response;
use sparesults::{QueryResultsFormat, QueryResultsParser, ReaderQueryResultsParserOutput};
use std::io::{self, Read};
use tokio::runtime::Handle;

const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";
const N_TRIPLES: &str = "application/n-triples";

/// Evaluates queries against a single data source.
///
/// The offload store is queried in process. SPARQL endpoints are queried with the SPARQL 1.1
/// protocol through the [Transport](crate::Transport) of the context.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultEvaluator;

impl DefaultEvaluator {
    fn single_source(context: &EvaluationContext) -> Result<&DataSource, EvaluationError> {
        match context.sources.as_slice() {
            [source] => Ok(source),
            sources => Err(EvaluationError::UnsupportedSources(sources.len())),
        }
    }

    async fn request(
        endpoint: &str,
        query: &str,
        accept: &'static str,
        context: &EvaluationContext,
    ) -> Result<BodyReader, EvaluationError> {
        let response = context
            .transport
            .post(endpoint)
            .header(ACCEPT, accept)
            .timeout(context.timeout)
            .form(&[("query", query)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EvaluationError::Status(response.status()));
        }
        Ok(BodyReader::new(response))
    }
}

#[async_trait]
impl QueryEvaluator for DefaultEvaluator {
    async fn evaluate_bindings(
        &self,
        query: &str,
        context: &EvaluationContext,
    ) -> Result<SolutionStream, EvaluationError> {
        match Self::single_source(context)? {
            DataSource::Offload(store) => store.select(query).await,
            DataSource::Endpoint(endpoint) => {
                let body = Self::request(endpoint, query, SPARQL_RESULTS_JSON, context).await?;
                blocking_stream(move || parse_solutions(body)).await
            }
        }
    }

    async fn evaluate_triples(
        &self,
        query: &str,
        context: &EvaluationContext,
    ) -> Result<TripleStream, EvaluationError> {
        match Self::single_source(context)? {
            DataSource::Offload(store) => store.construct(query).await,
            DataSource::Endpoint(endpoint) => {
                let body = Self::request(endpoint, query, N_TRIPLES, context).await?;
                blocking_stream(move || Ok(parse_triples(body))).await
            }
        }
    }
}

/// Reads the body of a response from a blocking thread, one chunk at a time.
struct BodyReader {
    response: Response,
    runtime: Handle,
    chunk: Vec<u8>,
    position: usize,
}

impl BodyReader {
    /// Must be called from within the runtime that drives `response`.
    fn new(response: Response) -> Self {
        Self {
            response,
            runtime: Handle::current(),
            chunk: Vec::new(),
            position: 0,
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.position >= self.chunk.len() {
            match self.runtime.block_on(self.response.chunk()) {
                Ok(Some(chunk)) => {
                    self.chunk = chunk.to_vec();
                    self.position = 0;
                }
                Ok(None) => return Ok(0),
                Err(error) => return Err(io::Error::other(error)),
            }
        }
        let read = Read::read(&mut self.chunk.get(self.position..).unwrap_or_default(), buf)?;
        self.position += read;
        Ok(read)
    }
}

fn parse_solutions(
    body: impl Read,
) -> Result<impl Iterator<Item = Result<QuerySolution, EvaluationError>>, EvaluationError> {
    match QueryResultsParser::from_format(QueryResultsFormat::Json).for_reader(body)? {
        ReaderQueryResultsParserOutput::Solutions(solutions) => {
            Ok(solutions.map(|solution| solution.map_err(EvaluationError::from)))
        }
        ReaderQueryResultsParserOutput::Boolean(_) => {
            Err(EvaluationError::UnexpectedResults("solutions"))
        }
    }
}

fn parse_triples(body: impl Read) -> impl Iterator<Item = Result<Triple, EvaluationError>> {
    RdfParser::from_format(RdfFormat::NTriples)
        .for_reader(body)
        .map(|quad| quad.map(Triple::from).map_err(EvaluationError::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HTTP_TIMEOUT;
    use crate::evaluation::collect_bindings;
    use crate::store::OffloadStore;
    use crate::transport::Transport;
    use futures::TryStreamExt;
    use otfc_model::{Literal, NamedNode, Variable};
    use std::error::Error;
    use std::sync::Arc;

    fn context(sources: Vec<DataSource>) -> Result<EvaluationContext, reqwest::Error> {
        Ok(EvaluationContext::new(
            sources,
            Arc::new(Transport::new(HTTP_TIMEOUT)?),
            HTTP_TIMEOUT,
        ))
    }

    #[test]
    fn sparql_json_results_are_parsed() -> Result<(), EvaluationError> {
        let body = br#"{
            "head": { "vars": ["s"] },
            "results": { "bindings": [
                { "s": { "type": "uri", "value": "http://example.com/a" } }
            ] }
        }"#;
        let solutions = parse_solutions(&body[..])?.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(solutions.len(), 1);
        assert_eq!(
            solutions[0].get(&Variable::new_unchecked("s")),
            Some(&NamedNode::new_unchecked("http://example.com/a").into())
        );
        Ok(())
    }

    #[test]
    fn n_triples_are_parsed() -> Result<(), EvaluationError> {
        let body = b"<http://example.com/a> <http://example.com/name> \"A\" .\n";
        let triples = parse_triples(&body[..]).collect::<Result<Vec<_>, _>>()?;
        assert_eq!(
            triples,
            [Triple::new(
                NamedNode::new_unchecked("http://example.com/a"),
                NamedNode::new_unchecked("http://example.com/name"),
                Literal::new_simple_literal("A"),
            )]
        );
        Ok(())
    }

    #[tokio::test]
    async fn offload_stores_are_queried_in_process() -> Result<(), Box<dyn Error>> {
        let store = OffloadStore::new()?;
        store.insert(Triple::new(
            NamedNode::new_unchecked("http://example.com/a"),
            NamedNode::new_unchecked("http://example.com/name"),
            Literal::new_simple_literal("A"),
        ))?;
        let context = context(vec![DataSource::Offload(store)])?;

        let solutions =
            collect_bindings(&DefaultEvaluator, "SELECT * WHERE { ?s ?p ?o }", &context).await?;
        assert_eq!(solutions.len(), 1);

        let triples = DefaultEvaluator
            .evaluate_triples(
                "CONSTRUCT { ?s <http://example.com/label> ?o } WHERE { ?s ?p ?o }",
                &context,
            )
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(triples.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn multiple_sources_are_rejected() -> Result<(), Box<dyn Error>> {
        let context = context(vec![
            DataSource::Endpoint("http://example.com/a".to_owned()),
            DataSource::Endpoint("http://example.com/b".to_owned()),
        ])?;
        let result = DefaultEvaluator
            .evaluate_bindings("SELECT * WHERE { ?s ?p ?o }", &context)
            .await;
        assert!(matches!(result, Err(EvaluationError::UnsupportedSources(2))));
        Ok(())
    }
}
