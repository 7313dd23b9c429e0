use crate::compute::ComputeCapability;
use crate::error::ComputationError;
use crate::evaluation::{collect_bindings, EvaluationContext, QueryEvaluator};
use async_trait::async_trait;
use otfc_model::{json_to_term, term_to_json, NamedNode, QuerySolution, Triple};
use otfc_rewriting::Query;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Computes predicates with a remote compute service.
///
/// All solutions of the narrowed template are sent in a single `POST {url}/compute` request.
/// The service answers with one value per subject.
#[derive(Clone, Debug)]
pub struct RestCapability {
    url: String,
}

#[derive(Serialize)]
struct ComputeRequest<'a> {
    #[serde(rename = "predicateIRI")]
    predicate_iri: &'a str,
    #[serde(rename = "computationInput")]
    computation_input: Vec<Map<String, Value>>,
}

#[derive(Deserialize)]
struct ComputeResponse {
    result: Vec<ComputedValue>,
}

#[derive(Deserialize)]
struct ComputedValue {
    key: String,
    value: Value,
}

impl RestCapability {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ComputeCapability for RestCapability {
    async fn compute(
        &self,
        predicate: &NamedNode,
        query: &Query,
        context: &EvaluationContext,
        evaluator: &dyn QueryEvaluator,
    ) -> Result<Vec<Triple>, ComputationError> {
        let input = collect_bindings(evaluator, &query.to_string(), context).await?;
        let request = ComputeRequest {
            predicate_iri: predicate.as_str(),
            computation_input: input.iter().map(encode_solution).collect(),
        };
        let response = context
            .transport
            .post(&format!("{}/compute", self.url.trim_end_matches('/')))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ComputationError::Status(response.status()));
        }
        let response = response
            .json::<ComputeResponse>()
            .await
            .map_err(|error| ComputationError::MalformedResponse(error.to_string()))?;
        decode_response(predicate, response)
    }
}

fn encode_solution(solution: &QuerySolution) -> Map<String, Value> {
    solution
        .iter()
        .map(|(variable, term)| (variable.as_str().to_owned(), term_to_json(term)))
        .collect()
}

fn decode_response(
    predicate: &NamedNode,
    response: ComputeResponse,
) -> Result<Vec<Triple>, ComputationError> {
    let mut triples = Vec::with_capacity(response.result.len());
    for ComputedValue { key, value } in response.result {
        let subject = NamedNode::new(&key).map_err(|error| {
            ComputationError::MalformedResponse(format!("{key} is not a valid IRI: {error}"))
        })?;
        if let Some(object) = json_to_term(&value) {
            triples.push(Triple::new(subject, predicate.clone(), object));
        }
    }
    Ok(triples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use otfc_model::{Literal, Term, Variable};
    use serde_json::json;

    fn predicate() -> NamedNode {
        NamedNode::new_unchecked("http://example.com/bondRating")
    }

    #[test]
    fn requests_carry_json_encoded_rows() -> Result<(), serde_json::Error> {
        let solution = QuerySolution::from((
            vec![Variable::new_unchecked("_s"), Variable::new_unchecked("price")],
            vec![
                Some(Term::from(NamedNode::new_unchecked("http://example.com/b1"))),
                Some(Term::from(Literal::new_typed_literal(
                    "12",
                    NamedNode::new_unchecked("http://www.w3.org/2001/XMLSchema#integer"),
                ))),
            ],
        ));
        let predicate = predicate();
        let request = ComputeRequest {
            predicate_iri: predicate.as_str(),
            computation_input: vec![encode_solution(&solution)],
        };
        assert_eq!(
            serde_json::to_value(&request)?,
            json!({
                "predicateIRI": "http://example.com/bondRating",
                "computationInput": [{ "_s": "http://example.com/b1", "price": 12 }]
            })
        );
        Ok(())
    }

    #[test]
    fn results_become_triples_of_the_predicate() -> Result<(), Box<dyn std::error::Error>> {
        let response = serde_json::from_value::<ComputeResponse>(json!({
            "result": [
                { "key": "http://example.com/b1", "value": "AAA" },
                { "key": "http://example.com/b2", "value": null }
            ]
        }))?;
        let triples = decode_response(&predicate(), response)?;
        assert_eq!(
            triples,
            [Triple::new(
                NamedNode::new_unchecked("http://example.com/b1"),
                predicate(),
                Literal::new_simple_literal("AAA"),
            )]
        );
        Ok(())
    }

    #[test]
    fn relative_keys_are_rejected() -> Result<(), serde_json::Error> {
        let response = serde_json::from_value::<ComputeResponse>(json!({
            "result": [{ "key": "b1", "value": 1 }]
        }))?;
        assert!(matches!(
            decode_response(&predicate(), response),
            Err(ComputationError::MalformedResponse(_))
        ));
        Ok(())
    }
}
