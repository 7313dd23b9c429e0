//! Loading of virtual predicates from remote predicate registries.

use crate::catalog::PredicateCatalog;
use crate::compute::{ComputeCapability, RestCapability};
use crate::error::RegistryLoadWarning;
use crate::transport::Transport;
use otfc_model::NamedNode;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// An entry of the `GET {url}/predicates` listing.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateDefinition {
    #[serde(rename = "predicateIRI")]
    pub predicate_iri: String,
    pub predicate_kind: String,
    pub predicate_query: String,
    #[serde(default)]
    pub predicate_query_subject: Option<String>,
    #[serde(default)]
    pub predicate_meta: Value,
}

impl PredicateDefinition {
    /// The metadata of the predicate. Registries may send it as a JSON document or as a string
    /// containing one.
    pub fn meta(&self) -> Result<Value, serde_json::Error> {
        match &self.predicate_meta {
            Value::String(text) => serde_json::from_str(text),
            meta => Ok(meta.clone()),
        }
    }
}

/// Fetches the predicate listing of the registry at `url`.
///
/// The registry is contacted up to `attempts` times, pausing `backoff` between two attempts.
pub async fn fetch_definitions(
    transport: &Transport,
    url: &str,
    attempts: usize,
    backoff: Duration,
) -> Result<Vec<PredicateDefinition>, RegistryLoadWarning> {
    let listing = format!("{}/predicates", url.trim_end_matches('/'));
    let mut attempt = 1;
    loop {
        let result = match transport.get(&listing).send().await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => response.json::<Vec<PredicateDefinition>>().await,
                Err(error) => Err(error),
            },
            Err(error) => Err(error),
        };
        match result {
            Ok(definitions) => return Ok(definitions),
            Err(source) if attempt >= attempts => {
                return Err(RegistryLoadWarning::Unreachable {
                    url: url.to_owned(),
                    attempts: attempt,
                    source,
                })
            }
            Err(error) => {
                tracing::warn!(
                    "Failed to contact {url} (remaining attempts: {}): {error}",
                    attempts - attempt
                );
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Registers the `definitions` of the registry at `url` in `catalog`.
///
/// Compute predicates are computed by the registry's compute service. Entries that cannot be
/// registered are skipped and reported. Entries with unreadable metadata are registered without
/// it and reported.
pub fn register_definitions(
    catalog: &mut PredicateCatalog,
    url: &str,
    definitions: Vec<PredicateDefinition>,
) -> Vec<RegistryLoadWarning> {
    let mut warnings = Vec::new();
    let capability: Arc<dyn ComputeCapability> = Arc::new(RestCapability::new(url));
    for definition in definitions {
        let invalid = |reason: String| RegistryLoadWarning::InvalidEntry {
            url: url.to_owned(),
            predicate: definition.predicate_iri.clone(),
            reason,
        };
        let iri = match NamedNode::new(&definition.predicate_iri) {
            Ok(iri) => iri,
            Err(error) => {
                warnings.push(invalid(error.to_string()));
                continue;
            }
        };
        let meta = match definition.meta() {
            Ok(meta) => meta,
            Err(error) => {
                warnings.push(invalid(format!("the metadata is not valid JSON: {error}")));
                Value::Null
            }
        };
        let result = match definition.predicate_kind.as_str() {
            "compute" => {
                let Some(subject) = &definition.predicate_query_subject else {
                    warnings.push(invalid("the subject variable is missing".to_owned()));
                    continue;
                };
                catalog.register_compute(
                    iri,
                    &definition.predicate_query,
                    subject,
                    Arc::clone(&capability),
                    meta,
                )
            }
            "substitute" => catalog.register_substitution(iri, &definition.predicate_query, meta),
            kind => {
                warnings.push(invalid(format!("unknown predicate kind '{kind}'")));
                continue;
            }
        };
        if let Err(error) = result {
            warnings.push(invalid(error.to_string()));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::VirtualPredicate;
    use serde_json::json;

    fn definitions(value: Value) -> Result<Vec<PredicateDefinition>, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn listings_are_registered_by_kind() -> Result<(), serde_json::Error> {
        let definitions = definitions(json!([
            {
                "predicateIRI": "http://example.com/rating",
                "predicateKind": "compute",
                "predicateQuery": "SELECT ?bond ?price WHERE { ?bond <http://example.com/price> ?price }",
                "predicateQuerySubject": "bond",
                "predicateMeta": "{\"unit\": \"grade\"}"
            },
            {
                "predicateIRI": "http://example.com/issuer",
                "predicateKind": "substitute",
                "predicateQuery": "SELECT ?_s ?_o WHERE { ?_s <http://example.com/issuedBy> ?_o }"
            }
        ]))?;
        let mut catalog = PredicateCatalog::new();
        let warnings = register_definitions(&mut catalog, "http://localhost:5000", definitions);
        assert!(warnings.is_empty());

        let rating = NamedNode::new_unchecked("http://example.com/rating");
        assert!(matches!(
            catalog.get(&rating),
            Some(VirtualPredicate::Compute(_))
        ));
        assert_eq!(catalog.meta()[1].meta, json!({ "unit": "grade" }));
        assert!(matches!(
            catalog.get(&NamedNode::new_unchecked("http://example.com/issuer")),
            Some(VirtualPredicate::Substitution(_))
        ));
        Ok(())
    }

    #[test]
    fn invalid_entries_are_reported() -> Result<(), serde_json::Error> {
        let definitions = definitions(json!([
            {
                "predicateIRI": "http://example.com/a",
                "predicateKind": "aggregate",
                "predicateQuery": "SELECT * WHERE { ?s ?p ?o }"
            },
            {
                "predicateIRI": "http://example.com/b",
                "predicateKind": "compute",
                "predicateQuery": "SELECT * WHERE { ?s ?p ?o }"
            },
            {
                "predicateIRI": "not an iri",
                "predicateKind": "compute",
                "predicateQuery": "SELECT * WHERE { ?s ?p ?o }",
                "predicateQuerySubject": "s"
            }
        ]))?;
        let mut catalog = PredicateCatalog::new();
        let warnings = register_definitions(&mut catalog, "http://localhost:5000", definitions);
        assert_eq!(warnings.len(), 3);
        assert!(catalog.is_empty());
        Ok(())
    }

    #[test]
    fn malformed_metadata_is_reported() -> Result<(), serde_json::Error> {
        let definitions = definitions(json!([{
            "predicateIRI": "http://example.com/issuer",
            "predicateKind": "substitute",
            "predicateQuery": "SELECT ?_s ?_o WHERE { ?_s <http://example.com/issuedBy> ?_o }",
            "predicateMeta": "{\"unit\": "
        }]))?;
        let mut catalog = PredicateCatalog::new();
        let warnings = register_definitions(&mut catalog, "http://localhost:5000", definitions);
        assert!(matches!(
            warnings.as_slice(),
            [RegistryLoadWarning::InvalidEntry { reason, .. }] if reason.contains("metadata")
        ));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.meta()[0].meta, Value::Null);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_registries_yield_a_warning() -> Result<(), reqwest::Error> {
        let transport = Transport::new(Duration::from_secs(1))?;
        let result =
            fetch_definitions(&transport, "http://127.0.0.1:9", 2, Duration::from_millis(10)).await;
        assert!(matches!(
            result,
            Err(RegistryLoadWarning::Unreachable { attempts: 2, .. })
        ));
        Ok(())
    }
}
