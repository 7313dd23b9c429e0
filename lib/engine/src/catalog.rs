use crate::compute::ComputeCapability;
use crate::error::{CatalogError, ComputationError};
use crate::evaluation::{EvaluationContext, QueryEvaluator};
use otfc_model::{NamedNode, Triple, Variable};
use otfc_rewriting::merge::merge_excluding;
use otfc_rewriting::{Query, SubstitutionTemplate, TemplateLookup};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

/// The virtual predicates known to an engine, keyed by their IRI.
#[derive(Clone, Debug, Default)]
pub struct PredicateCatalog {
    predicates: FxHashMap<NamedNode, VirtualPredicate>,
}

/// A predicate that is not stored in the data source.
#[derive(Clone, Debug)]
pub enum VirtualPredicate {
    /// Rewritten into the pattern of its template.
    Substitution(SubstitutionPredicate),
    /// Materialized by a [ComputeCapability].
    Compute(Arc<ComputePredicate>),
}

#[derive(Clone, Debug)]
pub struct SubstitutionPredicate {
    pub template: SubstitutionTemplate,
    pub meta: Value,
}

/// The metadata of a virtual predicate, as listed for service descriptions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PredicateMeta {
    pub iri: String,
    pub meta: Value,
}

impl PredicateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a predicate that is replaced by the `SELECT` query `template`.
    pub fn register_substitution(
        &mut self,
        iri: NamedNode,
        template: &str,
        meta: Value,
    ) -> Result<(), CatalogError> {
        let template =
            SubstitutionTemplate::parse(template).map_err(|source| CatalogError::InvalidTemplate {
                predicate: iri.clone(),
                source,
            })?;
        self.register(
            iri,
            VirtualPredicate::Substitution(SubstitutionPredicate { template, meta }),
        )
    }

    /// Registers a predicate whose triples are produced by `capability`.
    ///
    /// `template` is the query whose solutions are passed to the capability. It binds the
    /// subjects of the predicate to the variable `subject`.
    pub fn register_compute(
        &mut self,
        iri: NamedNode,
        template: &str,
        subject: &str,
        capability: Arc<dyn ComputeCapability>,
        meta: Value,
    ) -> Result<(), CatalogError> {
        let predicate = ComputePredicate::new(iri.clone(), template, subject, capability, meta)?;
        self.register(iri, VirtualPredicate::Compute(Arc::new(predicate)))
    }

    fn register(&mut self, iri: NamedNode, predicate: VirtualPredicate) -> Result<(), CatalogError> {
        match self.predicates.entry(iri) {
            Entry::Occupied(entry) => Err(CatalogError::DuplicatePredicate(entry.key().clone())),
            Entry::Vacant(entry) => {
                tracing::info!("Registered virtual predicate {}", entry.key());
                entry.insert(predicate);
                Ok(())
            }
        }
    }

    pub fn get(&self, iri: &NamedNode) -> Option<&VirtualPredicate> {
        self.predicates.get(iri)
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn has_substitutions(&self) -> bool {
        self.predicates
            .values()
            .any(|p| matches!(p, VirtualPredicate::Substitution(_)))
    }

    pub fn has_computations(&self) -> bool {
        self.predicates
            .values()
            .any(|p| matches!(p, VirtualPredicate::Compute(_)))
    }

    /// Returns the IRIs of all compute predicates.
    pub fn compute_predicates(&self) -> Vec<NamedNode> {
        self.predicates
            .iter()
            .filter(|(_, p)| matches!(p, VirtualPredicate::Compute(_)))
            .map(|(iri, _)| iri.clone())
            .collect()
    }

    /// Returns the compute predicate registered for `iri`.
    pub fn compute_handler(&self, iri: &NamedNode) -> Result<Arc<ComputePredicate>, CatalogError> {
        match self.predicates.get(iri) {
            Some(VirtualPredicate::Compute(predicate)) => Ok(Arc::clone(predicate)),
            Some(VirtualPredicate::Substitution(_)) | None => {
                Err(CatalogError::Lookup(iri.clone()))
            }
        }
    }

    /// Lists the metadata of all predicates, ordered by IRI.
    pub fn meta(&self) -> Vec<PredicateMeta> {
        let mut meta = self
            .predicates
            .iter()
            .map(|(iri, predicate)| PredicateMeta {
                iri: iri.as_str().to_owned(),
                meta: match predicate {
                    VirtualPredicate::Substitution(predicate) => predicate.meta.clone(),
                    VirtualPredicate::Compute(predicate) => predicate.meta.clone(),
                },
            })
            .collect::<Vec<_>>();
        meta.sort_by(|a, b| a.iri.cmp(&b.iri));
        meta
    }
}

impl TemplateLookup for PredicateCatalog {
    fn template(&self, predicate: &NamedNode) -> Option<&SubstitutionTemplate> {
        match self.predicates.get(predicate)? {
            VirtualPredicate::Substitution(predicate) => Some(&predicate.template),
            VirtualPredicate::Compute(_) => None,
        }
    }
}

/// A predicate whose triples are computed on demand.
pub struct ComputePredicate {
    iri: NamedNode,
    template: Query,
    subject: Variable,
    capability: Arc<dyn ComputeCapability>,
    meta: Value,
}

impl ComputePredicate {
    pub fn new(
        iri: NamedNode,
        template: &str,
        subject: &str,
        capability: Arc<dyn ComputeCapability>,
        meta: Value,
    ) -> Result<Self, CatalogError> {
        let template =
            Query::parse_unvalidated(template).map_err(|source| CatalogError::InvalidQuery {
                predicate: iri.clone(),
                source,
            })?;
        let subject = Variable::new_unchecked(subject.trim_start_matches(['?', '$']));
        if !template.variables().contains(&subject) {
            return Err(CatalogError::MissingSubjectVariable {
                predicate: iri,
                subject: subject.into_string(),
            });
        }
        Ok(Self {
            iri,
            template,
            subject,
            capability,
            meta,
        })
    }

    pub fn iri(&self) -> &NamedNode {
        &self.iri
    }

    pub fn template(&self) -> &Query {
        &self.template
    }

    pub fn subject(&self) -> &Variable {
        &self.subject
    }

    pub fn meta(&self) -> &Value {
        &self.meta
    }

    /// Computes the triples of this predicate that `user` may need.
    ///
    /// The template is narrowed down with the constraints `user` places on the subject of the
    /// predicate. Triples of the `excluded` predicates are not used as constraints.
    pub async fn compute(
        &self,
        user: &Query,
        context: &EvaluationContext,
        evaluator: &dyn QueryEvaluator,
        excluded: &[NamedNode],
    ) -> Result<Vec<Triple>, ComputationError> {
        tracing::info!("Resolving {}", self.iri);
        let query = merge_excluding(&self.template, &self.subject, user, &self.iri, excluded);
        tracing::debug!("Narrowed query of {}:\n{query}", self.iri);
        let computation = self
            .capability
            .compute(&self.iri, &query, context, evaluator);
        let triples = tokio::time::timeout(context.timeout, computation)
            .await
            .map_err(|_| ComputationError::Timeout {
                predicate: self.iri.clone(),
                timeout: context.timeout,
            })??;
        tracing::info!("Computed {} triple(s)", triples.len());
        Ok(triples)
    }
}

impl fmt::Debug for ComputePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputePredicate")
            .field("iri", &self.iri)
            .field("template", &self.template)
            .field("subject", &self.subject)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::FnCapability;
    use serde_json::json;

    fn iri(name: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.com/{name}"))
    }

    fn capability() -> Arc<dyn ComputeCapability> {
        Arc::new(FnCapability::new(|_: &NamedNode, _| Ok(Vec::new())))
    }

    #[test]
    fn duplicates_are_rejected_across_kinds() -> Result<(), CatalogError> {
        let mut catalog = PredicateCatalog::new();
        catalog.register_substitution(
            iri("p"),
            "SELECT ?_s ?_o WHERE { ?_s <http://example.com/q> ?_o }",
            Value::Null,
        )?;
        let result = catalog.register_compute(
            iri("p"),
            "SELECT ?s WHERE { ?s a <http://example.com/Bond> }",
            "s",
            capability(),
            Value::Null,
        );
        assert!(matches!(result, Err(CatalogError::DuplicatePredicate(_))));
        assert_eq!(catalog.len(), 1);
        Ok(())
    }

    #[test]
    fn templates_are_checked_on_registration() {
        let mut catalog = PredicateCatalog::new();
        let result = catalog.register_substitution(
            iri("p"),
            "SELECT ?_s WHERE { ?_s <http://example.com/q> ?x }",
            Value::Null,
        );
        assert!(matches!(result, Err(CatalogError::InvalidTemplate { .. })));

        let result = catalog.register_compute(
            iri("c"),
            "SELECT ?x WHERE { ?x a <http://example.com/Bond> }",
            "?s",
            capability(),
            Value::Null,
        );
        assert!(matches!(
            result,
            Err(CatalogError::MissingSubjectVariable { .. })
        ));
        assert!(catalog.is_empty());
    }

    #[test]
    fn lookups_distinguish_the_kinds() -> Result<(), CatalogError> {
        let mut catalog = PredicateCatalog::new();
        catalog.register_substitution(
            iri("p"),
            "SELECT ?_s ?_o WHERE { ?_s <http://example.com/q> ?_o }",
            Value::Null,
        )?;
        catalog.register_compute(
            iri("c"),
            "SELECT ?s WHERE { ?s a <http://example.com/Bond> }",
            "?s",
            capability(),
            json!({ "label": "rating" }),
        )?;

        assert!(catalog.template(&iri("p")).is_some());
        assert!(catalog.template(&iri("c")).is_none());
        assert_eq!(catalog.compute_predicates(), [iri("c")]);
        assert_eq!(catalog.compute_handler(&iri("c"))?.subject().as_str(), "s");
        assert!(matches!(
            catalog.compute_handler(&iri("p")),
            Err(CatalogError::Lookup(_))
        ));
        assert_eq!(
            catalog.meta(),
            [
                PredicateMeta {
                    iri: iri("c").into_string(),
                    meta: json!({ "label": "rating" }),
                },
                PredicateMeta {
                    iri: iri("p").into_string(),
                    meta: Value::Null,
                },
            ]
        );
        Ok(())
    }
}
