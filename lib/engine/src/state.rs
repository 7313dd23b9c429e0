use crate::catalog::{PredicateCatalog, PredicateMeta};
use crate::compute::ComputeCapability;
use crate::config::EngineConfig;
use crate::error::{CatalogError, EvaluationError, HandleError, RegistryLoadWarning};
use crate::evaluation::{
    DataSource, DefaultEvaluator, EvaluationContext, QueryEvaluator, SolutionStream,
};
use crate::federation::{offload, plan_offload};
use crate::registry::{fetch_definitions, register_definitions};
use crate::store::OffloadStore;
use crate::transport::Transport;
use itertools::Itertools;
use otfc_model::{NamedNode, SparqlQuery};
use otfc_rewriting::{Query, Substitution, SubstitutionError, WhereTriple};
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// The state of an engine that resolves virtual predicates.
///
/// The catalog is replaced atomically on every update. A query that is being handled keeps
/// working on the snapshot it started with.
pub struct EngineState {
    config: EngineConfig,
    catalog: RwLock<Arc<PredicateCatalog>>,
    evaluator: Arc<dyn QueryEvaluator>,
    transport: Arc<Transport>,
}

impl EngineState {
    /// Creates an engine with an empty catalog that evaluates queries with the
    /// [DefaultEvaluator].
    pub fn new(config: EngineConfig) -> Result<Self, reqwest::Error> {
        let transport = Transport::new(config.http_timeout)?;
        Ok(Self::with_parts(config, transport, Arc::new(DefaultEvaluator)))
    }

    pub fn with_parts(
        config: EngineConfig,
        transport: Transport,
        evaluator: Arc<dyn QueryEvaluator>,
    ) -> Self {
        Self {
            config,
            catalog: RwLock::new(Arc::new(PredicateCatalog::new())),
            evaluator,
            transport: Arc::new(transport),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn evaluator(&self) -> &Arc<dyn QueryEvaluator> {
        &self.evaluator
    }

    /// Returns a snapshot of the catalog.
    pub fn catalog(&self) -> Arc<PredicateCatalog> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&catalog)
    }

    /// Applies `update` to a copy of the catalog and installs the copy if `update` succeeds.
    pub fn update_catalog<T, E>(
        &self,
        update: impl FnOnce(&mut PredicateCatalog) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut current = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        let mut catalog = PredicateCatalog::clone(&current);
        let result = update(&mut catalog)?;
        *current = Arc::new(catalog);
        Ok(result)
    }

    /// Registers `template` as the substitution of the predicate `iri`.
    pub fn substitute(&self, iri: NamedNode, template: &str) -> Result<(), CatalogError> {
        self.update_catalog(|catalog| catalog.register_substitution(iri, template, Value::Null))
    }

    pub fn register_compute(
        &self,
        iri: NamedNode,
        template: &str,
        subject: &str,
        capability: Arc<dyn ComputeCapability>,
        meta: Value,
    ) -> Result<(), CatalogError> {
        self.update_catalog(|catalog| {
            catalog.register_compute(iri, template, subject, capability, meta)
        })
    }

    /// Loads the predicates of all configured registries.
    ///
    /// Registries that cannot be reached and entries that cannot be registered are skipped.
    pub async fn load_registries(&self) -> Vec<RegistryLoadWarning> {
        let mut warnings = Vec::new();
        for url in &self.config.registries {
            tracing::info!("Loading predicates from {url}");
            let definitions = match fetch_definitions(
                &self.transport,
                url,
                self.config.registry_attempts,
                self.config.registry_backoff,
            )
            .await
            {
                Ok(definitions) => definitions,
                Err(warning) => {
                    warnings.push(warning);
                    continue;
                }
            };
            let skipped = self.update_catalog(|catalog| {
                Ok::<_, Infallible>(register_definitions(catalog, url, definitions))
            });
            warnings.extend(skipped.unwrap_or_else(|never| match never {}));
        }
        for warning in &warnings {
            tracing::warn!("{warning}");
        }
        warnings
    }

    pub fn meta(&self) -> Vec<PredicateMeta> {
        self.catalog().meta()
    }

    /// Creates a context that evaluates against `sources` through the transport of this engine.
    pub fn context(&self, sources: Vec<DataSource>) -> EvaluationContext {
        EvaluationContext::new(sources, Arc::clone(&self.transport), self.config.http_timeout)
    }

    /// Replaces the substitution predicates of `query` by their templates.
    pub fn rewrite(&self, query: &str) -> Result<String, SubstitutionError> {
        Self::apply_substitutions(&self.catalog(), query, self.config.expansion_limit)
    }

    fn apply_substitutions(
        catalog: &PredicateCatalog,
        query: &str,
        expansion_limit: usize,
    ) -> Result<String, SubstitutionError> {
        let query = SparqlQuery::parse(query, None)?;
        let rewritten = Substitution::new(catalog)
            .with_expansion_limit(expansion_limit)
            .rewrite_query(query)?;
        Ok(rewritten.to_string())
    }

    /// Resolves the virtual predicates of `query`.
    ///
    /// Substitution predicates are rewritten first. If the resulting `SELECT` query uses compute
    /// predicates, their triples are computed against the sources of `context` and stored in an
    /// [OffloadStore], together with the source data the query needs. The returned context then
    /// evaluates against that store only.
    pub async fn handle(
        &self,
        query: &str,
        context: EvaluationContext,
    ) -> Result<(String, EvaluationContext), HandleError> {
        let catalog = self.catalog();
        let mut text = query.to_owned();
        if catalog.has_substitutions() {
            text = Self::apply_substitutions(&catalog, &text, self.config.expansion_limit)?;
            tracing::info!("Applied substitutions");
            tracing::debug!("Substituted query:\n{text}");
        }
        if !catalog.has_computations() {
            return Ok((text, context));
        }

        let query = Query::parse_unvalidated(&text)?;
        let computable = catalog.compute_predicates();
        if !query.is_select() || !query.mentions_any(&computable) {
            return Ok((text, context));
        }
        query.validate()?;

        let evaluator = self.evaluator.as_ref();
        let store = OffloadStore::new().map_err(EvaluationError::from)?;
        let queries = std::iter::once(&query)
            .chain(query.subqueries())
            .collect::<Vec<_>>();
        let mut computed = Vec::new();
        for &part in &queries {
            let predicates = part
                .where_triples()
                .filter_map(WhereTriple::predicate_iri)
                .filter(|predicate| computable.contains(*predicate))
                .unique()
                .cloned()
                .collect::<Vec<_>>();
            for predicate in predicates {
                let handler = catalog.compute_handler(&predicate)?;
                let excluded = computable
                    .iter()
                    .filter(|other| **other != predicate)
                    .cloned()
                    .collect::<Vec<_>>();
                let triples = handler.compute(part, &context, evaluator, &excluded).await?;
                store.extend(triples).map_err(EvaluationError::from)?;
                if !computed.contains(&predicate) {
                    computed.push(predicate);
                }
            }
        }

        let local = context.with_sources(vec![DataSource::Offload(store.clone())]);
        for &part in &queries {
            let planned =
                plan_offload(part, &computed, evaluator, &local, self.config.sample_limit).await?;
            if let Some(offload_query) = planned {
                offload(&offload_query, evaluator, &context, &store).await?;
            }
        }

        tracing::info!(
            "Evaluating against the offload store ({} triples)",
            store.len().map_err(EvaluationError::from)?
        );
        Ok((query.to_string(), local))
    }

    /// Resolves the virtual predicates of the `SELECT` query `query` and evaluates it.
    pub async fn query(
        &self,
        query: &str,
        context: EvaluationContext,
    ) -> Result<SolutionStream, HandleError> {
        let (query, context) = self.handle(query, context).await?;
        tracing::debug!("Evaluating\n{query}");
        Ok(self.evaluator.evaluate_bindings(&query, &context).await?)
    }
}

impl fmt::Debug for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineState")
            .field("config", &self.config)
            .field("catalog", &self.catalog())
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}
