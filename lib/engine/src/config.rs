use otfc_rewriting::federation::SAMPLE_LIMIT;
use otfc_rewriting::substitution::DEFAULT_EXPANSION_LIMIT;
use std::time::Duration;

/// The budget of a single network call, including calls of compute services.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(120);
/// How often a predicate registry is contacted before it is skipped.
pub const REGISTRY_ATTEMPTS: usize = 3;
/// The pause between two attempts to contact a predicate registry.
pub const REGISTRY_BACKOFF: Duration = Duration::from_secs(2);

/// The configuration of an [EngineState](crate::EngineState).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// The base URLs of the predicate registries that are loaded on startup.
    pub registries: Vec<String>,
    pub http_timeout: Duration,
    pub registry_attempts: usize,
    pub registry_backoff: Duration,
    /// The number of subjects that are sampled before the offload query is left unrestricted.
    pub sample_limit: usize,
    /// The number of template expansions after which a substitution is aborted.
    pub expansion_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            registries: Vec::new(),
            http_timeout: HTTP_TIMEOUT,
            registry_attempts: REGISTRY_ATTEMPTS,
            registry_backoff: REGISTRY_BACKOFF,
            sample_limit: SAMPLE_LIMIT,
            expansion_limit: DEFAULT_EXPANSION_LIMIT,
        }
    }
}
