//! The runtime of the on-the-fly computation engine.
//!
//! An [EngineState] holds the [PredicateCatalog] of virtual predicates and resolves them in the
//! queries it handles: substitution predicates are rewritten into their templates, compute
//! predicates are materialized into an [OffloadStore] that the query is then evaluated against.

mod catalog;
pub mod compute;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod federation;
pub mod registry;
mod state;
mod store;
mod transport;

pub use catalog::{
    ComputePredicate, PredicateCatalog, PredicateMeta, SubstitutionPredicate, VirtualPredicate,
};
pub use config::EngineConfig;
pub use state::EngineState;
pub use store::OffloadStore;
pub use transport::{Credentials, Transport};
