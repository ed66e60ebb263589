pub mod config;
pub mod errors;
pub mod evaluation_context;
pub mod fallback;
pub mod flag_definitions;
pub mod flag_match_reason;
pub mod flag_matching;
pub mod flag_store;
pub mod hash_bucketer;
pub mod metrics_consts;
pub mod redis;
pub mod resolution_chain;
pub mod resolver;
pub mod result_cache;
pub mod snapshot;
pub mod variant;

// Shared with the integration tests under tests/, so not behind cfg(test).
pub mod test_utils;

pub use errors::FlagError;
pub use evaluation_context::EvaluationContext;
pub use flag_definitions::{EvaluatedFlagSet, FlagDefinition};
pub use resolver::{Resolution, ResolveOptions, Resolver};
