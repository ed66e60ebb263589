//! The tiers a flag lookup walks through, cheapest first.
//!
//! Each tier either answers or passes. A pass only moves resolution to the next
//! tier, it never aborts it. The default chain is
//! transport snapshot -> result cache -> live evaluation -> static fallback,
//! and new tiers (a shared remote cache, say) slot in without touching the others.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::FlagError;
use crate::evaluation_context::EvaluationContext;
use crate::fallback::StaticFallback;
use crate::flag_definitions::{EvaluatedFlagSet, FlagDefinition};
use crate::flag_matching::Evaluator;
use crate::flag_store::{list_flags_within, FlagStore};
use crate::metrics_consts::{
    DEFINITIONS_CACHE_HIT_COUNTER, FLAG_STORE_ERRORS_COUNTER, RESULT_CACHE_HIT_COUNTER,
    TRANSPORT_SNAPSHOT_REJECTED_COUNTER,
};
use crate::result_cache::{ResultCache, FLAGS_CACHE_TAG};
use crate::snapshot::TransportSnapshot;

pub const DEFINITIONS_CACHE_KEY: &str = "definitions";

pub type DefinitionsCache = ResultCache<Arc<Vec<FlagDefinition>>>;

/// Which tier produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Transport,
    Cache,
    Live,
    Fallback,
    /// A tier added by the embedding application.
    Other(&'static str),
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Transport => "transport",
            ResolutionSource::Cache => "cache",
            ResolutionSource::Live => "live",
            ResolutionSource::Fallback => "fallback",
            ResolutionSource::Other(name) => name,
        }
    }
}

impl std::fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for ResolutionSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Everything a tier may look at for one lookup.
pub struct ResolveRequest<'a> {
    pub context: &'a EvaluationContext,
    pub keys: &'a [String],
    pub snapshot: Option<&'a TransportSnapshot>,
    pub cancellation: Option<&'a CancellationToken>,
}

#[async_trait]
pub trait ResolutionTier: Send + Sync {
    fn source(&self) -> ResolutionSource;

    /// `Some` answers the lookup, `None` hands it to the next tier.
    async fn try_resolve(&self, request: &ResolveRequest<'_>) -> Option<EvaluatedFlagSet>;
}

/// Uses a flag map evaluated by an upstream tier, when it is fresh and complete.
///
/// The only tier that trusts a value supplied from outside the process.
pub struct TransportSnapshotTier {
    max_age: Duration,
}

impl TransportSnapshotTier {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }
}

#[async_trait]
impl ResolutionTier for TransportSnapshotTier {
    fn source(&self) -> ResolutionSource {
        ResolutionSource::Transport
    }

    async fn try_resolve(&self, request: &ResolveRequest<'_>) -> Option<EvaluatedFlagSet> {
        let snapshot = request.snapshot?;
        if snapshot.covers(request.keys, self.max_age, Utc::now()) {
            return Some(snapshot.flags.clone());
        }

        debug!(
            evaluated_at = %snapshot.evaluated_at,
            "transport snapshot is stale or incomplete, ignoring it"
        );
        counter!(TRANSPORT_SNAPSHOT_REJECTED_COUNTER).increment(1);
        None
    }
}

pub struct ResultCacheTier {
    results: Arc<ResultCache<EvaluatedFlagSet>>,
}

impl ResultCacheTier {
    pub fn new(results: Arc<ResultCache<EvaluatedFlagSet>>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl ResolutionTier for ResultCacheTier {
    fn source(&self) -> ResolutionSource {
        ResolutionSource::Cache
    }

    async fn try_resolve(&self, request: &ResolveRequest<'_>) -> Option<EvaluatedFlagSet> {
        let cache_key = request.context.cache_key()?;
        let cached = self.results.get(&cache_key).await;
        let hit = if cached.is_some() { "true" } else { "false" };
        counter!(RESULT_CACHE_HIT_COUNTER, "cache_hit" => hit).increment(1);
        cached
    }
}

/// Fetches definitions and evaluates them for the request's context.
///
/// Successful evaluations of identified contexts are written back to the result
/// cache. Definitions themselves are cached briefly so anonymous traffic, which
/// is never result-cached, does not hit the store on every call. Concurrent
/// misses share one store read and one evaluation per cache key.
pub struct LiveEvaluationTier {
    store: Arc<dyn FlagStore>,
    evaluator: Arc<Evaluator>,
    results: Arc<ResultCache<EvaluatedFlagSet>>,
    definitions: Arc<DefinitionsCache>,
    store_timeout: Duration,
}

impl LiveEvaluationTier {
    pub fn new(
        store: Arc<dyn FlagStore>,
        evaluator: Arc<Evaluator>,
        results: Arc<ResultCache<EvaluatedFlagSet>>,
        definitions: Arc<DefinitionsCache>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            evaluator,
            results,
            definitions,
            store_timeout,
        }
    }

    /// Returns the definitions and how long they remain cached.
    async fn load_definitions(&self) -> Result<(Arc<Vec<FlagDefinition>>, Duration), FlagError> {
        if let Some(cached) = self.definitions.get_with_ttl(DEFINITIONS_CACHE_KEY).await {
            counter!(DEFINITIONS_CACHE_HIT_COUNTER, "cache_hit" => "true").increment(1);
            return Ok(cached);
        }
        counter!(DEFINITIONS_CACHE_HIT_COUNTER, "cache_hit" => "false").increment(1);

        let store = self.store.as_ref();
        let limit = self.store_timeout;
        self.definitions
            .get_or_try_load(DEFINITIONS_CACHE_KEY, &[FLAGS_CACHE_TAG], move || async move {
                let definitions = list_flags_within(store, limit, None).await?;
                Ok::<_, FlagError>((Arc::new(definitions), None))
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Evaluates every definition for `context`.
    ///
    /// The result may be cached no longer than the definitions it was computed from.
    async fn evaluate(
        &self,
        context: &EvaluationContext,
    ) -> Result<(EvaluatedFlagSet, Option<Duration>), FlagError> {
        let (definitions, remaining) = self.load_definitions().await?;
        let flags = self.evaluator.evaluate_all(&definitions, context);
        Ok((flags, Some(remaining)))
    }

    async fn evaluate_for(
        &self,
        context: &EvaluationContext,
    ) -> Result<EvaluatedFlagSet, FlagError> {
        match context.cache_key() {
            Some(cache_key) => self
                .results
                .get_or_try_load(&cache_key, &[FLAGS_CACHE_TAG], || self.evaluate(context))
                .await
                .map(|(flags, _)| flags)
                .map_err(|e| (*e).clone()),
            None => self.evaluate(context).await.map(|(flags, _)| flags),
        }
    }
}

#[async_trait]
impl ResolutionTier for LiveEvaluationTier {
    fn source(&self) -> ResolutionSource {
        ResolutionSource::Live
    }

    async fn try_resolve(&self, request: &ResolveRequest<'_>) -> Option<EvaluatedFlagSet> {
        // loads are shared between callers, so cancellation only releases this one
        let evaluation = self.evaluate_for(request.context);
        let result = match request.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(FlagError::Cancelled),
                result = evaluation => result,
            },
            None => evaluation.await,
        };

        match result {
            Ok(flags) => Some(flags),
            Err(e) => {
                warn!(error = %e, "live flag evaluation unavailable, falling back");
                counter!(FLAG_STORE_ERRORS_COUNTER, "reason" => e.error_code()).increment(1);
                None
            }
        }
    }
}

/// Always answers, with the versioned static defaults.
pub struct StaticFallbackTier {
    fallback: Arc<StaticFallback>,
}

impl StaticFallbackTier {
    pub fn new(fallback: Arc<StaticFallback>) -> Self {
        Self { fallback }
    }
}

#[async_trait]
impl ResolutionTier for StaticFallbackTier {
    fn source(&self) -> ResolutionSource {
        ResolutionSource::Fallback
    }

    async fn try_resolve(&self, _request: &ResolveRequest<'_>) -> Option<EvaluatedFlagSet> {
        debug!(version = self.fallback.version.as_str(), "serving static fallback flags");
        Some(self.fallback.flags.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag_store::InMemoryFlagStore;
    use crate::result_cache::DEFAULT_TTL;
    use crate::test_utils::FailingFlagStore;

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn live_tier(
        store: Arc<dyn FlagStore>,
    ) -> (LiveEvaluationTier, Arc<ResultCache<EvaluatedFlagSet>>) {
        let results = Arc::new(ResultCache::new(100, DEFAULT_TTL));
        let tier = LiveEvaluationTier::new(
            store,
            Arc::new(Evaluator::default()),
            results.clone(),
            Arc::new(ResultCache::new(10, DEFAULT_TTL)),
            Duration::from_millis(100),
        );
        (tier, results)
    }

    #[tokio::test]
    async fn test_snapshot_tier_uses_fresh_complete_snapshot() {
        let tier = TransportSnapshotTier::new(Duration::from_secs(30));
        let context = EvaluationContext::new();
        let requested = keys(&["darkMode"]);
        let snapshot =
            TransportSnapshot::new([("darkMode".to_string(), true)].into_iter().collect());

        let request = ResolveRequest {
            context: &context,
            keys: &requested,
            snapshot: Some(&snapshot),
            cancellation: None,
        };
        assert_eq!(
            tier.try_resolve(&request).await.and_then(|f| f.get("darkMode")),
            Some(true)
        );

        let incomplete = keys(&["darkMode", "checkout"]);
        let request = ResolveRequest {
            keys: &incomplete,
            ..request
        };
        assert_eq!(tier.try_resolve(&request).await, None);
    }

    #[tokio::test]
    async fn test_snapshot_tier_passes_without_snapshot() {
        let tier = TransportSnapshotTier::new(Duration::from_secs(30));
        let context = EvaluationContext::new();
        let requested = keys(&["darkMode"]);
        let request = ResolveRequest {
            context: &context,
            keys: &requested,
            snapshot: None,
            cancellation: None,
        };
        assert_eq!(tier.try_resolve(&request).await, None);
    }

    #[tokio::test]
    async fn test_live_tier_writes_identified_results_to_cache() {
        let store = Arc::new(InMemoryFlagStore::new(vec![
            FlagDefinition::new("darkMode").enabled(100),
        ]));
        let (tier, results) = live_tier(store);

        let context = EvaluationContext::new().with_subject("user-1");
        let requested = keys(&["darkMode"]);
        let request = ResolveRequest {
            context: &context,
            keys: &requested,
            snapshot: None,
            cancellation: None,
        };

        let flags = tier.try_resolve(&request).await.unwrap();
        assert_eq!(flags.get("darkMode"), Some(true));

        let cache_key = context.cache_key().unwrap();
        assert_eq!(results.get(&cache_key).await, Some(flags));
    }

    #[tokio::test]
    async fn test_live_tier_does_not_cache_anonymous_results() {
        let store = Arc::new(InMemoryFlagStore::new(vec![
            FlagDefinition::new("half").enabled(50),
        ]));
        let (tier, results) = live_tier(store);

        let context = EvaluationContext::new();
        let requested = keys(&["half"]);
        let request = ResolveRequest {
            context: &context,
            keys: &requested,
            snapshot: None,
            cancellation: None,
        };

        assert!(tier.try_resolve(&request).await.is_some());
        assert_eq!(results.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_live_tier_passes_when_store_fails() {
        let (tier, _results) = live_tier(Arc::new(FailingFlagStore));
        let context = EvaluationContext::new().with_subject("user-1");
        let requested = keys(&["darkMode"]);
        let request = ResolveRequest {
            context: &context,
            keys: &requested,
            snapshot: None,
            cancellation: None,
        };

        assert_eq!(tier.try_resolve(&request).await, None);
    }

    #[test]
    fn test_source_labels() {
        assert_eq!(ResolutionSource::Transport.to_string(), "transport");
        assert_eq!(ResolutionSource::Other("edge_kv").as_str(), "edge_kv");
        assert_eq!(
            serde_json::to_string(&ResolutionSource::Fallback).unwrap(),
            "\"fallback\""
        );
    }
}
