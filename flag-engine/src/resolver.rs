use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::errors::FlagError;
use crate::evaluation_context::EvaluationContext;
use crate::fallback::StaticFallback;
use crate::flag_definitions::{EvaluatedFlagSet, OverrideRule};
use crate::flag_matching::Evaluator;
use crate::flag_store::{FlagStore, RedisFlagStore};
use crate::metrics_consts::{FLAG_CACHE_INVALIDATION_COUNTER, FLAG_RESOLUTION_COUNTER};
use crate::redis::RedisClient;
use crate::resolution_chain::{
    DefinitionsCache, LiveEvaluationTier, ResolutionSource, ResolutionTier, ResolveRequest,
    ResultCacheTier, StaticFallbackTier, TransportSnapshotTier,
};
use crate::result_cache::{ResultCache, DEFAULT_TTL, FLAGS_CACHE_TAG};
use crate::snapshot::TransportSnapshot;
use crate::variant::{assign_variant, assign_weighted_variant, WeightedVariant};

const DEFAULT_CACHE_MAX_ENTRIES: u64 = 10_000;
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_SNAPSHOT_MAX_AGE: Duration = Duration::from_secs(30);
// the definitions cache holds a single key, headroom keeps moka from rejecting reinserts
const DEFINITIONS_CACHE_MAX_ENTRIES: u64 = 16;

/// Per-call extras for [`Resolver::resolve_with`].
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub snapshot: Option<TransportSnapshot>,
    pub cancellation: Option<CancellationToken>,
}

impl ResolveOptions {
    pub fn with_snapshot(mut self, snapshot: TransportSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}

/// The requested flags plus the tier that answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub flags: EvaluatedFlagSet,
    pub source: ResolutionSource,
}

impl Resolution {
    /// Packages the flags for a downstream tier.
    pub fn to_snapshot(&self) -> TransportSnapshot {
        TransportSnapshot::new(self.flags.clone())
    }
}

/// Resolves flags for a context by walking the tier chain.
///
/// Resolution never fails because of the environment: store outages, timeouts
/// and cancellation all end in the static fallback. The only errors returned are
/// caller mistakes.
pub struct Resolver {
    tiers: Vec<Arc<dyn ResolutionTier>>,
    results: Arc<ResultCache<EvaluatedFlagSet>>,
    definitions: Arc<DefinitionsCache>,
    fallback: Arc<StaticFallback>,
}

pub struct ResolverBuilder {
    store: Arc<dyn FlagStore>,
    evaluator: Evaluator,
    fallback: StaticFallback,
    cache_ttl: Duration,
    cache_max_entries: u64,
    store_timeout: Duration,
    snapshot_max_age: Duration,
}

impl ResolverBuilder {
    pub fn evaluator(mut self, evaluator: Evaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn fallback(mut self, fallback: StaticFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn cache_max_entries(mut self, max_entries: u64) -> Self {
        self.cache_max_entries = max_entries;
        self
    }

    pub fn store_timeout(mut self, limit: Duration) -> Self {
        self.store_timeout = limit;
        self
    }

    pub fn snapshot_max_age(mut self, max_age: Duration) -> Self {
        self.snapshot_max_age = max_age;
        self
    }

    pub fn build(self) -> Resolver {
        let results = Arc::new(ResultCache::new(self.cache_max_entries, self.cache_ttl));
        let definitions = Arc::new(ResultCache::new(
            DEFINITIONS_CACHE_MAX_ENTRIES,
            self.cache_ttl,
        ));
        let fallback = Arc::new(self.fallback);

        let tiers: Vec<Arc<dyn ResolutionTier>> = vec![
            Arc::new(TransportSnapshotTier::new(self.snapshot_max_age)),
            Arc::new(ResultCacheTier::new(results.clone())),
            Arc::new(LiveEvaluationTier::new(
                self.store,
                Arc::new(self.evaluator),
                results.clone(),
                definitions.clone(),
                self.store_timeout,
            )),
            Arc::new(StaticFallbackTier::new(fallback.clone())),
        ];

        Resolver {
            tiers,
            results,
            definitions,
            fallback,
        }
    }
}

impl Resolver {
    pub fn builder(store: Arc<dyn FlagStore>) -> ResolverBuilder {
        ResolverBuilder {
            store,
            evaluator: Evaluator::default(),
            fallback: StaticFallback::default(),
            cache_ttl: DEFAULT_TTL,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            snapshot_max_age: DEFAULT_SNAPSHOT_MAX_AGE,
        }
    }

    pub fn new(store: Arc<dyn FlagStore>) -> Self {
        Self::builder(store).build()
    }

    /// Wires a redis-backed resolver from the environment config.
    pub fn from_config(config: &Config) -> Result<Self, FlagError> {
        let client =
            RedisClient::new(config.redis_url.clone())?.with_timeout(config.store_timeout());
        let store = RedisFlagStore::new(Arc::new(client), config.flag_definitions_key.clone());
        Self::from_config_with_store(config, Arc::new(store))
    }

    /// Same wiring as [`Resolver::from_config`] over any store.
    pub fn from_config_with_store(
        config: &Config,
        store: Arc<dyn FlagStore>,
    ) -> Result<Self, FlagError> {
        let evaluator = Evaluator::new().with_category_rule(
            config.admin_category.clone(),
            OverrideRule::RequireRole {
                role: config.admin_role.clone(),
            },
        );

        let fallback = match config.fallback_flags_path() {
            Some(path) => StaticFallback::from_file(path)?,
            None => StaticFallback::default(),
        };
        info!(version = fallback.version.as_str(), "loaded static fallback flags");

        Ok(Self::builder(store)
            .evaluator(evaluator)
            .fallback(fallback)
            .cache_ttl(config.cache_ttl())
            .cache_max_entries(config.cache_max_entries)
            .store_timeout(config.store_timeout())
            .snapshot_max_age(config.snapshot_max_age())
            .build())
    }

    /// Adds a tier at `index` in the chain. Index 0 is consulted first.
    ///
    /// Panics if `index` is past the end of the chain, like [`Vec::insert`].
    pub fn insert_tier(&mut self, index: usize, tier: Arc<dyn ResolutionTier>) {
        self.tiers.insert(index, tier);
    }

    pub fn tier_sources(&self) -> Vec<ResolutionSource> {
        self.tiers.iter().map(|tier| tier.source()).collect()
    }

    pub async fn resolve<S: AsRef<str>>(
        &self,
        context: &EvaluationContext,
        keys: &[S],
    ) -> Result<EvaluatedFlagSet, FlagError> {
        self.resolve_with(context, keys, ResolveOptions::default())
            .await
    }

    pub async fn resolve_with<S: AsRef<str>>(
        &self,
        context: &EvaluationContext,
        keys: &[S],
        options: ResolveOptions,
    ) -> Result<EvaluatedFlagSet, FlagError> {
        Ok(self.resolve_detailed(context, keys, options).await?.flags)
    }

    /// Resolves `keys` and reports which tier answered.
    ///
    /// Every requested key is present in the result. Keys the answering tier
    /// knows nothing about take the static fallback's value, or `false`.
    #[instrument(skip_all, fields(anonymous = context.is_anonymous(), keys = keys.len()))]
    pub async fn resolve_detailed<S: AsRef<str>>(
        &self,
        context: &EvaluationContext,
        keys: &[S],
        options: ResolveOptions,
    ) -> Result<Resolution, FlagError> {
        if keys.is_empty() {
            return Err(FlagError::EmptyRequestedKeys);
        }

        let keys: Vec<String> = keys.iter().map(|key| key.as_ref().to_string()).collect();
        let request = ResolveRequest {
            context,
            keys: &keys,
            snapshot: options.snapshot.as_ref(),
            cancellation: options.cancellation.as_ref(),
        };

        let mut answered = None;
        for tier in &self.tiers {
            if let Some(flags) = tier.try_resolve(&request).await {
                answered = Some((flags, tier.source()));
                break;
            }
        }
        // a custom chain may lack the fallback tier
        let (flags, source) = answered
            .unwrap_or_else(|| (self.fallback.flags.clone(), ResolutionSource::Fallback));

        debug!(source = %source, "resolved flags");
        counter!(FLAG_RESOLUTION_COUNTER, "source" => source.as_str()).increment(1);

        let flags = keys
            .into_iter()
            .map(|key| {
                let enabled = flags
                    .get(&key)
                    .unwrap_or_else(|| self.fallback.default_for(&key));
                (key, enabled)
            })
            .collect();

        Ok(Resolution { flags, source })
    }

    pub async fn is_enabled(&self, context: &EvaluationContext, key: &str) -> bool {
        match self.resolve(context, &[key]).await {
            Ok(flags) => flags.get(key).unwrap_or(false),
            // unreachable with a non-empty key list
            Err(_) => self.fallback.default_for(key),
        }
    }

    /// Deterministic experiment arm for the context. No I/O involved.
    pub fn assign_variant(
        &self,
        context: &EvaluationContext,
        experiment_key: &str,
        variants: &[String],
    ) -> Result<String, FlagError> {
        assign_variant(context, experiment_key, variants).map(str::to_string)
    }

    pub fn assign_weighted_variant(
        &self,
        context: &EvaluationContext,
        experiment_key: &str,
        variants: &[WeightedVariant],
    ) -> Result<Option<String>, FlagError> {
        Ok(assign_weighted_variant(context, experiment_key, variants)?.map(str::to_string))
    }

    /// Drops every cached result derived from the flag definitions.
    ///
    /// Definitions go first so that an evaluation starting after this call can
    /// only see fresh ones. Loads already in flight are discarded when they finish.
    pub async fn notify_flags_changed(&self) {
        let definitions = self.definitions.invalidate(&[FLAGS_CACHE_TAG]).await;
        let results = self.results.invalidate(&[FLAGS_CACHE_TAG]).await;

        info!(
            definitions,
            results, "flag definitions changed, invalidated cached flag results"
        );
        counter!(FLAG_CACHE_INVALIDATION_COUNTER).increment(1);
    }

    pub async fn cached_results(&self) -> u64 {
        self.results.entry_count().await
    }

    pub fn fallback(&self) -> &StaticFallback {
        &self.fallback
    }
}
