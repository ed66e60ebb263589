use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::errors::FlagError;
use crate::flag_definitions::FlagDefinition;
use crate::redis::{Client, CustomRedisError};

/// Source of the current flag definitions.
///
/// Implementations do plain I/O: no retries and no caching. Timeouts and cancellation
/// are applied by the caller through [`list_flags_within`].
#[async_trait]
pub trait FlagStore: Send + Sync {
    async fn list_flags(&self) -> Result<Vec<FlagDefinition>, FlagError>;
}

/// Runs `store.list_flags()` bounded by `limit`, giving up early if `cancellation` fires.
pub async fn list_flags_within(
    store: &dyn FlagStore,
    limit: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<Vec<FlagDefinition>, FlagError> {
    let fetch = timeout(limit, store.list_flags());

    let result = match cancellation {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(FlagError::Cancelled),
                result = fetch => result,
            }
        }
        None => fetch.await,
    };

    result.map_err(|_| FlagError::TimeoutError)?
}

/// Reads all definitions from one JSON document stored under a single redis key.
pub struct RedisFlagStore {
    client: Arc<dyn Client + Send + Sync>,
    key: String,
}

impl RedisFlagStore {
    pub fn new(client: Arc<dyn Client + Send + Sync>, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }

    /// Writes the full definition list, used by editing tools and tests.
    pub async fn write_flags(&self, flags: &[FlagDefinition]) -> Result<(), FlagError> {
        let serialized = serde_json::to_string(flags).map_err(|e| {
            tracing::error!("failed to serialize flag definitions: {}", e);
            FlagError::DataParsingError
        })?;
        self.client.set(self.key.clone(), serialized).await?;
        Ok(())
    }
}

#[async_trait]
impl FlagStore for RedisFlagStore {
    #[instrument(skip_all)]
    async fn list_flags(&self) -> Result<Vec<FlagDefinition>, FlagError> {
        let serialized_flags = match self.client.get(self.key.clone()).await {
            Ok(serialized) => serialized,
            // nothing written yet, not an outage
            Err(CustomRedisError::NotFound) => return Ok(Vec::new()),
            Err(e) => {
                warn!(key = self.key.as_str(), "failed to fetch flag definitions: {}", e);
                return Err(e.into());
            }
        };

        let flags: Vec<FlagDefinition> = serde_json::from_str(&serialized_flags).map_err(|e| {
            tracing::error!("failed to parse data to flags list: {}", e);
            FlagError::DataParsingError
        })?;

        Ok(flags)
    }
}

/// Process-local store, for embedding and tests.
#[derive(Default)]
pub struct InMemoryFlagStore {
    flags: RwLock<Vec<FlagDefinition>>,
}

impl InMemoryFlagStore {
    pub fn new(flags: Vec<FlagDefinition>) -> Self {
        Self {
            flags: RwLock::new(flags),
        }
    }

    /// Insert or replace a definition by key, stamping `updated_at`.
    pub fn upsert(&self, mut flag: FlagDefinition) {
        flag.updated_at = Utc::now();
        let mut flags = self.write();
        match flags.iter_mut().find(|existing| existing.key == flag.key) {
            Some(existing) => *existing = flag,
            None => flags.push(flag),
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut flags = self.write();
        let before = flags.len();
        flags.retain(|flag| flag.key != key);
        flags.len() != before
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<FlagDefinition>> {
        match self.flags.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
    async fn list_flags(&self) -> Result<Vec<FlagDefinition>, FlagError> {
        let flags = match self.flags.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(flags.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::MockRedisClient;
    use crate::test_utils::{FailingFlagStore, SlowFlagStore};

    const KEY: &str = "feature_flags:definitions";

    #[tokio::test]
    async fn test_fetch_flags_from_redis() {
        let flags = vec![
            FlagDefinition::new("darkMode").enabled(50),
            FlagDefinition::new("checkout"),
        ];
        let mut client = MockRedisClient::new();
        client.get_ret(KEY, Ok(serde_json::to_string(&flags).unwrap()));

        let store = RedisFlagStore::new(Arc::new(client), KEY);
        let fetched = store.list_flags().await.unwrap();

        assert_eq!(fetched, flags);
    }

    #[tokio::test]
    async fn test_missing_key_means_no_flags() {
        let store = RedisFlagStore::new(Arc::new(MockRedisClient::new()), KEY);
        assert!(store.list_flags().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_data_in_redis_is_handled() {
        let mut client = MockRedisClient::new();
        client.get_ret(KEY, Ok("{not a list".to_string()));

        let store = RedisFlagStore::new(Arc::new(client), KEY);
        match store.list_flags().await {
            Err(FlagError::DataParsingError) => (),
            other => panic!("Expected DataParsingError, got {:?}", other),
        };
    }

    #[tokio::test]
    async fn test_redis_outage_is_surfaced() {
        let mut client = MockRedisClient::new();
        client.get_ret(KEY, Err(CustomRedisError::Other("connection refused".to_string())));

        let store = RedisFlagStore::new(Arc::new(client), KEY);
        assert!(matches!(
            store.list_flags().await,
            Err(FlagError::RedisUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_write_flags_sets_key() {
        let client = MockRedisClient::new();
        let store = RedisFlagStore::new(Arc::new(client.clone()), KEY);

        store
            .write_flags(&[FlagDefinition::new("darkMode")])
            .await
            .unwrap();

        let calls = client.get_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].op, "set");
        assert_eq!(calls[0].key, KEY);
    }

    #[tokio::test]
    async fn test_write_flags_surfaces_redis_failure() {
        let mut client = MockRedisClient::new();
        client.set_ret(KEY, Err(CustomRedisError::Other("read only replica".to_string())));
        let store = RedisFlagStore::new(Arc::new(client.clone()), KEY);

        let result = store.write_flags(&[FlagDefinition::new("darkMode")]).await;

        assert!(matches!(result, Err(FlagError::RedisUnavailable)));
        assert_eq!(client.get_calls()[0].op, "set");
    }

    #[tokio::test]
    async fn test_write_flags_surfaces_redis_timeout() {
        let mut client = MockRedisClient::new();
        client.set_ret(KEY, Err(CustomRedisError::Timeout));
        let store = RedisFlagStore::new(Arc::new(client), KEY);

        assert!(matches!(
            store.write_flags(&[]).await,
            Err(FlagError::TimeoutError)
        ));
    }

    #[tokio::test]
    async fn test_in_memory_upsert_and_remove() {
        let store = InMemoryFlagStore::default();
        store.upsert(FlagDefinition::new("a"));
        store.upsert(FlagDefinition::new("b"));
        store.upsert(FlagDefinition::new("a").enabled(100));

        let flags = store.list_flags().await.unwrap();
        assert_eq!(flags.len(), 2);
        assert!(flags.iter().any(|f| f.key == "a" && f.enabled_globally));

        assert!(store.remove("b"));
        assert!(!store.remove("b"));
        assert_eq!(store.list_flags().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_flags_within_times_out() {
        let store = SlowFlagStore::new(Duration::from_secs(5), vec![]);

        let result = list_flags_within(&store, Duration::from_millis(100), None).await;
        assert!(matches!(result, Err(FlagError::TimeoutError)));
    }

    #[tokio::test]
    async fn test_list_flags_within_passes_store_errors_through() {
        let result = list_flags_within(&FailingFlagStore, Duration::from_millis(100), None).await;
        assert!(matches!(result, Err(FlagError::StoreUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_flags_within_honors_cancellation() {
        let store = SlowFlagStore::new(Duration::from_secs(5), vec![]);
        let token = CancellationToken::new();
        token.cancel();

        let result = list_flags_within(&store, Duration::from_secs(10), Some(&token)).await;
        assert!(matches!(result, Err(FlagError::Cancelled)));
    }
}
