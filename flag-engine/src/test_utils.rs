use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};

use crate::errors::FlagError;
use crate::flag_definitions::FlagDefinition;
use crate::flag_store::{FlagStore, InMemoryFlagStore};

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Store that is always down.
pub struct FailingFlagStore;

#[async_trait]
impl FlagStore for FailingFlagStore {
    async fn list_flags(&self) -> Result<Vec<FlagDefinition>, FlagError> {
        Err(FlagError::StoreUnavailable("connection refused".to_string()))
    }
}

/// Store that answers only after `delay`.
pub struct SlowFlagStore {
    delay: Duration,
    flags: Vec<FlagDefinition>,
}

impl SlowFlagStore {
    pub fn new(delay: Duration, flags: Vec<FlagDefinition>) -> Self {
        Self { delay, flags }
    }
}

#[async_trait]
impl FlagStore for SlowFlagStore {
    async fn list_flags(&self) -> Result<Vec<FlagDefinition>, FlagError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.flags.clone())
    }
}

/// In-memory store that counts reads and can be switched into an outage.
pub struct CountingFlagStore {
    inner: InMemoryFlagStore,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Duration,
}

impl CountingFlagStore {
    pub fn new(flags: Vec<FlagDefinition>) -> Arc<Self> {
        Self::with_delay(Duration::ZERO, flags)
    }

    /// Counting store whose reads each take `delay`.
    pub fn with_delay(delay: Duration, flags: Vec<FlagDefinition>) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryFlagStore::new(flags),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn upsert(&self, flag: FlagDefinition) {
        self.inner.upsert(flag);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl FlagStore for CountingFlagStore {
    async fn list_flags(&self) -> Result<Vec<FlagDefinition>, FlagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FlagError::StoreUnavailable("store is down".to_string()));
        }
        self.inner.list_flags().await
    }
}
