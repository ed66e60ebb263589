use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(from = "FLAG_DEFINITIONS_KEY", default = "feature_flags:definitions")]
    pub flag_definitions_key: String,

    // flag reads favor a fast fallback over a slow fresh answer
    #[envconfig(from = "STORE_TIMEOUT_MS", default = "100")]
    pub store_timeout_ms: u64,

    #[envconfig(from = "CACHE_TTL_SECONDS", default = "30")]
    pub cache_ttl_seconds: u64,

    #[envconfig(from = "CACHE_MAX_ENTRIES", default = "10000")]
    pub cache_max_entries: u64,

    #[envconfig(from = "SNAPSHOT_MAX_AGE_SECONDS", default = "30")]
    pub snapshot_max_age_seconds: u64,

    #[envconfig(from = "ADMIN_CATEGORY", default = "admin")]
    pub admin_category: String,

    #[envconfig(from = "ADMIN_ROLE", default = "admin")]
    pub admin_role: String,

    #[envconfig(from = "FALLBACK_FLAGS_PATH", default = "")]
    pub fallback_flags_path: String,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            redis_url: "redis://localhost:6379/".to_string(),
            flag_definitions_key: "feature_flags:definitions".to_string(),
            store_timeout_ms: 100,
            cache_ttl_seconds: 30,
            cache_max_entries: 1_000,
            snapshot_max_age_seconds: 30,
            admin_category: "admin".to_string(),
            admin_role: "admin".to_string(),
            fallback_flags_path: "".to_string(),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn snapshot_max_age(&self) -> Duration {
        Duration::from_secs(self.snapshot_max_age_seconds)
    }

    pub fn fallback_flags_path(&self) -> Option<&str> {
        if self.fallback_flags_path.is_empty() {
            None
        } else {
            Some(&self.fallback_flags_path)
        }
    }
}
