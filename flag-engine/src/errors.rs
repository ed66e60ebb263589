use thiserror::Error;

use crate::redis::CustomRedisError;

#[derive(Error, Debug, Clone)]
pub enum FlagError {
    #[error("flag store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("redis unavailable")]
    RedisUnavailable,
    #[error("Timed out while fetching flag definitions")]
    TimeoutError,
    #[error("flag resolution cancelled by caller")]
    Cancelled,
    #[error("Failed to parse data")]
    DataParsingError,
    #[error("failed to encode transport snapshot: {0}")]
    SnapshotEncodingError(String),
    #[error("failed to decode transport snapshot: {0}")]
    SnapshotDecodingError(String),
    #[error("invalid static fallback: {0}")]
    InvalidFallback(String),
    #[error("resolve called with no requested flag keys")]
    EmptyRequestedKeys,
    #[error("variant assignment called with no variants")]
    EmptyVariants,
}

impl FlagError {
    /// Caller mistakes, as opposed to runtime conditions the resolver recovers from.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, FlagError::EmptyRequestedKeys | FlagError::EmptyVariants)
    }

    /// Short label for metrics and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            FlagError::StoreUnavailable(_) => "store_unavailable",
            FlagError::RedisUnavailable => "redis_unavailable",
            FlagError::TimeoutError => "timeout",
            FlagError::Cancelled => "cancelled",
            FlagError::DataParsingError => "data_parsing_error",
            FlagError::SnapshotEncodingError(_) => "snapshot_encoding_error",
            FlagError::SnapshotDecodingError(_) => "snapshot_decoding_error",
            FlagError::InvalidFallback(_) => "invalid_fallback",
            FlagError::EmptyRequestedKeys => "empty_requested_keys",
            FlagError::EmptyVariants => "empty_variants",
        }
    }
}

impl From<CustomRedisError> for FlagError {
    fn from(e: CustomRedisError) -> Self {
        match e {
            CustomRedisError::Timeout => FlagError::TimeoutError,
            CustomRedisError::ParseError(_) => FlagError::DataParsingError,
            CustomRedisError::NotFound | CustomRedisError::Other(_) => FlagError::RedisUnavailable,
        }
    }
}
