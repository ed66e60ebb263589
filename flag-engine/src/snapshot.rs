use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FlagError;
use crate::flag_definitions::EvaluatedFlagSet;

// upstream tiers run on other hosts, tolerate a little clock drift
const MAX_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// An evaluated flag set handed between tiers (edge, server render, client hydration).
///
/// Encoded as compact JSON, `{"at":<unix millis>,"flags":{"key":bool,...}}`, with
/// keys sorted so the same flags always encode to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransportSnapshot {
    #[serde(rename = "at", with = "chrono::serde::ts_milliseconds")]
    pub evaluated_at: DateTime<Utc>,
    pub flags: EvaluatedFlagSet,
}

impl TransportSnapshot {
    pub fn new(flags: EvaluatedFlagSet) -> Self {
        Self {
            evaluated_at: Utc::now(),
            flags,
        }
    }

    pub fn encode(&self) -> Result<String, FlagError> {
        serde_json::to_string(self)
            .map_err(|e| FlagError::SnapshotEncodingError(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, FlagError> {
        serde_json::from_str(raw)
            .map_err(|e| FlagError::SnapshotDecodingError(e.to_string()))
    }

    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.evaluated_at);
        match age.to_std() {
            Ok(age) => age <= max_age,
            // evaluated "in the future": only accept small skew
            Err(_) => (-age).to_std().is_ok_and(|ahead| ahead <= MAX_CLOCK_SKEW),
        }
    }

    /// Usable for a request when fresh and holding every requested key.
    pub fn covers<S: AsRef<str>>(&self, keys: &[S], max_age: Duration, now: DateTime<Utc>) -> bool {
        self.is_fresh(max_age, now) && self.flags.contains_all(keys)
    }
}
