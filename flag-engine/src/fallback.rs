use std::path::Path;

use serde::Deserialize;

use crate::errors::FlagError;
use crate::flag_definitions::EvaluatedFlagSet;

pub const BUILTIN_FALLBACK_VERSION: &str = "builtin-1";

/// Last-resort answers used when the store cannot be reached.
///
/// Shipped as a versioned JSON document next to the flag definitions:
/// `{"version": "2026-10-01", "flags": {"darkMode": false}}`.
/// Keys it does not mention resolve to `false`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticFallback {
    pub version: String,
    #[serde(default)]
    pub flags: EvaluatedFlagSet,
}

impl Default for StaticFallback {
    fn default() -> Self {
        Self {
            version: BUILTIN_FALLBACK_VERSION.to_string(),
            flags: EvaluatedFlagSet::new(),
        }
    }
}

impl StaticFallback {
    pub fn new(version: impl Into<String>, flags: EvaluatedFlagSet) -> Self {
        Self {
            version: version.into(),
            flags,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, FlagError> {
        serde_json::from_str(raw).map_err(|e| FlagError::InvalidFallback(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlagError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FlagError::InvalidFallback(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn default_for(&self, key: &str) -> bool {
        self.flags.get(key).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fallback_document() {
        let fallback = StaticFallback::from_json(
            r#"{"version": "2026-10-01", "flags": {"checkout": true, "darkMode": false}}"#,
        )
        .unwrap();

        assert_eq!(fallback.version, "2026-10-01");
        assert!(fallback.default_for("checkout"));
        assert!(!fallback.default_for("darkMode"));
        assert!(!fallback.default_for("unknown"));
    }

    #[test]
    fn test_builtin_fallback_is_all_off() {
        let fallback = StaticFallback::default();
        assert_eq!(fallback.version, BUILTIN_FALLBACK_VERSION);
        assert!(!fallback.default_for("anything"));
    }

    #[test]
    fn test_invalid_fallback_document() {
        assert!(matches!(
            StaticFallback::from_json("{\"flags\": []}"),
            Err(FlagError::InvalidFallback(_))
        ));
        assert!(matches!(
            StaticFallback::from_file("/definitely/not/here.json"),
            Err(FlagError::InvalidFallback(_))
        ));
    }
}
