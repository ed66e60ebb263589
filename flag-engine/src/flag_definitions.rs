use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evaluation_context::EvaluationContext;

/// Extra gate attached to a flag, or to every flag of a category.
///
/// Rules can only switch an otherwise enabled flag off, never on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverrideRule {
    RequireRole { role: String },
    RequireAnyRole { roles: Vec<String> },
    DenyRole { role: String },
}

impl OverrideRule {
    pub fn permits(&self, context: &EvaluationContext) -> bool {
        let role = context.role.as_deref();
        match self {
            OverrideRule::RequireRole { role: required } => role == Some(required.as_str()),
            OverrideRule::RequireAnyRole { roles } => {
                role.is_some_and(|role| roles.iter().any(|r| r == role))
            }
            OverrideRule::DenyRole { role: denied } => role != Some(denied.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDefinition {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled_globally: bool,
    // kept signed so out of range values written by other tools can be read and clamped
    #[serde(default)]
    pub rollout_percentage: i32,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub target_audience: Vec<String>,
    #[serde(default)]
    pub overrides: Vec<OverrideRule>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl FlagDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            description: String::new(),
            enabled_globally: false,
            rollout_percentage: 0,
            category: String::new(),
            target_audience: Vec::new(),
            overrides: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn enabled(mut self, rollout_percentage: i32) -> Self {
        self.enabled_globally = true;
        self.rollout_percentage = rollout_percentage;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_audience<I, S>(mut self, audience: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_audience = audience.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_override(mut self, rule: OverrideRule) -> Self {
        self.overrides.push(rule);
        self
    }

    /// Rollout percentage clamped to `[0, 100]`.
    pub fn clamped_rollout(&self) -> u8 {
        self.rollout_percentage.clamp(0, 100) as u8
    }

    pub fn has_valid_rollout(&self) -> bool {
        (0..=100).contains(&self.rollout_percentage)
    }
}

/// Materialized `flag key -> enabled` map for one context.
///
/// Backed by a `BTreeMap` so serialization never depends on insertion or hashing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct EvaluatedFlagSet(BTreeMap<String, bool>);

impl EvaluatedFlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, enabled: bool) {
        self.0.insert(key.into(), enabled);
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.0.get(key).copied()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn contains_all<S: AsRef<str>>(&self, keys: &[S]) -> bool {
        keys.iter().all(|key| self.contains_key(key.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &bool)> {
        self.0.iter()
    }
}

impl FromIterator<(String, bool)> for EvaluatedFlagSet {
    fn from_iter<T: IntoIterator<Item = (String, bool)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, bool>> for EvaluatedFlagSet {
    fn from(map: BTreeMap<String, bool>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_deserializes_from_store_json() {
        let raw = json!({
            "key": "darkMode",
            "name": "Dark mode",
            "description": "Dark theme for the storefront",
            "enabledGlobally": true,
            "rolloutPercentage": 50,
            "category": "ui",
            "targetAudience": ["US", "CA"],
            "overrides": [{"type": "require_role", "role": "admin"}],
            "updatedAt": "2026-01-02T03:04:05Z"
        });

        let flag: FlagDefinition = serde_json::from_value(raw).unwrap();
        assert_eq!(flag.key, "darkMode");
        assert!(flag.enabled_globally);
        assert_eq!(flag.rollout_percentage, 50);
        assert_eq!(flag.target_audience, vec!["US", "CA"]);
        assert_eq!(
            flag.overrides,
            vec![OverrideRule::RequireRole {
                role: "admin".to_string()
            }]
        );
        assert_eq!(flag.updated_at.to_rfc3339(), "2026-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_definition_defaults_missing_fields() {
        let flag: FlagDefinition = serde_json::from_value(json!({"key": "bare"})).unwrap();
        assert!(!flag.enabled_globally);
        assert_eq!(flag.rollout_percentage, 0);
        assert!(flag.target_audience.is_empty());
        assert!(flag.overrides.is_empty());
    }

    #[test]
    fn test_clamped_rollout() {
        assert_eq!(FlagDefinition::new("a").enabled(-20).clamped_rollout(), 0);
        assert_eq!(FlagDefinition::new("a").enabled(250).clamped_rollout(), 100);
        assert_eq!(FlagDefinition::new("a").enabled(42).clamped_rollout(), 42);
        assert!(!FlagDefinition::new("a").enabled(101).has_valid_rollout());
    }

    #[test]
    fn test_override_rules() {
        let admin = EvaluationContext::new().with_role("admin");
        let user = EvaluationContext::new().with_role("user");
        let nobody = EvaluationContext::new();

        let require = OverrideRule::RequireRole {
            role: "admin".to_string(),
        };
        assert!(require.permits(&admin));
        assert!(!require.permits(&user));
        assert!(!require.permits(&nobody));

        let any = OverrideRule::RequireAnyRole {
            roles: vec!["admin".to_string(), "staff".to_string()],
        };
        assert!(any.permits(&admin));
        assert!(!any.permits(&user));

        let deny = OverrideRule::DenyRole {
            role: "user".to_string(),
        };
        assert!(deny.permits(&admin));
        assert!(!deny.permits(&user));
        assert!(deny.permits(&nobody));
    }

    #[test]
    fn test_evaluated_set_serializes_sorted() {
        let mut set = EvaluatedFlagSet::new();
        set.insert("zeta", true);
        set.insert("alpha", false);

        assert_eq!(
            serde_json::to_string(&set).unwrap(),
            r#"{"alpha":false,"zeta":true}"#
        );
        assert!(set.contains_all(&["alpha", "zeta"]));
        assert!(!set.contains_all(&["alpha", "missing"]));
    }
}
