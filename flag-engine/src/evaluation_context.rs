use serde::{Deserialize, Serialize};

/// Per-call input to flag evaluation. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub experiment: Option<String>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_experiment(mut self, experiment: impl Into<String>) -> Self {
        self.experiment = Some(experiment.into());
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.subject_id.is_none()
    }

    /// Key under which this context's evaluated flags are cached.
    ///
    /// Built only from the fields evaluation reads. `None` for anonymous contexts:
    /// their rollout buckets are random per call, so a cached answer would pin one draw.
    ///
    /// The subject is part of the key, so the number of distinct keys grows with the
    /// number of distinct subjects. The result cache bounds it at `CACHE_MAX_ENTRIES`.
    pub fn cache_key(&self) -> Option<String> {
        let subject_id = self.subject_id.as_deref()?;
        Some(format!(
            "role={}|country={}|subject={}",
            self.role.as_deref().unwrap_or(""),
            self.country
                .as_deref()
                .map(str::to_ascii_uppercase)
                .unwrap_or_default(),
            subject_id
        ))
    }
}
