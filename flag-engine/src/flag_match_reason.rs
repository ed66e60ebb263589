use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagMatchReason {
    FlagDisabled,
    FullRollout,
    AudienceMismatch,
    ZeroRollout,
    InRollout,
    OutOfRolloutBound,
    RoleOverride,
    InvalidDefinition,
}

impl FlagMatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagMatchReason::FlagDisabled => "flag_disabled",
            FlagMatchReason::FullRollout => "full_rollout",
            FlagMatchReason::AudienceMismatch => "audience_mismatch",
            FlagMatchReason::ZeroRollout => "zero_rollout",
            FlagMatchReason::InRollout => "in_rollout",
            FlagMatchReason::OutOfRolloutBound => "out_of_rollout_bound",
            FlagMatchReason::RoleOverride => "role_override",
            FlagMatchReason::InvalidDefinition => "invalid_definition",
        }
    }
}

impl std::fmt::Display for FlagMatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
