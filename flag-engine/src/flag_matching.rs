use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use crate::evaluation_context::EvaluationContext;
use crate::flag_definitions::{EvaluatedFlagSet, FlagDefinition, OverrideRule};
use crate::flag_match_reason::FlagMatchReason;
use crate::hash_bucketer::bucket_for;

pub const ADMIN_CATEGORY: &str = "admin";
pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlagEvaluation {
    pub enabled: bool,
    pub reason: FlagMatchReason,
}

impl FlagEvaluation {
    fn enabled(reason: FlagMatchReason) -> Self {
        Self {
            enabled: true,
            reason,
        }
    }

    fn disabled(reason: FlagMatchReason) -> Self {
        Self {
            enabled: false,
            reason,
        }
    }
}

/// Applies targeting rules for one flag against one context.
///
/// Holds only immutable configuration (the override rules per category), so a
/// single instance can be shared by every caller without locking.
#[derive(Debug, Clone)]
pub struct Evaluator {
    category_rules: HashMap<String, Vec<OverrideRule>>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new().with_category_rule(
            ADMIN_CATEGORY,
            OverrideRule::RequireRole {
                role: ADMIN_ROLE.to_string(),
            },
        )
    }
}

impl Evaluator {
    /// An evaluator with no category rules.
    pub fn new() -> Self {
        Self {
            category_rules: HashMap::new(),
        }
    }

    pub fn with_category_rule(mut self, category: impl Into<String>, rule: OverrideRule) -> Self {
        self.category_rules
            .entry(category.into())
            .or_default()
            .push(rule);
        self
    }

    pub fn evaluate(&self, flag: &FlagDefinition, context: &EvaluationContext) -> bool {
        self.evaluate_with_reason(flag, context).enabled
    }

    pub fn evaluate_with_reason(
        &self,
        flag: &FlagDefinition,
        context: &EvaluationContext,
    ) -> FlagEvaluation {
        let evaluation = self.match_rollout(flag, context);
        if !evaluation.enabled {
            return evaluation;
        }

        // overrides can only take an enabled flag away
        if self.rules_for(flag).any(|rule| !rule.permits(context)) {
            return FlagEvaluation::disabled(FlagMatchReason::RoleOverride);
        }

        evaluation
    }

    /// Evaluates every definition, skipping the ones without a usable key.
    pub fn evaluate_all(
        &self,
        flags: &[FlagDefinition],
        context: &EvaluationContext,
    ) -> EvaluatedFlagSet {
        let mut evaluated = EvaluatedFlagSet::new();
        for flag in flags {
            if flag.key.trim().is_empty() {
                warn!(
                    reason = %FlagMatchReason::InvalidDefinition,
                    name = flag.name.as_str(),
                    "skipping flag definition without a key"
                );
                continue;
            }
            evaluated.insert(flag.key.clone(), self.evaluate(flag, context));
        }
        evaluated
    }

    fn rules_for<'a>(&'a self, flag: &'a FlagDefinition) -> impl Iterator<Item = &'a OverrideRule> {
        self.category_rules
            .get(&flag.category)
            .into_iter()
            .flatten()
            .chain(flag.overrides.iter())
    }

    fn match_rollout(&self, flag: &FlagDefinition, context: &EvaluationContext) -> FlagEvaluation {
        if !flag.enabled_globally {
            return FlagEvaluation::disabled(FlagMatchReason::FlagDisabled);
        }

        if !flag.has_valid_rollout() {
            warn!(
                flag_key = flag.key.as_str(),
                rollout_percentage = flag.rollout_percentage,
                "rollout percentage out of range, clamping to [0, 100]"
            );
        }
        let rollout_percentage = flag.clamped_rollout();

        if rollout_percentage >= 100 && flag.target_audience.is_empty() {
            return FlagEvaluation::enabled(FlagMatchReason::FullRollout);
        }

        // the audience gate is a hard filter, checked before rollout
        if !flag.target_audience.is_empty() && !in_audience(flag, context) {
            return FlagEvaluation::disabled(FlagMatchReason::AudienceMismatch);
        }

        if rollout_percentage == 0 {
            return FlagEvaluation::disabled(FlagMatchReason::ZeroRollout);
        }

        if bucket_for(context.subject_id.as_deref(), &flag.key) < rollout_percentage {
            FlagEvaluation::enabled(FlagMatchReason::InRollout)
        } else {
            FlagEvaluation::disabled(FlagMatchReason::OutOfRolloutBound)
        }
    }
}

fn in_audience(flag: &FlagDefinition, context: &EvaluationContext) -> bool {
    match context.country.as_deref() {
        Some(country) => flag
            .target_audience
            .iter()
            .any(|code| code.eq_ignore_ascii_case(country)),
        None => false,
    }
}
