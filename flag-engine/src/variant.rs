use serde::{Deserialize, Serialize};

use crate::errors::FlagError;
use crate::evaluation_context::EvaluationContext;
use crate::hash_bucketer::bucket_for;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedVariant {
    pub key: String,
    pub rollout_percentage: u8,
}

/// Picks one of `variants` for the context's subject, spreading subjects evenly.
///
/// Identified subjects always land on the same variant for a given experiment;
/// anonymous contexts get a random one. A context whose `experiment` names one of
/// the candidates is forced onto it.
pub fn assign_variant<'a>(
    context: &EvaluationContext,
    experiment_key: &str,
    variants: &'a [String],
) -> Result<&'a str, FlagError> {
    if variants.is_empty() {
        return Err(FlagError::EmptyVariants);
    }

    if let Some(forced) = forced_variant(context, variants.iter().map(String::as_str)) {
        return Ok(forced);
    }

    let bucket = usize::from(bucket_for(context.subject_id.as_deref(), experiment_key));
    Ok(variants[bucket % variants.len()].as_str())
}

/// Picks a variant by cumulative rollout percentage.
///
/// Returns `None` when the subject's bucket falls past the last variant, i.e. the
/// percentages sum to less than 100 and the subject is held out.
pub fn assign_weighted_variant<'a>(
    context: &EvaluationContext,
    experiment_key: &str,
    variants: &'a [WeightedVariant],
) -> Result<Option<&'a str>, FlagError> {
    if variants.is_empty() {
        return Err(FlagError::EmptyVariants);
    }

    if let Some(forced) = forced_variant(context, variants.iter().map(|v| v.key.as_str())) {
        return Ok(Some(forced));
    }

    let bucket = u32::from(bucket_for(context.subject_id.as_deref(), experiment_key));
    let mut cumulative_percentage = 0u32;
    for variant in variants {
        cumulative_percentage += u32::from(variant.rollout_percentage);
        if bucket < cumulative_percentage {
            return Ok(Some(variant.key.as_str()));
        }
    }
    Ok(None)
}

fn forced_variant<'a>(
    context: &EvaluationContext,
    mut candidates: impl Iterator<Item = &'a str>,
) -> Option<&'a str> {
    let forced = context.experiment.as_deref()?;
    candidates.find(|candidate| *candidate == forced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn variants(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_assignment_is_deterministic() {
        let arms = variants(&["control", "test"]);
        // bucket("user-42", "pricing-test") is 72, 72 % 2 == 0
        let context = EvaluationContext::new().with_subject("user-42");

        for _ in 0..10 {
            assert_eq!(
                assign_variant(&context, "pricing-test", &arms).unwrap(),
                "control"
            );
        }

        // bucket("user-9", "pricing-test") is 61
        let context = EvaluationContext::new().with_subject("user-9");
        assert_eq!(
            assign_variant(&context, "pricing-test", &arms).unwrap(),
            "test"
        );
    }

    #[test]
    fn test_assignment_spreads_subjects() {
        let arms = variants(&["a", "b", "c"]);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for i in 0..3_000 {
            let context = EvaluationContext::new().with_subject(format!("user-{i}"));
            *counts
                .entry(assign_variant(&context, "spread", &arms).unwrap())
                .or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        for count in counts.values() {
            assert!(*count > 800, "{counts:?}");
        }
    }

    #[test]
    fn test_empty_variants_is_a_contract_violation() {
        let context = EvaluationContext::new().with_subject("user-1");

        let err = assign_variant(&context, "exp", &[]).unwrap_err();
        assert!(matches!(err, FlagError::EmptyVariants));
        assert!(err.is_contract_violation());

        assert!(matches!(
            assign_weighted_variant(&context, "exp", &[]),
            Err(FlagError::EmptyVariants)
        ));
    }

    #[test]
    fn test_forced_variant_from_context() {
        let arms = variants(&["control", "test"]);
        let context = EvaluationContext::new()
            .with_subject("user-42")
            .with_experiment("test");
        assert_eq!(assign_variant(&context, "pricing-test", &arms).unwrap(), "test");

        // unknown forced values are ignored
        let context = EvaluationContext::new()
            .with_subject("user-42")
            .with_experiment("nope");
        assert_eq!(
            assign_variant(&context, "pricing-test", &arms).unwrap(),
            "control"
        );
    }

    #[test]
    fn test_anonymous_assignment_returns_a_candidate() {
        let arms = variants(&["a", "b"]);
        let context = EvaluationContext::new();
        for _ in 0..100 {
            let assigned = assign_variant(&context, "exp", &arms).unwrap();
            assert!(arms.iter().any(|arm| arm == assigned));
        }
    }

    #[test]
    fn test_weighted_assignment() {
        let weighted = vec![
            WeightedVariant {
                key: "control".to_string(),
                rollout_percentage: 50,
            },
            WeightedVariant {
                key: "test".to_string(),
                rollout_percentage: 30,
            },
        ];

        // bucket 72: past control (50), inside test (80)
        let context = EvaluationContext::new().with_subject("user-42");
        assert_eq!(
            assign_weighted_variant(&context, "pricing-test", &weighted).unwrap(),
            Some("test")
        );

        // alice lands in bucket 23 for "beta"
        let context = EvaluationContext::new().with_subject("alice");
        assert_eq!(
            assign_weighted_variant(&context, "beta", &weighted).unwrap(),
            Some("control")
        );
    }

    #[test]
    fn test_weighted_assignment_holdout() {
        let weighted = vec![WeightedVariant {
            key: "only".to_string(),
            rollout_percentage: 60,
        }];

        // bucket 72 is outside the 60% covered by variants
        let context = EvaluationContext::new().with_subject("user-42");
        assert_eq!(
            assign_weighted_variant(&context, "pricing-test", &weighted).unwrap(),
            None
        );
    }
}
