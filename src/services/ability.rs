//! 2PL ability estimation.
//!
//! P(correct | θ) = 1 / (1 + e^(-a(θ - b))). Item parameters are fixed per
//! question category and never fit from data. θ is found by Newton–Raphson
//! maximum likelihood over fractional outcomes (earned / max points).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::AbilityConfig;
use crate::services::confidence::standard_error;
use crate::types::{Curriculum, GradedAttempt, QuestionCategory};

pub const THETA_MIN: f64 = -3.0;
pub const THETA_MAX: f64 = 3.0;
const EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemParams {
    /// b
    pub difficulty: f64,
    /// a
    pub discrimination: f64,
}

impl QuestionCategory {
    pub fn item_params(&self) -> ItemParams {
        let (difficulty, discrimination) = match self {
            Self::SingleTopic => (-1.0, 1.0),
            Self::SingleDomain => (0.3, 1.8),
            Self::CrossDomain => (2.2, 2.5),
        };
        ItemParams {
            difficulty,
            discrimination,
        }
    }
}

/// Category of a question from how many topics and domains it spans.
/// Topics missing from the curriculum do not count towards domains.
pub fn classify_category(topics: &[String], curriculum: &Curriculum) -> QuestionCategory {
    let distinct: BTreeSet<&str> = topics.iter().map(String::as_str).collect();
    if distinct.len() <= 1 {
        return QuestionCategory::SingleTopic;
    }
    let domains: BTreeSet<&str> = distinct
        .iter()
        .filter_map(|t| curriculum.domain_of(t))
        .collect();
    if domains.len() <= 1 {
        QuestionCategory::SingleDomain
    } else {
        QuestionCategory::CrossDomain
    }
}

pub fn probability_correct(theta: f64, item: ItemParams) -> f64 {
    1.0 / (1.0 + (-item.discrimination * (theta - item.difficulty)).exp())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityEstimate {
    pub theta: f64,
    /// `f64::INFINITY` when the attempts carry no information.
    pub standard_error: f64,
    pub iterations: u32,
    pub attempt_count: usize,
}

impl AbilityEstimate {
    pub fn unknown() -> Self {
        Self {
            theta: 0.0,
            standard_error: f64::INFINITY,
            iterations: 0,
            attempt_count: 0,
        }
    }

    pub fn has_information(&self) -> bool {
        self.standard_error.is_finite()
    }
}

/// Usable (item, observed score) pairs; attempts with broken item
/// parameters are dropped.
pub fn observations(attempts: &[GradedAttempt]) -> Vec<(ItemParams, f64)> {
    attempts
        .iter()
        .filter_map(|attempt| {
            if !attempt.has_valid_item_params() {
                tracing::warn!(
                    question = ?attempt.question_id,
                    difficulty = attempt.difficulty,
                    discrimination = attempt.discrimination,
                    "attempt with invalid item parameters ignored"
                );
                return None;
            }
            Some((
                ItemParams {
                    difficulty: attempt.difficulty,
                    discrimination: attempt.discrimination,
                },
                attempt.observed_score(),
            ))
        })
        .collect()
}

pub fn estimate_ability(attempts: &[GradedAttempt], config: &AbilityConfig) -> AbilityEstimate {
    let observations = observations(attempts);
    if observations.is_empty() {
        return AbilityEstimate::unknown();
    }

    let mut theta = 0.0_f64;
    let mut iterations = 0;

    for _ in 0..config.max_iterations {
        iterations += 1;

        let (first_deriv, second_deriv) =
            observations
                .iter()
                .fold((0.0, 0.0), |(first, second), (item, y)| {
                    let p = probability_correct(theta, *item);
                    let a = item.discrimination;
                    (first + a * (y - p), second - a * a * p * (1.0 - p))
                });

        if second_deriv.abs() < EPSILON {
            break;
        }

        let update = first_deriv / second_deriv.abs();
        theta = (theta + update).clamp(THETA_MIN, THETA_MAX);

        if update.abs() < config.convergence_threshold {
            break;
        }
    }

    if observations.len() < config.min_reliable_attempts {
        let bound = config.sparse_theta_bound.abs().min(THETA_MAX);
        theta = theta.clamp(-bound, bound);
    }

    AbilityEstimate {
        theta,
        standard_error: standard_error(theta, observations.iter().map(|(item, _)| *item)),
        iterations,
        attempt_count: observations.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(category: QuestionCategory, correct: bool) -> GradedAttempt {
        let item = category.item_params();
        GradedAttempt {
            question_id: None,
            topics: vec!["t".into()],
            is_correct: correct,
            points_earned: u32::from(correct),
            max_points: Some(1),
            difficulty: item.difficulty,
            discrimination: item.discrimination,
        }
    }

    #[test]
    fn test_probability_at_difficulty_is_half() {
        let item = QuestionCategory::SingleDomain.item_params();
        assert!((probability_correct(item.difficulty, item) - 0.5).abs() < 1e-12);
        assert!(probability_correct(3.0, item) > probability_correct(-3.0, item));
    }

    #[test]
    fn test_no_attempts_is_unknown() {
        let estimate = estimate_ability(&[], &AbilityConfig::default());
        assert_eq!(estimate.theta, 0.0);
        assert!(estimate.standard_error.is_infinite());
        assert!(!estimate.has_information());
    }

    #[test]
    fn test_sparse_all_correct_caps_at_two() {
        let attempts: Vec<_> = (0..5)
            .map(|_| attempt(QuestionCategory::CrossDomain, true))
            .collect();
        let estimate = estimate_ability(&attempts, &AbilityConfig::default());
        assert_eq!(estimate.theta, 2.0);
    }

    #[test]
    fn test_many_all_wrong_hits_floor() {
        let attempts: Vec<_> = (0..20)
            .map(|_| attempt(QuestionCategory::SingleTopic, false))
            .collect();
        let estimate = estimate_ability(&attempts, &AbilityConfig::default());
        assert_eq!(estimate.theta, THETA_MIN);
    }

    #[test]
    fn test_mixed_results_converge_inside_range() {
        let mut attempts = Vec::new();
        for i in 0..30 {
            attempts.push(attempt(QuestionCategory::SingleTopic, i % 5 != 0));
            attempts.push(attempt(QuestionCategory::SingleDomain, i % 2 == 0));
        }
        let estimate = estimate_ability(&attempts, &AbilityConfig::default());
        assert!(estimate.theta > -3.0 && estimate.theta < 3.0);
        assert!(estimate.iterations < 20);
        assert!(estimate.has_information());
    }

    #[test]
    fn test_partial_credit_is_fractional_evidence() {
        let mut half = attempt(QuestionCategory::SingleDomain, false);
        half.points_earned = 2;
        half.max_points = Some(4);
        let attempts = vec![half; 20];
        let estimate = estimate_ability(&attempts, &AbilityConfig::default());
        // y = 0.5 everywhere, so the MLE sits at the item difficulty
        assert!((estimate.theta - 0.3).abs() < 0.05);
    }

    #[test]
    fn test_invalid_item_params_are_skipped() {
        let mut broken = attempt(QuestionCategory::SingleTopic, true);
        broken.discrimination = f64::NAN;
        let estimate = estimate_ability(&[broken], &AbilityConfig::default());
        assert_eq!(estimate.attempt_count, 0);
        assert!(estimate.standard_error.is_infinite());
    }

    #[test]
    fn test_classify_category() {
        let curriculum = Curriculum::new([("a", "d1"), ("b", "d1"), ("c", "d2")]);
        let topics = |ids: &[&str]| ids.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(classify_category(&topics(&["a"]), &curriculum), QuestionCategory::SingleTopic);
        assert_eq!(classify_category(&topics(&["a", "a"]), &curriculum), QuestionCategory::SingleTopic);
        assert_eq!(classify_category(&topics(&["a", "b"]), &curriculum), QuestionCategory::SingleDomain);
        assert_eq!(classify_category(&topics(&["a", "c"]), &curriculum), QuestionCategory::CrossDomain);
    }
}
