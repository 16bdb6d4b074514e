use serde::{Deserialize, Serialize};

use crate::services::ability::{probability_correct, AbilityEstimate, ItemParams, THETA_MAX, THETA_MIN};
use crate::services::topic_performance::TopicPerformance;

const SCALE_CENTER: f64 = 550.0;
const SCALE_SLOPE: f64 = 130.0;
const SCALE_MIN: f64 = 100.0;
const SCALE_MAX: f64 = 900.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ConfidenceLevel {
    Ninety,
    #[default]
    NinetyFive,
    NinetyNine,
}

impl ConfidenceLevel {
    pub fn z(&self) -> f64 {
        match self {
            Self::Ninety => 1.645,
            Self::NinetyFive => 1.96,
            Self::NinetyNine => 2.576,
        }
    }

    pub fn percent(&self) -> u8 {
        match self {
            Self::Ninety => 90,
            Self::NinetyFive => 95,
            Self::NinetyNine => 99,
        }
    }

    pub fn from_percent(percent: u8) -> Option<Self> {
        match percent {
            90 => Some(Self::Ninety),
            95 => Some(Self::NinetyFive),
            99 => Some(Self::NinetyNine),
            _ => None,
        }
    }
}

impl From<ConfidenceLevel> for u8 {
    fn from(level: ConfidenceLevel) -> Self {
        level.percent()
    }
}

impl TryFrom<u8> for ConfidenceLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_percent(value).ok_or_else(|| format!("unsupported confidence level {value}"))
    }
}

pub fn fisher_information<I>(theta: f64, items: I) -> f64
where
    I: IntoIterator<Item = ItemParams>,
{
    items
        .into_iter()
        .map(|item| {
            let p = probability_correct(theta, item);
            item.discrimination * item.discrimination * p * (1.0 - p)
        })
        .sum()
}

/// 1 / √I(θ); infinite when the items carry no information.
pub fn standard_error<I>(theta: f64, items: I) -> f64
where
    I: IntoIterator<Item = ItemParams>,
{
    let information = fisher_information(theta, items);
    if information.is_finite() && information > 0.0 {
        1.0 / information.sqrt()
    } else {
        f64::INFINITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThetaInterval {
    pub lower: f64,
    pub upper: f64,
    pub level: ConfidenceLevel,
}

pub fn theta_interval(estimate: &AbilityEstimate, level: ConfidenceLevel) -> ThetaInterval {
    let margin = level.z() * estimate.standard_error;
    ThetaInterval {
        lower: (estimate.theta - margin).clamp(THETA_MIN, THETA_MAX),
        upper: (estimate.theta + margin).clamp(THETA_MIN, THETA_MAX),
        level,
    }
}

/// Bounded proportion interval, expressed in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WilsonInterval {
    pub proportion: f64,
    pub lower: f64,
    pub upper: f64,
}

pub fn wilson_interval(successes: u32, total: u32, level: ConfidenceLevel) -> WilsonInterval {
    if total == 0 {
        return WilsonInterval {
            proportion: 0.0,
            lower: 0.0,
            upper: 0.0,
        };
    }

    let n = total as f64;
    let p_hat = successes.min(total) as f64 / n;
    let z = level.z();
    let z2 = z * z;

    let denominator = 1.0 + z2 / n;
    let center = (p_hat + z2 / (2.0 * n)) / denominator;
    let margin = (z / denominator) * (p_hat * (1.0 - p_hat) / n + z2 / (4.0 * n * n)).sqrt();

    // rounding can push a bound a hair past p̂ at the extremes
    let lower = (center - margin).clamp(0.0, 1.0).min(p_hat);
    let upper = (center + margin).clamp(0.0, 1.0).max(p_hat);

    WilsonInterval {
        proportion: p_hat * 100.0,
        lower: lower * 100.0,
        upper: upper * 100.0,
    }
}

pub fn topic_accuracy_interval(performance: &TopicPerformance, level: ConfidenceLevel) -> WilsonInterval {
    wilson_interval(
        performance.correct_answers,
        performance.questions_answered,
        level,
    )
}

/// Maps θ onto the public 100–900 scale.
pub fn public_score(theta: f64) -> i32 {
    if theta.is_nan() {
        return SCALE_CENTER as i32;
    }
    (SCALE_CENTER + theta * SCALE_SLOPE)
        .round()
        .clamp(SCALE_MIN, SCALE_MAX) as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreInterval {
    pub lower: i32,
    pub upper: i32,
}

pub fn score_interval(interval: &ThetaInterval) -> ScoreInterval {
    ScoreInterval {
        lower: public_score(interval.lower),
        upper: public_score(interval.upper),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QuestionCategory;

    #[test]
    fn test_z_lookup() {
        assert_eq!(ConfidenceLevel::Ninety.z(), 1.645);
        assert_eq!(ConfidenceLevel::default().z(), 1.96);
        assert_eq!(ConfidenceLevel::NinetyNine.z(), 2.576);
        assert_eq!(ConfidenceLevel::from_percent(80), None);
    }

    #[test]
    fn test_well_targeted_items_shrink_error_fastest() {
        let easy = QuestionCategory::SingleTopic.item_params();
        let hard = QuestionCategory::CrossDomain.item_params();
        let near_hard = standard_error(2.2, vec![hard; 10]);
        let near_easy = standard_error(2.2, vec![easy; 10]);
        assert!(near_hard < near_easy);
        assert!(standard_error(0.0, Vec::new()).is_infinite());
    }

    #[test]
    fn test_theta_interval_is_clamped() {
        let unknown = AbilityEstimate::unknown();
        let interval = theta_interval(&unknown, ConfidenceLevel::NinetyFive);
        assert_eq!(interval.lower, THETA_MIN);
        assert_eq!(interval.upper, THETA_MAX);

        let estimate = AbilityEstimate {
            theta: 1.0,
            standard_error: 0.5,
            iterations: 4,
            attempt_count: 30,
        };
        let interval = theta_interval(&estimate, ConfidenceLevel::NinetyFive);
        assert!((interval.lower - 0.02).abs() < 1e-9);
        assert!((interval.upper - 1.98).abs() < 1e-9);
    }

    #[test]
    fn test_wilson_zero_total() {
        let interval = wilson_interval(0, 0, ConfidenceLevel::NinetyFive);
        assert_eq!((interval.lower, interval.upper), (0.0, 0.0));
    }

    #[test]
    fn test_wilson_extremes_stay_bounded() {
        let none = wilson_interval(0, 5, ConfidenceLevel::NinetyFive);
        assert_eq!(none.lower, 0.0);
        assert!(none.upper > 0.0 && none.upper <= 100.0);

        let all = wilson_interval(5, 5, ConfidenceLevel::NinetyFive);
        assert_eq!(all.upper, 100.0);
        assert!(all.lower < 100.0 && all.lower > 0.0);
    }

    #[test]
    fn test_wilson_known_value() {
        // 8/10 at 95%: roughly [49.0, 94.3]
        let interval = wilson_interval(8, 10, ConfidenceLevel::NinetyFive);
        assert!((interval.proportion - 80.0).abs() < 1e-9);
        assert!((interval.lower - 49.0).abs() < 0.1);
        assert!((interval.upper - 94.3).abs() < 0.1);
    }

    #[test]
    fn test_public_score() {
        assert_eq!(public_score(0.0), 550);
        assert_eq!(public_score(1.0), 680);
        assert_eq!(public_score(3.0), 900);
        assert_eq!(public_score(-3.0), 160);
        assert_eq!(public_score(-10.0), 100);
    }
}
