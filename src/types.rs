use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::services::fsrs::FSRSParams;
use crate::services::topic_performance::{QuestionHistory, TopicCoverageStatus, TopicPerformance};

/// Max points assumed for an attempt whose own value is missing or zero.
pub const DEFAULT_MAX_POINTS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuestionCategory {
    SingleTopic,
    SingleDomain,
    CrossDomain,
}

/// Curriculum phase. Serialized as its number (1, 2, 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    #[default]
    Coverage,
    Remediation,
    Maintenance,
}

impl Phase {
    pub fn number(&self) -> u8 {
        match self {
            Self::Coverage => 1,
            Self::Remediation => 2,
            Self::Maintenance => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coverage => "coverage",
            Self::Remediation => "remediation",
            Self::Maintenance => "maintenance",
        }
    }

    /// The phase that follows this one; `Maintenance` is terminal.
    pub fn next(&self) -> Self {
        match self {
            Self::Coverage => Self::Remediation,
            _ => Self::Maintenance,
        }
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> Self {
        phase.number()
    }
}

impl TryFrom<u8> for Phase {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Coverage),
            2 => Ok(Self::Remediation),
            3 => Ok(Self::Maintenance),
            other => Err(format!("invalid phase {other}, expected 1, 2 or 3")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumTopic {
    pub id: String,
    pub domain_id: String,
}

/// The fixed universe of topics a learner is trained on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curriculum {
    pub topics: Vec<CurriculumTopic>,
}

impl Curriculum {
    pub fn new<I, T, D>(topics: I) -> Self
    where
        I: IntoIterator<Item = (T, D)>,
        T: Into<String>,
        D: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let mut list = Vec::new();
        for (id, domain_id) in topics {
            let id = id.into();
            if !seen.insert(id.clone()) {
                tracing::warn!(topic = %id, "duplicate curriculum topic ignored");
                continue;
            }
            list.push(CurriculumTopic {
                id,
                domain_id: domain_id.into(),
            });
        }
        Self { topics: list }
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn domain_of(&self, topic_id: &str) -> Option<&str> {
        self.topics
            .iter()
            .find(|t| t.id == topic_id)
            .map(|t| t.domain_id.as_str())
    }
}

/// A question as delivered by the content collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<QuestionCategory>,
    pub correct_options: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_points: Option<u32>,
}

/// One answered question. Immutable once graded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedAttempt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    pub topics: Vec<String>,
    pub is_correct: bool,
    pub points_earned: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_points: Option<u32>,
    pub difficulty: f64,
    pub discrimination: f64,
}

impl GradedAttempt {
    pub fn effective_max_points(&self) -> u32 {
        match self.max_points {
            Some(points) if points > 0 => points,
            _ => DEFAULT_MAX_POINTS,
        }
    }

    pub fn effective_points(&self) -> u32 {
        self.points_earned.min(self.effective_max_points())
    }

    /// Fractional outcome in [0, 1] fed to the response model.
    pub fn observed_score(&self) -> f64 {
        self.effective_points() as f64 / self.effective_max_points() as f64
    }

    pub fn has_valid_item_params(&self) -> bool {
        self.difficulty.is_finite() && self.discrimination.is_finite() && self.discrimination > 0.0
    }

    /// Topic ids in first-seen order without duplicates.
    pub fn distinct_topics(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.topics
            .iter()
            .map(String::as_str)
            .filter(|t| seen.insert(*t))
            .collect()
    }
}

/// One completed quiz as stored in the append-only history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizRecord {
    pub quiz_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: Vec<GradedAttempt>,
}

impl QuizRecord {
    pub fn new(attempts: Vec<GradedAttempt>) -> Self {
        Self {
            quiz_id: uuid::Uuid::new_v4().to_string(),
            completed_at: Some(Utc::now()),
            attempts,
        }
    }
}

/// Root per-learner aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub total_quizzes_completed: u32,
    pub current_phase: Phase,
    pub all_topics_covered_once: bool,
    pub topic_coverage: BTreeMap<String, TopicCoverageStatus>,
    pub topic_performance: BTreeMap<String, TopicPerformance>,
    #[serde(default)]
    pub question_history: BTreeMap<String, QuestionHistory>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_weights"
    )]
    pub scheduler_parameters: Option<Vec<f64>>,
}

/// Reads a weight vector that may carry `null` where a non-finite value was
/// once written; such a vector is discarded instead of failing the document.
fn lenient_weights<'de, D>(deserializer: D) -> Result<Option<Vec<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Option<f64>>> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|weights| {
        let weights: Option<Vec<f64>> = weights.into_iter().collect();
        if weights.is_none() {
            tracing::warn!("stored scheduler parameters contain nulls, discarded");
        }
        weights
    }))
}

impl ProgressState {
    /// Fresh state with an entry for every curriculum topic.
    pub fn new(curriculum: &Curriculum) -> Self {
        let mut state = Self {
            total_quizzes_completed: 0,
            current_phase: Phase::Coverage,
            all_topics_covered_once: false,
            topic_coverage: BTreeMap::new(),
            topic_performance: BTreeMap::new(),
            question_history: BTreeMap::new(),
            scheduler_parameters: None,
        };
        state.sync_curriculum(curriculum);
        state
    }

    /// Adds entries for curriculum topics the state does not know yet.
    /// Returns how many topics were added.
    pub fn sync_curriculum(&mut self, curriculum: &Curriculum) -> usize {
        let mut added = 0;
        for topic in &curriculum.topics {
            if self.topic_performance.contains_key(&topic.id) {
                continue;
            }
            self.topic_coverage.insert(
                topic.id.clone(),
                TopicCoverageStatus::new(&topic.id, &topic.domain_id),
            );
            self.topic_performance.insert(
                topic.id.clone(),
                TopicPerformance::new(&topic.id, &topic.domain_id),
            );
            added += 1;
        }
        if added > 0 && self.all_topics_covered_once {
            tracing::info!(added, "curriculum grew after full coverage");
        }
        added
    }

    pub fn with_scheduler_parameters(mut self, weights: Vec<f64>) -> Self {
        self.scheduler_parameters = Some(weights);
        self.sanitize_scheduler_parameters();
        self
    }

    /// Drops a weight vector the scheduler would refuse. Returns whether
    /// anything was dropped.
    pub fn sanitize_scheduler_parameters(&mut self) -> bool {
        let rejected = self
            .scheduler_parameters
            .as_deref()
            .is_some_and(|weights| FSRSParams::from_weights(weights).is_none());
        if rejected {
            tracing::warn!(
                len = self.scheduler_parameters.as_ref().map_or(0, Vec::len),
                "unusable scheduler parameters dropped"
            );
            self.scheduler_parameters = None;
        }
        rejected
    }

    pub fn knows_topic(&self, topic_id: &str) -> bool {
        self.topic_performance.contains_key(topic_id)
    }

    pub fn domain_of(&self, topic_id: &str) -> Option<&str> {
        self.topic_performance
            .get(topic_id)
            .map(|p| p.domain_id.as_str())
    }

    pub fn topic_count(&self) -> usize {
        self.topic_performance.len()
    }

    /// 1-based number of the quiz that will be taken next.
    pub fn next_quiz_index(&self) -> u32 {
        self.total_quizzes_completed.saturating_add(1)
    }

    pub fn mastered_count(&self) -> usize {
        self.topic_performance.values().filter(|p| p.is_mastered).count()
    }

    pub fn uncovered_count(&self) -> usize {
        self.topic_coverage
            .values()
            .filter(|c| c.times_covered == 0)
            .count()
    }
}
