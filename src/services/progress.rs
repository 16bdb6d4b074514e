//! Per-quiz pipeline: validate → track performance and coverage → phase.
//!
//! `recalculate_from_history` replays the same pipeline over a stored quiz
//! log, so a rebuild is byte-identical to recording those quizzes live.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::services::phase::{advance_phase, PhaseTransition};
use crate::services::quiz_schedule::QuizScheduler;
use crate::services::topic_performance::track_attempts;
use crate::types::{Curriculum, GradedAttempt, Phase, ProgressState, QuizRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuizError {
    #[error("quiz has no gradable attempts ({dropped} dropped)")]
    NoGradableAttempts { dropped: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSummary {
    pub quiz_index: u32,
    pub attempts_applied: usize,
    pub attempts_dropped: usize,
    pub unknown_topics: BTreeSet<String>,
    pub phase_before: Phase,
    pub phase_after: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<PhaseTransition>,
}

fn is_gradable(attempt: &GradedAttempt) -> bool {
    attempt.topics.iter().any(|t| !t.trim().is_empty())
}

/// Folds one completed quiz into `state`. On error `state` is untouched.
pub fn record_quiz(
    state: &mut ProgressState,
    attempts: &[GradedAttempt],
    config: &EngineConfig,
) -> Result<QuizSummary, QuizError> {
    let gradable: Vec<&GradedAttempt> = attempts.iter().filter(|a| is_gradable(a)).collect();
    let dropped = attempts.len() - gradable.len();
    if dropped > 0 {
        tracing::warn!(dropped, "attempts without topics dropped");
    }
    if gradable.is_empty() {
        return Err(QuizError::NoGradableAttempts { dropped });
    }

    let quiz_index = state.next_quiz_index();
    let phase_before = state.current_phase;
    let scheduler = QuizScheduler::new(&config.scheduler, state.scheduler_parameters.as_deref());

    let report = track_attempts(state, &gradable, quiz_index, &scheduler);
    state.total_quizzes_completed = quiz_index;
    let transition = advance_phase(state, &config.phase);

    tracing::debug!(
        quiz = quiz_index,
        applied = report.attempts_applied,
        topics = report.topics_updated.len(),
        phase = state.current_phase.number(),
        "quiz recorded"
    );

    Ok(QuizSummary {
        quiz_index,
        attempts_applied: report.attempts_applied,
        attempts_dropped: dropped,
        unknown_topics: report.unknown_topics,
        phase_before,
        phase_after: state.current_phase,
        transition,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedQuiz {
    /// Position in the replayed history, 0-based.
    pub position: usize,
    pub quiz_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recalculation {
    pub state: ProgressState,
    pub replayed: usize,
    pub failed: Vec<FailedQuiz>,
}

impl Recalculation {
    /// True when at least one quiz could not be replayed.
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Rebuilds a learner's state from scratch by replaying `history` in order.
pub fn recalculate_from_history(
    curriculum: &Curriculum,
    history: &[QuizRecord],
    scheduler_parameters: Option<Vec<f64>>,
    config: &EngineConfig,
) -> Recalculation {
    let mut state = ProgressState::new(curriculum);
    state.scheduler_parameters = scheduler_parameters;
    state.sanitize_scheduler_parameters();

    let mut replayed = 0;
    let mut failed = Vec::new();

    for (position, quiz) in history.iter().enumerate() {
        match record_quiz(&mut state, &quiz.attempts, config) {
            Ok(_) => replayed += 1,
            Err(e) => {
                tracing::warn!(position, quiz_id = %quiz.quiz_id, error = %e, "quiz skipped during recalculation");
                failed.push(FailedQuiz {
                    position,
                    quiz_id: quiz.quiz_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        replayed,
        failed = failed.len(),
        phase = state.current_phase.number(),
        "progress recalculated"
    );

    Recalculation {
        state,
        replayed,
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curriculum() -> Curriculum {
        Curriculum::new([("a", "d1"), ("b", "d1"), ("c", "d2")])
    }

    fn attempt(topic: &str, correct: bool) -> GradedAttempt {
        GradedAttempt {
            question_id: Some(format!("q-{topic}")),
            topics: vec![topic.to_string()],
            is_correct: correct,
            points_earned: u32::from(correct),
            max_points: Some(1),
            difficulty: -1.0,
            discrimination: 1.0,
        }
    }

    #[test]
    fn test_record_quiz_advances_counter_and_coverage() {
        let config = EngineConfig::default();
        let mut state = ProgressState::new(&curriculum());
        let summary = record_quiz(&mut state, &[attempt("a", true), attempt("c", false)], &config).unwrap();

        assert_eq!(summary.quiz_index, 1);
        assert_eq!(summary.attempts_applied, 2);
        assert_eq!(state.total_quizzes_completed, 1);
        assert_eq!(state.topic_coverage["a"].first_covered_quiz, Some(1));
        assert_eq!(state.uncovered_count(), 1);
        assert_eq!(summary.phase_after, Phase::Coverage);
    }

    #[test]
    fn test_empty_quiz_leaves_state_untouched() {
        let config = EngineConfig::default();
        let mut state = ProgressState::new(&curriculum());
        let before = state.clone();

        let mut blank = attempt("a", true);
        blank.topics = vec!["  ".into()];
        let err = record_quiz(&mut state, &[blank], &config).unwrap_err();
        assert_eq!(err, QuizError::NoGradableAttempts { dropped: 1 });
        assert_eq!(state, before);
        assert!(record_quiz(&mut state, &[], &config).is_err());
    }

    #[test]
    fn test_unknown_topics_reported() {
        let config = EngineConfig::default();
        let mut state = ProgressState::new(&curriculum());
        let summary = record_quiz(&mut state, &[attempt("zzz", true), attempt("b", true)], &config).unwrap();
        assert!(summary.unknown_topics.contains("zzz"));
        assert_eq!(state.total_quizzes_completed, 1);
    }

    #[test]
    fn test_recalculation_matches_live_recording() {
        let config = EngineConfig::default();
        let history: Vec<QuizRecord> = ["a", "b", "c", "a", "b"]
            .iter()
            .enumerate()
            .map(|(i, t)| QuizRecord {
                quiz_id: format!("quiz-{i}"),
                completed_at: None,
                attempts: vec![attempt(t, i % 2 == 0)],
            })
            .collect();

        let mut live = ProgressState::new(&curriculum());
        for quiz in &history {
            record_quiz(&mut live, &quiz.attempts, &config).unwrap();
        }

        let rebuilt = recalculate_from_history(&curriculum(), &history, None, &config);
        assert!(!rebuilt.is_partial());
        assert_eq!(rebuilt.replayed, 5);
        assert_eq!(
            serde_json::to_string(&rebuilt.state).unwrap(),
            serde_json::to_string(&live).unwrap()
        );
        assert_eq!(rebuilt.state.current_phase, Phase::Remediation);
    }

    #[test]
    fn test_recalculation_skips_failing_quiz() {
        let config = EngineConfig::default();
        let history = vec![
            QuizRecord {
                quiz_id: "ok".into(),
                completed_at: None,
                attempts: vec![attempt("a", true)],
            },
            QuizRecord {
                quiz_id: "broken".into(),
                completed_at: None,
                attempts: Vec::new(),
            },
            QuizRecord {
                quiz_id: "ok-2".into(),
                completed_at: None,
                attempts: vec![attempt("b", true)],
            },
        ];
        let rebuilt = recalculate_from_history(&curriculum(), &history, None, &config);
        assert!(rebuilt.is_partial());
        assert_eq!(rebuilt.replayed, 2);
        assert_eq!(rebuilt.failed[0].position, 1);
        assert_eq!(rebuilt.failed[0].quiz_id, "broken");
        assert_eq!(rebuilt.state.total_quizzes_completed, 2);
    }
}
