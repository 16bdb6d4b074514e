use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::services::ability::estimate_ability;
use crate::services::confidence::{
    public_score, score_interval, theta_interval, topic_accuracy_interval, ConfidenceLevel,
    ScoreInterval, ThetaInterval, WilsonInterval,
};
use crate::services::partial_credit::{grade_response, score_attempt};
use crate::services::progress::{
    recalculate_from_history, record_quiz, QuizError, QuizSummary, Recalculation,
};
use crate::services::fsrs::Rating;
use crate::services::quiz_schedule::QuizScheduler;
use crate::services::topic_performance::{
    due_questions, review_question, summarize, FlashcardReview, PerformanceSummary,
};
use crate::services::topic_selector::{select_topics, TopicConstraint};
use crate::store::{ProgressStore, StoreError};
use crate::types::{Curriculum, GradedAttempt, ProgressState, Question, QuizRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityReport {
    pub theta: f64,
    /// Infinite when there is no evidence yet; display as "unknown".
    pub standard_error: f64,
    pub score: i32,
    pub confidence_level: ConfidenceLevel,
    pub interval: ThetaInterval,
    pub score_interval: ScoreInterval,
    pub attempt_count: usize,
}

impl AbilityReport {
    pub fn is_unknown(&self) -> bool {
        !self.standard_error.is_finite()
    }
}

pub struct QuizEngine {
    config: Arc<RwLock<EngineConfig>>,
}

impl QuizEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: EngineConfig) {
        *self.config.write() = config;
    }

    pub fn score_attempt(
        &self,
        selected: &[usize],
        correct: &[usize],
        option_count: Option<usize>,
        max_points: Option<u32>,
    ) -> u32 {
        let config = self.config.read();
        let max_points = match max_points {
            Some(points) if points > 0 => points,
            _ => config.scoring.default_max_points.max(1),
        };
        score_attempt(selected, correct, option_count, max_points, &config.scoring)
    }

    pub fn grade_response(
        &self,
        question: &Question,
        selected: &[usize],
        curriculum: &Curriculum,
    ) -> GradedAttempt {
        grade_response(question, selected, curriculum, &self.config.read().scoring)
    }

    pub fn new_progress(&self, curriculum: &Curriculum) -> ProgressState {
        ProgressState::new(curriculum)
    }

    pub fn record_quiz(
        &self,
        state: &mut ProgressState,
        attempts: &[GradedAttempt],
    ) -> Result<QuizSummary, QuizError> {
        let config = self.config.read().clone();
        record_quiz(state, attempts, &config)
    }

    pub fn estimate_ability(&self, attempts: &[GradedAttempt]) -> AbilityReport {
        let ability = self.config.read().ability.clone();
        let estimate = estimate_ability(attempts, &ability);
        let interval = theta_interval(&estimate, ability.confidence_level);

        AbilityReport {
            theta: estimate.theta,
            standard_error: estimate.standard_error,
            score: public_score(estimate.theta),
            confidence_level: ability.confidence_level,
            interval,
            score_interval: score_interval(&interval),
            attempt_count: estimate.attempt_count,
        }
    }

    pub fn topic_accuracy(&self, state: &ProgressState, topic_id: &str) -> Option<WilsonInterval> {
        let level = self.config.read().ability.confidence_level;
        state
            .topic_performance
            .get(topic_id)
            .map(|performance| topic_accuracy_interval(performance, level))
    }

    pub fn summary(&self, state: &ProgressState) -> PerformanceSummary {
        summarize(state)
    }

    /// Questions due for repetition in the next quiz.
    pub fn due_questions(&self, state: &ProgressState) -> Vec<String> {
        due_questions(state, state.next_quiz_index())
    }

    /// Self-rated flashcard review of one question, scheduled as if taken
    /// during the next quiz. Quiz statistics are not touched.
    pub fn review_flashcard(
        &self,
        state: &mut ProgressState,
        question_id: &str,
        topics: &[String],
        rating: Rating,
    ) -> FlashcardReview {
        let scheduler = QuizScheduler::new(
            &self.config.read().scheduler,
            state.scheduler_parameters.as_deref(),
        );
        let quiz_index = state.next_quiz_index();
        review_question(state, question_id, topics, rating, quiz_index, &scheduler)
    }

    pub fn next_quiz_topics(
        &self,
        state: &ProgressState,
        count: usize,
        constraint: Option<TopicConstraint>,
    ) -> Vec<String> {
        self.next_quiz_topics_with_rng(state, count, constraint, &mut rand::rng())
    }

    pub fn next_quiz_topics_with_rng<R: Rng + ?Sized>(
        &self,
        state: &ProgressState,
        count: usize,
        constraint: Option<TopicConstraint>,
        rng: &mut R,
    ) -> Vec<String> {
        let selection = self.config.read().selection.clone();
        select_topics(state, count, constraint, &selection, rng)
    }

    pub fn recalculate_from_history(
        &self,
        curriculum: &Curriculum,
        history: &[QuizRecord],
        scheduler_parameters: Option<Vec<f64>>,
    ) -> Recalculation {
        let config = self.config.read().clone();
        recalculate_from_history(curriculum, history, scheduler_parameters, &config)
    }

    /// Records `quiz` for a stored learner, then logs and saves it.
    ///
    /// Returns `Ok(None)` when the quiz had nothing gradable; such quizzes
    /// are neither logged nor counted.
    pub fn submit_quiz(
        &self,
        store: &dyn ProgressStore,
        learner_id: &str,
        curriculum: &Curriculum,
        quiz: &QuizRecord,
    ) -> Result<Option<QuizSummary>, StoreError> {
        let mut state = store
            .load(learner_id)?
            .unwrap_or_else(|| self.new_progress(curriculum));
        state.sync_curriculum(curriculum);

        let summary = match self.record_quiz(&mut state, &quiz.attempts) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(learner = learner_id, quiz_id = %quiz.quiz_id, error = %e, "quiz rejected");
                return Ok(None);
            }
        };

        // a retry after a failed save finds the quiz already logged
        if !store.append_quiz(learner_id, quiz)? {
            tracing::info!(learner = learner_id, quiz_id = %quiz.quiz_id, "quiz already in history, saving state only");
        }
        store.save(learner_id, &state)?;

        if let Some(transition) = summary.transition {
            tracing::info!(
                learner = learner_id,
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                "learner changed phase"
            );
        }
        Ok(Some(summary))
    }

    /// Replays the learner's logged history into a fresh state and saves
    /// it. Learner-specific scheduler weights survive the rebuild.
    pub fn rebuild_learner(
        &self,
        store: &dyn ProgressStore,
        learner_id: &str,
        curriculum: &Curriculum,
    ) -> Result<Recalculation, StoreError> {
        let scheduler_parameters = store
            .load(learner_id)?
            .and_then(|state| state.scheduler_parameters);
        let history = store.load_history(learner_id)?;

        let recalculation = self.recalculate_from_history(curriculum, &history, scheduler_parameters);
        if recalculation.is_partial() {
            tracing::warn!(
                learner = learner_id,
                failed = recalculation.failed.len(),
                "partial rebuild"
            );
        }
        store.save(learner_id, &recalculation.state)?;
        Ok(recalculation)
    }

    pub fn learner_ability(
        &self,
        store: &dyn ProgressStore,
        learner_id: &str,
    ) -> Result<AbilityReport, StoreError> {
        let attempts: Vec<GradedAttempt> = store
            .load_history(learner_id)?
            .into_iter()
            .flat_map(|quiz| quiz.attempts)
            .collect();
        Ok(self.estimate_ability(&attempts))
    }
}

impl Default for QuizEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::store::MemoryStore;
    use crate::types::Phase;

    fn curriculum() -> Curriculum {
        Curriculum::new([("a", "d1"), ("b", "d2")])
    }

    fn attempt(topic: &str, correct: bool) -> GradedAttempt {
        GradedAttempt {
            question_id: Some(format!("q-{topic}")),
            topics: vec![topic.to_string()],
            is_correct: correct,
            points_earned: u32::from(correct),
            max_points: None,
            difficulty: -1.0,
            discrimination: 1.0,
        }
    }

    #[test]
    fn test_zero_information_report() {
        let report = QuizEngine::default().estimate_ability(&[]);
        assert_eq!(report.theta, 0.0);
        assert!(report.standard_error.is_infinite());
        assert!(report.is_unknown());
        assert_eq!(report.score, 550);
        assert_eq!(report.score_interval, ScoreInterval { lower: 160, upper: 900 });
    }

    #[test]
    fn test_score_attempt_defaults_max_points() {
        let engine = QuizEngine::default();
        assert_eq!(engine.score_attempt(&[0, 1, 2], &[0, 2], Some(4), Some(4)), 3);
        assert_eq!(engine.score_attempt(&[1], &[1], None, None), 1);
    }

    #[test]
    fn test_submit_and_rebuild_agree() {
        let engine = QuizEngine::default();
        let store = MemoryStore::new();
        let curriculum = curriculum();

        for topic in ["a", "b", "a"] {
            let quiz = QuizRecord::new(vec![attempt(topic, true)]);
            assert!(engine.submit_quiz(&store, "l1", &curriculum, &quiz).unwrap().is_some());
        }
        let rejected = QuizRecord::new(Vec::new());
        assert!(engine.submit_quiz(&store, "l1", &curriculum, &rejected).unwrap().is_none());

        let live = store.load("l1").unwrap().unwrap();
        assert_eq!(live.total_quizzes_completed, 3);
        assert_eq!(live.current_phase, Phase::Remediation);

        let rebuilt = engine.rebuild_learner(&store, "l1", &curriculum).unwrap();
        assert!(!rebuilt.is_partial());
        assert_eq!(rebuilt.state, live);
        assert_eq!(store.load_history("l1").unwrap().len(), 3);

        let ability = engine.learner_ability(&store, "l1").unwrap();
        assert_eq!(ability.attempt_count, 3);
        assert!(ability.theta > 0.0 && ability.theta <= 2.0);
    }

    /// Fails the first `save` after being armed.
    struct FlakyStore {
        inner: MemoryStore,
        fail_next_save: AtomicBool,
    }

    impl ProgressStore for FlakyStore {
        fn load(&self, learner_id: &str) -> Result<Option<ProgressState>, StoreError> {
            self.inner.load(learner_id)
        }

        fn save(&self, learner_id: &str, state: &ProgressState) -> Result<(), StoreError> {
            if self.fail_next_save.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.save(learner_id, state)
        }

        fn append_quiz(&self, learner_id: &str, quiz: &QuizRecord) -> Result<bool, StoreError> {
            self.inner.append_quiz(learner_id, quiz)
        }

        fn load_history(&self, learner_id: &str) -> Result<Vec<QuizRecord>, StoreError> {
            self.inner.load_history(learner_id)
        }
    }

    #[test]
    fn test_retry_after_failed_save_counts_quiz_once() {
        let engine = QuizEngine::default();
        let curriculum = curriculum();
        let store = FlakyStore {
            inner: MemoryStore::new(),
            fail_next_save: AtomicBool::new(true),
        };
        let quiz = QuizRecord::new(vec![attempt("a", true)]);

        assert!(engine.submit_quiz(&store, "l1", &curriculum, &quiz).is_err());
        assert!(store.load("l1").unwrap().is_none());
        assert!(engine.submit_quiz(&store, "l1", &curriculum, &quiz).unwrap().is_some());

        let live = store.load("l1").unwrap().unwrap();
        assert_eq!(live.total_quizzes_completed, 1);
        assert_eq!(store.load_history("l1").unwrap().len(), 1);

        let rebuilt = engine.rebuild_learner(&store, "l1", &curriculum).unwrap();
        assert_eq!(rebuilt.replayed, 1);
        assert_eq!(rebuilt.state, live);
    }

    #[test]
    fn test_flashcard_review_schedules_question() {
        let engine = QuizEngine::default();
        let mut state = engine.new_progress(&curriculum());
        engine.record_quiz(&mut state, &[attempt("a", true)]).unwrap();

        let review = engine.review_flashcard(&mut state, "q-b", &["b".to_string()], Rating::Again);
        // one quiz done, so the review lands on quiz 2 and is due again at 3
        assert_eq!(review.card.last_review_quiz, Some(2));
        assert_eq!(review.card.due_quiz, Some(3));
        assert_eq!(engine.due_questions(&state), vec!["q-a"]);
        assert_eq!(state.total_quizzes_completed, 1);
        assert_eq!(state.topic_performance["b"].questions_answered, 0);
    }

    #[test]
    fn test_topic_accuracy_interval() {
        let engine = QuizEngine::default();
        let mut state = engine.new_progress(&curriculum());
        engine
            .record_quiz(&mut state, &[attempt("a", true), attempt("a", false)])
            .unwrap();
        let interval = engine.topic_accuracy(&state, "a").unwrap();
        assert!((interval.proportion - 50.0).abs() < 1e-9);
        assert!(interval.lower < 50.0 && interval.upper > 50.0);
        assert!(engine.topic_accuracy(&state, "nope").is_none());
    }
}
