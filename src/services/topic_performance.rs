use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::services::fsrs::{CardState, MemoryCard, Rating};
use crate::services::quiz_schedule::QuizScheduler;
use crate::types::{GradedAttempt, ProgressState};

pub const MASTERY_ACCURACY: f64 = 0.8;
pub const MASTERY_MIN_ANSWERS: u32 = 3;
pub const STRUGGLING_ACCURACY: f64 = 0.6;
pub const STRUGGLING_MIN_ANSWERS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicCoverageStatus {
    pub topic_id: String,
    pub domain_id: String,
    pub first_covered_quiz: Option<u32>,
    pub times_covered: u32,
    pub last_covered_quiz: Option<u32>,
}

impl TopicCoverageStatus {
    pub fn new(topic_id: &str, domain_id: &str) -> Self {
        Self {
            topic_id: topic_id.to_string(),
            domain_id: domain_id.to_string(),
            first_covered_quiz: None,
            times_covered: 0,
            last_covered_quiz: None,
        }
    }

    pub fn is_covered(&self) -> bool {
        self.times_covered > 0
    }

    pub fn mark_covered(&mut self, quiz_index: u32) {
        self.times_covered = self.times_covered.saturating_add(1);
        self.first_covered_quiz.get_or_insert(quiz_index);
        self.last_covered_quiz = Some(quiz_index);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicStanding {
    Struggling,
    Learning,
    Mastered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicPerformance {
    pub topic_id: String,
    pub domain_id: String,
    pub questions_answered: u32,
    pub correct_answers: u32,
    pub total_points: u64,
    pub max_points: u64,
    pub accuracy: f64,
    pub is_struggling: bool,
    pub is_mastered: bool,
    pub card: MemoryCard,
}

impl TopicPerformance {
    pub fn new(topic_id: &str, domain_id: &str) -> Self {
        Self {
            topic_id: topic_id.to_string(),
            domain_id: domain_id.to_string(),
            questions_answered: 0,
            correct_answers: 0,
            total_points: 0,
            max_points: 0,
            accuracy: 0.0,
            is_struggling: false,
            is_mastered: false,
            card: MemoryCard::default(),
        }
    }

    pub fn record(&mut self, is_correct: bool, points: u32, max_points: u32) {
        self.questions_answered = self.questions_answered.saturating_add(1);
        if is_correct {
            self.correct_answers = self.correct_answers.saturating_add(1);
        }
        self.total_points = self.total_points.saturating_add(u64::from(points));
        self.max_points = self.max_points.saturating_add(u64::from(max_points));
        self.accuracy = self.correct_answers as f64 / self.questions_answered as f64;
        self.refresh_flags();
    }

    fn refresh_flags(&mut self) {
        self.is_mastered =
            self.accuracy >= MASTERY_ACCURACY && self.questions_answered >= MASTERY_MIN_ANSWERS;
        self.is_struggling = !self.is_mastered
            && self.accuracy < STRUGGLING_ACCURACY
            && self.questions_answered >= STRUGGLING_MIN_ANSWERS;
    }

    pub fn standing(&self) -> TopicStanding {
        if self.is_struggling {
            TopicStanding::Struggling
        } else if self.is_mastered {
            TopicStanding::Mastered
        } else {
            TopicStanding::Learning
        }
    }

    pub fn points_ratio(&self) -> f64 {
        if self.max_points == 0 {
            0.0
        } else {
            self.total_points as f64 / self.max_points as f64
        }
    }
}

/// Repetition record for an individual question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionHistory {
    pub question_id: String,
    pub topics: Vec<String>,
    pub times_asked: u32,
    pub times_correct: u32,
    pub card: MemoryCard,
}

impl QuestionHistory {
    pub fn new(question_id: &str, topics: &[String]) -> Self {
        Self {
            question_id: question_id.to_string(),
            topics: topics.to_vec(),
            times_asked: 0,
            times_correct: 0,
            card: MemoryCard::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackReport {
    pub attempts_applied: usize,
    pub topics_updated: BTreeSet<String>,
    pub unknown_topics: BTreeSet<String>,
    pub questions_updated: usize,
}

/// Folds one quiz worth of attempts into `state`, in attempt order.
pub fn track_attempts(
    state: &mut ProgressState,
    attempts: &[&GradedAttempt],
    quiz_index: u32,
    scheduler: &QuizScheduler,
) -> TrackReport {
    let mut report = TrackReport::default();

    for attempt in attempts {
        let points = attempt.effective_points();
        let max_points = attempt.effective_max_points();

        for topic in attempt.distinct_topics() {
            let Some(performance) = state.topic_performance.get_mut(topic) else {
                tracing::warn!(topic, question = ?attempt.question_id, "unknown topic skipped");
                report.unknown_topics.insert(topic.to_string());
                continue;
            };
            performance.record(attempt.is_correct, points, max_points);
            performance.card = scheduler.review_outcome(&performance.card, attempt.is_correct, quiz_index);

            if let Some(coverage) = state.topic_coverage.get_mut(topic) {
                coverage.mark_covered(quiz_index);
            }
            report.topics_updated.insert(topic.to_string());
        }

        if let Some(question_id) = attempt.question_id.as_deref() {
            let history = state
                .question_history
                .entry(question_id.to_string())
                .or_insert_with(|| QuestionHistory::new(question_id, &attempt.topics));
            history.times_asked = history.times_asked.saturating_add(1);
            if attempt.is_correct {
                history.times_correct = history.times_correct.saturating_add(1);
            }
            history.card = scheduler.review_outcome(&history.card, attempt.is_correct, quiz_index);
            report.questions_updated += 1;
        }

        report.attempts_applied += 1;
    }

    report
}

/// Question ids whose card is due at `quiz_index`, most overdue first.
/// Outcome of one self-rated flashcard review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardReview {
    pub question_id: String,
    pub rating: Rating,
    /// Recall probability just before the review; 0 for a card never seen.
    pub recall_before: f64,
    pub card: MemoryCard,
}

/// Flashcard path: the learner rates recall directly (again/hard/good/easy).
/// Only the question's card moves; topic accuracy, coverage and the ask
/// counters are quiz statistics and stay untouched.
pub fn review_question(
    state: &mut ProgressState,
    question_id: &str,
    topics: &[String],
    rating: Rating,
    quiz_index: u32,
    scheduler: &QuizScheduler,
) -> FlashcardReview {
    let history = state
        .question_history
        .entry(question_id.to_string())
        .or_insert_with(|| QuestionHistory::new(question_id, topics));
    let recall_before = scheduler.retrievability_at(&history.card, quiz_index);
    history.card = scheduler.review(&history.card, rating, quiz_index);

    tracing::debug!(
        question = question_id,
        rating = rating.as_str(),
        state = history.card.state.as_str(),
        due_quiz = ?history.card.due_quiz,
        "flashcard reviewed"
    );

    FlashcardReview {
        question_id: question_id.to_string(),
        rating,
        recall_before,
        card: history.card.clone(),
    }
}

pub fn due_questions(state: &ProgressState, quiz_index: u32) -> Vec<String> {
    let mut due: Vec<(&String, u32)> = state
        .question_history
        .iter()
        .filter(|(_, h)| h.card.is_due(quiz_index))
        .map(|(id, h)| (id, h.card.due_quiz.unwrap_or(0)))
        .collect();
    due.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    due.into_iter().map(|(id, _)| id.clone()).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub total_topics: usize,
    pub covered_topics: usize,
    pub new_cards: usize,
    pub learning_cards: usize,
    pub review_cards: usize,
    pub relearning_cards: usize,
    pub struggling_topics: usize,
    pub learning_topics: usize,
    pub mastered_topics: usize,
    pub due_topics: usize,
    pub total_answered: u64,
    pub total_correct: u64,
    pub overall_accuracy: f64,
}

pub fn summarize(state: &ProgressState) -> PerformanceSummary {
    let next_quiz = state.next_quiz_index();
    let mut summary = PerformanceSummary {
        total_topics: state.topic_count(),
        covered_topics: state.topic_coverage.values().filter(|c| c.is_covered()).count(),
        ..Default::default()
    };

    for performance in state.topic_performance.values() {
        match performance.card.state {
            CardState::New => summary.new_cards += 1,
            CardState::Learning => summary.learning_cards += 1,
            CardState::Review => summary.review_cards += 1,
            CardState::Relearning => summary.relearning_cards += 1,
        }
        match performance.standing() {
            TopicStanding::Struggling => summary.struggling_topics += 1,
            TopicStanding::Learning => summary.learning_topics += 1,
            TopicStanding::Mastered => summary.mastered_topics += 1,
        }
        if performance.card.is_due(next_quiz) {
            summary.due_topics += 1;
        }
        summary.total_answered += u64::from(performance.questions_answered);
        summary.total_correct += u64::from(performance.correct_answers);
    }

    if summary.total_answered > 0 {
        summary.overall_accuracy = summary.total_correct as f64 / summary.total_answered as f64;
    }
    summary
}
