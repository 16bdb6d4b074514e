//! Quiz-index scheduling on top of FSRS.
//!
//! FSRS reasons in days. Learners reason in quizzes taken. The scheduler keeps
//! every card's model state in days and translates at the boundary using an
//! assumed cadence:
//!
//! - offset (quizzes) = max(1, round(interval_days / days_per_quiz))
//! - elapsed (days)   = quizzes since last review × days_per_quiz

use crate::config::SchedulerConfig;
use crate::services::fsrs::{fsrs_retrievability, fsrs_review, FSRSParams, MemoryCard, Rating};

const DAYS_PER_WEEK: f64 = 7.0;
const FALLBACK_QUIZZES_PER_WEEK: f64 = 3.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuizClock {
    days_per_quiz: f64,
}

impl Default for QuizClock {
    fn default() -> Self {
        Self::from_cadence(FALLBACK_QUIZZES_PER_WEEK)
    }
}

impl QuizClock {
    pub fn from_cadence(quizzes_per_week: f64) -> Self {
        let cadence = if quizzes_per_week.is_finite() && quizzes_per_week > 0.0 {
            quizzes_per_week
        } else {
            tracing::warn!(quizzes_per_week, "invalid quiz cadence, using fallback");
            FALLBACK_QUIZZES_PER_WEEK
        };
        Self {
            days_per_quiz: DAYS_PER_WEEK / cadence,
        }
    }

    pub fn days_per_quiz(&self) -> f64 {
        self.days_per_quiz
    }

    pub fn quizzes_for_days(&self, days: f64) -> u32 {
        if !days.is_finite() || days <= 0.0 {
            return 1;
        }
        let quizzes = (days / self.days_per_quiz).round();
        if quizzes >= u32::MAX as f64 {
            u32::MAX
        } else {
            (quizzes as u32).max(1)
        }
    }

    pub fn days_between(&self, from_quiz: u32, to_quiz: u32) -> f64 {
        to_quiz.saturating_sub(from_quiz) as f64 * self.days_per_quiz
    }
}

/// FSRS bound to one learner's weights and a quiz clock.
#[derive(Debug, Clone)]
pub struct QuizScheduler {
    clock: QuizClock,
    params: FSRSParams,
    desired_retention: f64,
}

impl QuizScheduler {
    pub fn new(config: &SchedulerConfig, custom_weights: Option<&[f64]>) -> Self {
        Self {
            clock: QuizClock::from_cadence(config.quizzes_per_week),
            params: FSRSParams::resolve(custom_weights),
            desired_retention: config.desired_retention,
        }
    }

    pub fn clock(&self) -> &QuizClock {
        &self.clock
    }

    pub fn params(&self) -> &FSRSParams {
        &self.params
    }

    /// Reviews `card` during quiz `quiz_index` with an explicit rating
    /// (the flashcard path).
    pub fn review(&self, card: &MemoryCard, rating: Rating, quiz_index: u32) -> MemoryCard {
        let elapsed_days = card
            .last_review_quiz
            .map_or(0.0, |last| self.clock.days_between(last, quiz_index));

        let result = fsrs_review(card, rating, elapsed_days, self.desired_retention, &self.params);
        let offset = self.clock.quizzes_for_days(result.interval_days);

        let mut next = result.card;
        next.scheduled_quizzes = offset;
        next.last_review_quiz = Some(quiz_index);
        next.due_quiz = Some(quiz_index.saturating_add(offset));
        next
    }

    /// Quiz path: incorrect is `Again`, correct is `Good`.
    pub fn review_outcome(&self, card: &MemoryCard, is_correct: bool, quiz_index: u32) -> MemoryCard {
        self.review(card, Rating::from_correct(is_correct), quiz_index)
    }

    /// Recall probability if the card were tested at `quiz_index`.
    pub fn retrievability_at(&self, card: &MemoryCard, quiz_index: u32) -> f64 {
        match card.last_review_quiz {
            Some(last) if !card.is_new() => {
                fsrs_retrievability(card.stability, self.clock.days_between(last, quiz_index))
            }
            _ => 0.0,
        }
    }
}
