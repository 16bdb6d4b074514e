use std::collections::BTreeSet;

use crate::config::ScoringConfig;
use crate::services::ability::classify_category;
use crate::types::{Curriculum, GradedAttempt, Question};

const MIN_OPTION_COUNT: usize = 2;

pub fn resolve_option_count(option_count: Option<usize>, config: &ScoringConfig) -> usize {
    match option_count {
        Some(n) if n >= MIN_OPTION_COUNT => n,
        _ => config.default_option_count.max(MIN_OPTION_COUNT),
    }
}

/// Symmetric per-option credit: every option judged correctly (picked and
/// right, or skipped and wrong) earns one unit out of N.
pub fn score_attempt(
    selected: &[usize],
    correct: &[usize],
    option_count: Option<usize>,
    max_points: u32,
    config: &ScoringConfig,
) -> u32 {
    let selected: BTreeSet<usize> = selected.iter().copied().collect();
    let correct: BTreeSet<usize> = correct.iter().copied().collect();
    let mut n = resolve_option_count(option_count, config);
    if option_count.is_none() {
        // an unknown count must still cover every keyed option
        if let Some(&highest) = correct.iter().next_back() {
            n = n.max(highest + 1);
        }
    }

    if let Some(&out_of_range) = selected.iter().chain(correct.iter()).find(|&&i| i >= n) {
        tracing::debug!(index = out_of_range, option_count = n, "option index out of range ignored");
    }

    let units = (0..n)
        .filter(|i| selected.contains(i) == correct.contains(i))
        .count();

    let points = (units as f64 / n as f64 * max_points as f64).round() as u32;
    points.min(max_points)
}

/// The boolean correctness flag: the selection matches the key exactly.
pub fn is_fully_correct(selected: &[usize], correct: &[usize]) -> bool {
    let selected: BTreeSet<usize> = selected.iter().copied().collect();
    let correct: BTreeSet<usize> = correct.iter().copied().collect();
    selected == correct
}

/// Turns a learner's response to `question` into a graded attempt.
pub fn grade_response(
    question: &Question,
    selected: &[usize],
    curriculum: &Curriculum,
    config: &ScoringConfig,
) -> GradedAttempt {
    let max_points = match question.max_points {
        Some(points) if points > 0 => points,
        _ => config.default_max_points.max(1),
    };
    let category = question
        .category
        .unwrap_or_else(|| classify_category(&question.topics, curriculum));
    let item = category.item_params();

    GradedAttempt {
        question_id: Some(question.id.clone()),
        topics: question.topics.clone(),
        is_correct: is_fully_correct(selected, &question.correct_options),
        points_earned: score_attempt(
            selected,
            &question.correct_options,
            question.option_count,
            max_points,
            config,
        ),
        max_points: Some(max_points),
        difficulty: item.difficulty,
        discrimination: item.discrimination,
    }
}
