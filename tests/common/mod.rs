#![allow(dead_code)]

use quiz_mastery::types::QuestionCategory;
use quiz_mastery::{Curriculum, GradedAttempt, QuizRecord};

/// Five topics over three domains: d1 {t1, t2}, d2 {t3, t4}, d3 {t5}.
pub fn five_topic_curriculum() -> Curriculum {
    Curriculum::new([
        ("t1", "d1"),
        ("t2", "d1"),
        ("t3", "d2"),
        ("t4", "d2"),
        ("t5", "d3"),
    ])
}

pub fn graded(topics: &[&str], category: QuestionCategory, correct: bool) -> GradedAttempt {
    let item = category.item_params();
    GradedAttempt {
        question_id: Some(format!("q-{}", topics.join("-"))),
        topics: topics.iter().map(|t| t.to_string()).collect(),
        is_correct: correct,
        points_earned: if correct { 2 } else { 0 },
        max_points: Some(2),
        difficulty: item.difficulty,
        discrimination: item.discrimination,
    }
}

pub fn single(topic: &str, correct: bool) -> GradedAttempt {
    graded(&[topic], QuestionCategory::SingleTopic, correct)
}

pub fn quiz(id: &str, attempts: Vec<GradedAttempt>) -> QuizRecord {
    QuizRecord {
        quiz_id: id.to_string(),
        completed_at: None,
        attempts,
    }
}
