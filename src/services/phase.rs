use serde::{Deserialize, Serialize};

use crate::config::PhaseConfig;
use crate::types::{Phase, ProgressState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub at_quiz: u32,
}

pub fn mastery_ratio(state: &ProgressState) -> f64 {
    let total = state.topic_count();
    if total == 0 {
        return 0.0;
    }
    state.mastered_count() as f64 / total as f64
}

pub fn all_topics_covered(state: &ProgressState) -> bool {
    state.topic_coverage.values().all(|c| c.is_covered())
}

/// The phase `state` should move to, at most one step past the current one.
///
/// Coverage completion is read from the latched `all_topics_covered_once`
/// flag, so the quiz that finishes coverage flips the phase one quiz later.
pub fn evaluate_phase(state: &ProgressState, config: &PhaseConfig) -> Phase {
    match state.current_phase {
        Phase::Coverage if state.all_topics_covered_once => Phase::Remediation,
        Phase::Remediation
            if mastery_ratio(state) > config.maintenance_mastery_ratio
                || state.total_quizzes_completed >= config.maintenance_quiz_count =>
        {
            Phase::Maintenance
        }
        current => current,
    }
}

/// Runs once per completed quiz: decides the transition, then refreshes the
/// coverage latch. Never moves a learner backwards.
pub fn advance_phase(state: &mut ProgressState, config: &PhaseConfig) -> Option<PhaseTransition> {
    let from = state.current_phase;
    let to = evaluate_phase(state, config).max(from);

    state.all_topics_covered_once = state.all_topics_covered_once || all_topics_covered(state);

    if to == from {
        return None;
    }

    state.current_phase = to;
    tracing::info!(
        from = from.number(),
        to = to.number(),
        quiz = state.total_quizzes_completed,
        mastery_ratio = mastery_ratio(state),
        "phase transition"
    );
    Some(PhaseTransition {
        from,
        to,
        at_quiz: state.total_quizzes_completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Curriculum;

    fn state(topics: usize) -> ProgressState {
        let curriculum = Curriculum::new((0..topics).map(|i| (format!("t{i}"), format!("d{}", i % 2))));
        ProgressState::new(&curriculum)
    }

    fn cover_all(state: &mut ProgressState) {
        for coverage in state.topic_coverage.values_mut() {
            coverage.mark_covered(1);
        }
    }

    #[test]
    fn test_coverage_flip_lags_one_quiz() {
        let config = PhaseConfig::default();
        let mut s = state(3);
        cover_all(&mut s);
        s.total_quizzes_completed = 1;

        assert_eq!(advance_phase(&mut s, &config), None);
        assert!(s.all_topics_covered_once);
        assert_eq!(s.current_phase, Phase::Coverage);

        s.total_quizzes_completed = 2;
        let transition = advance_phase(&mut s, &config).unwrap();
        assert_eq!(transition.from, Phase::Coverage);
        assert_eq!(transition.to, Phase::Remediation);
        assert_eq!(transition.at_quiz, 2);
    }

    #[test]
    fn test_maintenance_by_mastery_ratio() {
        let config = PhaseConfig::default();
        let mut s = state(10);
        s.current_phase = Phase::Remediation;
        for p in s.topic_performance.values_mut().take(7) {
            p.is_mastered = true;
        }
        // exactly 70% is not enough
        assert_eq!(evaluate_phase(&s, &config), Phase::Remediation);
        s.topic_performance.values_mut().nth(7).unwrap().is_mastered = true;
        assert_eq!(evaluate_phase(&s, &config), Phase::Maintenance);
    }

    #[test]
    fn test_maintenance_by_quiz_count() {
        let config = PhaseConfig::default();
        let mut s = state(4);
        s.current_phase = Phase::Remediation;
        s.total_quizzes_completed = 49;
        assert_eq!(evaluate_phase(&s, &config), Phase::Remediation);
        s.total_quizzes_completed = 50;
        assert_eq!(evaluate_phase(&s, &config), Phase::Maintenance);
    }

    #[test]
    fn test_coverage_never_jumps_to_maintenance() {
        let config = PhaseConfig::default();
        let mut s = state(4);
        s.total_quizzes_completed = 80;
        assert_eq!(advance_phase(&mut s, &config), None);
        assert_eq!(s.current_phase, Phase::Coverage);
    }

    #[test]
    fn test_mastery_loss_does_not_regress() {
        let config = PhaseConfig::default();
        let mut s = state(2);
        s.current_phase = Phase::Maintenance;
        s.all_topics_covered_once = true;
        assert_eq!(advance_phase(&mut s, &config), None);
        assert_eq!(s.current_phase, Phase::Maintenance);
    }
}
