//! Next-quiz topic selection.
//!
//! - Coverage: uncovered topics, round-robin across domains.
//! - Remediation / Maintenance: due topics split into struggling, learning
//!   and mastered buckets by configured shares; short buckets spill into the
//!   next active bucket and finally into a random pool of any topic.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{BucketSplit, SelectionConfig};
use crate::services::topic_performance::{TopicPerformance, TopicStanding};
use crate::types::{Phase, ProgressState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TopicConstraint {
    SingleDomain,
    CrossDomain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Struggling,
    Learning,
    Mastered,
    Random,
}

impl Bucket {
    fn standing(self) -> Option<TopicStanding> {
        match self {
            Self::Struggling => Some(TopicStanding::Struggling),
            Self::Learning => Some(TopicStanding::Learning),
            Self::Mastered => Some(TopicStanding::Mastered),
            Self::Random => None,
        }
    }
}

pub fn select_topics<R: Rng + ?Sized>(
    state: &ProgressState,
    count: usize,
    constraint: Option<TopicConstraint>,
    config: &SelectionConfig,
    rng: &mut R,
) -> Vec<String> {
    let count = count.min(state.topic_count());
    if count == 0 {
        return Vec::new();
    }

    let next_quiz = state.next_quiz_index();
    let selection = match state.current_phase {
        Phase::Coverage => select_coverage(state, count, next_quiz),
        Phase::Remediation => select_by_quota(state, count, next_quiz, &config.remediation, rng),
        Phase::Maintenance => select_by_quota(state, count, next_quiz, &config.maintenance, rng),
    };

    tracing::debug!(
        phase = state.current_phase.number(),
        next_quiz,
        requested = count,
        selected = selection.len(),
        "topics selected"
    );

    match constraint {
        Some(constraint) => apply_constraint(state, selection, count, constraint, next_quiz),
        None => selection,
    }
}

/// Topics whose card is due at `quiz_index`, never-scheduled ones included.
pub fn due_topics(state: &ProgressState, quiz_index: u32) -> Vec<String> {
    state
        .topic_performance
        .values()
        .filter(|p| p.card.is_due(quiz_index))
        .map(|p| p.topic_id.clone())
        .collect()
}

fn select_coverage(state: &ProgressState, count: usize, next_quiz: u32) -> Vec<String> {
    let mut by_domain: BTreeMap<&str, VecDeque<&str>> = BTreeMap::new();
    for coverage in state.topic_coverage.values().filter(|c| !c.is_covered()) {
        by_domain
            .entry(coverage.domain_id.as_str())
            .or_default()
            .push_back(coverage.topic_id.as_str());
    }

    let mut selected = Vec::with_capacity(count);
    while selected.len() < count {
        // fullest domain first; ties go to the smaller domain id
        let next = by_domain
            .iter_mut()
            .filter(|(_, queue)| !queue.is_empty())
            .max_by(|(da, qa), (db, qb)| qa.len().cmp(&qb.len()).then_with(|| db.cmp(da)))
            .and_then(|(_, queue)| queue.pop_front());
        match next {
            Some(topic) => selected.push(topic.to_string()),
            None => break,
        }
    }

    top_up(state, &mut selected, count, next_quiz);
    selected
}

fn select_by_quota<R: Rng + ?Sized>(
    state: &ProgressState,
    count: usize,
    next_quiz: u32,
    split: &BucketSplit,
    rng: &mut R,
) -> Vec<String> {
    let mut selected: Vec<String> = Vec::with_capacity(count);
    let mut carry = 0;

    for (bucket, quota) in allocate(count, split) {
        let want = quota + carry;
        let Some(standing) = bucket.standing() else {
            carry = want;
            continue;
        };
        let before = selected.len();
        for performance in bucket_candidates(state, standing, next_quiz) {
            if selected.len() - before >= want {
                break;
            }
            if !selected.contains(&performance.topic_id) {
                selected.push(performance.topic_id.clone());
            }
        }
        carry = want - (selected.len() - before);
    }

    if carry > 0 {
        let mut pool: Vec<&String> = state
            .topic_performance
            .keys()
            .filter(|id| !selected.contains(id))
            .collect();
        pool.shuffle(rng);
        selected.extend(pool.into_iter().take(carry).cloned());
    }

    selected
}

/// Splits `count` across the buckets with a non-zero share, in bucket order.
/// The last active bucket absorbs rounding.
fn allocate(count: usize, split: &BucketSplit) -> Vec<(Bucket, usize)> {
    let active: Vec<(Bucket, f64)> = [
        (Bucket::Struggling, split.struggling),
        (Bucket::Learning, split.learning),
        (Bucket::Mastered, split.mastered),
        (Bucket::Random, split.random),
    ]
    .into_iter()
    .filter(|(_, share)| share.is_finite() && *share > 0.0)
    .collect();

    if active.is_empty() {
        return vec![(Bucket::Random, count)];
    }

    let last = active.len() - 1;
    let mut remaining = count;
    let mut quotas = Vec::with_capacity(active.len() + 1);
    for (i, (bucket, share)) in active.into_iter().enumerate() {
        let quota = if i == last {
            remaining
        } else {
            ((share * count as f64).round() as usize).min(remaining)
        };
        remaining -= quota;
        quotas.push((bucket, quota));
    }
    if quotas.last().map(|(bucket, _)| *bucket) != Some(Bucket::Random) {
        quotas.push((Bucket::Random, 0));
    }
    quotas
}

fn bucket_candidates(
    state: &ProgressState,
    standing: TopicStanding,
    next_quiz: u32,
) -> Vec<&TopicPerformance> {
    let mut candidates: Vec<&TopicPerformance> = state
        .topic_performance
        .values()
        .filter(|p| p.card.is_due(next_quiz) && p.standing() == standing)
        .collect();

    match standing {
        TopicStanding::Struggling => candidates.sort_by(|a, b| {
            by_accuracy(a, b)
                .then_with(|| by_due(a, b))
                .then_with(|| a.topic_id.cmp(&b.topic_id))
        }),
        TopicStanding::Learning | TopicStanding::Mastered => candidates.sort_by(|a, b| {
            by_due(a, b)
                .then_with(|| by_accuracy(a, b))
                .then_with(|| a.topic_id.cmp(&b.topic_id))
        }),
    }
    candidates
}

fn by_accuracy(a: &TopicPerformance, b: &TopicPerformance) -> Ordering {
    a.accuracy.total_cmp(&b.accuracy)
}

fn by_due(a: &TopicPerformance, b: &TopicPerformance) -> Ordering {
    a.card.due_quiz.unwrap_or(0).cmp(&b.card.due_quiz.unwrap_or(0))
}

/// Every topic, most in need of practice first: due, then weakest, then
/// least covered.
fn fill_order(state: &ProgressState, next_quiz: u32) -> Vec<&str> {
    let mut topics: Vec<&TopicPerformance> = state.topic_performance.values().collect();
    topics.sort_by(|a, b| {
        b.card
            .is_due(next_quiz)
            .cmp(&a.card.is_due(next_quiz))
            .then_with(|| by_accuracy(a, b))
            .then_with(|| times_covered(state, a).cmp(&times_covered(state, b)))
            .then_with(|| a.topic_id.cmp(&b.topic_id))
    });
    topics.into_iter().map(|p| p.topic_id.as_str()).collect()
}

fn times_covered(state: &ProgressState, performance: &TopicPerformance) -> u32 {
    state
        .topic_coverage
        .get(&performance.topic_id)
        .map_or(0, |c| c.times_covered)
}

fn top_up(state: &ProgressState, selected: &mut Vec<String>, count: usize, next_quiz: u32) {
    for topic in fill_order(state, next_quiz) {
        if selected.len() >= count {
            break;
        }
        if !selected.iter().any(|s| s == topic) {
            selected.push(topic.to_string());
        }
    }
}

fn apply_constraint(
    state: &ProgressState,
    selection: Vec<String>,
    count: usize,
    constraint: TopicConstraint,
    next_quiz: u32,
) -> Vec<String> {
    let mut pool = selection.clone();
    for topic in fill_order(state, next_quiz) {
        if !pool.iter().any(|p| p == topic) {
            pool.push(topic.to_string());
        }
    }

    match constraint {
        TopicConstraint::SingleDomain => {
            let mut counts: Vec<(&str, usize)> = Vec::new();
            for domain in selection.iter().chain(pool.iter()).filter_map(|t| state.domain_of(t)) {
                if !counts.iter().any(|(d, _)| *d == domain) {
                    counts.push((domain, 0));
                }
            }
            for domain in selection.iter().filter_map(|t| state.domain_of(t)) {
                if let Some(entry) = counts.iter_mut().find(|(d, _)| *d == domain) {
                    entry.1 += 1;
                }
            }
            // stable: first-seen domain wins ties
            counts.sort_by(|a, b| b.1.cmp(&a.1));

            let capacity = |domain: &str| pool.iter().filter(|t| state.domain_of(t) == Some(domain)).count();
            let Some(domain) = counts
                .iter()
                .map(|&(d, _)| d)
                .find(|d| capacity(d) >= count)
                .or_else(|| counts.first().map(|&(d, _)| d))
            else {
                return selection;
            };
            pool.iter()
                .filter(|t| state.domain_of(t) == Some(domain))
                .take(count)
                .cloned()
                .collect()
        }
        TopicConstraint::CrossDomain => {
            if count < 2 {
                return selection;
            }
            let mut result = selection;
            let domains: BTreeSet<&str> = result.iter().filter_map(|t| state.domain_of(t)).collect();
            if domains.len() < 2 {
                let current = domains.iter().next().copied();
                let other = pool
                    .iter()
                    .find(|t| !result.contains(t) && state.domain_of(t) != current)
                    .cloned();
                match other {
                    Some(topic) => {
                        if result.len() >= count {
                            result.pop();
                        }
                        result.push(topic);
                    }
                    None => tracing::debug!("cross-domain selection impossible with a single domain"),
                }
            }
            for topic in &pool {
                if result.len() >= count {
                    break;
                }
                if !result.contains(topic) {
                    result.push(topic.clone());
                }
            }
            interleave_domains(state, result)
        }
    }
}

/// Round-robin over domains in order of first appearance.
fn interleave_domains(state: &ProgressState, topics: Vec<String>) -> Vec<String> {
    let mut groups: Vec<(Option<&str>, VecDeque<String>)> = Vec::new();
    for topic in topics {
        let domain = state.domain_of(&topic);
        match groups.iter_mut().find(|(d, _)| *d == domain) {
            Some((_, queue)) => queue.push_back(topic),
            None => groups.push((domain, VecDeque::from([topic]))),
        }
    }

    let mut result = Vec::new();
    loop {
        let mut progressed = false;
        for (_, queue) in groups.iter_mut() {
            if let Some(topic) = queue.pop_front() {
                result.push(topic);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    result
}
