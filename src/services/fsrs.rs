use serde::{Deserialize, Serialize};

const DECAY: f64 = -1.0;
const FACTOR: f64 = 1.0 / 9.0;
const MIN_STABILITY: f64 = 0.1;
const MIN_DIFFICULTY: f64 = 1.0;
const MAX_DIFFICULTY: f64 = 10.0;
const MAX_INTERVAL_DAYS: f64 = 36500.0;

pub const WEIGHT_COUNT: usize = 17;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FSRSParams {
    pub w: [f64; WEIGHT_COUNT],
}

impl Default for FSRSParams {
    fn default() -> Self {
        Self {
            w: [
                0.4, 0.6, 2.4, 5.8, // w0-w3: initial stability
                4.93, 0.94, 0.86, 0.01, 1.49, // w4-w8
                0.14, 0.94, 2.18, 0.05, 0.34, // w9-w13
                1.26, 0.29, 2.61, // w14-w16
            ],
        }
    }
}

impl FSRSParams {
    /// Accepts an optimized weight vector only if it has exactly 17 finite values.
    pub fn from_weights(weights: &[f64]) -> Option<Self> {
        if weights.len() != WEIGHT_COUNT || weights.iter().any(|w| !w.is_finite()) {
            return None;
        }
        let mut w = [0.0; WEIGHT_COUNT];
        w.copy_from_slice(weights);
        Some(Self { w })
    }

    /// Learner weights when usable, published defaults otherwise.
    pub fn resolve(custom: Option<&[f64]>) -> Self {
        match custom {
            None => Self::default(),
            Some(weights) => Self::from_weights(weights).unwrap_or_else(|| {
                tracing::warn!(
                    len = weights.len(),
                    "scheduler parameters rejected, using default weights"
                );
                Self::default()
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Rating {
    /// Quiz outcomes only ever produce a failing or a plain passing grade.
    pub fn from_correct(is_correct: bool) -> Self {
        if is_correct {
            Self::Good
        } else {
            Self::Again
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Again => "again",
            Self::Hard => "hard",
            Self::Good => "good",
            Self::Easy => "easy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "again" | "1" => Some(Self::Again),
            "hard" | "2" => Some(Self::Hard),
            "good" | "3" => Some(Self::Good),
            "easy" | "4" => Some(Self::Easy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardState {
    #[default]
    New,
    Learning,
    Review,
    Relearning,
}

impl CardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Learning => "learning",
            Self::Review => "review",
            Self::Relearning => "relearning",
        }
    }

    fn after(self, rating: Rating) -> Self {
        match (self, rating) {
            (Self::New, Rating::Easy) => Self::Review,
            (Self::New, _) => Self::Learning,
            (Self::Learning | Self::Relearning, Rating::Good | Rating::Easy) => Self::Review,
            (Self::Learning | Self::Relearning, _) => self,
            (Self::Review, Rating::Again) => Self::Relearning,
            (Self::Review, _) => Self::Review,
        }
    }
}

/// Per-topic or per-question memory state. Day fields are in model units;
/// quiz fields are what the product schedules against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCard {
    pub stability: f64,
    pub difficulty: f64,
    pub elapsed_days: f64,
    pub scheduled_days: f64,
    pub scheduled_quizzes: u32,
    pub reps: u32,
    pub lapses: u32,
    pub state: CardState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_quiz: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_quiz: Option<u32>,
}

impl MemoryCard {
    pub fn is_new(&self) -> bool {
        self.state == CardState::New
    }

    /// Never-scheduled cards are always due.
    pub fn is_due(&self, quiz_index: u32) -> bool {
        self.due_quiz.map_or(true, |due| due <= quiz_index)
    }
}

#[derive(Debug, Clone)]
pub struct FSRSResult {
    pub card: MemoryCard,
    pub interval_days: f64,
    /// Recall probability at the moment of review, before the update.
    pub retrievability: f64,
}

pub fn fsrs_retrievability(stability: f64, elapsed_days: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    let safe_elapsed = elapsed_days.max(0.0);
    (1.0 + FACTOR * safe_elapsed / stability).powf(DECAY)
}

/// Applies one review. Only the day-level fields are set here; quiz
/// bookkeeping belongs to the caller.
pub fn fsrs_review(
    card: &MemoryCard,
    rating: Rating,
    elapsed_days: f64,
    desired_retention: f64,
    params: &FSRSParams,
) -> FSRSResult {
    let w = &params.w;
    let rating_val = rating as i32;
    let elapsed = elapsed_days.max(0.0);

    let (stability, difficulty, retrievability) = if card.is_new() {
        (
            initial_stability(w, rating_val),
            initial_difficulty(w, rating_val),
            1.0,
        )
    } else {
        let r = fsrs_retrievability(card.stability, elapsed);
        let d = next_difficulty(w, card.difficulty, rating_val);
        let s = if rating == Rating::Again {
            next_forget_stability(w, card.difficulty, card.stability, r)
        } else {
            next_recall_stability(w, card.difficulty, card.stability, r, rating_val)
        };
        (s, d, r)
    };

    let stability = if stability.is_finite() { stability } else { MIN_STABILITY };
    let interval = next_interval(stability, desired_retention);

    FSRSResult {
        card: MemoryCard {
            stability,
            difficulty,
            elapsed_days: elapsed,
            scheduled_days: interval,
            reps: card.reps.saturating_add(1),
            lapses: if rating == Rating::Again {
                card.lapses.saturating_add(1)
            } else {
                card.lapses
            },
            state: card.state.after(rating),
            ..card.clone()
        },
        interval_days: interval,
        retrievability,
    }
}

fn initial_stability(w: &[f64; WEIGHT_COUNT], rating: i32) -> f64 {
    w[(rating - 1) as usize].max(MIN_STABILITY)
}

fn initial_difficulty(w: &[f64; WEIGHT_COUNT], rating: i32) -> f64 {
    clamp_difficulty(w[4] - (rating - 3) as f64 * w[5])
}

fn next_difficulty(w: &[f64; WEIGHT_COUNT], d: f64, rating: i32) -> f64 {
    let d_new = d - w[6] * (rating - 3) as f64;
    let d_mean = w[7] * initial_difficulty(w, 3) + (1.0 - w[7]) * d_new;
    clamp_difficulty(d_mean)
}

fn clamp_difficulty(d: f64) -> f64 {
    if d.is_finite() {
        d.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
    } else {
        MAX_DIFFICULTY
    }
}

fn next_recall_stability(w: &[f64; WEIGHT_COUNT], d: f64, s: f64, r: f64, rating: i32) -> f64 {
    let hard_penalty = if rating == 2 { w[15] } else { 1.0 };
    let easy_bonus = if rating == 4 { w[16] } else { 1.0 };

    let new_s = s
        * (1.0
            + w[8].exp()
                * (11.0 - d)
                * s.powf(-w[9])
                * ((1.0 - r) * w[10]).exp_m1()
                * hard_penalty
                * easy_bonus);
    new_s.max(MIN_STABILITY)
}

fn next_forget_stability(w: &[f64; WEIGHT_COUNT], d: f64, s: f64, r: f64) -> f64 {
    let new_s = w[11] * d.powf(-w[12]) * ((s + 1.0).powf(w[13]) - 1.0) * ((1.0 - r) * w[14]).exp();
    new_s.clamp(MIN_STABILITY, s.max(MIN_STABILITY))
}

pub fn next_interval(stability: f64, desired_retention: f64) -> f64 {
    let safe_retention = desired_retention.clamp(0.0001, 0.9999);
    let interval = stability / FACTOR * (safe_retention.powf(1.0 / DECAY) - 1.0);
    if interval.is_finite() {
        interval.clamp(1.0, MAX_INTERVAL_DAYS)
    } else {
        1.0
    }
}
