use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::services::confidence::ConfidenceLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Used when a question does not say how many options it has.
    pub default_option_count: usize,
    pub default_max_points: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            default_option_count: 4,
            default_max_points: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityConfig {
    pub max_iterations: u32,
    pub convergence_threshold: f64,
    /// Below this many attempts the estimate is pulled into `sparse_theta_bound`.
    pub min_reliable_attempts: usize,
    pub sparse_theta_bound: f64,
    pub confidence_level: ConfidenceLevel,
}

impl Default for AbilityConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            convergence_threshold: 0.01,
            min_reliable_attempts: 15,
            sparse_theta_bound: 2.0,
            confidence_level: ConfidenceLevel::NinetyFive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Assumed learner cadence used to translate days into quiz offsets.
    pub quizzes_per_week: f64,
    pub desired_retention: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quizzes_per_week: 3.5,
            desired_retention: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub maintenance_mastery_ratio: f64,
    pub maintenance_quiz_count: u32,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            maintenance_mastery_ratio: 0.7,
            maintenance_quiz_count: 50,
        }
    }
}

/// Share of a quiz given to each topic bucket. Shares of zero take no part
/// in spill-over; leftovers always end in the random pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSplit {
    pub struggling: f64,
    pub learning: f64,
    pub mastered: f64,
    pub random: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub remediation: BucketSplit,
    pub maintenance: BucketSplit,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            remediation: BucketSplit {
                struggling: 0.5,
                learning: 0.3,
                mastered: 0.2,
                random: 0.0,
            },
            maintenance: BucketSplit {
                struggling: 0.2,
                learning: 0.0,
                mastered: 0.3,
                random: 0.5,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub scoring: ScoringConfig,
    pub ability: AbilityConfig,
    pub scheduler: SchedulerConfig,
    pub phase: PhaseConfig,
    pub selection: SelectionConfig,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Set when `ENABLE_FILE_LOGS` is on; `LOG_DIR` or `<data_dir>/logs`.
    pub log_dir: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub curriculum_path: Option<PathBuf>,
    pub quiz_size: usize,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let data_dir = std::env::var("QUIZ_DATA_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::data_local_dir().map(|dir| dir.join("quiz-mastery")))
            .unwrap_or_else(|| PathBuf::from("./data"));

        let log_dir = env_flag("ENABLE_FILE_LOGS").then(|| {
            std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("logs"))
        });

        let curriculum_path = std::env::var("QUIZ_CURRICULUM_PATH").ok().map(PathBuf::from);
        let quiz_size = env_parse::<usize>("QUIZ_SIZE")
            .filter(|size| *size > 0)
            .unwrap_or(10);

        let mut engine = EngineConfig::default();
        if let Some(cadence) = env_parse::<f64>("QUIZ_CADENCE_PER_WEEK").filter(|v| *v > 0.0) {
            engine.scheduler.quizzes_per_week = cadence;
        }
        if let Some(retention) =
            env_parse::<f64>("QUIZ_DESIRED_RETENTION").filter(|v| *v > 0.0 && *v < 1.0)
        {
            engine.scheduler.desired_retention = retention;
        }
        if let Some(count) = env_parse::<usize>("QUIZ_DEFAULT_OPTION_COUNT").filter(|v| *v >= 2) {
            engine.scoring.default_option_count = count;
        }
        if let Some(points) = env_parse::<u32>("QUIZ_DEFAULT_MAX_POINTS").filter(|v| *v > 0) {
            engine.scoring.default_max_points = points;
        }
        if let Some(level) = env_parse::<u8>("QUIZ_CONFIDENCE_LEVEL").and_then(ConfidenceLevel::from_percent) {
            engine.ability.confidence_level = level;
        }

        Self {
            log_level,
            log_dir,
            data_dir,
            curriculum_path,
            quiz_size,
            engine,
        }
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}
