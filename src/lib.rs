pub mod config;
pub mod engine;
pub mod logging;
pub mod services;
pub mod store;
pub mod types;

pub use config::{Config, EngineConfig};
pub use engine::{AbilityReport, QuizEngine};
pub use services::progress::{QuizError, QuizSummary, Recalculation};
pub use services::topic_selector::TopicConstraint;
pub use store::{JsonFileStore, MemoryStore, ProgressStore, StoreError};
pub use types::{Curriculum, GradedAttempt, Phase, ProgressState, Question, QuizRecord};
