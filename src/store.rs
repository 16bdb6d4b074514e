//! Learner persistence: one progress document plus an append-only quiz log
//! per learner.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::services::fsrs::FSRSParams;
use crate::types::{ProgressState, QuizRecord};

const PROGRESS_FILE: &str = "progress.json";
const HISTORY_FILE: &str = "history.jsonl";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid learner id: {0:?}")]
    InvalidLearnerId(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub trait ProgressStore: Send + Sync {
    fn load(&self, learner_id: &str) -> Result<Option<ProgressState>, StoreError>;
    fn save(&self, learner_id: &str, state: &ProgressState) -> Result<(), StoreError>;
    /// Logs `quiz` unless a quiz with the same id is already logged.
    /// Returns whether a line was written.
    fn append_quiz(&self, learner_id: &str, quiz: &QuizRecord) -> Result<bool, StoreError>;
    /// Every logged quiz for the learner, oldest first.
    fn load_history(&self, learner_id: &str) -> Result<Vec<QuizRecord>, StoreError>;
}

pub fn validate_learner_id(learner_id: &str) -> Result<(), StoreError> {
    let valid = !learner_id.is_empty()
        && !learner_id.starts_with('.')
        && learner_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidLearnerId(learner_id.to_string()))
    }
}

/// The state as it should be persisted: weights the scheduler would refuse
/// are dropped so the document always loads again.
fn storable(state: &ProgressState) -> Cow<'_, ProgressState> {
    let usable = state
        .scheduler_parameters
        .as_deref()
        .map_or(true, |weights| FSRSParams::from_weights(weights).is_some());
    if usable {
        Cow::Borrowed(state)
    } else {
        let mut cleaned = state.clone();
        cleaned.sanitize_scheduler_parameters();
        Cow::Owned(cleaned)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<String, ProgressState>>,
    histories: RwLock<HashMap<String, Vec<QuizRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for MemoryStore {
    fn load(&self, learner_id: &str) -> Result<Option<ProgressState>, StoreError> {
        validate_learner_id(learner_id)?;
        Ok(self.states.read().get(learner_id).cloned())
    }

    fn save(&self, learner_id: &str, state: &ProgressState) -> Result<(), StoreError> {
        validate_learner_id(learner_id)?;
        self.states
            .write()
            .insert(learner_id.to_string(), storable(state).into_owned());
        Ok(())
    }

    fn append_quiz(&self, learner_id: &str, quiz: &QuizRecord) -> Result<bool, StoreError> {
        validate_learner_id(learner_id)?;
        let mut histories = self.histories.write();
        let history = histories.entry(learner_id.to_string()).or_default();
        if history.iter().any(|logged| logged.quiz_id == quiz.quiz_id) {
            return Ok(false);
        }
        history.push(quiz.clone());
        Ok(true)
    }

    fn load_history(&self, learner_id: &str) -> Result<Vec<QuizRecord>, StoreError> {
        validate_learner_id(learner_id)?;
        Ok(self
            .histories
            .read()
            .get(learner_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// `<root>/<learner>/progress.json` and `<root>/<learner>/history.jsonl`.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn learner_dir(&self, learner_id: &str) -> Result<PathBuf, StoreError> {
        validate_learner_id(learner_id)?;
        Ok(self.root.join(learner_id))
    }
}

impl ProgressStore for JsonFileStore {
    fn load(&self, learner_id: &str) -> Result<Option<ProgressState>, StoreError> {
        let path = self.learner_dir(learner_id)?.join(PROGRESS_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, learner_id: &str, state: &ProgressState) -> Result<(), StoreError> {
        let dir = self.learner_dir(learner_id)?;
        fs::create_dir_all(&dir)?;

        let body = serde_json::to_vec_pretty(&*storable(state))?;
        let tmp = dir.join(format!("{PROGRESS_FILE}.tmp"));
        fs::write(&tmp, body)?;
        fs::rename(&tmp, dir.join(PROGRESS_FILE))?;

        tracing::debug!(learner = learner_id, quizzes = state.total_quizzes_completed, "progress saved");
        Ok(())
    }

    fn append_quiz(&self, learner_id: &str, quiz: &QuizRecord) -> Result<bool, StoreError> {
        let dir = self.learner_dir(learner_id)?;
        if self
            .load_history(learner_id)?
            .iter()
            .any(|logged| logged.quiz_id == quiz.quiz_id)
        {
            tracing::debug!(learner = learner_id, quiz_id = %quiz.quiz_id, "quiz already logged");
            return Ok(false);
        }
        fs::create_dir_all(&dir)?;

        let mut line = serde_json::to_string(quiz)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(HISTORY_FILE))?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(true)
    }

    fn load_history(&self, learner_id: &str) -> Result<Vec<QuizRecord>, StoreError> {
        let path = self.learner_dir(learner_id)?.join(HISTORY_FILE);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut history = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<QuizRecord>(&line) {
                Ok(quiz) => history.push(quiz),
                Err(e) => {
                    // tolerate a torn trailing write
                    tracing::warn!(learner = learner_id, line = number + 1, error = %e, "unreadable history line skipped");
                }
            }
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learner_id_validation() {
        assert!(validate_learner_id("learner-01_a.b").is_ok());
        for bad in ["", "../etc", ".hidden", "a/b", "a\\b", "a b"] {
            assert!(
                matches!(validate_learner_id(bad), Err(StoreError::InvalidLearnerId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load("l1").unwrap().is_none());
        assert!(store.load_history("l1").unwrap().is_empty());

        let state = ProgressState::new(&crate::types::Curriculum::new([("a", "d")]));
        store.save("l1", &state).unwrap();
        store.append_quiz("l1", &QuizRecord::new(Vec::new())).unwrap();

        assert_eq!(store.load("l1").unwrap(), Some(state));
        assert_eq!(store.load_history("l1").unwrap().len(), 1);
    }

    #[test]
    fn test_append_skips_logged_quiz_id() {
        let store = MemoryStore::new();
        let quiz = QuizRecord::new(Vec::new());
        assert!(store.append_quiz("l1", &quiz).unwrap());
        assert!(!store.append_quiz("l1", &quiz).unwrap());
        assert!(store.append_quiz("l1", &QuizRecord::new(Vec::new())).unwrap());
        assert_eq!(store.load_history("l1").unwrap().len(), 2);
    }

    #[test]
    fn test_saved_state_drops_unusable_weights() {
        let store = MemoryStore::new();
        let mut state = ProgressState::new(&crate::types::Curriculum::new([("a", "d")]));
        let mut weights = vec![0.5; 17];
        weights[3] = f64::NAN;
        state.scheduler_parameters = Some(weights);

        store.save("l1", &state).unwrap();
        let loaded = store.load("l1").unwrap().unwrap();
        assert!(loaded.scheduler_parameters.is_none());
        assert_eq!(loaded.topic_performance, state.topic_performance);
    }
}
