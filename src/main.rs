use std::path::Path;
use std::process::ExitCode;

use serde::Serialize;

use quiz_mastery::config::Config;
use quiz_mastery::logging::init_tracing;
use quiz_mastery::services::fsrs::Rating;
use quiz_mastery::{
    Curriculum, GradedAttempt, JsonFileStore, ProgressStore, QuizEngine, QuizRecord, StoreError,
    TopicConstraint,
};

const USAGE: &str = "usage: quiz-mastery <command> <learner> [args]

commands:
  submit <learner> <attempts.json>     record a quiz from a JSON array of graded attempts
  next <learner> [count] [--single-domain|--cross-domain]
  ability <learner>
  summary <learner>
  flashcard <learner> <question> <again|hard|good|easy> [topic...]
  rebuild <learner>                    replay the quiz log into a fresh progress document";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("QUIZ_CURRICULUM_PATH is not set")]
    MissingCurriculum,
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Output(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level, config.log_dir.as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&config, &args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(message)) => {
            eprintln!("{message}\n\n{USAGE}");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config, args: &[String]) -> Result<(), CliError> {
    let (command, learner) = match args {
        [command, learner, ..] => (command.as_str(), learner.as_str()),
        _ => return Err(CliError::Usage("missing command or learner".into())),
    };
    let rest = &args[2..];

    let engine = QuizEngine::new(config.engine.clone());
    let store = JsonFileStore::new(&config.data_dir);
    tracing::debug!(data_dir = %store.root().display(), command, learner, "starting");

    match command {
        "submit" => {
            let path = rest
                .first()
                .ok_or_else(|| CliError::Usage("submit needs an attempts file".into()))?;
            let curriculum = load_curriculum(config)?;
            let attempts: Vec<GradedAttempt> = read_json(Path::new(path))?;
            let summary = engine.submit_quiz(&store, learner, &curriculum, &QuizRecord::new(attempts))?;
            print_json(&summary)
        }
        "next" => {
            let curriculum = load_curriculum(config)?;
            let mut count = config.quiz_size;
            let mut constraint = None;
            for arg in rest {
                match arg.as_str() {
                    "--single-domain" => constraint = Some(TopicConstraint::SingleDomain),
                    "--cross-domain" => constraint = Some(TopicConstraint::CrossDomain),
                    other => {
                        count = other
                            .parse()
                            .map_err(|_| CliError::Usage(format!("invalid count {other:?}")))?
                    }
                }
            }
            let mut state = store
                .load(learner)?
                .unwrap_or_else(|| engine.new_progress(&curriculum));
            state.sync_curriculum(&curriculum);
            print_json(&engine.next_quiz_topics(&state, count, constraint))
        }
        "flashcard" => {
            let (question, rating, topics) = match rest {
                [question, rating, topics @ ..] => (question, rating, topics),
                _ => return Err(CliError::Usage("flashcard needs a question and a rating".into())),
            };
            let rating = Rating::parse(rating)
                .ok_or_else(|| CliError::Usage(format!("invalid rating {rating:?}")))?;
            let curriculum = load_curriculum(config)?;
            let mut state = store
                .load(learner)?
                .unwrap_or_else(|| engine.new_progress(&curriculum));
            state.sync_curriculum(&curriculum);
            let review = engine.review_flashcard(&mut state, question, topics, rating);
            store.save(learner, &state)?;
            print_json(&review)
        }
        "ability" => print_json(&engine.learner_ability(&store, learner)?),
        "summary" => match store.load(learner)? {
            Some(state) => print_json(&engine.summary(&state)),
            None => Err(CliError::Usage(format!("no progress stored for {learner:?}"))),
        },
        "rebuild" => {
            let curriculum = load_curriculum(config)?;
            let recalculation = engine.rebuild_learner(&store, learner, &curriculum)?;
            print_json(&serde_json::json!({
                "replayed": recalculation.replayed,
                "failed": recalculation.failed,
                "partial": recalculation.is_partial(),
                "phase": recalculation.state.current_phase,
            }))
        }
        other => Err(CliError::Usage(format!("unknown command {other:?}"))),
    }
}

fn load_curriculum(config: &Config) -> Result<Curriculum, CliError> {
    let path = config
        .curriculum_path
        .as_deref()
        .ok_or(CliError::MissingCurriculum)?;
    let curriculum: Curriculum = read_json(path)?;
    // re-run through the constructor to drop duplicate ids
    Ok(Curriculum::new(
        curriculum.topics.into_iter().map(|t| (t.id, t.domain_id)),
    ))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CliError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
