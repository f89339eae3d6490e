//! Contest subsystem: judge-based scoring of research signals, historical
//! reward evaluation, a small regression predictor, and weight allocation.
//!
//! The [`ResearchContest`](contest::ResearchContest) orchestrator wires the
//! pieces together: load the trading-day history of every researcher,
//! evaluate missing rewards against the market, score the current signals
//! with a parallel judge ensemble, predict per-agent Sharpe with the ridge
//! models, allocate weights from consensus and history, and persist the
//! final result artifact.

pub mod contest;
pub mod data_contest;
pub mod data_manager;
pub mod judger;
pub mod predictor;
pub mod types;
pub mod weights;

pub use contest::ResearchContest;
pub use data_contest::DataContest;
pub use data_manager::ResearchDataManager;
pub use judger::SignalJudger;
pub use predictor::ResearchPredictor;
pub use types::{ContestData, JudgerScore, SignalData, WeightResult, WeightSummary};
pub use weights::WeightOptimizer;

use std::error::Error;
use std::fmt;

/// Errors raised by the contest subsystem.
///
/// Partial failures (one judge misbehaving, one day of history missing) are
/// absorbed locally; these variants are the invariant violations that must
/// bubble up to the run.
#[derive(Debug)]
pub enum ContestError {
    /// The regression model files are absent.  There is deliberately no
    /// silent fallback: a contest without models is a deployment error.
    ModelsMissing(String),
    /// The history window holds no usable reward data.
    InsufficientHistory(String),
    /// No judge scores are available for prediction.
    MissingJudgeScores(String),
    /// A reward could not be evaluated (bad signal fields, price gaps,
    /// limit-move anomalies).
    Reward(String),
    /// All judges failed or the scoring call itself failed.
    Judging(String),
    /// Artifact I/O failed.
    Io(std::io::Error),
}

impl fmt::Display for ContestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContestError::ModelsMissing(msg) => {
                write!(f, "prediction models not loaded: {}", msg)
            }
            ContestError::InsufficientHistory(msg) => {
                write!(f, "insufficient history: {}", msg)
            }
            ContestError::MissingJudgeScores(msg) => {
                write!(f, "missing judge scores: {}", msg)
            }
            ContestError::Reward(msg) => write!(f, "reward evaluation failed: {}", msg),
            ContestError::Judging(msg) => write!(f, "judging failed: {}", msg),
            ContestError::Io(err) => write!(f, "contest artifact I/O failed: {}", err),
        }
    }
}

impl Error for ContestError {}

impl From<std::io::Error> for ContestError {
    fn from(err: std::io::Error) -> Self {
        ContestError::Io(err)
    }
}
