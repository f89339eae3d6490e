//! Data types shared across the contest subsystem.

use crate::quantcrew::research_agent::SignalArtifact;
use crate::quantcrew::signal::{parse_signals, Evidence};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Evaluation results attached to a historical signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestData {
    /// Realized one-day return, sign-inverted for sells.
    pub reward: f64,
    /// Date the reward was evaluated for.
    pub evaluation_date: String,
    /// Judge scores recorded for the signal's day, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_scores: Option<Vec<f64>>,
}

/// One researcher's signal as the contest sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalData {
    pub agent_name: String,
    pub trigger_time: String,
    #[serde(default)]
    pub thinking: String,
    pub has_opportunity: String,
    pub action: String,
    pub symbol_code: String,
    pub symbol_name: String,
    #[serde(default)]
    pub evidence_list: Vec<Evidence>,
    #[serde(default)]
    pub limitations: Vec<String>,
    #[serde(default)]
    pub probability: u8,
    #[serde(default)]
    pub belief: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contest_data: Option<ContestData>,
}

impl SignalData {
    /// Whether the signal already carries evaluation results.
    pub fn has_contest_data(&self) -> bool {
        self.contest_data.is_some()
    }

    /// Build a contest signal from a persisted research report.  The first
    /// `<signal>` block wins; a report without one yields a no-opportunity
    /// placeholder so the researcher still occupies its slot in the history
    /// window.
    pub fn from_artifact(agent_name: &str, artifact: &SignalArtifact) -> Self {
        let parsed = parse_signals(&artifact.final_result_thinking, &artifact.final_result)
            .into_iter()
            .next();
        match parsed {
            Some(signal) => Self {
                agent_name: agent_name.to_string(),
                trigger_time: artifact.trigger_time.clone(),
                thinking: signal.thinking,
                has_opportunity: signal.has_opportunity,
                action: signal.action,
                symbol_code: signal.symbol_code,
                symbol_name: signal.symbol_name,
                evidence_list: signal.evidence_list,
                limitations: signal.limitations,
                probability: signal.probability,
                belief: artifact.belief.clone(),
                contest_data: None,
            },
            None => Self {
                agent_name: agent_name.to_string(),
                trigger_time: artifact.trigger_time.clone(),
                thinking: artifact.final_result_thinking.clone(),
                has_opportunity: "no".to_string(),
                action: "none".to_string(),
                symbol_code: String::new(),
                symbol_name: String::new(),
                evidence_list: Vec::new(),
                limitations: Vec::new(),
                probability: 0,
                belief: artifact.belief.clone(),
                contest_data: None,
            },
        }
    }
}

/// One judge's verdict on one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgerScore {
    pub signal_name: String,
    /// Final score in `[0, 100]` (judges start at 100 and only deduct).
    pub score: f64,
    pub reasoning: String,
    pub judger_id: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightSummary {
    /// Mean consensus score across the weighted signals.
    pub avg_score: f64,
    /// Up to three weighted signal names, highest consensus first.
    pub top_signals: Vec<String>,
}

/// The contest's final allocation for one trigger time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightResult {
    pub trigger_time: String,
    /// Per-signal weight in `[0, 1]`; the values sum to 1 unless every
    /// composite score was non-positive, in which case they sum to 0.
    pub weights: BTreeMap<String, f64>,
    /// Predicted Sharpe per agent from the regression models.
    pub predicted_sharpe: BTreeMap<String, f64>,
    pub summary: WeightSummary,
}
