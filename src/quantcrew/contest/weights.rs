//! Weight allocation from consensus scores and historical returns.
//!
//! Composite score per signal:
//!
//! ```text
//! composite = consensus * (1 + 0.5 * historical_return)   if historical_return > 0
//! composite = 0                                           otherwise (or no history)
//! ```
//!
//! Positive composites are normalized to sum to 1; when no composite is
//! positive every weight is 0.  The resulting [`WeightResult`] is persisted
//! as the run's final-result artifact.

use crate::quantcrew::artifacts::{write_json_atomic, Workspace};
use crate::quantcrew::contest::types::{WeightResult, WeightSummary};
use log::info;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

const HISTORICAL_RETURN_FACTOR: f64 = 0.5;

/// How many signals the summary names.
const TOP_SIGNAL_COUNT: usize = 3;

/// Allocates weights and persists the final result.
pub struct WeightOptimizer {
    workspace: Workspace,
}

impl WeightOptimizer {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    /// Composite scores from consensus and per-agent historical returns.
    pub fn composite_scores(
        consensus_scores: &BTreeMap<String, f64>,
        historical_returns: &BTreeMap<String, Option<f64>>,
    ) -> BTreeMap<String, f64> {
        let mut composites = BTreeMap::new();
        for (signal_name, consensus) in consensus_scores {
            let composite = match historical_returns.get(signal_name).copied().flatten() {
                Some(historical_return) if historical_return > 0.0 => {
                    consensus * (1.0 + HISTORICAL_RETURN_FACTOR * historical_return)
                }
                _ => 0.0,
            };
            composites.insert(signal_name.clone(), composite);
        }
        composites
    }

    /// Normalize positive composites to sum to 1; non-positive entries get
    /// weight 0.
    pub fn normalize(composite_scores: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        let positive_total: f64 = composite_scores.values().filter(|c| **c > 0.0).sum();
        composite_scores
            .iter()
            .map(|(name, composite)| {
                let weight = if *composite > 0.0 && positive_total > 0.0 {
                    composite / positive_total
                } else {
                    0.0
                };
                (name.clone(), weight)
            })
            .collect()
    }

    /// Full allocation: composite then normalize.
    pub fn optimize(
        consensus_scores: &BTreeMap<String, f64>,
        historical_returns: &BTreeMap<String, Option<f64>>,
    ) -> BTreeMap<String, f64> {
        Self::normalize(&Self::composite_scores(consensus_scores, historical_returns))
    }

    /// Assemble the result record for one trigger time.
    pub fn build_result(
        trigger_time: &str,
        weights: BTreeMap<String, f64>,
        predicted_sharpe: BTreeMap<String, f64>,
        consensus_scores: &BTreeMap<String, f64>,
    ) -> WeightResult {
        let avg_score = if consensus_scores.is_empty() {
            0.0
        } else {
            consensus_scores.values().sum::<f64>() / consensus_scores.len() as f64
        };
        // Weighted signals ranked by their consensus score, capped at the
        // summary size.
        let mut top_signals: Vec<(String, f64)> = weights
            .iter()
            .filter(|(_, w)| **w > 0.0)
            .map(|(name, _)| {
                (
                    name.clone(),
                    consensus_scores.get(name).copied().unwrap_or(0.0),
                )
            })
            .collect();
        top_signals.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        WeightResult {
            trigger_time: trigger_time.to_string(),
            weights,
            predicted_sharpe,
            summary: WeightSummary {
                avg_score,
                top_signals: top_signals
                    .into_iter()
                    .take(TOP_SIGNAL_COUNT)
                    .map(|(name, _)| name)
                    .collect(),
            },
        }
    }

    /// Persist the final-result artifact; returns its path.
    pub fn save_final_result(&self, result: &WeightResult) -> io::Result<PathBuf> {
        let path = self.workspace.final_result_path(&result.trigger_time);
        write_json_atomic(&path, result)?;
        info!("final result saved to {}", path.display());
        Ok(path)
    }
}
