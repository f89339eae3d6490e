//! Judge ensemble: parallel LLM graders over the day's signals.
//!
//! One batched prompt lists every signal with its historical return,
//! thinking, evidence, limitations, and probability; `num_judgers`
//! independent LLM calls fire in parallel.  Each judge answers one line per
//! signal, `agent_name: score|reasons`.  A malformed judge fails alone and
//! merely shrinks that signal's score vector; a signal with zero successful
//! judges is dropped.  The raw responses and parsed scores are persisted
//! under `judger_scores/`.

use crate::quantcrew::artifacts::{write_json_atomic, Workspace};
use crate::quantcrew::client_wrapper::{CallOptions, Message};
use crate::quantcrew::contest::types::{JudgerScore, SignalData};
use crate::quantcrew::contest::ContestError;
use crate::quantcrew::gateway::LlmGateway;
use crate::quantcrew::prompts;
use lazy_static::lazy_static;
use log::{error, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

lazy_static! {
    static ref SCORE_LINE_RE: Regex =
        Regex::new(r"^\s*([A-Za-z0-9_\-]+)\s*:\s*(\d+(?:\.\d+)?)\s*\|\s*(.*)$")
            .expect("static regex");
}

/// Persisted entry for one judge's verdict on one signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredScore {
    pub score: f64,
    pub reasoning: String,
    pub judger_id: usize,
}

/// The `scores_<timestamp>.json` file layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeScoresFile {
    pub trigger_time: String,
    pub scores: BTreeMap<String, Vec<StoredScore>>,
    pub responses: BTreeMap<String, String>,
}

/// Parallel LLM scoring of the current signals.
pub struct SignalJudger {
    workspace: Workspace,
}

impl SignalJudger {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    /// Render the batched scoring prompt.
    pub fn build_scoring_prompt(
        &self,
        signals: &BTreeMap<String, SignalData>,
        historical_returns: &BTreeMap<String, Option<f64>>,
    ) -> String {
        let date = signals
            .values()
            .next()
            .map(|s| s.trigger_time.split(' ').next().unwrap_or("unknown"))
            .unwrap_or("unknown");

        let mut historical_performance = String::new();
        if !historical_returns.is_empty() {
            historical_performance.push_str("\nHistorical performance (mean daily return over the window):\n");
            for (agent_name, avg) in historical_returns {
                match avg {
                    Some(avg) => {
                        let _ = writeln!(historical_performance, "  {}: {:.2}%", agent_name, avg * 100.0);
                    }
                    None => {
                        let _ = writeln!(historical_performance, "  {}: no history", agent_name);
                    }
                }
            }
        }

        let mut signals_info = Vec::new();
        for (signal_name, signal) in signals {
            let mut evidence_text = String::new();
            for (index, evidence) in signal.evidence_list.iter().enumerate() {
                let _ = writeln!(
                    evidence_text,
                    "    {}. {} (time: {}, source: {})",
                    index + 1,
                    evidence.description,
                    evidence.time,
                    evidence.from_source
                );
            }
            let mut limitations_text = String::new();
            for (index, limitation) in signal.limitations.iter().enumerate() {
                let _ = writeln!(limitations_text, "    {}. {}", index + 1, limitation);
            }
            signals_info.push(format!(
                "\nResearcher: {}\nStock: {} ({})\nAction: {}\nOpportunity: {}\nProbability: {}\nBelief: {}\n\nThinking:\n{}\n\nSupport Evidence:\n{}\nLimitations:\n{}",
                signal_name,
                signal.symbol_name,
                signal.symbol_code,
                signal.action,
                signal.has_opportunity,
                signal.probability,
                signal.belief,
                signal.thinking,
                evidence_text,
                limitations_text
            ));
        }
        let separator = format!("\n{}\n", "=".repeat(80));
        let all_signals_text = signals_info.join(&separator);

        prompts::judge_scoring_prompt(date, &historical_performance, &all_signals_text)
    }

    /// Score the signals with `num_judgers` parallel judges and persist the
    /// results.  Returns the per-signal score vectors; only signals with at
    /// least one successful judge appear.
    pub async fn judge_signals(
        &self,
        gateway: &LlmGateway,
        signals: &BTreeMap<String, SignalData>,
        historical_returns: &BTreeMap<String, Option<f64>>,
        trigger_time: &str,
        num_judgers: usize,
    ) -> Result<BTreeMap<String, Vec<f64>>, ContestError> {
        if signals.is_empty() {
            return Err(ContestError::Judging("no signals to judge".to_string()));
        }
        info!("judging {} signals with {} judgers", signals.len(), num_judgers);

        let prompt = self.build_scoring_prompt(signals, historical_returns);
        let judge_futures = (0..num_judgers).map(|judger_id| {
            let prompt = prompt.clone();
            async move {
                let options = CallOptions {
                    temperature: 0.1,
                    max_tokens: Some(10_000),
                    ..CallOptions::default()
                };
                let response = gateway
                    .run(&[Message::user(&prompt)], &options)
                    .await
                    .map_err(|err| ContestError::Judging(err.to_string()))?;
                let scores = parse_judge_scores(&response.content, judger_id)?;
                Ok::<_, ContestError>((judger_id, response.content, scores))
            }
        });
        let results = futures_util::future::join_all(judge_futures).await;

        let mut all_scores: BTreeMap<String, Vec<StoredScore>> = BTreeMap::new();
        let mut all_responses: BTreeMap<String, String> = BTreeMap::new();
        for (judger_id, result) in results.into_iter().enumerate() {
            match result {
                Ok((id, response, scores)) => {
                    all_responses.insert(format!("judger_{}", id), response);
                    for (signal_name, score) in scores {
                        all_scores.entry(signal_name).or_default().push(StoredScore {
                            score: score.score,
                            reasoning: score.reasoning,
                            judger_id: score.judger_id,
                        });
                    }
                }
                Err(err) => {
                    error!("judger {} failed: {}", judger_id, err);
                    all_responses.insert(format!("judger_{}", judger_id), format!("error: {}", err));
                }
            }
        }

        if all_scores.is_empty() {
            return Err(ContestError::Judging(
                "every judger failed to produce scores".to_string(),
            ));
        }

        let scores_file = JudgeScoresFile {
            trigger_time: trigger_time.to_string(),
            scores: all_scores.clone(),
            responses: all_responses,
        };
        let path = self.workspace.judger_scores_path(trigger_time);
        write_json_atomic(&path, &scores_file)?;
        info!("judge scores saved to {}", path.display());

        Ok(all_scores
            .into_iter()
            .map(|(name, scores)| (name, scores.into_iter().map(|s| s.score).collect()))
            .collect())
    }
}

/// Parse one judge's reply: a line per signal, `name: score|reasons`.
///
/// Lines without both separators are ignored (judges like to add prose
/// around the verdict); a line that looks like a verdict but does not parse
/// fails the judge.
pub fn parse_judge_scores(
    content: &str,
    judger_id: usize,
) -> Result<BTreeMap<String, JudgerScore>, ContestError> {
    let mut scores = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || !line.contains(':') || !line.contains('|') {
            continue;
        }
        let captures = SCORE_LINE_RE.captures(line).ok_or_else(|| {
            ContestError::Judging(format!("judger {}: malformed score line {:?}", judger_id, line))
        })?;
        let score: f64 = captures[2].parse().map_err(|_| {
            ContestError::Judging(format!("judger {}: unparseable score in {:?}", judger_id, line))
        })?;
        if !(0.0..=100.0).contains(&score) {
            return Err(ContestError::Judging(format!(
                "judger {}: score {} outside [0, 100]",
                judger_id, score
            )));
        }
        let signal_name = captures[1].to_string();
        scores.insert(
            signal_name.clone(),
            JudgerScore {
                signal_name,
                score,
                reasoning: captures[3].trim().to_string(),
                judger_id,
            },
        );
    }
    if scores.is_empty() {
        return Err(ContestError::Judging(format!(
            "judger {} returned no score lines",
            judger_id
        )));
    }
    Ok(scores)
}

/// Arithmetic mean of the available judge scores per signal.
pub fn consensus_scores(judge_scores: &BTreeMap<String, Vec<f64>>) -> BTreeMap<String, f64> {
    judge_scores
        .iter()
        .filter(|(_, scores)| !scores.is_empty())
        .map(|(name, scores)| {
            (
                name.clone(),
                scores.iter().sum::<f64>() / scores.len() as f64,
            )
        })
        .collect()
}
