//! Historical signal loading and reward evaluation.
//!
//! Reads the per-agent report directories the research agents write,
//! walking backwards over **trading days**, and computes realized rewards
//! against the market provider: open(T) to open(next trading day),
//! sign-inverted for sells.  Magnitudes above 40% are limit-move anomalies
//! and rejected at this layer; call sites impute or exclude them.

use crate::quantcrew::artifacts::{read_json_opt, Workspace};
use crate::quantcrew::contest::types::{ContestData, SignalData};
use crate::quantcrew::contest::ContestError;
use crate::quantcrew::market::MarketProvider;
use crate::quantcrew::research_agent::SignalArtifact;
use chrono::{Duration, NaiveDate};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Daily returns beyond this magnitude are treated as limit-up/limit-down
/// artifacts rather than genuine signal performance.
pub const ANOMALY_RETURN_THRESHOLD: f64 = 0.40;

/// The last `n` trading days strictly before `date`, oldest first.
pub fn trading_dates_before(
    market: &dyn MarketProvider,
    market_name: &str,
    date: NaiveDate,
    n: usize,
) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = date;
    let mut guard = 0;
    while dates.len() < n && guard < 90 {
        current -= Duration::days(1);
        guard += 1;
        if market.is_trading_day(market_name, current) {
            dates.push(current);
        }
    }
    dates.reverse();
    dates
}

/// Loader and evaluator over the shared report workspace.
pub struct ResearchDataManager {
    workspace: Workspace,
    market: Arc<dyn MarketProvider>,
    market_name: String,
    history_window_days: usize,
    /// When non-empty, restrict loading to these agent directories.
    target_agents: Vec<String>,
}

impl ResearchDataManager {
    pub fn new(
        workspace: Workspace,
        market: Arc<dyn MarketProvider>,
        market_name: impl Into<String>,
        history_window_days: usize,
    ) -> Self {
        Self {
            workspace,
            market,
            market_name: market_name.into(),
            history_window_days,
            target_agents: Vec::new(),
        }
    }

    pub fn with_target_agents(mut self, target_agents: Vec<String>) -> Self {
        self.target_agents = target_agents;
        self
    }

    pub fn history_window_days(&self) -> usize {
        self.history_window_days
    }

    /// Agent directory names under `reports/`, sorted.
    pub fn agent_directories(&self) -> Vec<String> {
        let mut agents = Vec::new();
        let root = self.workspace.reports_root();
        if let Ok(entries) = std::fs::read_dir(&root) {
            for entry in entries.flatten() {
                if !entry.path().is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if self.target_agents.is_empty() || self.target_agents.contains(&name) {
                    agents.push(name);
                }
            }
        }
        agents.sort();
        agents
    }

    /// The last `history_window_days` trading days strictly before
    /// `current_date`, oldest first.
    pub fn historical_trading_dates(&self, current_date: NaiveDate) -> Vec<NaiveDate> {
        trading_dates_before(
            self.market.as_ref(),
            &self.market_name,
            current_date,
            self.history_window_days,
        )
    }

    /// Load every agent's signal for each historical trading day; missing
    /// days stay `None` so downstream imputation can handle them.
    pub fn load_historical_signals(
        &self,
        current_date: &str,
    ) -> Result<BTreeMap<String, Vec<Option<SignalData>>>, ContestError> {
        let date = NaiveDate::parse_from_str(current_date, "%Y-%m-%d").map_err(|err| {
            ContestError::InsufficientHistory(format!(
                "unparseable contest date {:?}: {}",
                current_date, err
            ))
        })?;
        let dates = self.historical_trading_dates(date);
        info!(
            "loading historical signals over {} trading days before {}",
            dates.len(),
            current_date
        );

        let mut agent_signals = BTreeMap::new();
        for agent_name in self.agent_directories() {
            let mut signals = Vec::with_capacity(dates.len());
            for date in &dates {
                signals.push(self.load_signal_for_date(&agent_name, *date));
            }
            let valid = signals.iter().filter(|s| s.is_some()).count();
            debug!("{}: {}/{} historical signals", agent_name, valid, signals.len());
            agent_signals.insert(agent_name, signals);
        }
        Ok(agent_signals)
    }

    fn load_signal_for_date(&self, agent_name: &str, date: NaiveDate) -> Option<SignalData> {
        let trigger_time = format!("{} 09:00:00", date.format("%Y-%m-%d"));
        let path = self.workspace.report_path(agent_name, &trigger_time);
        let artifact = read_json_opt::<SignalArtifact>(&path)?;
        Some(SignalData::from_artifact(agent_name, &artifact))
    }

    /// Load every agent's signal at exactly `trigger_time`.
    pub fn load_current_signals(&self, trigger_time: &str) -> BTreeMap<String, SignalData> {
        let mut signals = BTreeMap::new();
        for agent_name in self.agent_directories() {
            let path = self.workspace.report_path(&agent_name, trigger_time);
            if let Some(artifact) = read_json_opt::<SignalArtifact>(&path) {
                signals.insert(
                    agent_name.clone(),
                    SignalData::from_artifact(&agent_name, &artifact),
                );
            }
        }
        signals
    }

    /// Realized one-day return of a signal: open on the signal date to open
    /// on the next trading day, sign-inverted for sells.
    pub async fn signal_reward(&self, signal: &SignalData) -> Result<f64, ContestError> {
        if !signal.has_opportunity.eq_ignore_ascii_case("yes") {
            return Err(ContestError::Reward(format!(
                "signal {} has no opportunity (has_opportunity={})",
                signal.agent_name, signal.has_opportunity
            )));
        }
        if signal.symbol_code.trim().is_empty() {
            return Err(ContestError::Reward(format!(
                "signal {} is missing its symbol code",
                signal.agent_name
            )));
        }

        let entry = self
            .market
            .symbol_price(&self.market_name, &signal.symbol_code, &signal.trigger_time, 0)
            .await
            .map_err(|err| ContestError::Reward(err.to_string()))?;
        let exit = self
            .market
            .symbol_price(&self.market_name, &signal.symbol_code, &signal.trigger_time, 1)
            .await
            .map_err(|err| ContestError::Reward(err.to_string()))?;

        let raw_return = match signal.action.to_ascii_lowercase().as_str() {
            "buy" => (exit.open - entry.open) / entry.open,
            "sell" => (entry.open - exit.open) / entry.open,
            other => {
                return Err(ContestError::Reward(format!(
                    "signal {} has unknown action {:?}",
                    signal.agent_name, other
                )))
            }
        };

        if raw_return.abs() > ANOMALY_RETURN_THRESHOLD {
            return Err(ContestError::Reward(format!(
                "return {:.2}% for {} on {} exceeds the limit-move threshold",
                raw_return * 100.0,
                signal.symbol_code,
                signal.trigger_time
            )));
        }
        Ok(raw_return)
    }

    /// Evaluate rewards for every historical signal that lacks contest
    /// data.  Failures are logged and leave the signal unevaluated; the
    /// contest never fails the current run over missing history.
    pub async fn evaluate_missing(
        &self,
        agent_signals: &mut BTreeMap<String, Vec<Option<SignalData>>>,
    ) {
        let mut evaluated = 0usize;
        let mut skipped = 0usize;
        for signals in agent_signals.values_mut() {
            for slot in signals.iter_mut() {
                let Some(signal) = slot else { continue };
                if signal.has_contest_data() {
                    continue;
                }
                let evaluation_date = signal
                    .trigger_time
                    .split(' ')
                    .next()
                    .unwrap_or(&signal.trigger_time)
                    .to_string();
                match self.signal_reward(signal).await {
                    Ok(reward) => {
                        signal.contest_data = Some(ContestData {
                            reward,
                            evaluation_date,
                            judge_scores: None,
                        });
                        evaluated += 1;
                    }
                    Err(err) => {
                        debug!("leaving {} unevaluated: {}", signal.agent_name, err);
                        skipped += 1;
                    }
                }
            }
        }
        info!("reward evaluation: {} evaluated, {} skipped", evaluated, skipped);
    }

    /// Best-effort merge of persisted judge-score files into the history,
    /// enriching each evaluated day with that day's judge vector.  Used when
    /// assembling predictor training data.
    pub fn merge_judge_scores(&self, agent_signals: &mut BTreeMap<String, Vec<Option<SignalData>>>) {
        for (agent_name, signals) in agent_signals.iter_mut() {
            for slot in signals.iter_mut() {
                let Some(signal) = slot else { continue };
                let path = self.workspace.judger_scores_path(&signal.trigger_time);
                let Some(file) =
                    read_json_opt::<crate::quantcrew::contest::judger::JudgeScoresFile>(&path)
                else {
                    continue;
                };
                let Some(entries) = file.scores.get(agent_name) else {
                    continue;
                };
                let scores: Vec<f64> = entries.iter().map(|entry| entry.score).collect();
                if scores.is_empty() {
                    continue;
                }
                match &mut signal.contest_data {
                    Some(contest_data) => contest_data.judge_scores = Some(scores),
                    None => {
                        warn!(
                            "judge scores found for unevaluated signal {} at {}",
                            agent_name, signal.trigger_time
                        );
                    }
                }
            }
        }
    }

    /// Mean realized reward per agent over the evaluated history, used in
    /// the judge prompt.  Agents without any evaluated day map to `None`.
    pub fn historical_mean_returns(
        &self,
        agent_signals: &BTreeMap<String, Vec<Option<SignalData>>>,
    ) -> BTreeMap<String, Option<f64>> {
        let mut returns = BTreeMap::new();
        for (agent_name, signals) in agent_signals {
            let rewards: Vec<f64> = signals
                .iter()
                .flatten()
                .filter_map(|s| s.contest_data.as_ref().map(|c| c.reward))
                .collect();
            let mean = if rewards.is_empty() {
                None
            } else {
                Some(rewards.iter().sum::<f64>() / rewards.len() as f64)
            };
            returns.insert(agent_name.clone(), mean);
        }
        returns
    }

    /// Cumulative realized return per agent over the evaluated history,
    /// used by the weight optimizer's composite score.
    pub fn historical_cumulative_returns(
        &self,
        agent_signals: &BTreeMap<String, Vec<Option<SignalData>>>,
    ) -> BTreeMap<String, Option<f64>> {
        let mut returns = BTreeMap::new();
        for (agent_name, signals) in agent_signals {
            let rewards: Vec<f64> = signals
                .iter()
                .flatten()
                .filter_map(|s| s.contest_data.as_ref().map(|c| c.reward))
                .collect();
            let cumulative = if rewards.is_empty() {
                None
            } else {
                Some(rewards.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0)
            };
            returns.insert(agent_name.clone(), cumulative);
        }
        returns
    }
}
