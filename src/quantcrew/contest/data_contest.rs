//! Data-analyst contest: scoring factor quality to pick the best data
//! agents.
//!
//! Each historical factor is decomposed by the LLM into independent
//! observations; every observation is mapped to the companies or industries
//! it could move, each symbol is rated on a -2..=2 impact scale, and the
//! realized next-day price move turns the ratings into a reward.  Per-agent
//! rewards over the trading-day history rank the data agents, and the top-k
//! agents' current factors are the ones handed to the research pool.
//!
//! Rewards are written back into the factor files under a `contest_data`
//! key, so evaluation is incremental across runs.

use crate::quantcrew::artifacts::{read_json_opt, write_json_atomic, Workspace};
use crate::quantcrew::client_wrapper::{CallOptions, Message};
use crate::quantcrew::contest::data_manager::trading_dates_before;
use crate::quantcrew::data_agent::FactorArtifact;
use crate::quantcrew::gateway::LlmGateway;
use crate::quantcrew::market::MarketProvider;
use crate::quantcrew::prompts;
use crate::quantcrew::runtime::Runtime;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Price moves are capped to this band (in percent) before entering the
/// reward so a single outlier cannot dominate an agent's score.
const PRICE_CHANGE_CAP_PCT: f64 = 20.0;

/// How many data agents survive the contest.
const TOP_K_AGENTS: usize = 3;

lazy_static! {
    static ref OBSERVATION_RE: Regex =
        Regex::new(r"(?s)<observation>(.*?)</observation>").expect("static regex");
    static ref MENTION_RE: Regex = Regex::new(r"(?s)<mention>(.*?)</mention>").expect("static regex");
    static ref CONTENT_RE: Regex = Regex::new(r"(?s)<content>(.*?)</content>").expect("static regex");
    static ref TYPE_RE: Regex = Regex::new(r"(?s)<type>(.*?)</type>").expect("static regex");
    static ref RESULT_RE: Regex = Regex::new(r"(?s)<result>(.*?)</result>").expect("static regex");
    static ref RESULT_NAME_RE: Regex =
        Regex::new(r"(?s)<symbol_name>(.*?)</symbol_name>").expect("static regex");
    static ref REASON_RE: Regex = Regex::new(r"(?s)<reason>(.*?)</reason>").expect("static regex");
    static ref RATING_RE: Regex = Regex::new(r"(?s)<rating>(.*?)</rating>").expect("static regex");
}

/// Evaluation summary written back into the factor file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorContestData {
    pub reward: f64,
    pub symbols_count: usize,
    pub observations_count: usize,
}

/// The contest's lean view of one persisted factor.
#[derive(Debug, Clone)]
pub struct FactorData {
    pub agent_name: String,
    pub trigger_time: String,
    pub context_string: String,
    pub contest_data: Option<FactorContestData>,
    file_path: Option<PathBuf>,
}

impl FactorData {
    pub fn has_contest_data(&self) -> bool {
        self.contest_data.is_some()
    }
}

/// An entity an observation could move.
#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    pub content: String,
    /// `company` or `industry`.
    pub kind: String,
}

/// A symbol with its LLM impact rating and realized move.
#[derive(Debug, Clone)]
pub struct RatedSymbol {
    pub name: String,
    pub code: String,
    pub kind: String,
    pub rating: Option<i32>,
    pub reason: String,
    /// Next-day open-to-open change in percent.
    pub day_price_chg: Option<f64>,
}

/// One self-contained fact extracted from a factor.
#[derive(Debug, Clone)]
pub struct Observation {
    pub content: String,
    pub timestamp: String,
    pub mentions: Vec<Mention>,
    pub symbols: Vec<RatedSymbol>,
}

/// Decompose the observation-extraction reply.
pub fn parse_observations(reply: &str, timestamp: &str) -> Vec<Observation> {
    OBSERVATION_RE
        .captures_iter(reply)
        .filter_map(|c| {
            let content = c[1].trim().to_string();
            if content.is_empty() {
                return None;
            }
            Some(Observation {
                content,
                timestamp: timestamp.to_string(),
                mentions: Vec::new(),
                symbols: Vec::new(),
            })
        })
        .collect()
}

/// Decompose the mention-extraction reply.
pub fn parse_mentions(reply: &str) -> Vec<Mention> {
    MENTION_RE
        .captures_iter(reply)
        .filter_map(|block| {
            let content = CONTENT_RE.captures(&block[1])?[1].trim().to_string();
            let kind = TYPE_RE.captures(&block[1])?[1].trim().to_string();
            Some(Mention { content, kind })
        })
        .collect()
}

/// Apply the rating reply to the observation's symbols by name.
pub fn apply_ratings(reply: &str, symbols: &mut [RatedSymbol]) {
    for block in RESULT_RE.captures_iter(reply) {
        let Some(name) = RESULT_NAME_RE.captures(&block[1]).map(|c| c[1].trim().to_string()) else {
            continue;
        };
        let Some(rating_raw) = RATING_RE.captures(&block[1]).map(|c| c[1].trim().to_string()) else {
            continue;
        };
        let Ok(rating) = rating_raw.parse::<i32>() else {
            continue;
        };
        let reason = REASON_RE
            .captures(&block[1])
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();
        if let Some(symbol) = symbols.iter_mut().find(|s| s.name == name) {
            symbol.rating = Some(rating.clamp(-2, 2));
            symbol.reason = reason;
        }
    }
}

/// Mean per-sample reward across every rated symbol with a realized move.
/// Only positive ratings contribute (the factor is graded on the upside it
/// surfaced); each sample's move is capped to ±20%.
pub fn total_reward(observations: &[Observation]) -> (f64, usize) {
    let mut total = 0.0;
    let mut valid = 0usize;
    for observation in observations {
        for symbol in &observation.symbols {
            let (Some(rating), Some(day_price_chg)) = (symbol.rating, symbol.day_price_chg) else {
                continue;
            };
            let capped = day_price_chg.clamp(-PRICE_CHANGE_CAP_PCT, PRICE_CHANGE_CAP_PCT);
            if rating > 0 {
                total += rating as f64 * capped;
            }
            valid += 1;
        }
    }
    (total, valid)
}

/// LLM + market evaluation of one factor's quality.
pub struct FactorEvaluator {
    llm: Arc<LlmGateway>,
    market: Arc<dyn MarketProvider>,
    market_name: String,
}

impl FactorEvaluator {
    pub fn new(llm: Arc<LlmGateway>, market: Arc<dyn MarketProvider>, market_name: impl Into<String>) -> Self {
        Self {
            llm,
            market,
            market_name: market_name.into(),
        }
    }

    /// Evaluate one factor; `None` when no observations could be extracted
    /// or the LLM failed.
    pub async fn evaluate_factor(&self, factor: &FactorData) -> Option<FactorContestData> {
        let reply = self
            .run_llm(&prompts::extract_observations_prompt(&factor.context_string))
            .await?;
        let mut observations = parse_observations(&reply, &factor.trigger_time);
        if observations.is_empty() {
            warn!("no observations extracted for {}", factor.agent_name);
            return None;
        }

        let futures = observations
            .iter_mut()
            .map(|observation| self.process_observation(observation));
        futures_util::future::join_all(futures).await;

        let (total, valid) = total_reward(&observations);
        let reward = if valid == 0 { 0.0 } else { total / valid as f64 };
        let symbols_count = observations.iter().map(|o| o.symbols.len()).sum();

        info!(
            "factor {} at {} evaluated: reward {:.3} over {} samples",
            factor.agent_name, factor.trigger_time, reward, valid
        );
        Some(FactorContestData {
            reward,
            symbols_count,
            observations_count: observations.len(),
        })
    }

    async fn process_observation(&self, observation: &mut Observation) {
        if let Some(reply) = self.run_llm(&prompts::extract_mentions_prompt(&observation.content)).await {
            observation.mentions = parse_mentions(&reply);
        }
        observation.symbols = self.symbols_from_mentions(&observation.mentions);
        if observation.symbols.is_empty() {
            return;
        }

        let mut symbol_list = String::new();
        for (index, symbol) in observation.symbols.iter().enumerate() {
            symbol_list.push_str(&format!(
                "{}. name: {}, code: {}, type: {}\n",
                index + 1,
                symbol.name,
                symbol.code,
                symbol.kind
            ));
        }
        if let Some(reply) = self
            .run_llm(&prompts::rate_symbols_prompt(&observation.content, &symbol_list))
            .await
        {
            apply_ratings(&reply, &mut observation.symbols);
        }

        for symbol in observation.symbols.iter_mut() {
            if symbol.rating.is_none() || symbol.kind != "company" || symbol.code.is_empty() {
                continue;
            }
            symbol.day_price_chg = self
                .day_price_change(&symbol.code, &observation.timestamp)
                .await;
            if symbol.day_price_chg.is_none() {
                debug!("no price data for {} ({})", symbol.name, symbol.code);
            }
        }
    }

    fn symbols_from_mentions(&self, mentions: &[Mention]) -> Vec<RatedSymbol> {
        let mut symbols = Vec::new();
        for mention in mentions {
            match mention.kind.as_str() {
                "company" => {
                    let (name, code) =
                        self.market
                            .fix_symbol_code(&self.market_name, &mention.content, "");
                    symbols.push(RatedSymbol {
                        name,
                        code,
                        kind: "company".to_string(),
                        rating: None,
                        reason: String::new(),
                        day_price_chg: None,
                    });
                }
                "industry" => symbols.push(RatedSymbol {
                    name: mention.content.clone(),
                    code: String::new(),
                    kind: "industry".to_string(),
                    rating: None,
                    reason: String::new(),
                    day_price_chg: None,
                }),
                other => debug!("ignoring mention of unknown type {:?}", other),
            }
        }
        symbols
    }

    /// Open-to-next-open change in percent; a bar opening at its limit
    /// price counts as 0 (nothing was tradable).
    async fn day_price_change(&self, code: &str, timestamp: &str) -> Option<f64> {
        let current = self
            .market
            .symbol_price(&self.market_name, code, timestamp, 0)
            .await
            .ok()?;
        if let Some(limit) = current.limit_price {
            if current.open == limit {
                return Some(0.0);
            }
        }
        let next = self
            .market
            .symbol_price(&self.market_name, code, timestamp, 1)
            .await
            .ok()?;
        let pct = (next.open - current.open) / current.open * 100.0;
        Some((pct * 10_000.0).round() / 10_000.0)
    }

    async fn run_llm(&self, prompt: &str) -> Option<String> {
        match self
            .llm
            .run(&[Message::user(prompt)], &CallOptions::default())
            .await
        {
            Ok(response) => Some(response.content.trim().to_string()),
            Err(err) => {
                warn!("factor evaluation LLM call failed: {}", err);
                None
            }
        }
    }
}

/// Loads historical factors and writes evaluation results back.
pub struct FactorDataManager {
    workspace: Workspace,
    market: Arc<dyn MarketProvider>,
    market_name: String,
    history_window_days: usize,
    target_agents: Vec<String>,
}

impl FactorDataManager {
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

    fn agent_directories(&self) -> Vec<String> {
        let mut agents = Vec::new();
        let root = self.workspace.root().join("factors");
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

    /// One optional factor per agent per historical trading day, oldest
    /// first.
    pub fn load_historical_factors(
        &self,
        current_date: NaiveDate,
    ) -> BTreeMap<String, Vec<Option<FactorData>>> {
        let dates = trading_dates_before(
            self.market.as_ref(),
            &self.market_name,
            current_date,
            self.history_window_days,
        );
        let mut agent_factors = BTreeMap::new();
        for agent_name in self.agent_directories() {
            let mut factors = Vec::with_capacity(dates.len());
            for date in &dates {
                let trigger_time = format!("{} 09:00:00", date.format("%Y-%m-%d"));
                factors.push(self.load_factor(&agent_name, &trigger_time));
            }
            agent_factors.insert(agent_name, factors);
        }
        agent_factors
    }

    fn load_factor(&self, agent_name: &str, trigger_time: &str) -> Option<FactorData> {
        let path = self.workspace.factor_path(agent_name, trigger_time);
        let raw: Value = read_json_opt(&path)?;
        let contest_data = raw
            .get("contest_data")
            .and_then(|v| serde_json::from_value::<FactorContestData>(v.clone()).ok());
        Some(FactorData {
            agent_name: agent_name.to_string(),
            trigger_time: raw
                .get("trigger_time")
                .and_then(Value::as_str)
                .unwrap_or(trigger_time)
                .to_string(),
            context_string: raw
                .get("context_string")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            contest_data,
            file_path: Some(path),
        })
    }

    /// Merge the evaluation into the factor file, preserving every other
    /// field.
    pub fn save_contest_data(
        &self,
        factor: &FactorData,
        contest_data: &FactorContestData,
    ) -> std::io::Result<()> {
        let Some(path) = &factor.file_path else {
            return Err(std::io::Error::other("factor has no backing file"));
        };
        let mut raw: Value = crate::quantcrew::artifacts::read_json(path)?;
        raw["contest_data"] = serde_json::to_value(contest_data).map_err(std::io::Error::other)?;
        write_json_atomic(path, &raw)
    }
}

/// The data-analyst contest orchestrator.
pub struct DataContest {
    market_name: String,
    data_manager: FactorDataManager,
    evaluator: FactorEvaluator,
    top_k: usize,
}

impl DataContest {
    pub fn new(runtime: Arc<Runtime>, market_name: impl Into<String>, history_window_days: usize) -> Self {
        let market_name = market_name.into();
        let data_manager = FactorDataManager::new(
            runtime.workspace.clone(),
            runtime.market.clone(),
            market_name.clone(),
            history_window_days,
        );
        let evaluator = FactorEvaluator::new(
            runtime.llm.clone(),
            runtime.market.clone(),
            market_name.clone(),
        );
        Self {
            market_name,
            data_manager,
            evaluator,
            top_k: TOP_K_AGENTS,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Rank the data agents on historical factor quality and keep only the
    /// top agents' current factors.  With no usable history every current
    /// factor passes through unchanged.
    pub async fn run(
        &self,
        trigger_time: &str,
        current_factors: &[FactorArtifact],
    ) -> Vec<FactorArtifact> {
        let Some(current_date) = crate::quantcrew::market::trigger_date(trigger_time) else {
            warn!("unparseable trigger time {:?}, keeping all factors", trigger_time);
            return current_factors.to_vec();
        };
        info!(
            "running data contest for {} over {} current factors on {}",
            trigger_time,
            current_factors.len(),
            self.market_name
        );

        let mut agent_factors = self.data_manager.load_historical_factors(current_date);
        self.evaluate_missing(&mut agent_factors).await;

        let scores = predict_factor_scores(&agent_factors);
        if scores.is_empty() {
            info!("no factor history to rank on, keeping all current factors");
            return current_factors.to_vec();
        }

        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let selected: Vec<String> = ranked
            .iter()
            .take(self.top_k)
            .map(|(name, score)| {
                info!("data contest kept {} (score {:.3})", name, score);
                name.clone()
            })
            .collect();

        current_factors
            .iter()
            .filter(|factor| selected.contains(&factor.agent_name))
            .cloned()
            .collect()
    }

    async fn evaluate_missing(&self, agent_factors: &mut BTreeMap<String, Vec<Option<FactorData>>>) {
        let mut evaluated = 0usize;
        for factors in agent_factors.values_mut() {
            for slot in factors.iter_mut() {
                let Some(factor) = slot else { continue };
                if factor.has_contest_data() || factor.context_string.trim().is_empty() {
                    continue;
                }
                let Some(contest_data) = self.evaluator.evaluate_factor(factor).await else {
                    continue;
                };
                if let Err(err) = self.data_manager.save_contest_data(factor, &contest_data) {
                    warn!("evaluation for {} not persisted: {}", factor.agent_name, err);
                }
                factor.contest_data = Some(contest_data);
                evaluated += 1;
            }
        }
        if evaluated > 0 {
            info!("evaluated {} historical factors", evaluated);
        }
    }
}

/// Mean of the available rewards per agent (the fallback predictor of the
/// factor contest; agents without any evaluated day are skipped).
pub fn predict_factor_scores(
    agent_factors: &BTreeMap<String, Vec<Option<FactorData>>>,
) -> BTreeMap<String, f64> {
    let mut scores = BTreeMap::new();
    for (agent_name, factors) in agent_factors {
        let rewards: Vec<f64> = factors
            .iter()
            .flatten()
            .filter_map(|f| f.contest_data.as_ref().map(|c| c.reward))
            .collect();
        if rewards.is_empty() {
            continue;
        }
        scores.insert(
            agent_name.clone(),
            rewards.iter().sum::<f64>() / rewards.len() as f64,
        );
    }
    scores
}
