//! Contest orchestrator.
//!
//! One call to [`ResearchContest::run`] performs the full scoring pass for
//! a trigger time: load and evaluate the trading-day history, judge the
//! current signals in parallel, predict per-agent Sharpe with the on-disk
//! regression models, allocate weights from consensus and history, and
//! persist the final-result artifact.

use crate::quantcrew::config::ContestConfig;
use crate::quantcrew::contest::data_manager::ResearchDataManager;
use crate::quantcrew::contest::judger::{consensus_scores, SignalJudger};
use crate::quantcrew::contest::predictor::ResearchPredictor;
use crate::quantcrew::contest::types::{SignalData, WeightResult};
use crate::quantcrew::contest::weights::WeightOptimizer;
use crate::quantcrew::contest::ContestError;
use crate::quantcrew::runtime::Runtime;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The unified research-signal contest.
pub struct ResearchContest {
    runtime: Arc<Runtime>,
    config: ContestConfig,
    data_manager: ResearchDataManager,
    judger: SignalJudger,
    optimizer: WeightOptimizer,
}

impl ResearchContest {
    pub fn new(runtime: Arc<Runtime>, config: ContestConfig, market_name: impl Into<String>) -> Self {
        let market_name = market_name.into();
        let data_manager = ResearchDataManager::new(
            runtime.workspace.clone(),
            runtime.market.clone(),
            market_name,
            config.history_window_days,
        );
        let judger = SignalJudger::new(runtime.workspace.clone());
        let optimizer = WeightOptimizer::new(runtime.workspace.clone());
        Self {
            runtime,
            config,
            data_manager,
            judger,
            optimizer,
        }
    }

    pub fn data_manager(&self) -> &ResearchDataManager {
        &self.data_manager
    }

    /// Signals eligible for weighting: `has_opportunity == yes` with an
    /// actionable direction.  `yes` signals without a buy/sell action are
    /// deliberately excluded.
    pub fn filter_valid_signals(
        signals: &BTreeMap<String, SignalData>,
    ) -> BTreeMap<String, SignalData> {
        signals
            .iter()
            .filter(|(_, signal)| {
                signal.has_opportunity.eq_ignore_ascii_case("yes")
                    && matches!(
                        signal.action.to_ascii_lowercase().as_str(),
                        "buy" | "sell"
                    )
            })
            .map(|(name, signal)| (name.clone(), signal.clone()))
            .collect()
    }

    /// Run the contest for `trigger_time` over the given current signals.
    pub async fn run(
        &self,
        trigger_time: &str,
        current_signals: &BTreeMap<String, SignalData>,
    ) -> Result<WeightResult, ContestError> {
        info!("running research contest for {}", trigger_time);
        if current_signals.is_empty() {
            return Err(ContestError::MissingJudgeScores(
                "the predictor needs judge scores for the current signals, but none were provided"
                    .to_string(),
            ));
        }
        let current_date = trigger_time.split(' ').next().unwrap_or(trigger_time);

        // Step 1: load the trading-day history of every researcher.
        let mut agent_signals = self.data_manager.load_historical_signals(current_date)?;

        // Step 2: evaluate rewards the history is still missing.
        self.data_manager.evaluate_missing(&mut agent_signals).await;

        // Step 3: judge the current signals in parallel.
        let historical_means = self.data_manager.historical_mean_returns(&agent_signals);
        let judge_scores = self
            .judger
            .judge_signals(
                self.runtime.llm.as_ref(),
                current_signals,
                &historical_means,
                trigger_time,
                self.config.num_judgers,
            )
            .await?;

        // Step 4: predict Sharpe from history plus judge scores.  The
        // models must already exist on disk; there is no fallback.
        let predictor = ResearchPredictor::load(
            &self.runtime.workspace.model_dir(),
            self.config.history_window_days,
            self.config.prediction_window_days,
        )?;
        let predicted_sharpe = predictor.predict_signal_scores(&agent_signals, &judge_scores)?;

        // Step 5: allocate weights over the eligible signals.
        let valid_signals = Self::filter_valid_signals(current_signals);
        if valid_signals.len() < current_signals.len() {
            info!(
                "{} of {} signals eligible for weighting",
                valid_signals.len(),
                current_signals.len()
            );
        }
        let consensus = consensus_scores(&judge_scores);
        let eligible_consensus: BTreeMap<String, f64> = consensus
            .iter()
            .filter(|(name, _)| valid_signals.contains_key(*name))
            .map(|(name, score)| (name.clone(), *score))
            .collect();
        let historical_cumulative = self
            .data_manager
            .historical_cumulative_returns(&agent_signals);
        let weights = WeightOptimizer::optimize(&eligible_consensus, &historical_cumulative);

        // Step 6: persist the final result.
        let result = WeightOptimizer::build_result(
            trigger_time,
            weights,
            predicted_sharpe,
            &consensus,
        );
        if let Err(err) = self.optimizer.save_final_result(&result) {
            warn!("final result not persisted: {}", err);
        }

        info!(
            "contest complete: top signals {:?}, avg consensus {:.1}",
            result.summary.top_signals, result.summary.avg_score
        );
        Ok(result)
    }

    /// Train the prediction models from accumulated artifacts and persist
    /// them under the workspace model directory.
    pub async fn train_prediction_models(
        &self,
        training_dates: &[String],
    ) -> Result<(), ContestError> {
        let mut training_data: BTreeMap<String, Vec<Option<SignalData>>> = BTreeMap::new();
        for date in training_dates {
            let mut day_signals = self.data_manager.load_historical_signals(date)?;
            self.data_manager.evaluate_missing(&mut day_signals).await;
            self.data_manager.merge_judge_scores(&mut day_signals);
            for (agent_name, signals) in day_signals {
                let series = training_data.entry(agent_name).or_default();
                for signal in signals {
                    series.push(signal);
                }
            }
        }
        let predictor = ResearchPredictor::train(
            &training_data,
            self.config.history_window_days,
            self.config.prediction_window_days,
        )?;
        predictor
            .save(&self.runtime.workspace.model_dir())
            .map_err(ContestError::Io)
    }
}
