//! Regression predictor mapping (reward history, judge scores) to a
//! per-agent Sharpe estimate.
//!
//! Two ridge-regression models — one for the mean, one for the standard
//! deviation of the next `prediction_window_days` of returns — consume 12
//! features per agent:
//!
//! ```text
//! reward_mean_1d, reward_mean_3d, reward_std_3d, reward_mean_5d, reward_std_5d,
//! judge_0..judge_4, judge_mean, judge_std
//! ```
//!
//! Missing days in the 5-day reward window are imputed with the median of
//! the present days; a window with zero usable days is an explicit error,
//! never a silent zero.  Predicted Sharpe is `mean / max(std, 0.01)`.
//!
//! Models are persisted as JSON (`model_mean.json`, `model_std.json`) and
//! **must** be present on disk: a predictor without models fails loudly.
//! Training builds sliding-window samples from accumulated signal history
//! and fits by regularized normal equations.

use crate::quantcrew::artifacts::{read_json, write_json_atomic};
use crate::quantcrew::contest::data_manager::ANOMALY_RETURN_THRESHOLD;
use crate::quantcrew::contest::types::SignalData;
use crate::quantcrew::contest::ContestError;
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Number of model features.
pub const FEATURE_COUNT: usize = 12;

/// Number of judge scores consumed per agent.
pub const JUDGE_SCORE_COUNT: usize = 5;

const MEAN_MODEL_FILE: &str = "model_mean.json";
const STD_MODEL_FILE: &str = "model_std.json";
const MIN_TRAINING_SAMPLES: usize = 10;
const RIDGE_LAMBDA: f64 = 1.0;

/// A linear model over the feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl RegressionModel {
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept
    }

    /// Fit by ridge-regularized normal equations.  The intercept column is
    /// not regularized.
    pub fn fit(xs: &[Vec<f64>], ys: &[f64], lambda: f64) -> Result<Self, ContestError> {
        if xs.is_empty() || xs.len() != ys.len() {
            return Err(ContestError::InsufficientHistory(format!(
                "cannot fit on {} samples / {} targets",
                xs.len(),
                ys.len()
            )));
        }
        let cols = FEATURE_COUNT + 1;
        let mut design = DMatrix::zeros(xs.len(), cols);
        for (row, features) in xs.iter().enumerate() {
            for (col, value) in features.iter().take(FEATURE_COUNT).enumerate() {
                design[(row, col)] = *value;
            }
            design[(row, FEATURE_COUNT)] = 1.0;
        }
        let targets = DVector::from_iterator(ys.len(), ys.iter().copied());

        let mut normal = design.transpose() * &design;
        for diagonal in 0..FEATURE_COUNT {
            normal[(diagonal, diagonal)] += lambda;
        }
        let moment = design.transpose() * targets;
        let solution = normal.lu().solve(&moment).ok_or_else(|| {
            ContestError::InsufficientHistory("normal equations are singular".to_string())
        })?;

        Ok(Self {
            weights: solution.as_slice()[..FEATURE_COUNT].to_vec(),
            intercept: solution[FEATURE_COUNT],
        })
    }
}

/// Predicted Sharpe with the floored denominator.
pub fn sharpe(mean: f64, std: f64) -> f64 {
    mean / std.max(0.01)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_pop(values: &[f64]) -> f64 {
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

fn std_sample(values: &[f64]) -> f64 {
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64).sqrt()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// The mean/std model pair plus the window geometry.
#[derive(Debug)]
pub struct ResearchPredictor {
    model_mean: RegressionModel,
    model_std: RegressionModel,
    history_window_days: usize,
    prediction_window_days: usize,
}

impl ResearchPredictor {
    /// Load both models from `model_dir`, failing loudly when either file
    /// is absent or unreadable.
    pub fn load(
        model_dir: &Path,
        history_window_days: usize,
        prediction_window_days: usize,
    ) -> Result<Self, ContestError> {
        let mean_path = model_dir.join(MEAN_MODEL_FILE);
        let std_path = model_dir.join(STD_MODEL_FILE);
        if !mean_path.exists() || !std_path.exists() {
            return Err(ContestError::ModelsMissing(format!(
                "expected {} and {} under {}",
                MEAN_MODEL_FILE,
                STD_MODEL_FILE,
                model_dir.display()
            )));
        }
        let model_mean: RegressionModel = read_json(&mean_path)
            .map_err(|err| ContestError::ModelsMissing(format!("{}: {}", mean_path.display(), err)))?;
        let model_std: RegressionModel = read_json(&std_path)
            .map_err(|err| ContestError::ModelsMissing(format!("{}: {}", std_path.display(), err)))?;
        info!("prediction models loaded from {}", model_dir.display());
        Ok(Self {
            model_mean,
            model_std,
            history_window_days,
            prediction_window_days,
        })
    }

    /// Persist both models under `model_dir`.
    pub fn save(&self, model_dir: &Path) -> std::io::Result<()> {
        write_json_atomic(&model_dir.join(MEAN_MODEL_FILE), &self.model_mean)?;
        write_json_atomic(&model_dir.join(STD_MODEL_FILE), &self.model_std)
    }

    /// Predict the Sharpe of every judged agent.
    ///
    /// `agent_signals` carries the history window (one optional signal per
    /// trading day, oldest first); `judge_scores` carries the current day's
    /// score vectors.  Agents without judge scores are skipped; an agent
    /// whose history holds zero usable rewards is an error.
    pub fn predict_signal_scores(
        &self,
        agent_signals: &BTreeMap<String, Vec<Option<SignalData>>>,
        judge_scores: &BTreeMap<String, Vec<f64>>,
    ) -> Result<BTreeMap<String, f64>, ContestError> {
        let mut predicted = BTreeMap::new();
        for (agent_name, scores) in judge_scores {
            let rewards = agent_signals
                .get(agent_name)
                .map(|signals| extract_rewards_for_prediction(signals))
                .unwrap_or_else(|| vec![None; self.history_window_days]);
            let features = self.features_from(&rewards, scores).map_err(|err| {
                ContestError::InsufficientHistory(format!("{}: {}", agent_name, err))
            })?;
            let predicted_mean = self.model_mean.predict(&features);
            let predicted_std = self.model_std.predict(&features);
            let score = sharpe(predicted_mean, predicted_std);
            debug!(
                "{}: mean={:.5} std={:.5} sharpe={:.3}",
                agent_name, predicted_mean, predicted_std, score
            );
            predicted.insert(agent_name.clone(), score);
        }
        Ok(predicted)
    }

    /// Build the 12-feature vector from one reward window and one judge
    /// vector.
    pub fn features_from(
        &self,
        history: &[Option<f64>],
        judge_scores: &[f64],
    ) -> Result<Vec<f64>, ContestError> {
        if history.len() != self.history_window_days {
            return Err(ContestError::InsufficientHistory(format!(
                "history window has {} days, expected {}",
                history.len(),
                self.history_window_days
            )));
        }
        if judge_scores.len() < JUDGE_SCORE_COUNT {
            return Err(ContestError::MissingJudgeScores(format!(
                "need {} judge scores, got {}",
                JUDGE_SCORE_COUNT,
                judge_scores.len()
            )));
        }
        let present: Vec<f64> = history.iter().flatten().copied().collect();
        if present.is_empty() {
            return Err(ContestError::InsufficientHistory(
                "history window holds zero valid days".to_string(),
            ));
        }
        let fill = median(&present);
        let imputed: Vec<f64> = history.iter().map(|r| r.unwrap_or(fill)).collect();

        let last_3 = &imputed[imputed.len().saturating_sub(3)..];
        let judges = &judge_scores[..JUDGE_SCORE_COUNT];

        let mut features = Vec::with_capacity(FEATURE_COUNT);
        features.push(imputed[imputed.len() - 1]);
        features.push(mean(last_3));
        features.push(std_pop(last_3));
        features.push(mean(&imputed));
        features.push(std_pop(&imputed));
        features.extend_from_slice(judges);
        features.push(mean(judges));
        features.push(std_pop(judges));
        Ok(features)
    }

    /// Train a fresh model pair from accumulated signal history.
    ///
    /// Each agent's series (oldest first) is scanned with a sliding window:
    /// features come from the 5-day reward window plus the judge scores at
    /// the window edge; targets are the mean and sample-std of the valid
    /// rewards in the following `prediction_window_days`.
    pub fn train(
        training_data: &BTreeMap<String, Vec<Option<SignalData>>>,
        history_window_days: usize,
        prediction_window_days: usize,
    ) -> Result<Self, ContestError> {
        let mut xs: Vec<Vec<f64>> = Vec::new();
        let mut mean_targets: Vec<f64> = Vec::new();
        let mut std_targets: Vec<f64> = Vec::new();

        // Template predictor used only for feature construction.
        let feature_builder = Self {
            model_mean: RegressionModel {
                weights: vec![0.0; FEATURE_COUNT],
                intercept: 0.0,
            },
            model_std: RegressionModel {
                weights: vec![0.0; FEATURE_COUNT],
                intercept: 0.0,
            },
            history_window_days,
            prediction_window_days,
        };

        for (agent_name, signals) in training_data {
            let rewards = extract_rewards_for_training(signals);
            let judge_vectors: Vec<Option<Vec<f64>>> = signals
                .iter()
                .map(|slot| {
                    slot.as_ref()
                        .and_then(|s| s.contest_data.as_ref())
                        .and_then(|c| c.judge_scores.clone())
                })
                .collect();

            if rewards.len() < history_window_days + prediction_window_days {
                continue;
            }

            for index in history_window_days..=(rewards.len() - prediction_window_days) {
                let window = &rewards[index - history_window_days..index];
                let valid_history = window.iter().flatten().count();
                if valid_history < 2 {
                    continue;
                }
                let Some(judges) = judge_vectors[index - 1].as_ref() else {
                    continue;
                };
                let future = &rewards[index..index + prediction_window_days];
                let future_valid: Vec<f64> = future.iter().flatten().copied().collect();
                let (target_mean, target_std) = match future_valid.len() {
                    0 => continue,
                    1 => (future_valid[0], 0.01),
                    _ => (
                        mean(&future_valid),
                        std_sample(&future_valid).max(0.01),
                    ),
                };
                match feature_builder.features_from(window, judges) {
                    Ok(features) => {
                        xs.push(features);
                        mean_targets.push(target_mean);
                        std_targets.push(target_std);
                    }
                    Err(err) => debug!("skipping sample for {}: {}", agent_name, err),
                }
            }
        }

        if xs.len() < MIN_TRAINING_SAMPLES {
            return Err(ContestError::InsufficientHistory(format!(
                "only {} training samples, need at least {}",
                xs.len(),
                MIN_TRAINING_SAMPLES
            )));
        }
        info!("training prediction models on {} samples", xs.len());

        Ok(Self {
            model_mean: RegressionModel::fit(&xs, &mean_targets, RIDGE_LAMBDA)?,
            model_std: RegressionModel::fit(&xs, &std_targets, RIDGE_LAMBDA)?,
            history_window_days,
            prediction_window_days,
        })
    }
}

/// Rewards for prediction: anomalies collapse to 0, unevaluated days stay
/// `None`.
fn extract_rewards_for_prediction(signals: &[Option<SignalData>]) -> Vec<Option<f64>> {
    signals
        .iter()
        .map(|slot| {
            slot.as_ref()
                .and_then(|s| s.contest_data.as_ref())
                .map(|c| {
                    if c.reward.abs() > ANOMALY_RETURN_THRESHOLD {
                        0.0
                    } else {
                        c.reward
                    }
                })
        })
        .collect()
}

/// Rewards for training: anomalies are excluded outright.
fn extract_rewards_for_training(signals: &[Option<SignalData>]) -> Vec<Option<f64>> {
    signals
        .iter()
        .map(|slot| {
            slot.as_ref()
                .and_then(|s| s.contest_data.as_ref())
                .map(|c| c.reward)
                .filter(|r| r.abs() <= ANOMALY_RETURN_THRESHOLD)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantcrew::contest::types::ContestData;

    fn predictor() -> ResearchPredictor {
        ResearchPredictor {
            model_mean: RegressionModel {
                weights: vec![0.0; FEATURE_COUNT],
                intercept: 0.02,
            },
            model_std: RegressionModel {
                weights: vec![0.0; FEATURE_COUNT],
                intercept: 0.005,
            },
            history_window_days: 5,
            prediction_window_days: 3,
        }
    }

    fn day(reward: f64, judges: Option<Vec<f64>>) -> Option<SignalData> {
        Some(SignalData {
            agent_name: "agent_0".into(),
            trigger_time: "2025-07-09 09:00:00".into(),
            thinking: String::new(),
            has_opportunity: "yes".into(),
            action: "buy".into(),
            symbol_code: "600519.SH".into(),
            symbol_name: "x".into(),
            evidence_list: Vec::new(),
            limitations: Vec::new(),
            probability: 50,
            belief: String::new(),
            contest_data: Some(ContestData {
                reward,
                evaluation_date: "2025-07-09".into(),
                judge_scores: judges,
            }),
        })
    }

    #[test]
    fn test_sharpe_floors_the_denominator() {
        assert_eq!(sharpe(0.02, 0.0), 2.0);
        assert_eq!(sharpe(0.02, 0.04), 0.5);
    }

    #[test]
    fn test_features_from_imputes_with_median() {
        let predictor = predictor();
        let history = vec![Some(0.01), None, Some(0.03), None, Some(0.02)];
        let judges = vec![80.0, 70.0, 90.0, 60.0, 75.0];
        let features = predictor.features_from(&history, &judges).unwrap();
        assert_eq!(features.len(), FEATURE_COUNT);
        // Median of {0.01, 0.03, 0.02} is 0.02; imputed window ends 0.02.
        assert!((features[0] - 0.02).abs() < 1e-12);
        // mean_5d over [0.01, 0.02, 0.03, 0.02, 0.02].
        assert!((features[3] - 0.02).abs() < 1e-12);
        // judge_mean.
        assert!((features[10] - 75.0).abs() < 1e-12);
    }

    #[test]
    fn test_features_require_valid_history_and_judges() {
        let predictor = predictor();
        let empty = vec![None; 5];
        let judges = vec![80.0, 70.0, 90.0, 60.0, 75.0];
        assert!(matches!(
            predictor.features_from(&empty, &judges),
            Err(ContestError::InsufficientHistory(_))
        ));
        let history = vec![Some(0.01); 5];
        assert!(matches!(
            predictor.features_from(&history, &[80.0, 70.0]),
            Err(ContestError::MissingJudgeScores(_))
        ));
        assert!(predictor.features_from(&[Some(0.01); 4], &judges).is_err());
    }

    #[test]
    fn test_predict_skips_unjudged_and_fails_on_empty_history() {
        let predictor = predictor();
        let mut history = BTreeMap::new();
        history.insert(
            "agent_0".to_string(),
            vec![day(0.01, None), day(0.02, None), None, day(0.015, None), day(0.0, None)],
        );
        history.insert("agent_1".to_string(), vec![None; 5]);

        let mut judge_scores = BTreeMap::new();
        judge_scores.insert("agent_0".to_string(), vec![80.0, 70.0, 90.0, 60.0, 75.0]);
        let predicted = predictor
            .predict_signal_scores(&history, &judge_scores)
            .unwrap();
        assert_eq!(predicted.len(), 1);
        assert!((predicted["agent_0"] - 2.0).abs() < 1e-9);

        // A judged agent with an all-empty window is a loud failure.
        judge_scores.insert("agent_1".to_string(), vec![80.0, 70.0, 90.0, 60.0, 75.0]);
        assert!(predictor.predict_signal_scores(&history, &judge_scores).is_err());
    }

    #[test]
    fn test_fit_recovers_a_linear_relation() {
        // y = 3*x0 + 0.5 with the other features constant.
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for i in 0..40 {
            let x0 = i as f64 / 10.0;
            let mut features = vec![0.0; FEATURE_COUNT];
            features[0] = x0;
            xs.push(features);
            ys.push(3.0 * x0 + 0.5);
        }
        let model = RegressionModel::fit(&xs, &ys, 1e-6).unwrap();
        assert!((model.weights[0] - 3.0).abs() < 1e-3);
        assert!((model.intercept - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_train_save_load_predict() {
        let dir = tempfile::tempdir().unwrap();

        // 20 days of history with judge scores on every day.
        let judges = vec![80.0, 75.0, 70.0, 85.0, 78.0];
        let mut training: BTreeMap<String, Vec<Option<SignalData>>> = BTreeMap::new();
        let series: Vec<Option<SignalData>> = (0..20)
            .map(|i| day(0.01 + 0.001 * (i % 5) as f64, Some(judges.clone())))
            .collect();
        training.insert("agent_0".to_string(), series.clone());
        training.insert("agent_1".to_string(), series);

        let trained = ResearchPredictor::train(&training, 5, 3).unwrap();
        trained.save(dir.path()).unwrap();

        let loaded = ResearchPredictor::load(dir.path(), 5, 3).unwrap();
        assert_eq!(loaded.model_mean, trained.model_mean);

        let history: Vec<Option<SignalData>> = (0..5)
            .map(|i| day(0.01 + 0.001 * i as f64, None))
            .collect();
        let mut agent_signals = BTreeMap::new();
        agent_signals.insert("agent_0".to_string(), history);
        let mut judge_scores = BTreeMap::new();
        judge_scores.insert("agent_0".to_string(), judges);
        let predicted = loaded
            .predict_signal_scores(&agent_signals, &judge_scores)
            .unwrap();
        assert!(predicted["agent_0"].is_finite());
    }

    #[test]
    fn test_load_fails_loudly_without_models() {
        let dir = tempfile::tempdir().unwrap();
        let err = ResearchPredictor::load(dir.path(), 5, 3).unwrap_err();
        assert!(matches!(err, ContestError::ModelsMissing(_)));
    }

    #[test]
    fn test_train_needs_enough_samples() {
        let mut training: BTreeMap<String, Vec<Option<SignalData>>> = BTreeMap::new();
        training.insert("agent_0".to_string(), vec![day(0.01, None); 6]);
        assert!(matches!(
            ResearchPredictor::train(&training, 5, 3),
            Err(ContestError::InsufficientHistory(_))
        ));
    }
}
