//! On-disk artifact layout and persistence helpers.
//!
//! Every agent persists exactly one JSON artifact per `(agent_name,
//! trigger_time)` and an agent run starts by attempting to load it back,
//! which is what makes re-runs idempotent.  Writers target a unique path per
//! key so there is no cross-writer contention, and writes go through a
//! write-temp-then-rename sequence so a crashed run never leaves a torn
//! file behind.
//!
//! Path layout under the workspace root:
//!
//! ```text
//! factors/<agent>/<trigger_time with ' '->'_' and ':'->'-'>.json
//! reports/<agent>/<trigger_time with ' '->'_'>.json
//! judger_scores/scores_<trigger_time with ' '->'_' and ':' removed>.json
//! final_result/final_result_<same compact stamp>.json
//! ```

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Factor files replace spaces with `_` and colons with `-`.
pub fn sanitize_factor_timestamp(trigger_time: &str) -> String {
    trigger_time.replace(' ', "_").replace(':', "-")
}

/// Report files replace spaces with `_` and keep colons.
pub fn sanitize_report_timestamp(trigger_time: &str) -> String {
    trigger_time.replace(' ', "_")
}

/// Contest files replace spaces with `_` and strip colons entirely.
pub fn compact_timestamp(trigger_time: &str) -> String {
    trigger_time.replace(' ', "_").replace(':', "")
}

/// The shared artifact directory of one pipeline deployment.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn factor_dir(&self, agent_name: &str) -> PathBuf {
        self.root.join("factors").join(agent_name)
    }

    pub fn report_dir(&self, agent_name: &str) -> PathBuf {
        self.root.join("reports").join(agent_name)
    }

    pub fn reports_root(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn judger_scores_dir(&self) -> PathBuf {
        self.root.join("judger_scores")
    }

    pub fn final_result_dir(&self) -> PathBuf {
        self.root.join("final_result")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn factor_path(&self, agent_name: &str, trigger_time: &str) -> PathBuf {
        self.factor_dir(agent_name)
            .join(format!("{}.json", sanitize_factor_timestamp(trigger_time)))
    }

    pub fn report_path(&self, agent_name: &str, trigger_time: &str) -> PathBuf {
        self.report_dir(agent_name)
            .join(format!("{}.json", sanitize_report_timestamp(trigger_time)))
    }

    pub fn judger_scores_path(&self, trigger_time: &str) -> PathBuf {
        self.judger_scores_dir()
            .join(format!("scores_{}.json", compact_timestamp(trigger_time)))
    }

    pub fn final_result_path(&self, trigger_time: &str) -> PathBuf {
        self.final_result_dir()
            .join(format!("final_result_{}.json", compact_timestamp(trigger_time)))
    }
}

/// Serialize `value` to `path` atomically (write temp, then rename).
///
/// Parent directories are created on demand.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)
}

/// Read and deserialize a JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(io::Error::other)
}

/// Like [`read_json`], but a missing or corrupt file is logged and reported
/// as `None` so the caller recomputes instead of failing the run.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    match read_json(path) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("ignoring unreadable artifact {}: {}", path.display(), err);
            None
        }
    }
}
