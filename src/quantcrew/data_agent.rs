//! Data Analysis Agent.
//!
//! Distills heterogeneous raw documents into one compact, cite-referenced
//! "factor" text per `(agent_name, trigger_time)`:
//!
//! ```text
//! raw rows -> batches -> LLM title filter -> LLM content summary -> merge -> factor
//! ```
//!
//! Batches run concurrently under a semaphore; a failed batch is recorded
//! and skipped, never fatal.  The agent is idempotent: a run first tries to
//! load its factor artifact and short-circuits when one exists, so a re-run
//! with the same trigger time performs zero LLM calls.

use crate::quantcrew::artifacts::{read_json_opt, write_json_atomic};
use crate::quantcrew::client_wrapper::CallOptions;
use crate::quantcrew::config::DataAgentConfig;
use crate::quantcrew::data_source::{DataSource, Document};
use crate::quantcrew::event::{Event, EventEmitter};
use crate::quantcrew::prompts;
use crate::quantcrew::runtime::Runtime;
use lazy_static::lazy_static;
use log::{error, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

lazy_static! {
    static ref CITATION_RE: Regex = Regex::new(r"\[(\d+)\]").expect("static regex");
}

/// One processed batch inside a factor artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: usize,
    pub summary: String,
    pub references: Vec<Document>,
}

/// The persisted output of one data agent run.
///
/// Invariant: every `[N]` citation in `context_string` or any batch summary
/// has a matching entry (by id) in `references`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorArtifact {
    pub agent_name: String,
    pub trigger_time: String,
    pub source_list: Vec<String>,
    #[serde(default)]
    pub bias_goal: Option<String>,
    pub context_string: String,
    pub references: Vec<Document>,
    pub batch_summaries: Vec<BatchSummary>,
}

/// Outcome of one batch pipeline, kept transient.
struct BatchOutcome {
    batch_id: usize,
    success: bool,
    summary: String,
    references: Vec<Document>,
    error: Option<String>,
}

/// Hierarchical batched map-reduce summarizer over documents.
pub struct DataAnalysisAgent {
    config: DataAgentConfig,
    sources: Vec<Arc<dyn DataSource>>,
    runtime: Arc<Runtime>,
    language: String,
}

impl DataAnalysisAgent {
    pub fn new(
        config: DataAgentConfig,
        sources: Vec<Arc<dyn DataSource>>,
        runtime: Arc<Runtime>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            config,
            sources,
            runtime,
            language: language.into(),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.config.agent_name
    }

    pub fn config(&self) -> &DataAgentConfig {
        &self.config
    }

    /// Run the agent for one trigger time, emitting node events along the
    /// way.  Returns `None` when no artifact could be produced (every batch
    /// failed, or preprocessing failed); the `on_chain_end` events are
    /// emitted regardless.
    pub async fn run(&self, trigger_time: &str, emitter: &EventEmitter) -> Option<FactorArtifact> {
        let factor_path = self
            .runtime
            .workspace
            .factor_path(&self.config.agent_name, trigger_time);

        emitter.emit(Event::chain_start("init_artifact")).await;
        if let Some(existing) = read_json_opt::<FactorArtifact>(&factor_path) {
            info!(
                "factor for {} at {} already exists, skipping recompute",
                self.config.agent_name, trigger_time
            );
            emitter
                .emit(Event::custom(
                    "factor_cached",
                    json!({"agent_name": self.config.agent_name}),
                ))
                .await;
            emitter
                .emit(Event::chain_end(
                    "submit_result",
                    json!({"references": existing.references.len(), "cached": true}),
                ))
                .await;
            return Some(existing);
        }
        emitter
            .emit(Event::chain_end("init_artifact", json!({"cached": false})))
            .await;

        // Preprocess: concatenate sources, drop empty rows, assign ids.
        emitter.emit(Event::chain_start("preprocess")).await;
        let mut rows: Vec<Document> = Vec::new();
        for source in &self.sources {
            match source.get_data(trigger_time).await {
                Ok(docs) => rows.extend(
                    docs.into_iter()
                        .filter(|d| !d.title.trim().is_empty() && !d.content.trim().is_empty()),
                ),
                Err(err) => warn!("data source {} failed: {}", source.name(), err),
            }
        }
        for (index, row) in rows.iter_mut().enumerate() {
            row.id = index as u64 + 1;
        }
        let total_docs = rows.len();
        emitter
            .emit(Event::chain_end("preprocess", json!({"total_docs": total_docs})))
            .await;

        if rows.is_empty() {
            // No rows for this trigger time: persist an empty factor so the
            // run stays idempotent, and let consumers skip it.
            let artifact = self.build_artifact(trigger_time, String::new(), Vec::new(), Vec::new());
            return self.submit(&factor_path, artifact, emitter).await;
        }

        let batch_count = self.config.batch_count();
        let batch_size = total_docs.div_ceil(batch_count);
        let titles_per_batch = self.config.title_selection_per_batch().min(batch_size);

        emitter.emit(Event::chain_start("batch_process")).await;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_tasks.max(1)));
        let mut batch_futures = Vec::new();
        for (index, chunk) in rows.chunks(batch_size).enumerate() {
            let docs = chunk.to_vec();
            let semaphore = semaphore.clone();
            batch_futures.push(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                self.process_batch(index + 1, trigger_time, docs, titles_per_batch)
                    .await
            });
        }
        let batch_outcomes = futures_util::future::join_all(batch_futures).await;
        for outcome in &batch_outcomes {
            emitter
                .emit(Event::custom(
                    "batch_completed",
                    json!({
                        "batch_id": outcome.batch_id,
                        "success": outcome.success,
                        "error": outcome.error,
                    }),
                ))
                .await;
        }
        let succeeded = batch_outcomes.iter().filter(|o| o.success).count();
        emitter
            .emit(Event::chain_end(
                "batch_process",
                json!({"batches": batch_outcomes.len(), "succeeded": succeeded}),
            ))
            .await;

        // Final summary: merge the batch summaries into the factor text.
        emitter.emit(Event::chain_start("final_summary")).await;
        let successes: Vec<&BatchOutcome> = batch_outcomes
            .iter()
            .filter(|o| o.success && !o.summary.is_empty())
            .collect();
        if successes.is_empty() {
            error!(
                "all batches failed for {} at {}, no factor produced",
                self.config.agent_name, trigger_time
            );
            emitter
                .emit(Event::chain_end("final_summary", json!({"error": "no valid batches"})))
                .await;
            emitter
                .emit(Event::chain_end("submit_result", json!({"skipped": true})))
                .await;
            return None;
        }

        let final_summary = match self.merge_summaries(trigger_time, &successes).await {
            Ok(summary) => summary,
            Err(err) => {
                error!("final summary failed for {}: {}", self.config.agent_name, err);
                emitter
                    .emit(Event::chain_end("final_summary", json!({"error": err})))
                    .await;
                emitter
                    .emit(Event::chain_end("submit_result", json!({"skipped": true})))
                    .await;
                return None;
            }
        };
        emitter
            .emit(Event::chain_end(
                "final_summary",
                json!({"summary_chars": final_summary.chars().count()}),
            ))
            .await;

        // Reference union: ids cited by any batch plus the final summary.
        let mut cited: BTreeSet<u64> = successes
            .iter()
            .flat_map(|o| o.references.iter().map(|d| d.id))
            .collect();
        cited.extend(extract_citation_ids(&final_summary));
        let references: Vec<Document> = rows
            .iter()
            .filter(|d| cited.contains(&d.id))
            .cloned()
            .collect();
        let batch_summaries: Vec<BatchSummary> = successes
            .iter()
            .map(|o| BatchSummary {
                batch_id: o.batch_id,
                summary: o.summary.clone(),
                references: o.references.clone(),
            })
            .collect();

        let artifact = self.build_artifact(trigger_time, final_summary, references, batch_summaries);
        self.submit(&factor_path, artifact, emitter).await
    }

    fn build_artifact(
        &self,
        trigger_time: &str,
        context_string: String,
        references: Vec<Document>,
        batch_summaries: Vec<BatchSummary>,
    ) -> FactorArtifact {
        FactorArtifact {
            agent_name: self.config.agent_name.clone(),
            trigger_time: trigger_time.to_string(),
            source_list: self.config.source_list.clone(),
            bias_goal: self.config.bias_goal.clone(),
            context_string,
            references,
            batch_summaries,
        }
    }

    async fn submit(
        &self,
        path: &std::path::Path,
        artifact: FactorArtifact,
        emitter: &EventEmitter,
    ) -> Option<FactorArtifact> {
        match write_json_atomic(path, &artifact) {
            Ok(()) => {
                info!("factor saved to {}", path.display());
                emitter
                    .emit(Event::chain_end(
                        "submit_result",
                        json!({"references": artifact.references.len(), "cached": false}),
                    ))
                    .await;
                Some(artifact)
            }
            Err(err) => {
                error!("cannot write factor {}: {}", path.display(), err);
                emitter
                    .emit(Event::chain_end("submit_result", json!({"error": err.to_string()})))
                    .await;
                None
            }
        }
    }

    /// Title filter + content summary for one batch.
    async fn process_batch(
        &self,
        batch_id: usize,
        trigger_time: &str,
        docs: Vec<Document>,
        titles_to_select: usize,
    ) -> BatchOutcome {
        let filtered = self
            .filter_docs_by_title(trigger_time, docs, titles_to_select)
            .await;

        match self.summarize_doc_content(trigger_time, &filtered).await {
            Ok(summary) => {
                let cited = extract_citation_ids(&summary);
                let references = filtered
                    .into_iter()
                    .filter(|d| cited.contains(&d.id))
                    .collect();
                BatchOutcome {
                    batch_id,
                    success: true,
                    summary,
                    references,
                    error: None,
                }
            }
            Err(err) => {
                warn!("batch {} failed: {}", batch_id, err);
                BatchOutcome {
                    batch_id,
                    success: false,
                    summary: String::new(),
                    references: Vec::new(),
                    error: Some(err),
                }
            }
        }
    }

    /// Ask the LLM to keep the most valuable titles.  Batches already at or
    /// under the cap skip the call; any failure falls back to the head of
    /// the batch.
    async fn filter_docs_by_title(
        &self,
        trigger_time: &str,
        docs: Vec<Document>,
        titles_to_select: usize,
    ) -> Vec<Document> {
        if docs.len() <= titles_to_select {
            return docs;
        }

        let mut titles_context = String::new();
        for doc in &docs {
            titles_context.push_str(&format!(
                "ID: {}\nTitle: {}\nPublish Time: {}\n\n",
                doc.id, doc.title, doc.pub_time
            ));
        }
        let prompt = prompts::filter_titles_prompt(
            trigger_time,
            titles_to_select,
            &titles_context,
            &self.language,
        );

        let response = match self
            .runtime
            .llm
            .run(
                &[crate::quantcrew::client_wrapper::Message::user(&prompt)],
                &CallOptions::default(),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("title filter failed, keeping batch head: {}", err);
                return docs.into_iter().take(titles_to_select).collect();
            }
        };

        let selected: BTreeSet<u64> = response
            .content
            .split(',')
            .filter_map(|part| part.trim().parse::<u64>().ok())
            .collect();
        let filtered: Vec<Document> = docs
            .iter()
            .filter(|d| selected.contains(&d.id))
            .cloned()
            .collect();
        if filtered.is_empty() {
            docs.into_iter().take(titles_to_select).collect()
        } else {
            filtered
        }
    }

    /// Summarize the filtered documents of one batch.  When the assembled
    /// context already fits the batch budget and no bias goal is set, the
    /// raw content is returned verbatim and the LLM is skipped.
    async fn summarize_doc_content(
        &self,
        trigger_time: &str,
        docs: &[Document],
    ) -> Result<String, String> {
        if docs.is_empty() {
            return Ok("No valid document content".to_string());
        }

        let cutoff = self.config.content_cutoff_length;
        let mut doc_context = String::new();
        let mut doc_raw_content = String::new();
        for doc in docs {
            let mut content = doc.content.clone();
            if content.chars().count() > cutoff {
                content = content.chars().take(cutoff).collect();
                content.push_str("...");
            }
            let mut pub_time = doc.pub_time.as_str();
            if pub_time.ends_with("23:59:59") {
                pub_time = pub_time.split(' ').next().unwrap_or(pub_time);
            }
            doc_context.push_str(&format!(
                "<doc id={}> Title: {}\nPublish Time: {}\nContent: {}</doc>\n",
                doc.id, doc.title, pub_time, content
            ));
            doc_raw_content.push_str(&format!(
                "Title: {}\nPublish Time: {}\nContent: {}\n",
                doc.title, pub_time, content
            ));
        }

        let target = self.config.summary_target_tokens();
        if doc_context.chars().count() <= target && self.config.bias_goal.is_none() {
            return Ok(doc_raw_content);
        }

        let (bias_instruction, summary_style) = match &self.config.bias_goal {
            Some(goal) => (
                format!(
                    "Focus on target '{}', emphasizing information related to this goal",
                    goal
                ),
                "Goal-oriented Summary",
            ),
            None => (
                "Objectively summarize market dynamics and important events".to_string(),
                "Objective Summary",
            ),
        };
        let prompt = prompts::summarize_docs_prompt(
            trigger_time,
            &bias_instruction,
            summary_style,
            &doc_context,
            target,
            &self.language,
        );
        let options = CallOptions {
            max_tokens: Some(target as u32),
            ..CallOptions::default()
        };
        self.runtime
            .llm
            .run(
                &[crate::quantcrew::client_wrapper::Message::user(&prompt)],
                &options,
            )
            .await
            .map(|response| response.content.trim().to_string())
            .map_err(|err| err.to_string())
    }

    /// Merge batch summaries into the final factor text.  When the raw
    /// concatenation fits the final budget and no bias goal is set, the LLM
    /// is skipped.
    async fn merge_summaries(
        &self,
        trigger_time: &str,
        successes: &[&BatchOutcome],
    ) -> Result<String, String> {
        let combined_summary = successes
            .iter()
            .enumerate()
            .map(|(i, o)| format!("Batch {} Documents:\n{}", i + 1, o.summary))
            .collect::<Vec<_>>()
            .join("\n\n");
        let combined_raw = successes
            .iter()
            .map(|o| format!("Documents:\n{}", o.summary))
            .collect::<Vec<_>>()
            .join("\n\n");

        let target = self.config.final_target_tokens;
        if combined_raw.chars().count() <= target && self.config.bias_goal.is_none() {
            return Ok(combined_raw);
        }

        let (goal_instruction, summary_focus, final_description) = match &self.config.bias_goal {
            Some(goal) => (
                format!("Integrate information around goal '{}'", goal),
                "Highlight important facts related to the goal",
                "Final Goal-Oriented Information Summary",
            ),
            None => (
                "Objectively integrate market information".to_string(),
                "Maintain objectivity and accuracy of information",
                "Final Market Information Summary",
            ),
        };
        let prompt = prompts::merge_summaries_prompt(
            trigger_time,
            &goal_instruction,
            &combined_summary,
            summary_focus,
            final_description,
            target,
            &self.language,
        );
        let options = CallOptions {
            max_tokens: Some(target as u32),
            ..CallOptions::default()
        };
        self.runtime
            .llm
            .run(
                &[crate::quantcrew::client_wrapper::Message::user(&prompt)],
                &options,
            )
            .await
            .map(|response| response.content.trim().to_string())
            .map_err(|err| err.to_string())
    }
}

/// Collect the integer ids cited as `[N]` in a summary.
pub fn extract_citation_ids(text: &str) -> BTreeSet<u64> {
    CITATION_RE
        .captures_iter(text)
        .filter_map(|c| c[1].parse::<u64>().ok())
        .collect()
}
