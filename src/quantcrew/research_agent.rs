//! Research Agent.
//!
//! A bounded ReAct loop over a tool registry:
//!
//! ```text
//! init -> plan? -> tool_selection -> (enough? write_result : call_tool -> tool_selection)* -> write_result -> submit
//! ```
//!
//! The loop exits when the LLM selects the sentinel `final_report` tool,
//! when `max_react_step` tool calls have been made, or when the estimated
//! write-result prompt would exceed [`WRITE_RESULT_CONTEXT_CAP`] characters.
//! After every tool call, the `{tool_called, tool_result}` pair is appended
//! as a JSON line to the accumulated tool-call context rendered into
//! subsequent prompts.
//!
//! The final report is produced by the thinking gateway; its reasoning
//! stream is captured separately as `final_result_thinking`.  Like the data
//! agent, the run is idempotent through its on-disk artifact.

use crate::quantcrew::artifacts::{read_json_opt, write_json_atomic};
use crate::quantcrew::client_wrapper::{CallOptions, Message};
use crate::quantcrew::config::ResearchAgentSettings;
use crate::quantcrew::data_agent::FactorArtifact;
use crate::quantcrew::event::{Event, EventEmitter};
use crate::quantcrew::prompts;
use crate::quantcrew::runtime::Runtime;
use crate::quantcrew::tool_protocol::{SelectedTool, ToolRegistry, FINAL_REPORT_TOOL};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Absolute budget for the estimated write-result prompt, in characters.
/// A heuristic proxy for the model context window; past it the agent stops
/// gathering and writes with what it has.
pub const WRITE_RESULT_CONTEXT_CAP: usize = 128_000;

/// The persisted output of one research agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalArtifact {
    pub task: String,
    pub trigger_time: String,
    pub background_information: String,
    pub belief: String,
    /// Final completion; contains zero or more `<signal>` blocks.
    pub final_result: String,
    /// Reasoning stream captured from the thinking channel.
    pub final_result_thinking: String,
}

/// ReAct-style investment researcher.
pub struct ResearchAgent {
    settings: ResearchAgentSettings,
    tools: ToolRegistry,
    runtime: Arc<Runtime>,
}

impl ResearchAgent {
    pub fn new(settings: ResearchAgentSettings, tools: ToolRegistry, runtime: Arc<Runtime>) -> Self {
        Self {
            settings,
            tools,
            runtime,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.settings.agent_name
    }

    pub fn settings(&self) -> &ResearchAgentSettings {
        &self.settings
    }

    /// Concatenate the factor summaries, the market's target-symbol context,
    /// and the agent's belief into the background information block.
    pub async fn build_background_information(
        &self,
        trigger_time: &str,
        factors: &[FactorArtifact],
    ) -> String {
        let mut global_market_information = String::new();
        for factor in factors {
            global_market_information.push_str(&format!(
                "<global_summary>\n<source>{}</source>\n<timestamp>{}</timestamp>\n<content>{}</content>\n</global_summary>\n",
                factor.agent_name, factor.trigger_time, factor.context_string
            ));
        }

        let target_market = match self.runtime.market.target_symbol_context(trigger_time).await {
            Ok(context) => context,
            Err(err) => {
                warn!("target symbol context unavailable: {}", err);
                String::new()
            }
        };

        format!(
            "<market_information>\n{}\n</market_information>\n\n<target_market>\n{}\n</target_market>\n\n<your_belief>\n{}\n</your_belief>",
            global_market_information, target_market, self.settings.belief
        )
    }

    /// Run the agent for one trigger time.  Returns `None` when the final
    /// report could not be produced; `on_chain_end` events are emitted
    /// regardless.
    pub async fn run(
        &self,
        trigger_time: &str,
        background_information: &str,
        emitter: &EventEmitter,
    ) -> Option<SignalArtifact> {
        let report_path = self
            .runtime
            .workspace
            .report_path(&self.settings.agent_name, trigger_time);

        emitter.emit(Event::chain_start("init_artifact")).await;
        if let Some(existing) = read_json_opt::<SignalArtifact>(&report_path) {
            info!(
                "signal for {} at {} already exists, skipping recompute",
                self.settings.agent_name, trigger_time
            );
            emitter
                .emit(Event::custom(
                    "signal_cached",
                    json!({"agent_name": self.settings.agent_name}),
                ))
                .await;
            emitter
                .emit(Event::chain_end("submit_result", json!({"cached": true})))
                .await;
            return Some(existing);
        }
        emitter
            .emit(Event::chain_end("init_artifact", json!({"cached": false})))
            .await;

        let task = prompts::INVEST_TASK;
        let tools_info = self.tools.describe();

        // Optional planning step.
        let plan_result = if self.settings.plan {
            emitter.emit(Event::chain_start("plan")).await;
            let prompt = prompts::research_plan_prompt(
                trigger_time,
                task,
                background_information,
                &tools_info,
                &self.settings.output_language,
            );
            let plan_options = CallOptions {
                max_retries: Some(10),
                ..CallOptions::default()
            };
            let plan = match self
                .runtime
                .llm
                .run(&[Message::user(&prompt)], &plan_options)
                .await
            {
                Ok(response) => response.content.trim().to_string(),
                Err(err) => {
                    error!("plan failed for {}: {}", self.settings.agent_name, err);
                    String::new()
                }
            };
            emitter
                .emit(Event::chain_end("plan", json!({"plan_chars": plan.chars().count()})))
                .await;
            plan
        } else {
            String::new()
        };

        // Bounded ReAct loop.
        let mut tool_call_context = String::new();
        let mut tool_call_count: usize = 0;
        loop {
            emitter.emit(Event::chain_start("tool_selection")).await;
            let selection = if !self.settings.react {
                Ok(SelectedTool {
                    tool_name: FINAL_REPORT_TOOL.to_string(),
                    properties: json!({}),
                })
            } else {
                let prompt = prompts::choose_tool_prompt(
                    trigger_time,
                    task,
                    &plan_result,
                    background_information,
                    &tool_call_context,
                    &tools_info,
                    &self.settings.output_language,
                );
                self.tools
                    .select_tool_by_llm(self.runtime.llm.as_ref(), &prompt)
                    .await
            };
            emitter
                .emit(Event::chain_end(
                    "tool_selection",
                    match &selection {
                        Ok(selected) => json!({"tool_name": selected.tool_name}),
                        Err(err) => json!({"error": err.to_string()}),
                    },
                ))
                .await;

            if self.enough_information(
                trigger_time,
                task,
                background_information,
                &plan_result,
                &tool_call_context,
                &tools_info,
                &selection,
                tool_call_count,
            ) {
                break;
            }

            emitter.emit(Event::chain_start("call_tool")).await;
            let (called, outcome) = match &selection {
                Ok(selected) => {
                    let outcome = self
                        .tools
                        .call(&selected.tool_name, selected.properties.clone(), trigger_time)
                        .await;
                    (serde_json::to_value(selected).unwrap_or(json!({})), outcome)
                }
                Err(err) => (
                    json!({"error": err.to_string()}),
                    crate::quantcrew::tool_protocol::ToolOutcome::failed("Call tool Failed"),
                ),
            };
            tool_call_count += 1;
            let tool_succeeded = outcome.success;
            let context_line = json!({
                "tool_called": called,
                "tool_result": outcome,
            });
            tool_call_context.push_str(&context_line.to_string());
            tool_call_context.push('\n');
            emitter
                .emit(Event::chain_end(
                    "call_tool",
                    json!({"tool_call_count": tool_call_count, "success": tool_succeeded}),
                ))
                .await;
        }

        // Write the final report with the thinking model.
        emitter.emit(Event::chain_start("write_result")).await;
        let prompt = prompts::write_result_prompt(
            trigger_time,
            task,
            background_information,
            &plan_result,
            &tool_call_context,
            &tools_info,
            prompts::INVEST_OUTPUT_FORMAT,
            &self.settings.output_language,
        );
        let options = CallOptions {
            thinking: true,
            max_retries: Some(10),
            ..CallOptions::default()
        };
        let response = match self
            .runtime
            .thinking_llm
            .run(&[Message::user(&prompt)], &options)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!("write_result failed for {}: {}", self.settings.agent_name, err);
                emitter
                    .emit(Event::chain_end("write_result", json!({"error": err.to_string()})))
                    .await;
                emitter
                    .emit(Event::chain_end("submit_result", json!({"skipped": true})))
                    .await;
                return None;
            }
        };
        emitter
            .emit(Event::chain_end(
                "write_result",
                json!({"result_chars": response.content.chars().count()}),
            ))
            .await;

        let artifact = SignalArtifact {
            task: task.to_string(),
            trigger_time: trigger_time.to_string(),
            background_information: background_information.to_string(),
            belief: self.settings.belief.clone(),
            final_result: response.content,
            final_result_thinking: response.reasoning,
        };

        match write_json_atomic(&report_path, &artifact) {
            Ok(()) => {
                info!("research result saved to {}", report_path.display());
                emitter
                    .emit(Event::chain_end("submit_result", json!({"cached": false})))
                    .await;
                Some(artifact)
            }
            Err(err) => {
                error!("cannot write report {}: {}", report_path.display(), err);
                emitter
                    .emit(Event::chain_end("submit_result", json!({"error": err.to_string()})))
                    .await;
                None
            }
        }
    }

    /// Decide whether to stop gathering information.
    #[allow(clippy::too_many_arguments)]
    fn enough_information(
        &self,
        trigger_time: &str,
        task: &str,
        background_information: &str,
        plan: &str,
        tool_call_context: &str,
        tools_info: &str,
        selection: &Result<SelectedTool, crate::quantcrew::tool_protocol::ToolError>,
        tool_call_count: usize,
    ) -> bool {
        let estimated = prompts::write_result_prompt(
            trigger_time,
            task,
            background_information,
            plan,
            tool_call_context,
            tools_info,
            prompts::INVEST_OUTPUT_FORMAT,
            &self.settings.output_language,
        );
        if estimated.chars().count() > WRITE_RESULT_CONTEXT_CAP {
            warn!(
                "{}: estimated report prompt exceeds context cap, writing result now",
                self.settings.agent_name
            );
            return true;
        }
        // The step cap binds even when selections keep failing, so the loop
        // always terminates.
        if tool_call_count >= self.settings.max_react_step {
            return true;
        }
        match selection {
            // A failed selection consumes a step but never ends the loop on
            // its own.
            Err(_) => false,
            Ok(selected) => selected.tool_name == FINAL_REPORT_TOOL,
        }
    }
}
