//! Integration tests for the research agent's ReAct loop.

use async_trait::async_trait;
use quantcrew::artifacts::Workspace;
use quantcrew::client_wrapper::{
    response_as_stream, CallOptions, ChunkStream, ClientError, ClientWrapper, Message,
};
use quantcrew::config::ResearchAgentSettings;
use quantcrew::event::{EventEmitter, EventKind};
use quantcrew::gateway::{GatewayOptions, LlmGateway};
use quantcrew::market::StaticMarket;
use quantcrew::research_agent::ResearchAgent;
use quantcrew::runtime::Runtime;
use quantcrew::tool_protocol::{AgentTool, ToolRegistry};
use serde_json::{json, Value};
use std::error::Error;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct ScriptedClient {
    rules: Vec<(&'static str, String)>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(rules: Vec<(&'static str, String)>) -> Arc<Self> {
        Arc::new(Self {
            rules,
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientWrapper for ScriptedClient {
    async fn send_message(
        &self,
        messages: &[Message],
        options: &CallOptions,
    ) -> Result<ChunkStream, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt: String = messages
            .iter()
            .map(|m| m.content.as_ref())
            .collect::<Vec<_>>()
            .join("\n");
        for (needle, response) in &self.rules {
            if prompt.contains(needle) {
                let reasoning = if options.thinking {
                    "scripted thinking".to_string()
                } else {
                    String::new()
                };
                return Ok(response_as_stream(response.clone(), reasoning));
            }
        }
        Ok(response_as_stream("unmatched prompt".to_string(), String::new()))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

struct CountingTool {
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl AgentTool for CountingTool {
    fn name(&self) -> &str {
        "probe"
    }

    fn description(&self) -> &str {
        "counts how often it is invoked"
    }

    fn args_schema(&self) -> Value {
        json!({"properties": {}, "required": []})
    }

    async fn invoke(&self, _args: Value) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok("probe data".to_string())
    }
}

struct StallingTool;

#[async_trait]
impl AgentTool for StallingTool {
    fn name(&self) -> &str {
        "stalling"
    }

    fn description(&self) -> &str {
        "sleeps past its own timeout"
    }

    fn args_schema(&self) -> Value {
        json!({"properties": {}, "required": []})
    }

    fn timeout_seconds(&self) -> u64 {
        1
    }

    async fn invoke(&self, _args: Value) -> Result<String, Box<dyn Error + Send + Sync>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late".to_string())
    }
}

fn runtime_with(client: Arc<dyn ClientWrapper>, workspace: &Path) -> Arc<Runtime> {
    let _ = env_logger::builder().is_test(true).try_init();
    let gateway = Arc::new(LlmGateway::new(client).with_options(GatewayOptions {
        timeout: Duration::from_secs(5),
        max_retries: 0,
        retry_delay: Duration::from_millis(1),
    }));
    Runtime::with_single_gateway(
        gateway,
        Arc::new(StaticMarket::new().with_target_context("CSI300 flat")),
        Workspace::new(workspace),
    )
}

const FINAL_REPORT: &str = r#"<Output>
<signal>
<has_opportunity>no</has_opportunity>
<action>HOLD</action>
<symbol_code></symbol_code>
<symbol_name></symbol_name>
<evidence_list></evidence_list>
<limitations><limitation>insufficient data</limitation></limitations>
<probability>0</probability>
</signal>
</Output>"#;

/// The step cap forces the report: with `max_react_step = 2` and a
/// selection stub that never picks `final_report`, exactly 2 tool calls run
/// and `write_result` fires once.
#[tokio::test]
async fn test_react_step_cap_bounds_tool_calls() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![
        ("Write your final investment report", FINAL_REPORT.to_string()),
        (
            "Select the next tool",
            "<Output>{\"tool_name\": \"probe\", \"properties\": {}}</Output>".to_string(),
        ),
    ]);
    let runtime = runtime_with(client.clone(), dir.path());

    let invocations = Arc::new(AtomicUsize::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(CountingTool {
        invocations: invocations.clone(),
    }));

    let agent = ResearchAgent::new(
        ResearchAgentSettings {
            agent_name: "agent_0".into(),
            max_react_step: 2,
            plan: false,
            ..ResearchAgentSettings::default()
        },
        tools,
        runtime,
    );

    let emitter = EventEmitter::new(None);
    let artifact = agent
        .run("2025-07-09 09:00:00", "background", &emitter)
        .await
        .unwrap();

    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert_eq!(artifact.final_result, FINAL_REPORT);
    assert_eq!(artifact.final_result_thinking, "scripted thinking");
    // 3 selection calls (the third hits the cap) + 1 write_result call.
    assert_eq!(client.call_count(), 4);

    // write_result ran exactly once.
    let events = emitter.drain().await;
    let write_starts = events
        .iter()
        .filter(|e| e.kind == EventKind::ChainStart && e.name == "write_result")
        .count();
    assert_eq!(write_starts, 1);
}

/// A tool that times out is recorded as a failed step and the loop
/// continues to `final_report`.
#[tokio::test]
async fn test_tool_timeout_is_recorded_and_loop_continues() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![
        ("Write your final investment report", FINAL_REPORT.to_string()),
        (
            "\"tool_called\"",
            "<Output>{\"tool_name\": \"final_report\", \"properties\": {}}</Output>".to_string(),
        ),
        (
            "Select the next tool",
            "<Output>{\"tool_name\": \"stalling\", \"properties\": {}}</Output>".to_string(),
        ),
    ]);
    let runtime = runtime_with(client.clone(), dir.path());

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(StallingTool));

    let agent = ResearchAgent::new(
        ResearchAgentSettings {
            agent_name: "agent_slow".into(),
            plan: false,
            ..ResearchAgentSettings::default()
        },
        tools,
        runtime,
    );

    let emitter = EventEmitter::new(None);
    let artifact = agent
        .run("2025-07-09 09:00:00", "background", &emitter)
        .await
        .unwrap();
    assert_eq!(artifact.final_result, FINAL_REPORT);

    let events = emitter.drain().await;
    let failed_call = events
        .iter()
        .find(|e| e.kind == EventKind::ChainEnd && e.name == "call_tool")
        .unwrap();
    assert_eq!(failed_call.data["success"], false);
}

/// `react = false` jumps straight to the final report: no tool selection,
/// one LLM call total.
#[tokio::test]
async fn test_react_disabled_writes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![(
        "Write your final investment report",
        FINAL_REPORT.to_string(),
    )]);
    let runtime = runtime_with(client.clone(), dir.path());

    let agent = ResearchAgent::new(
        ResearchAgentSettings {
            agent_name: "agent_direct".into(),
            plan: false,
            react: false,
            ..ResearchAgentSettings::default()
        },
        ToolRegistry::new(),
        runtime,
    );

    let emitter = EventEmitter::new(None);
    let artifact = agent
        .run("2025-07-09 09:00:00", "background", &emitter)
        .await
        .unwrap();
    assert_eq!(artifact.final_result, FINAL_REPORT);
    assert_eq!(client.call_count(), 1);
}

/// The artifact short-circuit: a second run performs no LLM calls at all.
#[tokio::test]
async fn test_rerun_short_circuits_on_existing_report() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![(
        "Write your final investment report",
        FINAL_REPORT.to_string(),
    )]);
    let runtime = runtime_with(client.clone(), dir.path());
    let agent = ResearchAgent::new(
        ResearchAgentSettings {
            agent_name: "agent_cached".into(),
            plan: false,
            react: false,
            ..ResearchAgentSettings::default()
        },
        ToolRegistry::new(),
        runtime,
    );
    let emitter = EventEmitter::new(None);
    let first = agent
        .run("2025-07-09 09:00:00", "background", &emitter)
        .await
        .unwrap();

    let idle_client = ScriptedClient::new(vec![]);
    let runtime = runtime_with(idle_client.clone(), dir.path());
    let agent = ResearchAgent::new(
        ResearchAgentSettings {
            agent_name: "agent_cached".into(),
            plan: false,
            react: false,
            ..ResearchAgentSettings::default()
        },
        ToolRegistry::new(),
        runtime,
    );
    let emitter = EventEmitter::new(None);
    let second = agent
        .run("2025-07-09 09:00:00", "background", &emitter)
        .await
        .unwrap();

    assert_eq!(idle_client.call_count(), 0);
    assert_eq!(second, first);
}

/// The background builder wraps factors, market context, and belief into
/// the XML envelope.
#[tokio::test]
async fn test_background_information_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![]);
    let runtime = runtime_with(client, dir.path());
    let agent = ResearchAgent::new(
        ResearchAgentSettings {
            agent_name: "agent_bg".into(),
            belief: "mean reversion".into(),
            ..ResearchAgentSettings::default()
        },
        ToolRegistry::new(),
        runtime,
    );

    let factor = quantcrew::data_agent::FactorArtifact {
        agent_name: "sina_news".into(),
        trigger_time: "2025-07-09 09:00:00".into(),
        source_list: vec![],
        bias_goal: None,
        context_string: "Liquor demand is recovering [1].".into(),
        references: vec![],
        batch_summaries: vec![],
    };
    let background = agent
        .build_background_information("2025-07-09 09:00:00", &[factor])
        .await;

    assert!(background.contains("<source>sina_news</source>"));
    assert!(background.contains("Liquor demand is recovering [1]."));
    assert!(background.contains("<target_market>\nCSI300 flat\n</target_market>"));
    assert!(background.contains("<your_belief>\nmean reversion\n</your_belief>"));
}
