//! Tool protocol and registry for the research agents.
//!
//! Tools implement the [`AgentTool`] capability: a name, a description, a
//! JSON argument schema, output/timeout caps, and an async `invoke`.  A
//! [`ToolRegistry`] is populated at startup from a map of string keys, and
//! the agent configuration references tools by those keys — there is no
//! dynamic loading.
//!
//! # Invocation contract
//!
//! - `trigger_time` never appears in a tool's schema; the registry injects
//!   it into the arguments at call time.
//! - Every call resolves to the wire shape
//!   `{"success":true,"data":…}` / `{"success":false,"error_message":…}`.
//! - Output longer than `max_output_len` characters is truncated with a
//!   visible `...`; executions exceeding `timeout_seconds` are cancelled and
//!   reported as failures.
//!
//! Tool selection is a dedicated LLM call whose prompt embeds the registry
//! description as JSON and whose reply must match
//! `<Output>{"tool_name":…,"properties":{…}}</Output>`.  Parse failures are
//! retried up to 3 times with the failure message appended to the
//! conversation.

use crate::quantcrew::client_wrapper::{CallOptions, Message};
use crate::quantcrew::gateway::LlmGateway;
use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, error};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Sentinel tool name the LLM selects to leave the ReAct loop.  Never
/// registered as an actual tool.
pub const FINAL_REPORT_TOOL: &str = "final_report";

/// Capability implemented by every tool available to research agents.
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Registry key and the name the LLM selects by.
    fn name(&self) -> &str;

    /// One-line description surfaced to the LLM.
    fn description(&self) -> &str;

    /// JSON schema fragment `{"properties": {...}, "required": [...]}`.
    /// Must not declare `trigger_time`; the registry injects it.
    fn args_schema(&self) -> Value;

    /// Cap on the returned text, in characters.
    fn max_output_len(&self) -> usize {
        4000
    }

    /// Wall-clock budget for one invocation.
    fn timeout_seconds(&self) -> u64 {
        30
    }

    /// Execute with the merged arguments (schema args plus `trigger_time`).
    async fn invoke(&self, args: Value) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Wire-shaped result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolOutcome {
    pub fn succeeded(data: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_message: Some(message.into()),
        }
    }
}

/// A tool call chosen by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectedTool {
    pub tool_name: String,
    #[serde(default)]
    pub properties: Value,
}

/// Errors surfaced by registry operations.
#[derive(Debug)]
pub enum ToolError {
    /// Requested tool is not registered.
    NotFound(String),
    /// The selection LLM never produced a parseable tool call.
    SelectionFailed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::SelectionFailed(msg) => write!(f, "Tool selection failed: {}", msg),
        }
    }
}

impl Error for ToolError {}

lazy_static! {
    static ref OUTPUT_BLOCK_RE: Regex = Regex::new(r"(?s)<Output>(.*)</Output>")
        .expect("static regex");
}

/// Parse a tool-selection reply of the form
/// `<Output>{"tool_name":…,"properties":{…}}</Output>`.
pub fn parse_bounded_json(response: &str) -> Result<SelectedTool, Box<dyn Error + Send + Sync>> {
    let captures = OUTPUT_BLOCK_RE
        .captures(response)
        .ok_or("reply carries no <Output>...</Output> block")?;
    let parsed: Value = serde_json::from_str(captures[1].trim())?;
    let tool_name = parsed
        .get("tool_name")
        .and_then(Value::as_str)
        .ok_or("tool_name is required in the output")?
        .to_string();
    let mut properties = parsed
        .get("properties")
        .cloned()
        .ok_or("properties is required in the output")?;
    // Markets occasionally come back as "CN - Stock"; normalize in place.
    if let Some(market) = properties.get("market").and_then(Value::as_str) {
        let normalized = market.replace(' ', "");
        properties["market"] = Value::String(normalized);
    }
    Ok(SelectedTool {
        tool_name,
        properties,
    })
}

/// Truncate `text` to `max_len` characters, appending a visible ellipsis
/// when anything was cut.
fn truncate_output(text: String, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text;
    }
    let mut truncated: String = text.chars().take(max_len).collect();
    truncated.push_str("...");
    truncated
}

/// Registry of the tools one research agent may call.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tool under its own name.
    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Build a registry from a shared tool map and the configured keys.
    /// Unknown keys are logged and skipped.
    pub fn from_keys(available: &BTreeMap<String, Arc<dyn AgentTool>>, keys: &[String]) -> Self {
        let mut registry = Self::new();
        for key in keys {
            match available.get(key) {
                Some(tool) => registry.register(tool.clone()),
                None => error!("no tool registered under key {:?}", key),
            }
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AgentTool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Render the registry as the JSON array embedded into selection and
    /// report prompts.  `trigger_time` is stripped from every schema.
    pub fn describe(&self) -> String {
        let mut entries = Vec::new();
        for tool in self.tools.values() {
            let schema = tool.args_schema();
            let mut properties = schema.get("properties").cloned().unwrap_or_else(|| json!({}));
            if let Some(map) = properties.as_object_mut() {
                map.remove("trigger_time");
            }
            let required: Vec<Value> = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|v| v.as_str() != Some("trigger_time"))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            entries.push(json!({
                "tool_name": tool.name(),
                "description": tool.description(),
                "properties": properties,
                "required": required,
                "max_output_len": tool.max_output_len(),
                "timeout_seconds": tool.timeout_seconds(),
            }));
        }
        serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
    }

    /// Invoke a tool with `trigger_time` injected, enforcing the timeout and
    /// output cap.  Never panics or errors: every failure mode collapses
    /// into a failed [`ToolOutcome`] that the ReAct loop can keep going on.
    pub async fn call(&self, name: &str, args: Value, trigger_time: &str) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            return ToolOutcome::failed(format!("Tool {} not found", name));
        };
        let mut merged = match args {
            Value::Object(map) => Value::Object(map),
            Value::Null => json!({}),
            other => {
                return ToolOutcome::failed(format!(
                    "tool arguments must be a JSON object, got {}",
                    other
                ))
            }
        };
        merged["trigger_time"] = Value::String(trigger_time.to_string());
        debug!("calling tool {} with {}", name, merged);

        let budget = Duration::from_secs(tool.timeout_seconds());
        match tokio::time::timeout(budget, tool.invoke(merged)).await {
            Ok(Ok(text)) => ToolOutcome::succeeded(truncate_output(text, tool.max_output_len())),
            Ok(Err(err)) => ToolOutcome::failed(format!("execution failed: {}", err)),
            Err(_) => ToolOutcome::failed(format!(
                "execution timed out after {}s",
                tool.timeout_seconds()
            )),
        }
    }

    /// Ask the LLM to pick the next tool call.
    ///
    /// The prompt must already embed [`ToolRegistry::describe`].  Up to 3
    /// attempts are made; each parse or call failure is appended to the
    /// conversation before the next attempt.
    pub async fn select_tool_by_llm(
        &self,
        gateway: &LlmGateway,
        prompt: &str,
    ) -> Result<SelectedTool, ToolError> {
        let mut messages = vec![Message::user(prompt)];
        let mut error_msg = String::new();
        for attempt in 1..=3u32 {
            if !error_msg.is_empty() {
                messages.push(Message::user(format!("{}\n\nPlease try again.", error_msg)));
                error_msg.clear();
            }
            let options = CallOptions {
                max_tokens: Some(1000),
                ..CallOptions::default()
            };
            let response = match gateway.run(&messages, &options).await {
                Ok(response) => response,
                Err(err) => {
                    error_msg = format!("Failed to call tool selection {} times: {}", attempt, err);
                    continue;
                }
            };
            messages.push(Message::assistant(&response.content));
            match parse_bounded_json(&response.content) {
                Ok(selected) => return Ok(selected),
                Err(err) => {
                    error_msg = format!("Failed to parse tool call {} times: {}", attempt, err);
                }
            }
        }
        Err(ToolError::SelectionFailed(error_msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantcrew::client_wrapper::{
        response_as_stream, ChunkStream, ClientError, ClientWrapper,
    };
    use crate::quantcrew::gateway::GatewayOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoTool;

    #[async_trait]
    impl AgentTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "repeat the input string"
        }

        fn args_schema(&self) -> Value {
            json!({
                "properties": {
                    "input_string": {"type": "string", "description": "string to repeat"}
                },
                "required": ["input_string"]
            })
        }

        fn max_output_len(&self) -> usize {
            10
        }

        async fn invoke(&self, args: Value) -> Result<String, Box<dyn Error + Send + Sync>> {
            assert!(args.get("trigger_time").is_some(), "trigger_time injected");
            Ok(args
                .get("input_string")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string())
        }
    }

    struct SlowTool;

    #[async_trait]
    impl AgentTool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "never finishes in time"
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

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry
    }

    #[tokio::test]
    async fn test_call_injects_trigger_time_and_truncates() {
        let registry = registry();
        let outcome = registry
            .call(
                "echo",
                json!({"input_string": "abcdefghijklmnop"}),
                "2025-07-09 09:00:00",
            )
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.data.as_deref(), Some("abcdefghij..."));
    }

    #[tokio::test]
    async fn test_call_unknown_tool_fails_gracefully() {
        let outcome = registry().call("nope", json!({}), "t").await;
        assert!(!outcome.success);
        assert!(outcome.error_message.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        let outcome = registry.call("slow", json!({}), "t").await;
        assert!(!outcome.success);
        assert!(outcome.error_message.unwrap().contains("timed out"));
    }

    #[test]
    fn test_describe_strips_trigger_time() {
        struct LeakyTool;

        #[async_trait]
        impl AgentTool for LeakyTool {
            fn name(&self) -> &str {
                "leaky"
            }
            fn description(&self) -> &str {
                "schema declares trigger_time by mistake"
            }
            fn args_schema(&self) -> Value {
                json!({
                    "properties": {
                        "trigger_time": {"type": "string"},
                        "query": {"type": "string"}
                    },
                    "required": ["trigger_time", "query"]
                })
            }
            async fn invoke(&self, _args: Value) -> Result<String, Box<dyn Error + Send + Sync>> {
                Ok(String::new())
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(LeakyTool));
        let description = registry.describe();
        assert!(!description.contains("trigger_time"));
        assert!(description.contains("\"query\""));
        assert!(description.contains("max_output_len"));
    }

    #[test]
    fn test_parse_bounded_json() {
        let reply = r#"Let me think.
<Output>{"tool_name": "price_info", "properties": {"symbol_code": "600519.SH", "market": "CN - Stock"}}</Output>"#;
        let selected = parse_bounded_json(reply).unwrap();
        assert_eq!(selected.tool_name, "price_info");
        assert_eq!(selected.properties["symbol_code"], "600519.SH");
        assert_eq!(selected.properties["market"], "CN-Stock");

        assert!(parse_bounded_json("no output block").is_err());
        assert!(parse_bounded_json("<Output>{\"properties\": {}}</Output>").is_err());
        assert!(parse_bounded_json("<Output>{\"tool_name\": \"x\"}</Output>").is_err());
    }

    /// Answers garbage first, then a valid tool call.
    struct RetryingSelectionClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClientWrapper for RetryingSelectionClient {
        async fn send_message(
            &self,
            messages: &[Message],
            _options: &CallOptions,
        ) -> Result<ChunkStream, ClientError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(response_as_stream("not a tool call".into(), String::new()))
            } else {
                // The retry must carry the prior failure back to the model.
                let retry_context = messages
                    .iter()
                    .any(|m| m.content.contains("Failed to parse tool call"));
                assert!(retry_context, "prior failure re-injected");
                Ok(response_as_stream(
                    "<Output>{\"tool_name\": \"echo\", \"properties\": {}}</Output>".into(),
                    String::new(),
                ))
            }
        }

        fn model_name(&self) -> &str {
            "selection-stub"
        }
    }

    #[tokio::test]
    async fn test_selection_retries_on_parse_failure() {
        let client = Arc::new(RetryingSelectionClient {
            calls: AtomicUsize::new(0),
        });
        let gateway = LlmGateway::new(client.clone()).with_options(GatewayOptions {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
        });
        let selected = registry()
            .select_tool_by_llm(&gateway, "pick a tool")
            .await
            .unwrap();
        assert_eq!(selected.tool_name, "echo");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }
}
