//! Company workflow: the outer orchestration of both agent pools.
//!
//! Three nodes run strictly in series — `run_data_agents`,
//! `run_research_agents`, `finalize` — and each node fans its agents out
//! concurrently under a bounded semaphore.  Research agents only start after
//! *all* data agents finished, and finalize only after all research agents
//! finished; partial agent failures never abort a node.
//!
//! Child-agent events are forwarded into the company stream after their
//! names are prefixed with `data_agent_<id>_` / `research_agent_<id>_` and
//! tagged with the agent name.

use crate::quantcrew::config::CompanyConfig;
use crate::quantcrew::data_agent::{DataAnalysisAgent, FactorArtifact};
use crate::quantcrew::data_source::DataSource;
use crate::quantcrew::event::{Event, EventEmitter, EventHandler, EventKind};
use crate::quantcrew::research_agent::ResearchAgent;
use crate::quantcrew::runtime::Runtime;
use crate::quantcrew::signal::{fix_symbols, parse_signals, ParsedSignal};
use crate::quantcrew::tool_protocol::{AgentTool, ToolRegistry};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Research agents may emit many blocks; only the first few are kept.
const MAX_SIGNALS_PER_AGENT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTeamStats {
    pub factors_count: usize,
    pub events_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchTeamStats {
    pub signals_count: usize,
    pub events_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContestStep {
    pub best_signals: Vec<ParsedSignal>,
}

/// Per-node result counters mirrored into the final report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResults {
    #[serde(default)]
    pub data_team: Option<DataTeamStats>,
    #[serde(default)]
    pub research_team: Option<ResearchTeamStats>,
    #[serde(default)]
    pub contest: Option<ContestStep>,
}

/// Output of one company run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyReport {
    pub trigger_time: String,
    pub data_factors: Vec<FactorArtifact>,
    pub research_signals: Vec<ParsedSignal>,
    pub step_results: StepResults,
    pub events: Vec<Event>,
}

/// The two-stage fan-out workflow over data and research agents.
pub struct TradingCompany {
    data_agents: Vec<Arc<DataAnalysisAgent>>,
    research_agents: Vec<Arc<ResearchAgent>>,
    runtime: Arc<Runtime>,
    market_name: String,
    max_concurrent_agents: Option<usize>,
    handler: Option<Arc<dyn EventHandler>>,
}

impl TradingCompany {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            data_agents: Vec::new(),
            research_agents: Vec::new(),
            runtime,
            market_name: "CN-Stock".to_string(),
            max_concurrent_agents: None,
            handler: None,
        }
    }

    /// Assemble a company from configuration, resolving data sources and
    /// tools by their string keys from maps populated at startup.  Unknown
    /// keys are logged and skipped so one bad entry never takes down the
    /// deployment.
    pub fn from_config(
        config: &CompanyConfig,
        sources: &BTreeMap<String, Arc<dyn DataSource>>,
        tools: &BTreeMap<String, Arc<dyn AgentTool>>,
        runtime: Arc<Runtime>,
    ) -> Self {
        let mut company =
            Self::new(runtime.clone()).with_market_name(config.market.primary_market.clone());
        if let Some(limit) = config.max_concurrent_agents {
            company = company.with_max_concurrent_agents(limit);
        }
        for agent_config in &config.data_agents {
            let agent_sources: Vec<Arc<dyn DataSource>> = agent_config
                .source_list
                .iter()
                .filter_map(|key| match sources.get(key) {
                    Some(source) => Some(source.clone()),
                    None => {
                        warn!("no data source registered under key {:?}", key);
                        None
                    }
                })
                .collect();
            company = company.add_data_agent(DataAnalysisAgent::new(
                agent_config.clone(),
                agent_sources,
                runtime.clone(),
                config.system_language.as_str(),
            ));
        }
        for settings in &config.research_agents {
            let registry = ToolRegistry::from_keys(tools, &settings.tools);
            company = company.add_research_agent(ResearchAgent::new(
                settings.clone(),
                registry,
                runtime.clone(),
            ));
        }
        company
    }

    pub fn add_data_agent(mut self, agent: DataAnalysisAgent) -> Self {
        self.data_agents.push(Arc::new(agent));
        self
    }

    pub fn add_research_agent(mut self, agent: ResearchAgent) -> Self {
        self.research_agents.push(Arc::new(agent));
        self
    }

    /// Market used when resolving signal symbols.
    pub fn with_market_name(mut self, market_name: impl Into<String>) -> Self {
        self.market_name = market_name.into();
        self
    }

    /// Cap on concurrently running agents per node; default is one slot per
    /// agent.
    pub fn with_max_concurrent_agents(mut self, limit: usize) -> Self {
        self.max_concurrent_agents = Some(limit.max(1));
        self
    }

    /// Observe the company event stream in real time.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Run the full workflow for one trigger time.
    pub async fn run(&self, trigger_time: &str) -> CompanyReport {
        let emitter = EventEmitter::new(self.handler.clone());
        let mut step_results = StepResults::default();

        // ── Node 1: data agents ─────────────────────────────────────────
        emitter.emit(Event::chain_start("run_data_agents")).await;
        info!("running {} data agents", self.data_agents.len());

        let semaphore = self.node_semaphore(self.data_agents.len());
        let mut handles = Vec::new();
        for (agent_id, agent) in self.data_agents.iter().enumerate() {
            let agent = agent.clone();
            let semaphore = semaphore.clone();
            let trigger_time = trigger_time.to_string();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let child_emitter = EventEmitter::new(None);
                let factor = agent.run(&trigger_time, &child_emitter).await;
                (agent_id, agent.agent_name().to_string(), factor, child_emitter.drain().await)
            }));
        }

        let mut data_factors: Vec<FactorArtifact> = Vec::new();
        let mut data_events_count = 0usize;
        for handle in handles {
            match handle.await {
                Ok((agent_id, agent_name, factor, events)) => {
                    data_events_count += events.len();
                    for event in events {
                        emitter
                            .emit(forward_child_event("data_agent", agent_id, &agent_name, event))
                            .await;
                    }
                    if let Some(factor) = factor {
                        data_factors.push(factor);
                    }
                }
                Err(err) => warn!("data agent task panicked: {}", err),
            }
        }
        info!("data agents finished with {} factors", data_factors.len());

        step_results.data_team = Some(DataTeamStats {
            factors_count: data_factors.len(),
            events_count: data_events_count,
        });
        emitter
            .emit(Event::chain_end(
                "run_data_agents",
                json!({"factors_count": data_factors.len(), "events_count": data_events_count}),
            ))
            .await;

        // ── Node 2: research agents (strictly after all data agents) ────
        emitter.emit(Event::chain_start("run_research_agents")).await;
        info!("running {} research agents", self.research_agents.len());

        let semaphore = self.node_semaphore(self.research_agents.len());
        let shared_factors = Arc::new(data_factors.clone());
        let mut handles = Vec::new();
        for (agent_id, agent) in self.research_agents.iter().enumerate() {
            let agent = agent.clone();
            let semaphore = semaphore.clone();
            let trigger_time = trigger_time.to_string();
            let factors = shared_factors.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let child_emitter = EventEmitter::new(None);
                let background = agent
                    .build_background_information(&trigger_time, &factors)
                    .await;
                let artifact = agent.run(&trigger_time, &background, &child_emitter).await;
                (agent_id, agent.agent_name().to_string(), artifact, child_emitter.drain().await)
            }));
        }

        let mut research_signals: Vec<ParsedSignal> = Vec::new();
        let mut research_events_count = 0usize;
        for handle in handles {
            match handle.await {
                Ok((agent_id, agent_name, artifact, events)) => {
                    research_events_count += events.len();
                    for event in events {
                        emitter
                            .emit(forward_child_event(
                                "research_agent",
                                agent_id,
                                &agent_name,
                                event,
                            ))
                            .await;
                    }
                    if let Some(artifact) = artifact {
                        let mut signals = parse_signals(
                            &artifact.final_result_thinking,
                            &artifact.final_result,
                        );
                        fix_symbols(&mut signals, self.runtime.market.as_ref(), &self.market_name);
                        for (index, mut signal) in
                            signals.into_iter().take(MAX_SIGNALS_PER_AGENT).enumerate()
                        {
                            signal.agent_id = Some(agent_id);
                            signal.agent_name = Some(agent_name.clone());
                            signal.signal_index = Some(index + 1);
                            research_signals.push(signal);
                        }
                    }
                }
                Err(err) => warn!("research agent task panicked: {}", err),
            }
        }
        info!("research agents finished with {} signals", research_signals.len());

        step_results.research_team = Some(ResearchTeamStats {
            signals_count: research_signals.len(),
            events_count: research_events_count,
        });
        emitter
            .emit(Event::chain_end(
                "run_research_agents",
                json!({
                    "signals_count": research_signals.len(),
                    "events_count": research_events_count
                }),
            ))
            .await;

        // ── Node 3: finalize ────────────────────────────────────────────
        emitter.emit(Event::chain_start("finalize")).await;
        step_results.contest = Some(ContestStep {
            best_signals: research_signals.clone(),
        });
        emitter
            .emit(Event::chain_end(
                "finalize",
                json!({"best_signals_count": research_signals.len()}),
            ))
            .await;

        CompanyReport {
            trigger_time: trigger_time.to_string(),
            data_factors,
            research_signals,
            step_results,
            events: emitter.drain().await,
        }
    }

    fn node_semaphore(&self, agent_count: usize) -> Arc<Semaphore> {
        let limit = self.max_concurrent_agents.unwrap_or(agent_count.max(1));
        Arc::new(Semaphore::new(limit))
    }
}

/// Re-label a child-agent event for the company stream.
///
/// Custom events keep their payload and gain `agent_id`/`agent_name`;
/// lifecycle events carry the child node name as `sub_node`.  Either way the
/// name is prefixed with `<scope>_<agent_id>_` and the agent name is added
/// as a tag.
fn forward_child_event(scope: &str, agent_id: usize, agent_name: &str, event: Event) -> Event {
    let forwarded = match event.kind {
        EventKind::Custom => {
            let mut data = event.data;
            if let Some(map) = data.as_object_mut() {
                map.insert("agent_id".to_string(), json!(agent_id));
                map.insert("agent_name".to_string(), json!(agent_name));
            }
            Event {
                kind: EventKind::Custom,
                name: format!("{}_{}_{}", scope, agent_id, event.name),
                data,
                tags: event.tags,
            }
        }
        kind => Event {
            kind,
            name: format!("{}_{}_{}", scope, agent_id, kind.as_str()),
            data: json!({
                "agent_id": agent_id,
                "agent_name": agent_name,
                "sub_node": event.name,
                "output": event.data,
            }),
            tags: event.tags,
        },
    };
    forwarded.with_tag(agent_name)
}
