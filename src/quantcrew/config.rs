//! Configuration for the pipeline.
//!
//! All configuration is built in code by the embedding application — no
//! TOML/YAML parsing dependencies are introduced here.  Every struct carries
//! the production defaults of the pipeline so callers only override what
//! they need.

/// Configuration of one data analysis agent.
///
/// The derived parameters follow from the credit budget: each batch is
/// allowed `llm_calls_per_batch` LLM calls out of `credits_per_batch`
/// credits, giving `batch_count` batches; the title filter keeps as many
/// documents as fit the LLM context at `content_cutoff_length` characters
/// each; the per-batch summary budget splits the context evenly across
/// batches.
#[derive(Debug, Clone)]
pub struct DataAgentConfig {
    /// Stable agent identifier; also the factor sub-directory name.
    pub agent_name: String,
    /// Names of the data sources this agent consumes.
    pub source_list: Vec<String>,
    /// Batch-level parallelism.
    pub max_concurrent_tasks: usize,
    /// LLM-call credits granted per run.
    pub credits_per_batch: usize,
    /// LLM calls spent on one batch (filter + summarize).
    pub llm_calls_per_batch: usize,
    /// Per-document body truncation in characters.
    pub content_cutoff_length: usize,
    /// Prompt budget in content characters.
    pub max_llm_context: usize,
    /// Target size of the merged factor.
    pub final_target_tokens: usize,
    /// Optional focus phrase for goal-oriented summarization.
    pub bias_goal: Option<String>,
}

impl Default for DataAgentConfig {
    fn default() -> Self {
        Self {
            agent_name: "news_summary".to_string(),
            source_list: Vec::new(),
            max_concurrent_tasks: 6,
            credits_per_batch: 10,
            llm_calls_per_batch: 2,
            content_cutoff_length: 2000,
            max_llm_context: 28_000,
            final_target_tokens: 4000,
            bias_goal: None,
        }
    }
}

impl DataAgentConfig {
    /// Number of batches the document set is split into.
    pub fn batch_count(&self) -> usize {
        self.credits_per_batch / self.llm_calls_per_batch + 1
    }

    /// Upper bound on documents the title filter may keep per batch.
    pub fn title_selection_per_batch(&self) -> usize {
        self.max_llm_context / self.content_cutoff_length
    }

    /// Summary budget per batch in content characters.
    pub fn summary_target_tokens(&self) -> usize {
        self.max_llm_context / self.batch_count()
    }
}

/// Configuration of one research agent.
#[derive(Debug, Clone)]
pub struct ResearchAgentSettings {
    /// Stable agent identifier; also the report sub-directory name.
    pub agent_name: String,
    /// The agent's standing investment belief, rendered into its background.
    pub belief: String,
    /// Hard cap on ReAct tool-call iterations.
    pub max_react_step: usize,
    /// Tool names to resolve from the registry map at startup.
    pub tools: Vec<String>,
    /// Language the agent is instructed to answer in.
    pub output_language: String,
    /// Whether to run the planning step before the ReAct loop.
    pub plan: bool,
    /// Whether to run the ReAct loop at all; `false` jumps straight to the
    /// final report.
    pub react: bool,
}

impl Default for ResearchAgentSettings {
    fn default() -> Self {
        Self {
            agent_name: "research_agent".to_string(),
            belief: String::new(),
            max_react_step: 25,
            tools: Vec::new(),
            output_language: "English".to_string(),
            plan: true,
            react: true,
        }
    }
}

/// Configuration of the contest subsystem.
#[derive(Debug, Clone)]
pub struct ContestConfig {
    /// Trading days of history fed to the predictor.
    pub history_window_days: usize,
    /// Trading days ahead the predictor's targets cover.
    pub prediction_window_days: usize,
    /// Size of the judge ensemble.
    pub num_judgers: usize,
}

impl Default for ContestConfig {
    fn default() -> Self {
        Self {
            history_window_days: 5,
            prediction_window_days: 3,
            num_judgers: 5,
        }
    }
}

/// Endpoint coordinates for one LLM configuration (text, thinking, vision).
#[derive(Debug, Clone)]
pub struct LlmEndpointConfig {
    pub model_name: String,
    pub api_key: String,
    pub base_url: String,
}

/// Market scoping for signal parsing and reward evaluation.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Market the pipeline trades, e.g. `CN-Stock`.
    pub primary_market: String,
    /// Markets whose snapshots feed the research background.
    pub target_markets: Vec<String>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            primary_market: "CN-Stock".to_string(),
            target_markets: vec!["CN-Stock".to_string()],
        }
    }
}

/// Top-level configuration of a company run.
#[derive(Debug, Clone, Default)]
pub struct CompanyConfig {
    pub data_agents: Vec<DataAgentConfig>,
    pub research_agents: Vec<ResearchAgentSettings>,
    /// Per-node concurrency cap; `None` means one slot per agent.
    pub max_concurrent_agents: Option<usize>,
    pub market: MarketConfig,
    pub contest: ContestConfig,
    /// Language used in every prompt.
    pub system_language: String,
}
