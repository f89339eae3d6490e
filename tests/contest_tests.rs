//! Integration tests for the contest subsystem: judge failure tolerance,
//! weight allocation, and the full scoring pass.

use async_trait::async_trait;
use chrono::NaiveDate;
use quantcrew::artifacts::{write_json_atomic, Workspace};
use quantcrew::client_wrapper::{
    response_as_stream, CallOptions, ChunkStream, ClientError, ClientWrapper, Message,
};
use quantcrew::config::ContestConfig;
use quantcrew::contest::predictor::ResearchPredictor;
use quantcrew::contest::types::{ContestData, SignalData};
use quantcrew::contest::{ContestError, ResearchContest, SignalJudger};
use quantcrew::gateway::{GatewayOptions, LlmGateway};
use quantcrew::market::{MarketProvider, StaticMarket, SymbolPrice};
use quantcrew::research_agent::SignalArtifact;
use quantcrew::runtime::Runtime;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers each call with the next response in the list (sticking to the
/// last one when exhausted).  Concurrent callers each consume one slot.
struct SequencedClient {
    responses: Vec<String>,
    calls: AtomicUsize,
}

impl SequencedClient {
    fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ClientWrapper for SequencedClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _options: &CallOptions,
    ) -> Result<ChunkStream, ClientError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .get(index.min(self.responses.len() - 1))
            .cloned()
            .unwrap_or_default();
        Ok(response_as_stream(response, String::new()))
    }

    fn model_name(&self) -> &str {
        "sequenced"
    }
}

fn gateway(client: Arc<dyn ClientWrapper>) -> Arc<LlmGateway> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(LlmGateway::new(client).with_options(GatewayOptions {
        timeout: Duration::from_secs(5),
        max_retries: 0,
        retry_delay: Duration::from_millis(1),
    }))
}

fn signal(agent_name: &str, trigger_time: &str, action: &str) -> SignalData {
    SignalData {
        agent_name: agent_name.into(),
        trigger_time: trigger_time.into(),
        thinking: "demand first".into(),
        has_opportunity: "yes".into(),
        action: action.into(),
        symbol_code: "600519.SH".into(),
        symbol_name: "贵州茅台".into(),
        evidence_list: Vec::new(),
        limitations: vec!["one-day horizon".into()],
        probability: 70,
        belief: "momentum".into(),
        contest_data: None,
    }
}

/// Five judgers with two returning malformed text: the consensus is built
/// from the three valid replies and no error escapes.
#[tokio::test]
async fn test_judger_ensemble_tolerates_malformed_judges() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(dir.path());

    let good = "agent_0: 80|thin evidence (-20)\nagent_1: 60|weak logic (-40)".to_string();
    let client = SequencedClient::new(vec![
        "I decline to answer in the required format.".to_string(),
        "agent_0: high|not a number".to_string(),
        good.clone(),
        good.clone(),
        good,
    ]);

    let mut signals = BTreeMap::new();
    signals.insert("agent_0".to_string(), signal("agent_0", "2025-07-09 09:00:00", "buy"));
    signals.insert("agent_1".to_string(), signal("agent_1", "2025-07-09 09:00:00", "sell"));

    let judger = SignalJudger::new(workspace.clone());
    let scores = judger
        .judge_signals(
            gateway(client).as_ref(),
            &signals,
            &BTreeMap::new(),
            "2025-07-09 09:00:00",
            5,
        )
        .await
        .unwrap();

    assert_eq!(scores["agent_0"], vec![80.0, 80.0, 80.0]);
    assert_eq!(scores["agent_1"], vec![60.0, 60.0, 60.0]);

    let consensus = quantcrew::contest::judger::consensus_scores(&scores);
    assert_eq!(consensus["agent_0"], 80.0);

    // Scores and raw responses are persisted.
    assert!(workspace.judger_scores_path("2025-07-09 09:00:00").exists());
}

#[tokio::test]
async fn test_every_judger_failing_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = SequencedClient::new(vec!["no verdicts".to_string()]);

    let mut signals = BTreeMap::new();
    signals.insert("agent_0".to_string(), signal("agent_0", "2025-07-09 09:00:00", "buy"));

    let judger = SignalJudger::new(Workspace::new(dir.path()));
    let err = judger
        .judge_signals(
            gateway(client).as_ref(),
            &signals,
            &BTreeMap::new(),
            "2025-07-09 09:00:00",
            3,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ContestError::Judging(_)));
}

fn rising_market() -> StaticMarket {
    let mut market = StaticMarket::new();
    // Open prices rising ~1% per trading day across July 2025.
    for day in 1..=31 {
        let Some(date) = NaiveDate::from_ymd_opt(2025, 7, day) else {
            continue;
        };
        let open = 100.0 * (1.0 + 0.01 * day as f64);
        market = market.with_price(
            "CN-Stock",
            "600519.SH",
            date,
            SymbolPrice {
                open,
                high: open + 1.0,
                low: open - 1.0,
                close: open + 0.5,
                limit_price: None,
            },
        );
    }
    market
}

fn write_report(workspace: &Workspace, agent_name: &str, trigger_time: &str) {
    let final_result = format!(
        "<Output>\n<signal>\n<has_opportunity>yes</has_opportunity>\n<action>buy</action>\n<symbol_code>600519.SH</symbol_code>\n<symbol_name>贵州茅台</symbol_name>\n<evidence_list>\n  <evidence>demand recovery<time>{}</time><from_source>sina_news</from_source></evidence>\n</evidence_list>\n<limitations><limitation>short horizon</limitation></limitations>\n<probability>70</probability>\n</signal>\n</Output>",
        trigger_time
    );
    let artifact = SignalArtifact {
        task: "invest".into(),
        trigger_time: trigger_time.into(),
        background_information: String::new(),
        belief: "momentum".into(),
        final_result,
        final_result_thinking: "demand first".into(),
    };
    write_json_atomic(&workspace.report_path(agent_name, trigger_time), &artifact).unwrap();
}

fn trained_models(workspace: &Workspace) {
    let judges = vec![80.0, 75.0, 70.0, 85.0, 78.0];
    let mut training: BTreeMap<String, Vec<Option<SignalData>>> = BTreeMap::new();
    let series: Vec<Option<SignalData>> = (0..20)
        .map(|i| {
            let mut s = signal("agent_0", "2025-06-01 09:00:00", "buy");
            s.contest_data = Some(ContestData {
                reward: 0.008 + 0.001 * (i % 5) as f64,
                evaluation_date: "2025-06-01".into(),
                judge_scores: Some(judges.clone()),
            });
            Some(s)
        })
        .collect();
    training.insert("agent_0".to_string(), series.clone());
    training.insert("agent_1".to_string(), series);
    let predictor = ResearchPredictor::train(&training, 5, 3).unwrap();
    predictor.save(&workspace.model_dir()).unwrap();
}

fn contest_runtime(workspace: &Path, judge_reply: &str, calls: usize) -> Arc<Runtime> {
    let client = SequencedClient::new(vec![judge_reply.to_string(); calls]);
    Runtime::with_single_gateway(
        gateway(client),
        Arc::new(rising_market()) as Arc<dyn MarketProvider>,
        Workspace::new(workspace),
    )
}

/// Full contest pass: history on disk, rewards evaluated against the
/// market, judges scored, Sharpe predicted, weights normalized, final
/// result persisted.
#[tokio::test]
async fn test_full_contest_run() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(dir.path());

    // History: reports for the five trading days before Wed 2025-07-16.
    for date in ["2025-07-09", "2025-07-10", "2025-07-11", "2025-07-14", "2025-07-15"] {
        write_report(&workspace, "agent_0", &format!("{} 09:00:00", date));
    }
    trained_models(&workspace);

    let runtime = contest_runtime(dir.path(), "agent_0: 80|thin evidence (-20)", 5);
    let contest = ResearchContest::new(runtime, ContestConfig::default(), "CN-Stock");

    let mut current = BTreeMap::new();
    current.insert(
        "agent_0".to_string(),
        signal("agent_0", "2025-07-16 09:00:00", "buy"),
    );

    let result = contest.run("2025-07-16 09:00:00", &current).await.unwrap();

    // One positive-history buy signal takes the whole allocation.
    assert_eq!(result.weights["agent_0"], 1.0);
    let total: f64 = result.weights.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert!(result.predicted_sharpe.contains_key("agent_0"));
    assert!((result.summary.avg_score - 80.0).abs() < 1e-9);
    assert_eq!(result.summary.top_signals, vec!["agent_0".to_string()]);

    assert!(workspace.final_result_path("2025-07-16 09:00:00").exists());
    assert!(workspace.judger_scores_path("2025-07-16 09:00:00").exists());
}

/// Signals with `has_opportunity = yes` but a non-tradable action are
/// filtered out before weighting.
#[tokio::test]
async fn test_hold_signals_are_ineligible_for_weighting() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(dir.path());

    for date in ["2025-07-09", "2025-07-10", "2025-07-11", "2025-07-14", "2025-07-15"] {
        write_report(&workspace, "agent_0", &format!("{} 09:00:00", date));
    }
    trained_models(&workspace);

    let runtime = contest_runtime(dir.path(), "agent_0: 80|fine", 5);
    let contest = ResearchContest::new(runtime, ContestConfig::default(), "CN-Stock");

    let mut current = BTreeMap::new();
    current.insert(
        "agent_0".to_string(),
        signal("agent_0", "2025-07-16 09:00:00", "HOLD"),
    );

    let result = contest.run("2025-07-16 09:00:00", &current).await.unwrap();
    assert!(result.weights.values().all(|w| *w == 0.0));
}

/// Absent models are a loud failure, never a silent fallback.
#[tokio::test]
async fn test_contest_fails_loudly_without_models() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(dir.path());
    for date in ["2025-07-09", "2025-07-10", "2025-07-11", "2025-07-14", "2025-07-15"] {
        write_report(&workspace, "agent_0", &format!("{} 09:00:00", date));
    }

    let runtime = contest_runtime(dir.path(), "agent_0: 80|fine", 5);
    let contest = ResearchContest::new(runtime, ContestConfig::default(), "CN-Stock");

    let mut current = BTreeMap::new();
    current.insert(
        "agent_0".to_string(),
        signal("agent_0", "2025-07-16 09:00:00", "buy"),
    );

    let err = contest.run("2025-07-16 09:00:00", &current).await.unwrap_err();
    assert!(matches!(err, ContestError::ModelsMissing(_)));
}

#[tokio::test]
async fn test_contest_requires_current_signals() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = contest_runtime(dir.path(), "agent_0: 80|fine", 5);
    let contest = ResearchContest::new(runtime, ContestConfig::default(), "CN-Stock");

    let err = contest
        .run("2025-07-16 09:00:00", &BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ContestError::MissingJudgeScores(_)));
}

/// Answers according to the first rule whose needle appears in the prompt.
struct RuleClient {
    rules: Vec<(&'static str, String)>,
}

#[async_trait]
impl ClientWrapper for RuleClient {
    async fn send_message(
        &self,
        messages: &[Message],
        _options: &CallOptions,
    ) -> Result<ChunkStream, ClientError> {
        let prompt: String = messages
            .iter()
            .map(|m| m.content.as_ref())
            .collect::<Vec<_>>()
            .join("\n");
        for (needle, response) in &self.rules {
            if prompt.contains(needle) {
                return Ok(response_as_stream(response.clone(), String::new()));
            }
        }
        Ok(response_as_stream("unmatched prompt".to_string(), String::new()))
    }

    fn model_name(&self) -> &str {
        "rules"
    }
}

fn write_factor(workspace: &Workspace, agent_name: &str, trigger_time: &str, context: &str) {
    let artifact = quantcrew::data_agent::FactorArtifact {
        agent_name: agent_name.into(),
        trigger_time: trigger_time.into(),
        source_list: vec!["sina_news".into()],
        bias_goal: None,
        context_string: context.into(),
        references: Vec::new(),
        batch_summaries: Vec::new(),
    };
    write_json_atomic(&workspace.factor_path(agent_name, trigger_time), &artifact).unwrap();
}

/// The data contest ranks data agents on the realized quality of their
/// historical factors and keeps only the top agents' current factors.
#[tokio::test]
async fn test_data_contest_selects_top_agents() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(dir.path());

    for date in ["2025-07-09", "2025-07-10", "2025-07-11", "2025-07-14", "2025-07-15"] {
        let trigger = format!("{} 09:00:00", date);
        write_factor(
            &workspace,
            "liquor_news",
            &trigger,
            "July liquor demand data came in strong [1].",
        );
        write_factor(
            &workspace,
            "weather_news",
            &trigger,
            "The weather outlook for the week is mixed [1].",
        );
    }

    let client = Arc::new(RuleClient {
        rules: vec![
            (
                "decision score",
                "<Output><result><symbol_name>贵州茅台</symbol_name><reason>demand tailwind</reason><rating>2</rating></result></Output>"
                    .to_string(),
            ),
            (
                "Moutai demand is strong",
                "<Output><mention><content>贵州茅台</content><type>company</type></mention></Output>"
                    .to_string(),
            ),
            (
                "minor impact from weather",
                "<Output><mention><content>utilities</content><type>industry</type></mention></Output>"
                    .to_string(),
            ),
            (
                "July liquor demand",
                "<Output><observation>Moutai demand is strong.</observation></Output>".to_string(),
            ),
            (
                "weather outlook",
                "<Output><observation>Utilities may see minor impact from weather.</observation></Output>"
                    .to_string(),
            ),
        ],
    });
    let market = rising_market().with_symbol("贵州茅台", "600519.SH");
    let runtime = Runtime::with_single_gateway(
        gateway(client),
        Arc::new(market) as Arc<dyn MarketProvider>,
        workspace.clone(),
    );

    let contest = quantcrew::contest::DataContest::new(runtime, "CN-Stock", 5).with_top_k(1);

    let current: Vec<quantcrew::data_agent::FactorArtifact> = ["liquor_news", "weather_news"]
        .iter()
        .map(|agent| quantcrew::data_agent::FactorArtifact {
            agent_name: agent.to_string(),
            trigger_time: "2025-07-16 09:00:00".into(),
            source_list: Vec::new(),
            bias_goal: None,
            context_string: "today's factor".into(),
            references: Vec::new(),
            batch_summaries: Vec::new(),
        })
        .collect();

    let selected = contest.run("2025-07-16 09:00:00", &current).await;
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].agent_name, "liquor_news");

    // Evaluations are written back into the factor files.
    let evaluated: serde_json::Value = quantcrew::artifacts::read_json(
        &workspace.factor_path("liquor_news", "2025-07-09 09:00:00"),
    )
    .unwrap();
    assert!(evaluated["contest_data"]["reward"].as_f64().unwrap() > 0.0);
    assert_eq!(evaluated["contest_data"]["observations_count"], 1);
}
