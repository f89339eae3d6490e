//! Shared collaborators threaded through every agent.
//!
//! The [`Runtime`] handle is constructed once in `main` and passed into
//! agent constructors, replacing process-global singletons.  After
//! construction it is read-only; the collaborators it carries are themselves
//! thread-safe.

use crate::quantcrew::artifacts::Workspace;
use crate::quantcrew::gateway::LlmGateway;
use crate::quantcrew::market::MarketProvider;
use std::sync::Arc;

/// Process-wide collaborators: the text and thinking LLM gateways, the
/// market provider, and the artifact workspace.
pub struct Runtime {
    pub llm: Arc<LlmGateway>,
    pub thinking_llm: Arc<LlmGateway>,
    pub market: Arc<dyn MarketProvider>,
    pub workspace: Workspace,
}

impl Runtime {
    pub fn new(
        llm: Arc<LlmGateway>,
        thinking_llm: Arc<LlmGateway>,
        market: Arc<dyn MarketProvider>,
        workspace: Workspace,
    ) -> Arc<Self> {
        Arc::new(Self {
            llm,
            thinking_llm,
            market,
            workspace,
        })
    }

    /// Convenience constructor for deployments that use one model for both
    /// plain and thinking calls.
    pub fn with_single_gateway(
        llm: Arc<LlmGateway>,
        market: Arc<dyn MarketProvider>,
        workspace: Workspace,
    ) -> Arc<Self> {
        Self::new(llm.clone(), llm, market, workspace)
    }
}
