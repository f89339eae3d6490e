// src/quantcrew/tools/mod.rs
//
// Built-in tools for the research agents.  Each tool wraps the market
// provider carried by the runtime; production deployments register
// additional tools (search, corp info, ...) into the same map.

pub mod price_info;
pub mod symbol_search;

use crate::quantcrew::market::MarketProvider;
use crate::quantcrew::tool_protocol::AgentTool;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Build the default tool map over a market provider, keyed by tool name.
/// Agent configurations pick from these keys.
pub fn builtin_tools(
    market: Arc<dyn MarketProvider>,
    market_name: &str,
) -> BTreeMap<String, Arc<dyn AgentTool>> {
    let mut tools: BTreeMap<String, Arc<dyn AgentTool>> = BTreeMap::new();
    let price: Arc<dyn AgentTool> =
        Arc::new(price_info::PriceInfoTool::new(market.clone(), market_name));
    tools.insert(price.name().to_string(), price);
    let search: Arc<dyn AgentTool> =
        Arc::new(symbol_search::SymbolSearchTool::new(market, market_name));
    tools.insert(search.name().to_string(), search);
    tools
}
