//! Symbol resolution tool.

use crate::quantcrew::market::MarketProvider;
use crate::quantcrew::tool_protocol::AgentTool;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error;
use std::sync::Arc;

/// Resolves a company name (or partial code) to its canonical
/// `(name, symbol_code)` pair via the market provider.
pub struct SymbolSearchTool {
    market: Arc<dyn MarketProvider>,
    market_name: String,
}

impl SymbolSearchTool {
    pub fn new(market: Arc<dyn MarketProvider>, market_name: impl Into<String>) -> Self {
        Self {
            market,
            market_name: market_name.into(),
        }
    }
}

#[async_trait]
impl AgentTool for SymbolSearchTool {
    fn name(&self) -> &str {
        "symbol_search"
    }

    fn description(&self) -> &str {
        "Resolve a company name to its exchange symbol code."
    }

    fn args_schema(&self) -> Value {
        json!({
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Company name or partial symbol code"
                }
            },
            "required": ["query"]
        })
    }

    fn max_output_len(&self) -> usize {
        1000
    }

    fn timeout_seconds(&self) -> u64 {
        10
    }

    async fn invoke(&self, args: Value) -> Result<String, Box<dyn Error + Send + Sync>> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or("query is required")?;
        let (name, code) = self.market.fix_symbol_code(&self.market_name, query, "");
        if code.trim().is_empty() {
            return Err(format!("no symbol found for {:?}", query).into());
        }
        Ok(format!("{} ({})", name, code))
    }
}
