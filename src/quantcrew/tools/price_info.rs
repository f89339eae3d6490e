//! Daily price lookup tool.

use crate::quantcrew::market::MarketProvider;
use crate::quantcrew::tool_protocol::AgentTool;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error;
use std::fmt::Write as _;
use std::sync::Arc;

/// Returns recent daily open/high/low/close bars for a symbol, most recent
/// first, as a small text table the LLM can read directly.
pub struct PriceInfoTool {
    market: Arc<dyn MarketProvider>,
    market_name: String,
}

impl PriceInfoTool {
    pub fn new(market: Arc<dyn MarketProvider>, market_name: impl Into<String>) -> Self {
        Self {
            market,
            market_name: market_name.into(),
        }
    }
}

#[async_trait]
impl AgentTool for PriceInfoTool {
    fn name(&self) -> &str {
        "price_info"
    }

    fn description(&self) -> &str {
        "Look up recent daily open/high/low/close prices for a stock symbol."
    }

    fn args_schema(&self) -> Value {
        json!({
            "properties": {
                "symbol_code": {
                    "type": "string",
                    "description": "Exchange symbol code, e.g. 600519.SH"
                },
                "lookback_days": {
                    "type": "integer",
                    "description": "How many trading days to report, counting back from the trigger date (default 3)"
                }
            },
            "required": ["symbol_code"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, Box<dyn Error + Send + Sync>> {
        let symbol_code = args
            .get("symbol_code")
            .and_then(Value::as_str)
            .ok_or("symbol_code is required")?;
        let trigger_time = args
            .get("trigger_time")
            .and_then(Value::as_str)
            .ok_or("trigger_time missing from tool arguments")?;
        let lookback = args
            .get("lookback_days")
            .and_then(Value::as_u64)
            .unwrap_or(3)
            .min(30);

        let mut table = format!("Daily prices for {} (most recent first):\n", symbol_code);
        let mut found = 0usize;
        for day in 0..lookback {
            let diff = -(day as i64);
            match self
                .market
                .symbol_price(&self.market_name, symbol_code, trigger_time, diff)
                .await
            {
                Ok(price) => {
                    found += 1;
                    let _ = writeln!(
                        table,
                        "T{:+}: open={:.2} high={:.2} low={:.2} close={:.2}",
                        diff, price.open, price.high, price.low, price.close
                    );
                }
                Err(err) => {
                    let _ = writeln!(table, "T{:+}: unavailable ({})", diff, err);
                }
            }
        }
        if found == 0 {
            return Err(format!("no price data for {}", symbol_code).into());
        }
        Ok(table)
    }
}
