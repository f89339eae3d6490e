//! Market, calendar, and price provider interface.
//!
//! The research agents and the contest depend on market data only through
//! [`MarketProvider`]: trading-day arithmetic, daily open/close/limit
//! prices, a textual snapshot of the target market, and symbol resolution.
//! Production backends (exchange APIs, vendor feeds) implement the trait
//! outside this crate; [`StaticMarket`] is the deterministic in-memory
//! implementation used by tests and demos.

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt;

/// Daily price bar plus the exchange limit price where the market has one.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SymbolPrice {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
}

/// Error raised when a price lookup cannot be satisfied.
#[derive(Debug)]
pub struct PriceLookupError {
    pub market: String,
    pub symbol: String,
    pub detail: String,
}

impl fmt::Display for PriceLookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no price for {} on {}: {}",
            self.symbol, self.market, self.detail
        )
    }
}

impl Error for PriceLookupError {}

/// Extract the `YYYY-MM-DD` date from an ISO local trigger time.
pub fn trigger_date(trigger_time: &str) -> Option<NaiveDate> {
    let date_part = trigger_time.split(' ').next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Market collaborator interface.
#[async_trait]
pub trait MarketProvider: Send + Sync {
    /// Whether `date` is a trading day on `market`.
    fn is_trading_day(&self, market: &str, date: NaiveDate) -> bool;

    /// The trading day strictly before the trigger time's date.
    fn previous_trading_date(&self, market: &str, trigger_time: &str) -> Option<NaiveDate> {
        let mut date = trigger_date(trigger_time)?;
        for _ in 0..30 {
            date -= Duration::days(1);
            if self.is_trading_day(market, date) {
                return Some(date);
            }
        }
        None
    }

    /// Daily prices for `symbol`, `date_diff` trading days away from the
    /// trigger time's date (0 = same day, 1 = next trading day, -1 =
    /// previous trading day).
    async fn symbol_price(
        &self,
        market: &str,
        symbol: &str,
        trigger_time: &str,
        date_diff: i64,
    ) -> Result<SymbolPrice, Box<dyn Error + Send + Sync>>;

    /// Textual snapshot of the target market fed into research backgrounds.
    async fn target_symbol_context(
        &self,
        trigger_time: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// Resolve a possibly-partial `(name, code)` pair to the canonical one.
    /// Unresolvable inputs are returned unchanged.
    fn fix_symbol_code(&self, market: &str, name: &str, code: &str) -> (String, String);
}

/// Deterministic in-memory market: Monday–Friday calendar, a static price
/// table, and a static symbol directory.
#[derive(Default)]
pub struct StaticMarket {
    /// `(market, symbol)` -> date -> price bar.
    prices: HashMap<(String, String), BTreeMap<NaiveDate, SymbolPrice>>,
    /// Company name -> `(name, code)`.
    symbols: HashMap<String, (String, String)>,
    target_context: String,
}

impl StaticMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(
        mut self,
        market: impl Into<String>,
        symbol: impl Into<String>,
        date: NaiveDate,
        price: SymbolPrice,
    ) -> Self {
        self.prices
            .entry((market.into(), symbol.into()))
            .or_default()
            .insert(date, price);
        self
    }

    pub fn with_symbol(mut self, name: impl Into<String>, code: impl Into<String>) -> Self {
        let name = name.into();
        let code = code.into();
        self.symbols.insert(name.clone(), (name, code));
        self
    }

    pub fn with_target_context(mut self, context: impl Into<String>) -> Self {
        self.target_context = context.into();
        self
    }

    /// Walk `steps` trading days from `date`; 0 steps returns `date` itself
    /// normalized onto the calendar (forward for non-trading days).
    fn offset_trading_day(&self, market: &str, date: NaiveDate, steps: i64) -> Option<NaiveDate> {
        let mut current = date;
        for _ in 0..30 {
            if self.is_trading_day(market, current) {
                break;
            }
            current += Duration::days(1);
        }
        if !self.is_trading_day(market, current) {
            return None;
        }
        let mut remaining = steps.abs();
        let direction = if steps >= 0 { 1 } else { -1 };
        while remaining > 0 {
            for _ in 0..30 {
                current += Duration::days(direction);
                if self.is_trading_day(market, current) {
                    break;
                }
            }
            remaining -= 1;
        }
        Some(current)
    }
}

#[async_trait]
impl MarketProvider for StaticMarket {
    fn is_trading_day(&self, _market: &str, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    async fn symbol_price(
        &self,
        market: &str,
        symbol: &str,
        trigger_time: &str,
        date_diff: i64,
    ) -> Result<SymbolPrice, Box<dyn Error + Send + Sync>> {
        let base = trigger_date(trigger_time).ok_or_else(|| PriceLookupError {
            market: market.to_string(),
            symbol: symbol.to_string(),
            detail: format!("unparseable trigger time {:?}", trigger_time),
        })?;
        let date = self
            .offset_trading_day(market, base, date_diff)
            .ok_or_else(|| PriceLookupError {
                market: market.to_string(),
                symbol: symbol.to_string(),
                detail: "no trading day in range".to_string(),
            })?;
        self.prices
            .get(&(market.to_string(), symbol.to_string()))
            .and_then(|series| series.get(&date))
            .cloned()
            .ok_or_else(|| {
                Box::new(PriceLookupError {
                    market: market.to_string(),
                    symbol: symbol.to_string(),
                    detail: format!("no bar for {}", date),
                }) as Box<dyn Error + Send + Sync>
            })
    }

    async fn target_symbol_context(
        &self,
        _trigger_time: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(self.target_context.clone())
    }

    fn fix_symbol_code(&self, _market: &str, name: &str, code: &str) -> (String, String) {
        if !code.trim().is_empty() {
            return (name.to_string(), code.trim().to_string());
        }
        match self.symbols.get(name.trim()) {
            Some((canonical_name, canonical_code)) => {
                (canonical_name.clone(), canonical_code.clone())
            }
            None => (name.to_string(), code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64) -> SymbolPrice {
        SymbolPrice {
            open,
            high: open * 1.05,
            low: open * 0.95,
            close: open * 1.01,
            limit_price: Some(open * 1.10),
        }
    }

    fn market() -> StaticMarket {
        // 2025-07-09 is a Wednesday.
        StaticMarket::new()
            .with_price(
                "CN-Stock",
                "600519.SH",
                NaiveDate::from_ymd_opt(2025, 7, 9).unwrap(),
                bar(100.0),
            )
            .with_price(
                "CN-Stock",
                "600519.SH",
                NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(),
                bar(102.0),
            )
            .with_symbol("贵州茅台", "600519.SH")
    }

    #[tokio::test]
    async fn test_price_lookup_with_offsets() {
        let market = market();
        let today = market
            .symbol_price("CN-Stock", "600519.SH", "2025-07-09 09:00:00", 0)
            .await
            .unwrap();
        assert_eq!(today.open, 100.0);
        let next = market
            .symbol_price("CN-Stock", "600519.SH", "2025-07-09 09:00:00", 1)
            .await
            .unwrap();
        assert_eq!(next.open, 102.0);
        assert!(market
            .symbol_price("CN-Stock", "600519.SH", "2025-07-09 09:00:00", 5)
            .await
            .is_err());
    }

    #[test]
    fn test_weekend_calendar() {
        let market = market();
        // Friday 2025-07-11 -> previous trading day is Thursday.
        assert_eq!(
            market.previous_trading_date("CN-Stock", "2025-07-11 09:00:00"),
            Some(NaiveDate::from_ymd_opt(2025, 7, 10).unwrap())
        );
        // Monday 2025-07-14 -> skips the weekend back to Friday.
        assert_eq!(
            market.previous_trading_date("CN-Stock", "2025-07-14 09:00:00"),
            Some(NaiveDate::from_ymd_opt(2025, 7, 11).unwrap())
        );
    }

    #[test]
    fn test_fix_symbol_code() {
        let market = market();
        assert_eq!(
            market.fix_symbol_code("CN-Stock", "贵州茅台", ""),
            ("贵州茅台".to_string(), "600519.SH".to_string())
        );
        // Existing codes pass through untouched.
        assert_eq!(
            market.fix_symbol_code("CN-Stock", "whatever", "000001.SZ"),
            ("whatever".to_string(), "000001.SZ".to_string())
        );
        // Unknown names come back unchanged.
        assert_eq!(
            market.fix_symbol_code("CN-Stock", "nobody", ""),
            ("nobody".to_string(), "".to_string())
        );
    }
}
