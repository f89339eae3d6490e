//! Structured signal extraction from research-agent output.
//!
//! LLMs emit the `<Output><signal>...</signal></Output>` envelope as prose,
//! so parsing stays regex-based and tolerant of stray whitespace and missing
//! optional fields.  All of it is centralized here: [`parse_signals`] is the
//! single entry point, and [`render_signals`] reproduces the envelope so
//! that parse-then-render is a field-for-field identity.

use crate::quantcrew::market::MarketProvider;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One supporting fact inside a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub description: String,
    pub time: String,
    pub from_source: String,
}

/// A structured investment recommendation extracted from one
/// `<signal>` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSignal {
    /// Chain-of-thought captured alongside the final report.
    #[serde(default)]
    pub thinking: String,
    /// `yes` or `no`.
    pub has_opportunity: String,
    /// `buy`, `sell`, or `HOLD` as emitted.
    pub action: String,
    pub symbol_code: String,
    pub symbol_name: String,
    #[serde(default)]
    pub evidence_list: Vec<Evidence>,
    #[serde(default)]
    pub limitations: Vec<String>,
    /// Estimated win probability, clamped to 0..=100.
    pub probability: u8,
    /// Filled in by the company workflow when fanning signals out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_index: Option<usize>,
}

lazy_static! {
    static ref SIGNAL_RE: Regex = Regex::new(r"(?s)<signal>(.*?)</signal>").expect("static regex");
    static ref HAS_OPPORTUNITY_RE: Regex =
        Regex::new(r"(?s)<has_opportunity>(.*?)</has_opportunity>").expect("static regex");
    static ref ACTION_RE: Regex = Regex::new(r"(?s)<action>(.*?)</action>").expect("static regex");
    static ref SYMBOL_CODE_RE: Regex =
        Regex::new(r"(?s)<symbol_code>(.*?)</symbol_code>").expect("static regex");
    static ref SYMBOL_NAME_RE: Regex =
        Regex::new(r"(?s)<symbol_name>(.*?)</symbol_name>").expect("static regex");
    static ref PROBABILITY_RE: Regex =
        Regex::new(r"(?s)<probability>(.*?)</probability>").expect("static regex");
    static ref EVIDENCE_LIST_RE: Regex =
        Regex::new(r"(?s)<evidence_list>(.*?)</evidence_list>").expect("static regex");
    static ref TIME_RE: Regex = Regex::new(r"(?s)<time>(.*?)</time>").expect("static regex");
    static ref FROM_SOURCE_RE: Regex =
        Regex::new(r"(?s)<from_source>(.*?)</from_source>").expect("static regex");
    static ref LIMITATIONS_RE: Regex =
        Regex::new(r"(?s)<limitations>(.*?)</limitations>").expect("static regex");
    static ref LIMITATION_RE: Regex =
        Regex::new(r"(?s)<limitation>(.*?)</limitation>").expect("static regex");
}

fn extract<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures(text).map(|c| c.get(1).map_or("", |m| m.as_str().trim()))
}

fn parse_probability(raw: &str) -> u8 {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse::<u32>().map(|p| p.min(100) as u8).unwrap_or(0)
}

fn parse_evidence_list(block: &str) -> Vec<Evidence> {
    let Some(list) = extract(&EVIDENCE_LIST_RE, block) else {
        return Vec::new();
    };
    let mut evidence = Vec::new();
    for item in list.split("<evidence>") {
        let Some(body) = item.split("</evidence>").next() else {
            continue;
        };
        if !item.contains("</evidence>") {
            continue;
        }
        // Description is the text before the first nested tag.
        let description = body
            .split("<time>")
            .next()
            .unwrap_or("")
            .split("<from_source>")
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        if description.is_empty() && !body.contains("<time>") {
            continue;
        }
        evidence.push(Evidence {
            description,
            time: extract(&TIME_RE, body).unwrap_or("N/A").to_string(),
            from_source: extract(&FROM_SOURCE_RE, body).unwrap_or("N/A").to_string(),
        });
    }
    evidence
}

fn parse_limitations(block: &str) -> Vec<String> {
    let Some(list) = extract(&LIMITATIONS_RE, block) else {
        return Vec::new();
    };
    LIMITATION_RE
        .captures_iter(list)
        .map(|c| c[1].trim().to_string())
        .collect()
}

fn parse_signal_block(block: &str, thinking: &str) -> Option<ParsedSignal> {
    let has_opportunity = extract(&HAS_OPPORTUNITY_RE, block)?.to_string();
    let action = extract(&ACTION_RE, block)?.to_string();
    let symbol_code = extract(&SYMBOL_CODE_RE, block)?.to_string();
    let symbol_name = extract(&SYMBOL_NAME_RE, block)?.to_string();
    let probability = parse_probability(extract(&PROBABILITY_RE, block)?);

    Some(ParsedSignal {
        thinking: thinking.to_string(),
        has_opportunity,
        action,
        symbol_code,
        symbol_name,
        evidence_list: parse_evidence_list(block),
        limitations: parse_limitations(block),
        probability,
        agent_id: None,
        agent_name: None,
        signal_index: None,
    })
}

/// Parse every `<signal>` block from a final report.
///
/// `thinking_raw` is the reasoning stream (anything after an `<Output>`
/// marker is discarded); `output_raw` is the completion, of which only the
/// last `<Output>` section is scanned.  Blocks missing a required field are
/// skipped, not fatal.
pub fn parse_signals(thinking_raw: &str, output_raw: &str) -> Vec<ParsedSignal> {
    let thinking = thinking_raw
        .split("<Output>")
        .next()
        .unwrap_or("")
        .trim_matches('\n')
        .trim();
    let output = output_raw.split("<Output>").last().unwrap_or("").trim();

    SIGNAL_RE
        .captures_iter(output)
        .filter_map(|captures| parse_signal_block(&captures[1], thinking))
        .collect()
}

/// Resolve the `(symbol_name, symbol_code)` of every signal through the
/// market provider.
pub fn fix_symbols(signals: &mut [ParsedSignal], market: &dyn MarketProvider, market_name: &str) {
    for signal in signals.iter_mut() {
        let (name, code) =
            market.fix_symbol_code(market_name, &signal.symbol_name, &signal.symbol_code);
        signal.symbol_name = name;
        signal.symbol_code = code;
    }
}

/// Render signals back into the `<Output>` envelope the parser accepts.
pub fn render_signals(signals: &[ParsedSignal]) -> String {
    let mut out = String::from("<Output>\n");
    for signal in signals {
        out.push_str("<signal>\n");
        out.push_str(&format!(
            "<has_opportunity>{}</has_opportunity>\n",
            signal.has_opportunity
        ));
        out.push_str(&format!("<action>{}</action>\n", signal.action));
        out.push_str(&format!("<symbol_code>{}</symbol_code>\n", signal.symbol_code));
        out.push_str(&format!("<symbol_name>{}</symbol_name>\n", signal.symbol_name));
        out.push_str("<evidence_list>\n");
        for evidence in &signal.evidence_list {
            out.push_str(&format!(
                "  <evidence>{}<time>{}</time><from_source>{}</from_source></evidence>\n",
                evidence.description, evidence.time, evidence.from_source
            ));
        }
        out.push_str("</evidence_list>\n");
        out.push_str("<limitations>");
        for limitation in &signal.limitations {
            out.push_str(&format!("<limitation>{}</limitation>", limitation));
        }
        out.push_str("</limitations>\n");
        out.push_str(&format!("<probability>{}</probability>\n", signal.probability));
        out.push_str("</signal>\n");
    }
    out.push_str("</Output>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantcrew::market::StaticMarket;

    const SAMPLE: &str = r#"Some prose first.
<Output>
<signal>
<has_opportunity> yes </has_opportunity>
<action>buy</action>
<symbol_code>600519.SH</symbol_code>
<symbol_name>贵州茅台</symbol_name>
<evidence_list>
  <evidence>Strong quarterly revenue growth<time>2025-07-08</time><from_source>sina_news</from_source></evidence>
  <evidence>Sector momentum without timestamp</evidence>
</evidence_list>
<limitations><limitation>Single-day horizon</limitation><limitation>News may be priced in</limitation></limitations>
<probability>72</probability>
</signal>
<signal>
<has_opportunity>no</has_opportunity>
<action>HOLD</action>
<symbol_code></symbol_code>
<symbol_name></symbol_name>
<evidence_list>
</evidence_list>
<limitations></limitations>
<probability>0</probability>
</signal>
</Output>"#;

    #[test]
    fn test_parse_multiple_signals() {
        let signals = parse_signals("I think...<Output>ignored", SAMPLE);
        assert_eq!(signals.len(), 2);

        let first = &signals[0];
        assert_eq!(first.thinking, "I think...");
        assert_eq!(first.has_opportunity, "yes");
        assert_eq!(first.action, "buy");
        assert_eq!(first.symbol_code, "600519.SH");
        assert_eq!(first.probability, 72);
        assert_eq!(first.evidence_list.len(), 2);
        assert_eq!(first.evidence_list[0].time, "2025-07-08");
        assert_eq!(first.evidence_list[1].time, "N/A");
        assert_eq!(first.evidence_list[1].from_source, "N/A");
        assert_eq!(first.limitations.len(), 2);

        let second = &signals[1];
        assert_eq!(second.has_opportunity, "no");
        assert!(second.evidence_list.is_empty());
        assert!(second.limitations.is_empty());
    }

    #[test]
    fn test_parse_skips_incomplete_blocks() {
        let broken = "<Output><signal><action>buy</action></signal></Output>";
        assert!(parse_signals("", broken).is_empty());
    }

    #[test]
    fn test_probability_is_clamped() {
        assert_eq!(parse_probability("150"), 100);
        assert_eq!(parse_probability(" 65% "), 65);
        assert_eq!(parse_probability("n/a"), 0);
    }

    #[test]
    fn test_round_trip_identity() {
        let signals = parse_signals("", SAMPLE);
        let rendered = render_signals(&signals);
        let reparsed = parse_signals("", &rendered);
        assert_eq!(signals, reparsed);
    }

    #[test]
    fn test_symbol_fix_up() {
        let market = StaticMarket::new().with_symbol("贵州茅台", "600519.SH");
        let raw = r#"<Output><signal>
<has_opportunity>yes</has_opportunity>
<action>buy</action>
<symbol_code></symbol_code>
<symbol_name>贵州茅台</symbol_name>
<evidence_list></evidence_list>
<limitations></limitations>
<probability>60</probability>
</signal></Output>"#;
        let mut signals = parse_signals("", raw);
        fix_symbols(&mut signals, &market, "CN-Stock");
        assert_eq!(signals[0].symbol_code, "600519.SH");
        assert_eq!(signals[0].symbol_name, "贵州茅台");
    }
}
