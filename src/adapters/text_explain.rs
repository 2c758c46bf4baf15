//! Deterministic, template-based trade explanations.
//!
//! Stands in for an external explanation service: same inputs, same
//! text, no network. Useful for tests and for running with xai enabled
//! but offline.

use crate::domain::error::SigtraderError;
use crate::ports::explain_port::ExplainPort;
use chrono::NaiveDate;

pub struct TextExplainAdapter;

impl TextExplainAdapter {
    pub fn new() -> Self {
        TextExplainAdapter
    }

    fn feature(features: &[(&str, f64)], name: &str) -> Option<f64> {
        features.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }
}

impl Default for TextExplainAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExplainPort for TextExplainAdapter {
    fn explain(
        &self,
        ticker: &str,
        signal: &str,
        price: f64,
        date: NaiveDate,
        features: &[(&str, f64)],
    ) -> Result<String, SigtraderError> {
        let mut text = format!(
            "{} {}: composite score {} at close {:.2}.",
            date, ticker, signal, price
        );
        if let Some(rsi) = Self::feature(features, "rsi14") {
            let regime = if rsi >= 70.0 {
                "overbought"
            } else if rsi <= 30.0 {
                "oversold"
            } else {
                "neutral"
            };
            text.push_str(&format!(" RSI(14) {:.1} ({}).", rsi, regime));
        }
        if let Some(bb) = Self::feature(features, "bb_position") {
            text.push_str(&format!(" Price sits at {:.0}% of the Bollinger band.", bb * 100.0));
        }
        if let Some(macd) = Self::feature(features, "macd") {
            if let Some(sig) = Self::feature(features, "macd_signal") {
                let side = if macd >= sig { "above" } else { "below" };
                text.push_str(&format!(" MACD is {} its signal line.", side));
            }
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 3).unwrap()
    }

    #[test]
    fn explanation_is_deterministic() {
        let adapter = TextExplainAdapter::new();
        let features = [("rsi14", 72.5), ("bb_position", 0.91)];
        let a = adapter
            .explain("AAPL", "0.8123", 187.33, date(), &features)
            .unwrap();
        let b = adapter
            .explain("AAPL", "0.8123", 187.33, date(), &features)
            .unwrap();
        assert_eq!(a, b);
        assert!(a.contains("AAPL"));
        assert!(a.contains("0.8123"));
        assert!(a.contains("overbought"));
    }

    #[test]
    fn missing_features_are_omitted() {
        let adapter = TextExplainAdapter::new();
        let text = adapter.explain("MSFT", "0.4000", 400.0, date(), &[]).unwrap();
        assert!(text.contains("MSFT"));
        assert!(!text.contains("RSI"));
        assert!(!text.contains("MACD"));
    }

    #[test]
    fn macd_side_tracks_the_signal_line() {
        let adapter = TextExplainAdapter::new();
        let above = adapter
            .explain("T", "0.7", 10.0, date(), &[("macd", 1.0), ("macd_signal", 0.5)])
            .unwrap();
        assert!(above.contains("above"));
        let below = adapter
            .explain("T", "0.7", 10.0, date(), &[("macd", -1.0), ("macd_signal", 0.5)])
            .unwrap();
        assert!(below.contains("below"));
    }
}
