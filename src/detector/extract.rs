use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

// The three numeric shapes the classifier recognizes: long digit runs
// (message-embedded identifiers), comma-grouped numbers (prices), and
// plain numbers.
static LONG_DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{10,20})\b")
    .expect("invalid long digit run pattern"));
static GROUPED_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{1,3}(?:,\d{3})+\b")
    .expect("invalid grouped number pattern"));
static PLAIN_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?")
    .expect("invalid plain number pattern"));
static PERCENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*%")
    .expect("invalid percent pattern"));
static FRACTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*/\s*(\d+)")
    .expect("invalid fraction pattern"));

/// One step of an extraction fallback chain. Strategies are tried in
/// order; the first `Some` wins.
pub trait Extract: Send + Sync {
    fn extract(&self, text: &str) -> Option<String>;
}

pub fn first_match(chain: &[Box<dyn Extract>], text: &str) -> Option<String> {
    chain.iter().find_map(|strategy| strategy.extract(text))
}

/// Takes the first 10-20 digit run, the usual shape of an item id
/// embedded in an announcement.
pub struct LongDigitRun;

impl Extract for LongDigitRun {
    fn extract(&self, text: &str) -> Option<String> {
        LONG_DIGIT_RUN.captures(text)
            .map(|c| c[1].to_owned())
    }
}

/// Fallback identifier: UTC timestamp plus the first three bytes of a
/// content hash. Not reproducible for the same text seen at different
/// times, which trades idempotent re-ingestion for collision safety on
/// near-duplicate announcements.
pub struct TimestampContentHash;

impl Extract for TimestampContentHash {
    fn extract(&self, text: &str) -> Option<String> {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        let digest = Sha256::digest(text.as_bytes());
        Some(format!("{timestamp}{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2]))
    }
}

/// Looks for a number in a fixed window before or after a currency
/// indicator token or emoji.
pub struct PriceNearIndicator {
    patterns: Vec<Regex>,
}

impl PriceNearIndicator {
    pub fn new(indicators: &[&str]) -> Self {
        let patterns = indicators.iter()
            .map(|indicator| {
                let escaped = regex::escape(indicator);
                Regex::new(&format!(r"(?i)(\d+(?:,\d+)*)\s*{escaped}|{escaped}\s*(\d+(?:,\d+)*)"))
                    .expect("invalid price indicator pattern")
            })
            .collect();
        Self { patterns }
    }
}

impl Extract for PriceNearIndicator {
    fn extract(&self, text: &str) -> Option<String> {
        self.patterns.iter()
            .find_map(|pattern| pattern.captures(text))
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_owned())
    }
}

/// No indicator found: fall back to the largest comma-grouped number
/// anywhere in the text.
pub struct LargestGroupedNumber;

impl Extract for LargestGroupedNumber {
    fn extract(&self, text: &str) -> Option<String> {
        collect_numbers(text).into_iter()
            .filter(|n| n.contains(','))
            .max_by_key(|n| n.replace(',', "").parse::<i64>().unwrap_or(0))
    }
}

pub fn collect_numbers(text: &str) -> Vec<String> {
    let mut numbers = Vec::new();
    for pattern in [&*LONG_DIGIT_RUN, &*GROUPED_NUMBER, &*PLAIN_NUMBER] {
        numbers.extend(pattern.find_iter(text).map(|m| m.as_str().to_owned()));
    }
    numbers
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Availability {
    pub available: Option<i64>,
    pub total: Option<i64>,
    pub available_percent: Option<i64>,
}

/// Extracts availability from a direct `N%` pattern and, additionally,
/// from an `A/B` fraction; the fraction-derived percentage wins when
/// both are present.
pub fn extract_availability(text: &str) -> Availability {
    let mut result = Availability::default();
    if let Some(captures) = PERCENT.captures(text) {
        result.available_percent = captures[1].parse().ok();
    }
    if let Some(captures) = FRACTION.captures(text) {
        let claimed: Option<i64> = captures[1].parse().ok();
        let total: Option<i64> = captures[2].parse().ok();
        if let (Some(claimed), Some(total)) = (claimed, total) {
            if total > 0 {
                let available = total - claimed;
                result.available = Some(available);
                result.total = Some(total);
                result.available_percent = Some(((available as f64 / total as f64) * 100.0).round() as i64);
            }
        }
    }
    result
}
