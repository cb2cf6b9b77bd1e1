mod extract;
mod keywords;

pub use extract::*;
pub use keywords::*;

use chrono::Utc;
use crate::domain::GiftEvent;

const DESCRIPTION_LIMIT: usize = 100;

/// Heuristic text classifier: message text in, structured gift event out.
/// Deterministic for a given text, except the identifier fallback which
/// mixes in the current timestamp.
pub struct GiftDetector {
    keywords: Keywords,
    id_chain: Vec<Box<dyn Extract>>,
    price_chain: Vec<Box<dyn Extract>>,
}

impl GiftDetector {
    pub fn new(keywords: Keywords) -> Self {
        let price_chain: Vec<Box<dyn Extract>> = vec![
            Box::new(PriceNearIndicator::new(keywords.price_indicators)),
            Box::new(LargestGroupedNumber),
        ];
        let id_chain: Vec<Box<dyn Extract>> = vec![
            Box::new(LongDigitRun),
            Box::new(TimestampContentHash),
        ];
        Self { keywords, id_chain, price_chain }
    }

    pub fn detect(&self, text: &str) -> Option<GiftEvent> {
        self.detect_with_keywords(text, &[])
    }

    /// Like [`detect`](Self::detect), but a non-empty per-channel keyword
    /// list replaces the default gate list.
    pub fn detect_with_keywords(&self, text: &str, gate_override: &[String]) -> Option<GiftEvent> {
        if text.is_empty() {
            return None;
        }
        let text_lower = text.to_lowercase();

        let gated_in = if gate_override.is_empty() {
            Keywords::any_in(self.keywords.gate, &text_lower)
        } else {
            gate_override.iter().any(|kw| text_lower.contains(&kw.to_lowercase()))
        };
        if !gated_in {
            return None;
        }

        let id = first_match(&self.id_chain, text)
            .unwrap_or_default();
        let is_limited = Keywords::any_in(self.keywords.limited, &text_lower);
        let mut is_sold_out = Keywords::any_in(self.keywords.sold_out, &text_lower);

        let price = first_match(&self.price_chain, text);
        let availability = extract_availability(text);
        // a zero availability percentage overrides whatever the phrase
        // check concluded
        if availability.available_percent == Some(0) {
            is_sold_out = true;
        }

        Some(GiftEvent {
            id,
            detected_at: Utc::now(),
            price,
            total: availability.total,
            available: availability.available,
            available_percent: availability.available_percent,
            is_limited,
            is_sold_out,
            urgency_score: urgency_score(is_sold_out, is_limited, availability.available_percent),
            emoji: self.pick_emoji(text),
            description: summarize(text),
        })
    }

    fn pick_emoji(&self, text: &str) -> String {
        self.keywords.gift_emoji.iter()
            .find(|emoji| text.contains(*emoji))
            .unwrap_or(&DEFAULT_EMOJI)
            .to_string()
    }
}

/// Scarcity heuristic in [0, 1]: base 0.3, sold-out short-circuits to 0,
/// +0.3 for a limited flag, then a single availability tier.
fn urgency_score(is_sold_out: bool, is_limited: bool, available_percent: Option<i64>) -> f64 {
    if is_sold_out {
        return 0.0;
    }
    let mut score: f64 = 0.3;
    if is_limited {
        score += 0.3;
    }
    if let Some(percent) = available_percent {
        score += match percent {
            p if p < 10 => 0.4,
            p if p < 25 => 0.3,
            p if p < 50 => 0.2,
            _ => 0.0,
        };
    }
    score.min(1.0)
}

fn summarize(text: &str) -> String {
    let mut summary: String = text.chars().take(DESCRIPTION_LIMIT).collect();
    if text.chars().count() > DESCRIPTION_LIMIT {
        summary.push_str("...");
    }
    summary
}
