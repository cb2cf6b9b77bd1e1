/// Fixed multilingual keyword lists driving the heuristic classifier.
/// Built once at startup and injected into the detector; never mutated.
///
/// All entries are lowercase since the gate matches against a lowercased
/// copy of the message text.
#[derive(Debug, Clone)]
pub struct Keywords {
    pub gate: &'static [&'static str],
    pub limited: &'static [&'static str],
    pub sold_out: &'static [&'static str],
    pub price_indicators: &'static [&'static str],
    pub gift_emoji: &'static [&'static str],
}

const GATE: &[&str] = &[
    // English
    "gift", "gifts", "new gift", "appeared", "limited", "rare",
    "exclusive", "special", "unique", "premium", "vip",
    // Russian
    "подарок", "подарки", "новый подарок", "появился", "редкий",
    "эксклюзив", "особый", "уникальный", "премиум", "вип",
    // Emoji
    "🎁", "🎀", "💎", "🎯", "🌟", "⭐", "🔥", "💰", "🏆",
];

const LIMITED: &[&str] = &[
    "limited", "rare", "exclusive", "special", "unique", "vip",
    "лимит", "редкий", "эксклюзив", "особый", "уникальный", "вип",
    "🔥", "⚡", "💎",
];

const SOLD_OUT: &[&str] = &[
    "sold out", "распродан", "закончился", "нет в наличии",
    "недоступен", "unavailable", "0%", "ended",
];

const PRICE_INDICATORS: &[&str] = &[
    "⭐", "🌟", "price", "цена", "стоимость", "cost", "$", "₽",
];

const GIFT_EMOJI: &[&str] = &[
    "🎁", "🎀", "💎", "🎯", "🌟", "⭐", "🔥", "💰", "🏆",
];

pub const DEFAULT_EMOJI: &str = "🎁";

impl Default for Keywords {
    fn default() -> Self {
        Self {
            gate: GATE,
            limited: LIMITED,
            sold_out: SOLD_OUT,
            price_indicators: PRICE_INDICATORS,
            gift_emoji: GIFT_EMOJI,
        }
    }
}

impl Keywords {
    pub fn any_in(list: &[&str], text_lower: &str) -> bool {
        list.iter().any(|kw| text_lower.contains(kw))
    }
}
