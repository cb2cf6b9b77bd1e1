use chrono::{DateTime, Utc};
use serde::Serialize;

/// A structured record derived from a message believed to announce
/// a limited-availability gift drop. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GiftEvent {
    pub id: String,
    pub detected_at: DateTime<Utc>,
    pub price: Option<String>,
    pub total: Option<i64>,
    pub available: Option<i64>,
    pub available_percent: Option<i64>,
    pub is_limited: bool,
    pub is_sold_out: bool,
    pub urgency_score: f64,
    pub emoji: String,
    pub description: String,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum NotificationPriority {
    High,
    Normal,
}

impl GiftEvent {
    pub fn priority(&self) -> NotificationPriority {
        if self.urgency_score >= 0.7 {
            NotificationPriority::High
        } else {
            NotificationPriority::Normal
        }
    }

    pub fn notification_title(&self) -> String {
        if self.is_limited {
            "🔥 Limited gift!".to_owned()
        } else {
            format!("{} New gift!", self.emoji)
        }
    }

    pub fn notification_body(&self) -> String {
        let mut parts = Vec::new();
        if let Some(price) = &self.price {
            parts.push(format!("Price: {price} ⭐️"));
        }
        if let Some(percent) = self.available_percent {
            parts.push(format!("Available: {percent}%"));
        }
        if parts.is_empty() {
            self.description.clone()
        } else {
            parts.join(" · ")
        }
    }
}
