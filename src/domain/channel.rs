use chrono::{DateTime, Utc};

/// A source chat explicitly registered for ingestion. Created on first
/// sight of a monitored chat, mutated only by statistics updates, and
/// deactivated rather than deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: Option<i64>,
    pub external_chat_id: Option<i64>,
    pub handle: String,
    pub title: String,
    pub keywords: Vec<String>,
    pub is_active: bool,
    pub total_events_detected: i64,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Channel {
    /// A registry entry built from the static config list, known only by handle
    /// until the first upsert assigns it a database id.
    pub fn from_handle(handle: &str) -> Self {
        let normalized = normalize_handle(handle);
        Self {
            id: None,
            external_chat_id: None,
            title: normalized.clone(),
            handle: normalized,
            keywords: Vec::new(),
            is_active: true,
            total_events_detected: 0,
            last_checked_at: None,
        }
    }

    pub fn matches(&self, chat_id: i64, handle: Option<&str>) -> bool {
        if self.external_chat_id == Some(chat_id) {
            return true;
        }
        handle.map(normalize_handle)
            .is_some_and(|h| h == self.handle)
    }
}

pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}
