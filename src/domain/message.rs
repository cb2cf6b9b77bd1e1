use chrono::{DateTime, Utc};

/// One inbound post from a monitored source connection, already reduced
/// to the fields the pipeline cares about.
#[derive(Debug, Clone)]
pub struct ChannelPost {
    pub source_chat_id: i64,
    pub handle: Option<String>,
    pub message_id: i64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChannelPost {
    pub fn permalink(&self, handle: &str) -> String {
        format!("https://t.me/{handle}/{}", self.message_id)
    }
}
