use std::sync::Arc;
use tokio::sync::RwLock;
use crate::domain::Channel;
use crate::repo::Persister;

/// Authoritative in-memory set of monitored channels, keyed by
/// normalized handle and numeric chat id. Reloaded from storage on
/// `refresh`; falls back to the static configured list when the store
/// is empty or unavailable.
pub struct ChannelRegistry {
    persister: Arc<dyn Persister>,
    fallback: Vec<Channel>,
    inner: RwLock<Vec<Channel>>,
}

impl ChannelRegistry {
    pub fn new(persister: Arc<dyn Persister>, fallback_handles: &[String]) -> Self {
        let fallback = fallback_handles.iter()
            .map(|handle| Channel::from_handle(handle))
            .collect();
        Self {
            persister,
            fallback,
            inner: RwLock::new(Vec::new()),
        }
    }

    pub async fn refresh(&self) {
        match self.persister.active_channels().await {
            Ok(channels) if !channels.is_empty() => {
                log::info!("loaded {} monitored channels from the database", channels.len());
                *self.inner.write().await = channels;
            }
            Ok(_) => {
                log::warn!("no channels in the database, using the {} configured fallback channels", self.fallback.len());
                self.apply_fallback().await;
            }
            Err(e) => {
                let cached = self.inner.read().await.len();
                if cached > 0 {
                    log::warn!("couldn't reload the channels, keeping the {cached} cached ones: {e:#}");
                } else {
                    log::warn!("couldn't load the channels, using the {} configured fallback channels: {e:#}", self.fallback.len());
                    self.apply_fallback().await;
                }
            }
        }
    }

    // Best effort write-back so the fallback entries get durable ids;
    // a dead store must not prevent monitoring.
    async fn apply_fallback(&self) {
        let mut channels = self.fallback.clone();
        for channel in &mut channels {
            match self.persister.upsert_channel_by_handle(&channel.handle, &channel.title).await {
                Ok(id) => channel.id = Some(id),
                Err(e) => log::warn!("couldn't save the fallback channel {}: {e:#}", channel.handle),
            }
        }
        *self.inner.write().await = channels;
    }

    pub async fn find(&self, chat_id: i64, handle: Option<&str>) -> Option<Channel> {
        self.inner.read().await.iter()
            .find(|channel| channel.matches(chat_id, handle))
            .cloned()
    }

    pub async fn is_monitored(&self, chat_id: i64, handle: Option<&str>) -> bool {
        self.find(chat_id, handle).await.is_some()
    }

    pub async fn all(&self) -> Vec<Channel> {
        self.inner.read().await.clone()
    }
}
