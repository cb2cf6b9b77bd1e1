use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{anyhow, Context};
use crate::dedup::DedupCache;
use crate::detector::GiftDetector;
use crate::domain::{Channel, ChannelPost, GiftEvent};
use crate::fanout::{FanoutResult, NotificationFanout};
use crate::metrics;
use crate::registry::ChannelRegistry;
use crate::repo::Persister;

/// Terminal state of one pipeline invocation. Every message reaches
/// exactly one of these; nothing is retried automatically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    GatedOut(GateReason),
    Duplicate,
    PersistFailed,
    Notified(FanoutResult),
    NotifySkipped,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum GateReason {
    NotMonitored,
    NoDetection,
}

/// Wires the gate, detector, dedup window, storage, and fan-out for one
/// inbound message. `process` never returns an error: failures are
/// contained per message and reported through the outcome.
pub struct Pipeline {
    registry: Arc<ChannelRegistry>,
    detector: GiftDetector,
    dedup: Arc<dyn DedupCache>,
    persister: Arc<dyn Persister>,
    fanout: NotificationFanout,
    storage_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        detector: GiftDetector,
        dedup: Arc<dyn DedupCache>,
        persister: Arc<dyn Persister>,
        fanout: NotificationFanout,
        storage_timeout: Duration,
    ) -> Self {
        Self { registry, detector, dedup, persister, fanout, storage_timeout }
    }

    pub async fn process(&self, post: ChannelPost) -> Outcome {
        metrics::MESSAGES_RECEIVED.inc();

        let Some(channel) = self.registry.find(post.source_chat_id, post.handle.as_deref()).await else {
            log::debug!("the chat {} is not monitored, skipping", post.source_chat_id);
            metrics::GATE_SKIPS.not_monitored.inc();
            return Outcome::GatedOut(GateReason::NotMonitored);
        };

        let Some(gift) = self.detector.detect_with_keywords(&post.text, &channel.keywords) else {
            log::debug!("no gift keywords in the message {} of the channel {}", post.message_id, channel.handle);
            metrics::GATE_SKIPS.no_detection.inc();
            return Outcome::GatedOut(GateReason::NoDetection);
        };
        metrics::GIFTS_DETECTED.inc();

        match self.dedup.check_and_mark(post.source_chat_id, post.message_id).await {
            Ok(true) => (),
            Ok(false) => {
                log::debug!("the message {} of the chat {} was already processed", post.message_id, post.source_chat_id);
                metrics::DUPLICATES_SUPPRESSED.inc();
                return Outcome::Duplicate;
            }
            // degraded mode: without the cache every message counts as new
            Err(e) => log::warn!("the dedup cache is unavailable, proceeding without suppression: {e:#}"),
        }

        let permalink = post.permalink(&channel.handle);
        let event_id = match self.persist(&channel, &post, &gift, &permalink).await {
            Ok(event_id) => event_id,
            Err(e) => {
                log::error!("couldn't persist the event {} of the channel {}: {e:#}", gift.id, channel.handle);
                metrics::PERSIST_FAILURES.inc();
                return Outcome::PersistFailed;
            }
        };
        metrics::EVENTS_PERSISTED.inc();
        log::info!("{} gift {} detected in {} ({permalink})", gift.emoji, gift.id, channel.handle);

        self.update_statistics(&channel, &gift).await;

        let result = self.fanout.dispatch(&gift, &channel, event_id).await;
        if result.attempted == 0 {
            Outcome::NotifySkipped
        } else {
            Outcome::Notified(result)
        }
    }

    async fn persist(&self, channel: &Channel, post: &ChannelPost, gift: &GiftEvent, permalink: &str) -> anyhow::Result<i64> {
        let channel_id = self.bounded(self.persister.upsert_channel(post.source_chat_id, &channel.handle, &channel.title))
            .await
            .context("couldn't upsert the channel")?;
        self.bounded(self.persister.save_event(channel_id, &post.text, gift, permalink))
            .await
            .context("couldn't save the event")
    }

    // Statistics must not change the message's outcome.
    async fn update_statistics(&self, channel: &Channel, gift: &GiftEvent) {
        if let Err(e) = self.bounded(self.persister.increment_channel_stats(&channel.handle, 1)).await {
            log::warn!("couldn't update the statistics of the channel {}: {e:#}", channel.handle);
        }
        if let Some(price) = &gift.price {
            if let Err(e) = self.bounded(self.persister.append_price_history(&gift.id, price, gift.detected_at)).await {
                log::warn!("couldn't append the price history of the gift {}: {e:#}", gift.id);
            }
        }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
        tokio::time::timeout(self.storage_timeout, fut)
            .await
            .map_err(|_| anyhow!("the storage call exceeded {:?}", self.storage_timeout))?
    }
}
