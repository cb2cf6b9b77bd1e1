use std::sync::Arc;
use std::time::Duration;
use teloxide::dptree::deps;
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use crate::domain::ChannelPost;
use crate::pipeline::Pipeline;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// What a feed can hand to the ingest loop. `Backoff` pauses intake
/// without dropping anything already in flight.
pub enum SourceEvent {
    Post(ChannelPost),
    Backoff(Duration),
}

/// Consumes source events until every sender is dropped, spawning one
/// task per post so a slow gateway call never blocks intake. On exit the
/// in-flight tasks get `grace` to finish before being abandoned.
pub async fn run_ingest(mut rx: mpsc::Receiver<SourceEvent>, pipeline: Arc<Pipeline>, grace: Duration) {
    let mut in_flight: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(SourceEvent::Post(post)) => {
                    let pipeline = Arc::clone(&pipeline);
                    in_flight.spawn(async move {
                        let outcome = pipeline.process(post).await;
                        log::debug!("the message was processed with the outcome {outcome:?}");
                    });
                }
                Some(SourceEvent::Backoff(pause)) => {
                    log::warn!("the feed requested a backoff of {pause:?}");
                    tokio::time::sleep(pause).await;
                }
                None => break,
            },
            Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = finished {
                    log::error!("a pipeline task failed: {e}");
                }
            }
        }
    }
    drain(in_flight, grace).await;
}

async fn drain(mut in_flight: JoinSet<()>, grace: Duration) {
    if in_flight.is_empty() {
        return;
    }
    log::info!("waiting up to {grace:?} for {} in-flight messages", in_flight.len());
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
            Ok(Some(finished)) => {
                if let Err(e) = finished {
                    log::error!("a pipeline task failed: {e}");
                }
            }
            Ok(None) => return,
            Err(_) => {
                log::warn!("{} messages were still in flight at shutdown, abandoning them", in_flight.len());
                in_flight.abort_all();
                return;
            }
        }
    }
}

/// Long-polls Telegram for channel posts and feeds them to the ingest
/// loop. The dispatcher owns the Ctrl-C handler; when it stops, the
/// channel sender drops and the ingest loop drains.
pub async fn run_telegram_feed(bot: Bot, tx: mpsc::Sender<SourceEvent>) {
    log::info!("the polling dispatcher is activating...");
    let ignore_unknown_updates = |_| Box::pin(async {});
    let handler = dptree::entry()
        .branch(Update::filter_channel_post().endpoint(channel_post_handler));
    Dispatcher::builder(bot, handler)
        .default_handler(ignore_unknown_updates)
        .dependencies(deps![tx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await
}

async fn channel_post_handler(msg: Message, tx: mpsc::Sender<SourceEvent>) -> HandlerResult {
    let Some(post) = convert(&msg) else {
        log::debug!("the channel post {} has no text, skipping", msg.id);
        return Ok(());
    };
    tx.send(SourceEvent::Post(post)).await
        .map_err(|_| "the ingest loop is gone")?;
    Ok(())
}

fn convert(msg: &Message) -> Option<ChannelPost> {
    let text = msg.text().or(msg.caption())?;
    Some(ChannelPost {
        source_chat_id: msg.chat.id.0,
        handle: msg.chat.username().map(str::to_owned),
        message_id: msg.id.0 as i64,
        text: text.to_owned(),
        timestamp: msg.date,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use crate::config::AppConfig;
    use crate::dedup::InMemoryDedupCache;
    use crate::detector::{GiftDetector, Keywords};
    use crate::domain::{Channel, GiftEvent, NotificationPriority};
    use crate::fanout::{BatchOutcome, NotificationFanout, PushGateway};
    use crate::registry::ChannelRegistry;
    use crate::repo::{DeliveryLog, Device, Persister, RecipientResolver, Subscriber};
    use super::*;

    const CHAT_ID: i64 = -1001234567890;

    #[derive(Default)]
    struct CountingStore {
        saved: AtomicUsize,
    }

    #[async_trait]
    impl Persister for CountingStore {
        async fn upsert_channel(&self, _: i64, _: &str, _: &str) -> anyhow::Result<i64> {
            Ok(1)
        }

        async fn upsert_channel_by_handle(&self, _: &str, _: &str) -> anyhow::Result<i64> {
            Ok(1)
        }

        async fn save_event(&self, _: i64, _: &str, _: &GiftEvent, _: &str) -> anyhow::Result<i64> {
            Ok(self.saved.fetch_add(1, Ordering::SeqCst) as i64)
        }

        async fn increment_channel_stats(&self, _: &str, _: i64) -> anyhow::Result<()> {
            Ok(())
        }

        async fn append_price_history(&self, _: &str, _: &str, _: DateTime<Utc>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn active_channels(&self) -> anyhow::Result<Vec<Channel>> {
            let mut channel = Channel::from_handle("gifts_news");
            channel.external_chat_id = Some(CHAT_ID);
            Ok(vec![channel])
        }
    }

    struct NoRecipients;

    #[async_trait]
    impl RecipientResolver for NoRecipients {
        async fn eligible_subscribers(&self, _: &str) -> anyhow::Result<Vec<Subscriber>> {
            Ok(Vec::new())
        }

        async fn devices(&self, _: i64) -> anyhow::Result<Vec<Device>> {
            Ok(Vec::new())
        }
    }

    struct NoGateway;

    #[async_trait]
    impl PushGateway for NoGateway {
        async fn send_batch(
            &self,
            _: &[String],
            _: &str,
            _: &str,
            _: &std::collections::HashMap<String, String>,
            _: NotificationPriority,
            _: Option<&str>,
        ) -> anyhow::Result<BatchOutcome> {
            Err(anyhow!("not expected"))
        }
    }

    struct NoDeliveries;

    #[async_trait]
    impl DeliveryLog for NoDeliveries {
        async fn record(&self, _: i64, _: i64, _: &str, _: bool) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn pipeline(store: Arc<CountingStore>) -> Arc<Pipeline> {
        let registry = Arc::new(ChannelRegistry::new(Arc::clone(&store) as Arc<dyn Persister>, &[]));
        registry.refresh().await;
        let config = AppConfig {
            dedup_ttl: Duration::from_secs(3600),
            fanout_workers: 2,
            max_tokens_per_call: 500,
            storage_timeout: Duration::from_secs(1),
            gateway_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(1),
            fallback_channels: Vec::new(),
        };
        let fanout = NotificationFanout::new(
            Arc::new(NoRecipients),
            Arc::new(NoDeliveries),
            Arc::new(NoGateway),
            &config,
        );
        Arc::new(Pipeline::new(
            registry,
            GiftDetector::new(Keywords::default()),
            Arc::new(InMemoryDedupCache::new(config.dedup_ttl)),
            store,
            fanout,
            config.storage_timeout,
        ))
    }

    fn post(message_id: i64) -> SourceEvent {
        SourceEvent::Post(ChannelPost {
            source_chat_id: CHAT_ID,
            handle: Some("gifts_news".to_owned()),
            message_id,
            text: "🎁 New gift! Price: 5,000 ⭐️".to_owned(),
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn posts_are_processed_until_the_sender_drops() {
        let store = Arc::new(CountingStore::default());
        let pipeline = pipeline(Arc::clone(&store)).await;
        let (tx, rx) = mpsc::channel(16);

        for message_id in 1..=5 {
            tx.send(post(message_id)).await.unwrap();
        }
        drop(tx);
        run_ingest(rx, pipeline, Duration::from_secs(5)).await;

        assert_eq!(store.saved.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_pauses_intake_without_losing_posts() {
        let store = Arc::new(CountingStore::default());
        let pipeline = pipeline(Arc::clone(&store)).await;
        let (tx, rx) = mpsc::channel(16);

        tx.send(post(1)).await.unwrap();
        tx.send(SourceEvent::Backoff(Duration::from_secs(30))).await.unwrap();
        tx.send(post(2)).await.unwrap();
        drop(tx);
        run_ingest(rx, pipeline, Duration::from_secs(5)).await;

        assert_eq!(store.saved.load(Ordering::SeqCst), 2);
    }
}
