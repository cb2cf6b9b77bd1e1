mod fcm;

pub use fcm::*;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use crate::config::AppConfig;
use crate::domain::{Channel, GiftEvent, NotificationPriority};
use crate::metrics;
use crate::repo::{DeliveryLog, RecipientResolver, Subscriber};

/// Result of one gateway multicast call. `per_token_errors` pairs a
/// token with the gateway's error string for it.
#[derive(Debug, Default, Clone)]
pub struct BatchOutcome {
    pub success_count: u32,
    pub failure_count: u32,
    pub per_token_errors: Vec<(String, String)>,
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send_batch(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
        priority: NotificationPriority,
        sound: Option<&str>,
    ) -> anyhow::Result<BatchOutcome>;
}

/// Per-event aggregate over all recipients. `attempted` counts only the
/// recipients a send was actually issued for.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutResult {
    pub attempted: u32,
    pub delivered: u32,
    pub failed: u32,
    pub skipped_no_token: u32,
}

enum RecipientOutcome {
    Delivered,
    Failed,
    SkippedNoToken,
}

/// Dispatches one persisted event to every eligible subscriber's
/// devices. Recipients are independent: a failure for one is logged and
/// counted, never aborts the rest. At-most-once by design; a retry
/// queue would be a separate outbox component.
pub struct NotificationFanout {
    resolver: Arc<dyn RecipientResolver>,
    deliveries: Arc<dyn DeliveryLog>,
    gateway: Arc<dyn PushGateway>,
    workers: usize,
    max_tokens_per_call: usize,
    gateway_timeout: Duration,
}

impl NotificationFanout {
    pub fn new(
        resolver: Arc<dyn RecipientResolver>,
        deliveries: Arc<dyn DeliveryLog>,
        gateway: Arc<dyn PushGateway>,
        config: &AppConfig,
    ) -> Self {
        Self {
            resolver,
            deliveries,
            gateway,
            workers: config.fanout_workers.max(1),
            max_tokens_per_call: config.max_tokens_per_call.max(1),
            gateway_timeout: config.gateway_timeout,
        }
    }

    pub async fn dispatch(&self, gift: &GiftEvent, channel: &Channel, event_id: i64) -> FanoutResult {
        let subscribers = match self.resolver.eligible_subscribers(&channel.handle).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                log::error!("couldn't resolve the recipients of the channel {}: {e:#}", channel.handle);
                return FanoutResult::default();
            }
        };
        if subscribers.is_empty() {
            log::info!("no eligible subscribers for the channel {}", channel.handle);
            return FanoutResult::default();
        }

        let title = gift.notification_title();
        let body = gift.notification_body();
        let data = payload(event_id, &channel.handle, gift);
        let priority = gift.priority();
        let total = subscribers.len();

        let outcomes: Vec<RecipientOutcome> = stream::iter(subscribers)
            .map(|subscriber| self.notify_subscriber(subscriber, event_id, &title, &body, &data, priority))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut result = FanoutResult::default();
        for outcome in outcomes {
            match outcome {
                RecipientOutcome::Delivered => {
                    result.attempted += 1;
                    result.delivered += 1;
                }
                RecipientOutcome::Failed => {
                    result.attempted += 1;
                    result.failed += 1;
                }
                RecipientOutcome::SkippedNoToken => result.skipped_no_token += 1,
            }
        }
        metrics::RECIPIENTS.delivered.inc_by(result.delivered);
        metrics::RECIPIENTS.failed.inc_by(result.failed);
        metrics::RECIPIENTS.skipped_no_token.inc_by(result.skipped_no_token);
        log::info!("event {event_id}: notified {}/{total} subscribers of the channel {}", result.delivered, channel.handle);
        result
    }

    async fn notify_subscriber(
        &self,
        subscriber: Subscriber,
        event_id: i64,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
        priority: NotificationPriority,
    ) -> RecipientOutcome {
        match self.try_notify(&subscriber, event_id, title, body, data, priority).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("failed to notify the user {}: {e:#}", subscriber.user_id);
                RecipientOutcome::Failed
            }
        }
    }

    async fn try_notify(
        &self,
        subscriber: &Subscriber,
        event_id: i64,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
        priority: NotificationPriority,
    ) -> anyhow::Result<RecipientOutcome> {
        let devices = self.resolver.devices(subscriber.user_id).await?;
        if devices.is_empty() {
            log::debug!("the user {} has no registered device tokens", subscriber.user_id);
            return Ok(RecipientOutcome::SkippedNoToken);
        }

        let tokens: Vec<String> = devices.iter().map(|device| device.fcm_token.clone()).collect();
        let sound = subscriber.notification_sound.as_deref();
        let mut success_count = 0u32;
        // the gateway caps tokens per call, so larger sets go out in chunks
        for chunk in tokens.chunks(self.max_tokens_per_call) {
            let send = self.gateway.send_batch(chunk, title, body, data, priority, sound);
            match tokio::time::timeout(self.gateway_timeout, send).await {
                Ok(Ok(outcome)) => {
                    success_count += outcome.success_count;
                    for (token, error) in &outcome.per_token_errors {
                        log::warn!("push to the token {token} failed: {error}");
                    }
                }
                Ok(Err(e)) => log::warn!("push gateway call failed for the user {}: {e:#}", subscriber.user_id),
                Err(_) => log::warn!("push gateway call timed out for the user {}", subscriber.user_id),
            }
        }

        // any success among the recipient's tokens counts as delivered
        let delivered = success_count > 0;
        for device in &devices {
            if let Err(e) = self.deliveries.record(event_id, subscriber.user_id, &device.device_id, delivered).await {
                log::warn!("couldn't record the delivery of the event {event_id} to the device {}: {e:#}", device.device_id);
            }
        }
        Ok(if delivered { RecipientOutcome::Delivered } else { RecipientOutcome::Failed })
    }
}

/// FCM requires every data value to be a string.
fn payload(event_id: i64, handle: &str, gift: &GiftEvent) -> HashMap<String, String> {
    let mut data = HashMap::from([
        ("event_id".to_owned(), event_id.to_string()),
        ("channel".to_owned(), handle.to_owned()),
        ("gift_id".to_owned(), gift.id.clone()),
        ("timestamp".to_owned(), gift.detected_at.to_rfc3339()),
    ]);
    if let Some(price) = &gift.price {
        data.insert("price".to_owned(), price.clone());
    }
    data
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use anyhow::anyhow;
    use chrono::Utc;
    use crate::repo::Device;
    use super::*;

    fn gift() -> GiftEvent {
        GiftEvent {
            id: "5170233102089322756".to_owned(),
            detected_at: Utc::now(),
            price: Some("5,000".to_owned()),
            total: None,
            available: None,
            available_percent: Some(8),
            is_limited: false,
            is_sold_out: false,
            urgency_score: 0.7,
            emoji: "🎁".to_owned(),
            description: "🎁 New gift!".to_owned(),
        }
    }

    fn channel() -> Channel {
        Channel::from_handle("gifts_news")
    }

    #[derive(Default)]
    struct StubResolver {
        subscribers: Vec<Subscriber>,
        devices: HashMap<i64, Vec<Device>>,
        broken_user: Option<i64>,
    }

    #[async_trait]
    impl RecipientResolver for StubResolver {
        async fn eligible_subscribers(&self, _: &str) -> anyhow::Result<Vec<Subscriber>> {
            Ok(self.subscribers.clone())
        }

        async fn devices(&self, user_id: i64) -> anyhow::Result<Vec<Device>> {
            if self.broken_user == Some(user_id) {
                return Err(anyhow!("device lookup failed"));
            }
            Ok(self.devices.get(&user_id).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct StubGateway {
        failing_tokens: Vec<String>,
        unavailable: bool,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl PushGateway for StubGateway {
        async fn send_batch(
            &self,
            tokens: &[String],
            _: &str,
            _: &str,
            _: &HashMap<String, String>,
            _: NotificationPriority,
            _: Option<&str>,
        ) -> anyhow::Result<BatchOutcome> {
            self.calls.lock().unwrap().push(tokens.to_vec());
            if self.unavailable {
                return Err(anyhow!("gateway is down"));
            }
            let per_token_errors: Vec<(String, String)> = tokens.iter()
                .filter(|token| self.failing_tokens.contains(token))
                .map(|token| (token.clone(), "NotRegistered".to_owned()))
                .collect();
            Ok(BatchOutcome {
                success_count: (tokens.len() - per_token_errors.len()) as u32,
                failure_count: per_token_errors.len() as u32,
                per_token_errors,
            })
        }
    }

    #[derive(Default)]
    struct MemoryDeliveryLog {
        records: Mutex<Vec<(i64, i64, String, bool)>>,
    }

    #[async_trait]
    impl DeliveryLog for MemoryDeliveryLog {
        async fn record(&self, event_id: i64, user_id: i64, device_id: &str, delivered: bool) -> anyhow::Result<()> {
            self.records.lock().unwrap().push((event_id, user_id, device_id.to_owned(), delivered));
            Ok(())
        }
    }

    fn subscriber(user_id: i64) -> Subscriber {
        Subscriber::new(user_id, false, None)
    }

    fn device(n: u32) -> Device {
        Device::new(format!("device-{n}"), format!("token-{n}"))
    }

    fn fanout(
        resolver: Arc<StubResolver>,
        deliveries: Arc<MemoryDeliveryLog>,
        gateway: Arc<StubGateway>,
        max_tokens_per_call: usize,
    ) -> NotificationFanout {
        NotificationFanout {
            resolver,
            deliveries,
            gateway,
            workers: 4,
            max_tokens_per_call,
            gateway_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn one_failing_recipient_does_not_abort_the_rest() {
        let resolver = Arc::new(StubResolver {
            subscribers: vec![subscriber(1), subscriber(2), subscriber(3)],
            devices: HashMap::from([
                (1, vec![device(1)]),
                (2, vec![device(2)]),
                (3, vec![device(3)]),
            ]),
            broken_user: None,
        });
        let gateway = Arc::new(StubGateway { failing_tokens: vec!["token-2".to_owned()], ..Default::default() });
        let deliveries = Arc::new(MemoryDeliveryLog::default());
        let fanout = fanout(resolver, Arc::clone(&deliveries), gateway, 500);

        let result = fanout.dispatch(&gift(), &channel(), 10).await;
        assert_eq!(result, FanoutResult { attempted: 3, delivered: 2, failed: 1, skipped_no_token: 0 });

        let records = deliveries.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().any(|(_, user, _, delivered)| *user == 2 && !delivered));
    }

    #[tokio::test]
    async fn partial_gateway_success_still_counts_as_delivered() {
        // three tokens on one device-rich recipient, one of them dead
        let resolver = Arc::new(StubResolver {
            subscribers: vec![subscriber(1)],
            devices: HashMap::from([(1, vec![device(1), device(2), device(3)])]),
            broken_user: None,
        });
        let gateway = Arc::new(StubGateway { failing_tokens: vec!["token-3".to_owned()], ..Default::default() });
        let deliveries = Arc::new(MemoryDeliveryLog::default());
        let fanout = fanout(resolver, Arc::clone(&deliveries), gateway, 500);

        let result = fanout.dispatch(&gift(), &channel(), 10).await;
        assert_eq!(result, FanoutResult { attempted: 1, delivered: 1, failed: 0, skipped_no_token: 0 });
        // one row per device, all marked delivered
        let records = deliveries.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|(_, _, _, delivered)| *delivered));
    }

    #[tokio::test]
    async fn tokenless_recipients_are_skipped() {
        let resolver = Arc::new(StubResolver {
            subscribers: vec![subscriber(1), subscriber(2)],
            devices: HashMap::from([(1, vec![device(1)])]),
            broken_user: None,
        });
        let gateway = Arc::new(StubGateway::default());
        let deliveries = Arc::new(MemoryDeliveryLog::default());
        let fanout = fanout(resolver, Arc::clone(&deliveries), gateway, 500);

        let result = fanout.dispatch(&gift(), &channel(), 10).await;
        assert_eq!(result, FanoutResult { attempted: 1, delivered: 1, failed: 0, skipped_no_token: 1 });
        assert_eq!(deliveries.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn token_sets_are_chunked_to_the_gateway_limit() {
        let devices: Vec<Device> = (1..=7).map(device).collect();
        let resolver = Arc::new(StubResolver {
            subscribers: vec![subscriber(1)],
            devices: HashMap::from([(1, devices)]),
            broken_user: None,
        });
        let gateway = Arc::new(StubGateway::default());
        let deliveries = Arc::new(MemoryDeliveryLog::default());
        let fanout = fanout(resolver, deliveries, Arc::clone(&gateway), 3);

        fanout.dispatch(&gift(), &channel(), 10).await;
        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn unavailable_gateway_fails_every_recipient() {
        let resolver = Arc::new(StubResolver {
            subscribers: vec![subscriber(1), subscriber(2)],
            devices: HashMap::from([(1, vec![device(1)]), (2, vec![device(2)])]),
            broken_user: None,
        });
        let gateway = Arc::new(StubGateway { unavailable: true, ..Default::default() });
        let deliveries = Arc::new(MemoryDeliveryLog::default());
        let fanout = fanout(resolver, Arc::clone(&deliveries), gateway, 500);

        let result = fanout.dispatch(&gift(), &channel(), 10).await;
        assert_eq!(result, FanoutResult { attempted: 2, delivered: 0, failed: 2, skipped_no_token: 0 });
        let records = deliveries.records.lock().unwrap();
        assert!(records.iter().all(|(_, _, _, delivered)| !delivered));
    }

    #[tokio::test]
    async fn device_lookup_failure_is_contained_to_one_recipient() {
        let resolver = Arc::new(StubResolver {
            subscribers: vec![subscriber(1), subscriber(2)],
            devices: HashMap::from([(2, vec![device(2)])]),
            broken_user: Some(1),
        });
        let gateway = Arc::new(StubGateway::default());
        let deliveries = Arc::new(MemoryDeliveryLog::default());
        let fanout = fanout(resolver, deliveries, gateway, 500);

        let result = fanout.dispatch(&gift(), &channel(), 10).await;
        assert_eq!(result, FanoutResult { attempted: 2, delivered: 1, failed: 1, skipped_no_token: 0 });
    }

    #[test]
    fn payload_values_are_strings() {
        let data = payload(10, "gifts_news", &gift());
        assert_eq!(data.get("event_id").map(String::as_str), Some("10"));
        assert_eq!(data.get("channel").map(String::as_str), Some("gifts_news"));
        assert_eq!(data.get("gift_id").map(String::as_str), Some("5170233102089322756"));
        assert_eq!(data.get("price").map(String::as_str), Some("5,000"));
        assert!(data.contains_key("timestamp"));
    }
}
