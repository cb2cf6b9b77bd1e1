mod channels;
mod deliveries;
mod events;
mod subscribers;

#[cfg(test)]
pub(crate) mod test;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use sqlx::postgres::PgQueryResult;
pub use channels::*;
pub use deliveries::*;
pub use events::*;
pub use subscribers::*;
use crate::config::DatabaseConfig;
use crate::domain::{Channel, GiftEvent};

/// Storage interface consumed by the pipeline and the channel registry.
/// Row shapes are normalized behind this boundary; the core only ever
/// sees typed records.
#[async_trait]
pub trait Persister: Send + Sync {
    async fn upsert_channel(&self, external_chat_id: i64, handle: &str, title: &str) -> anyhow::Result<i64>;
    /// Registers a channel known only by its handle (static fallback list).
    async fn upsert_channel_by_handle(&self, handle: &str, title: &str) -> anyhow::Result<i64>;
    async fn save_event(&self, channel_id: i64, raw_text: &str, gift: &GiftEvent, permalink: &str) -> anyhow::Result<i64>;
    async fn increment_channel_stats(&self, handle: &str, count: i64) -> anyhow::Result<()>;
    async fn append_price_history(&self, gift_id: &str, price: &str, timestamp: DateTime<Utc>) -> anyhow::Result<()>;
    async fn active_channels(&self) -> anyhow::Result<Vec<Channel>>;
}

/// Resolves who gets notified for a channel and through which devices.
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    async fn eligible_subscribers(&self, handle: &str) -> anyhow::Result<Vec<Subscriber>>;
    async fn devices(&self, user_id: i64) -> anyhow::Result<Vec<Device>>;
}

/// Append-only delivery journal, one row per (event, device) attempt.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn record(&self, event_id: i64, user_id: i64, device_id: &str, delivered: bool) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct Repositories {
    pub channels: Channels,
    pub events: Events,
    pub subscribers: Subscribers,
    pub deliveries: Deliveries,
}

impl Repositories {
    pub fn new(db_conn: &Pool<Postgres>) -> Self {
        Self {
            channels: Channels::new(db_conn.clone()),
            events: Events::new(db_conn.clone()),
            subscribers: Subscribers::new(db_conn.clone()),
            deliveries: Deliveries::new(db_conn.clone()),
        }
    }
}

#[async_trait]
impl Persister for Repositories {
    async fn upsert_channel(&self, external_chat_id: i64, handle: &str, title: &str) -> anyhow::Result<i64> {
        self.channels.upsert(external_chat_id, handle, title).await
    }

    async fn upsert_channel_by_handle(&self, handle: &str, title: &str) -> anyhow::Result<i64> {
        self.channels.upsert_by_handle(handle, title).await
    }

    async fn save_event(&self, channel_id: i64, raw_text: &str, gift: &GiftEvent, permalink: &str) -> anyhow::Result<i64> {
        self.events.save(channel_id, raw_text, gift, permalink).await
    }

    async fn increment_channel_stats(&self, handle: &str, count: i64) -> anyhow::Result<()> {
        self.channels.increment_stats(handle, count).await
    }

    async fn append_price_history(&self, gift_id: &str, price: &str, timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        self.events.append_price_history(gift_id, price, timestamp).await
    }

    async fn active_channels(&self) -> anyhow::Result<Vec<Channel>> {
        self.channels.get_active().await
    }
}

#[async_trait]
impl RecipientResolver for Repositories {
    async fn eligible_subscribers(&self, handle: &str) -> anyhow::Result<Vec<Subscriber>> {
        self.subscribers.eligible_for_channel(handle).await
    }

    async fn devices(&self, user_id: i64) -> anyhow::Result<Vec<Device>> {
        self.subscribers.devices(user_id).await
    }
}

#[async_trait]
impl DeliveryLog for Repositories {
    async fn record(&self, event_id: i64, user_id: i64, device_id: &str, delivered: bool) -> anyhow::Result<()> {
        self.deliveries.record(event_id, user_id, device_id, delivered).await
    }
}

pub async fn establish_database_connection(config: &DatabaseConfig) -> Result<Pool<Postgres>, anyhow::Error> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.url.as_str()).await?;
    sqlx::migrate!().run(&pool).await?;
    Ok(pool)
}

#[macro_export]
macro_rules! repository {
    ($name:ident, $($methods:item),*) => {
        #[derive(Clone)]
        pub struct $name {
            pool: sqlx::Pool<sqlx::Postgres>,
        }

        impl $name {
            pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
                Self { pool }
            }

            $($methods)*
        }
    };
}

fn ensure_only_one_row_updated(res: PgQueryResult) -> Result<PgQueryResult, anyhow::Error> {
    match res.rows_affected() {
        1 => Ok(res),
        x => Err(anyhow!("not only one row was updated but {x}"))
    }
}
