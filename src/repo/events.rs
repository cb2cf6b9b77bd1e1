use anyhow::Context;
use chrono::{DateTime, Utc};
use crate::domain::GiftEvent;
use crate::repository;

repository!(Events,
    /// Persists a detected event and returns its durable identifier. The
    /// full gift record goes into a JSONB column next to the extracted
    /// key fields.
    pub async fn save(&self, channel_id: i64, raw_text: &str, gift: &GiftEvent, permalink: &str) -> anyhow::Result<i64> {
        let gift_data = serde_json::to_value(gift)
            .context("couldn't serialize the gift event")?;
        sqlx::query_scalar(
            "INSERT INTO Notifications (channel_id, message_text, gift_id, gift_data, message_link)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id")
            .bind(channel_id)
            .bind(raw_text)
            .bind(&gift.id)
            .bind(gift_data)
            .bind(permalink)
            .fetch_one(&self.pool)
            .await
            .context(format!("couldn't save the event {} for the channel with id = {channel_id}", gift.id))
    }
,
    pub async fn append_price_history(&self, gift_id: &str, price: &str, timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO Gift_Price_History (gift_id, price, detected_at) VALUES ($1, $2, $3)")
            .bind(gift_id)
            .bind(price)
            .bind(timestamp)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .context(format!("couldn't append the price history of the gift {gift_id}"))
    }
);
