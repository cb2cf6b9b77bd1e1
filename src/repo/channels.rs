use anyhow::Context;
use chrono::{DateTime, Utc};
use crate::domain::{normalize_handle, Channel};
use crate::repository;
use super::ensure_only_one_row_updated;

#[derive(sqlx::FromRow, Debug, Clone)]
struct ChannelRow {
    id: i64,
    telegram_id: Option<i64>,
    username: String,
    title: String,
    keywords: Vec<String>,
    is_active: bool,
    total_events_detected: i64,
    last_checked_at: Option<DateTime<Utc>>,
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel {
            id: Some(row.id),
            external_chat_id: row.telegram_id,
            handle: normalize_handle(&row.username),
            title: row.title,
            keywords: row.keywords,
            is_active: row.is_active,
            total_events_detected: row.total_events_detected,
            last_checked_at: row.last_checked_at,
        }
    }
}

repository!(Channels,
    pub async fn get_active(&self) -> anyhow::Result<Vec<Channel>> {
        sqlx::query_as::<_, ChannelRow>(
            "SELECT id, telegram_id, username, title, keywords, is_active, total_events_detected, last_checked_at
                FROM Channels WHERE is_active = TRUE")
            .fetch_all(&self.pool)
            .await
            .map(|rows| rows.into_iter().map(Channel::from).collect())
            .context("couldn't fetch the active channels")
    }
,
    pub async fn upsert(&self, external_chat_id: i64, handle: &str, title: &str) -> anyhow::Result<i64> {
        let handle = normalize_handle(handle);
        let mut tx = self.pool.begin().await?;
        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM Channels WHERE telegram_id = $1 OR username = $2")
            .bind(external_chat_id)
            .bind(&handle)
            .fetch_optional(&mut *tx)
            .await
            .context(format!("couldn't look up the channel with telegram_id = {external_chat_id}"))?;
        let id = match existing {
            Some((id,)) => {
                sqlx::query("UPDATE Channels SET telegram_id = $2, username = $3, title = $4, is_active = TRUE WHERE id = $1")
                    .bind(id)
                    .bind(external_chat_id)
                    .bind(&handle)
                    .bind(title)
                    .execute(&mut *tx)
                    .await
                    .map_err(Into::into)
                    .and_then(ensure_only_one_row_updated)
                    .context(format!("couldn't update the channel with id = {id}"))?;
                id
            }
            None => {
                log::info!("creating a channel with telegram_id = {external_chat_id} and username = {handle}");
                sqlx::query_scalar("INSERT INTO Channels (telegram_id, username, title) VALUES ($1, $2, $3) RETURNING id")
                    .bind(external_chat_id)
                    .bind(&handle)
                    .bind(title)
                    .fetch_one(&mut *tx)
                    .await
                    .context(format!("couldn't create a channel with telegram_id = {external_chat_id}"))?
            }
        };
        tx.commit().await?;
        Ok(id)
    }
,
    pub async fn upsert_by_handle(&self, handle: &str, title: &str) -> anyhow::Result<i64> {
        let handle = normalize_handle(handle);
        sqlx::query_scalar(
            "INSERT INTO Channels (username, title) VALUES ($1, $2)
                ON CONFLICT (username) DO UPDATE SET is_active = TRUE
                RETURNING id")
            .bind(&handle)
            .bind(title)
            .fetch_one(&self.pool)
            .await
            .context(format!("couldn't upsert the channel with username = {handle}"))
    }
,
    pub async fn increment_stats(&self, handle: &str, count: i64) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE Channels SET total_events_detected = total_events_detected + $2, last_checked_at = now()
                WHERE username = $1")
            .bind(normalize_handle(handle))
            .bind(count)
            .execute(&self.pool)
            .await
            .map_err(Into::into)
            .and_then(ensure_only_one_row_updated)
            .map(|_| ())
            .context(format!("couldn't update the statistics of the channel {handle}"))
    }
,
    pub async fn deactivate(&self, handle: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE Channels SET is_active = FALSE WHERE username = $1")
            .bind(normalize_handle(handle))
            .execute(&self.pool)
            .await
            .map(|_| ())
            .context(format!("couldn't deactivate the channel {handle}"))
    }
);
