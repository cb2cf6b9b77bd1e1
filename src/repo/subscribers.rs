use anyhow::Context;
use crate::domain::normalize_handle;
use crate::repository;

/// A subscriber eligible for notifications: license valid, not banned,
/// subscription not muted. The SQL filter is the source of truth; the
/// muted flag is carried for observability only.
#[derive(sqlx::FromRow, Debug, Clone, derive_more::Constructor)]
pub struct Subscriber {
    pub user_id: i64,
    pub is_muted: bool,
    pub notification_sound: Option<String>,
}

#[derive(sqlx::FromRow, Debug, Clone, derive_more::Constructor)]
pub struct Device {
    pub device_id: String,
    pub fcm_token: String,
}

repository!(Subscribers,
    pub async fn eligible_for_channel(&self, handle: &str) -> anyhow::Result<Vec<Subscriber>> {
        sqlx::query_as::<_, Subscriber>(
            "SELECT DISTINCT u.id AS user_id, s.is_muted, s.notification_sound
                FROM Users u
                JOIN User_Subscriptions s ON s.user_id = u.id
                JOIN Channels c ON c.id = s.channel_id
                WHERE c.username = $1
                    AND u.has_valid_license = TRUE
                    AND u.is_banned = FALSE
                    AND s.is_muted = FALSE
                    AND (s.muted_until IS NULL OR s.muted_until < now())")
            .bind(normalize_handle(handle))
            .fetch_all(&self.pool)
            .await
            .context(format!("couldn't fetch the eligible subscribers of the channel {handle}"))
    }
,
    pub async fn devices(&self, user_id: i64) -> anyhow::Result<Vec<Device>> {
        sqlx::query_as::<_, Device>(
            "SELECT device_id, fcm_token
                FROM User_Devices
                WHERE user_id = $1 AND is_active = TRUE AND fcm_token IS NOT NULL")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .context(format!("couldn't fetch the devices of the user with id = {user_id}"))
    }
);
