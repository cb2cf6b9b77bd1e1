use anyhow::Context;
use crate::repository;

repository!(Deliveries,
    pub async fn record(&self, event_id: i64, user_id: i64, device_id: &str, delivered: bool) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO Notification_Deliveries (notification_id, user_id, device_id, delivered, delivered_at)
                VALUES ($1, $2, $3, $4, CASE WHEN $4 THEN now() END)")
            .bind(event_id)
            .bind(user_id)
            .bind(device_id)
            .bind(delivered)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .context(format!("couldn't record the delivery of the event {event_id} to the user {user_id}"))
    }
);
