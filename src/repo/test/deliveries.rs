use testcontainers::clients;
use crate::repo;
use crate::repo::test::{create_channel, create_user, start_postgres};
use crate::repo::test::events::gift;

#[tokio::test]
#[ignore]
async fn delivered_at_is_set_only_for_successful_deliveries() {
    let docker = clients::Cli::default();
    let (_container, db) = start_postgres(&docker).await;
    let channel_id = create_channel(&db).await;
    let user_id = create_user(&db, 100, true).await;
    let event_id = repo::Events::new(db.clone())
        .save(channel_id, "text", &gift(), "https://t.me/gifts_news/42")
        .await.expect("couldn't save the event");
    let deliveries = repo::Deliveries::new(db.clone());

    deliveries.record(event_id, user_id, "phone", true)
        .await.expect("couldn't record the delivery");
    deliveries.record(event_id, user_id, "tablet", false)
        .await.expect("couldn't record the failed delivery");

    let rows: Vec<(String, bool, Option<chrono::DateTime<chrono::Utc>>)> = sqlx::query_as(
        "SELECT device_id, delivered, delivered_at
            FROM Notification_Deliveries
            WHERE notification_id = $1
            ORDER BY device_id")
        .bind(event_id)
        .fetch_all(&db)
        .await.expect("couldn't fetch the deliveries");

    assert_eq!(rows.len(), 2);
    let (_, delivered, delivered_at) = &rows[0];  // phone
    assert!(*delivered);
    assert!(delivered_at.is_some());
    let (_, delivered, delivered_at) = &rows[1];  // tablet
    assert!(!*delivered);
    assert!(delivered_at.is_none());
}
