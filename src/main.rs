mod config;
mod dedup;
mod detector;
mod domain;
mod fanout;
mod metrics;
mod pipeline;
mod registry;
mod repo;
mod source;

use std::net::SocketAddr;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::mpsc;
use crate::dedup::{DedupCache, InMemoryDedupCache};
use crate::detector::{GiftDetector, Keywords};
use crate::fanout::{FcmGateway, NotificationFanout, PushGateway};
use crate::pipeline::Pipeline;
use crate::registry::ChannelRegistry;
use crate::repo::{DeliveryLog, Persister, RecipientResolver};

const INGEST_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(debug_assertions)]
    dotenvy::dotenv()?;

    pretty_env_logger::init();

    let app_config = config::AppConfig::from_env();
    let database_config = config::DatabaseConfig::from_env()?;
    let fcm_config = config::FcmConfig::from_env()?;
    let db_conn = repo::establish_database_connection(&database_config).await?;

    let repos = Arc::new(repo::Repositories::new(&db_conn));
    let registry = Arc::new(ChannelRegistry::new(
        Arc::clone(&repos) as Arc<dyn Persister>,
        &app_config.fallback_channels,
    ));
    registry.refresh().await;
    for channel in registry.all().await {
        log::info!("monitoring the channel {}", channel.handle);
    }

    let gateway = FcmGateway::new(&fcm_config, app_config.gateway_timeout)?;
    let fanout = NotificationFanout::new(
        Arc::clone(&repos) as Arc<dyn RecipientResolver>,
        Arc::clone(&repos) as Arc<dyn DeliveryLog>,
        Arc::new(gateway) as Arc<dyn PushGateway>,
        &app_config,
    );
    let dedup = InMemoryDedupCache::new(app_config.dedup_ttl);
    let pipeline = Arc::new(Pipeline::new(
        registry,
        GiftDetector::new(Keywords::default()),
        Arc::new(dedup) as Arc<dyn DedupCache>,
        Arc::clone(&repos) as Arc<dyn Persister>,
        fanout,
        app_config.storage_timeout,
    ));

    let bot = Bot::from_env();
    bot.delete_webhook().await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    let metrics_router = metrics::init();

    let (tx, rx) = mpsc::channel(INGEST_QUEUE_CAPACITY);
    let ingest_fut = tokio::spawn(source::run_ingest(rx, pipeline, app_config.shutdown_grace));
    let bot_fut = tokio::spawn(source::run_telegram_feed(bot, tx));

    let srv = tokio::spawn(async move {
        axum::Server::bind(&addr)
            .serve(metrics_router.into_make_service())
            .with_graceful_shutdown(async {
                tokio::signal::ctrl_c()
                    .await
                    .expect("failed to install CTRL+C signal handler");
                log::info!("shutdown of the metrics server")
            })
            .await
    });

    let (res, _, _) = futures::join!(srv, bot_fut, ingest_fut);
    res?.map_err(Into::into)
}
