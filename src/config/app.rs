use std::time::Duration;
use reqwest::Url;
use crate::config::env::*;

#[derive(Clone)]
pub struct AppConfig {
    pub dedup_ttl: Duration,
    pub fanout_workers: usize,
    pub max_tokens_per_call: usize,
    pub storage_timeout: Duration,
    pub gateway_timeout: Duration,
    pub shutdown_grace: Duration,
    pub fallback_channels: Vec<String>,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: Url,
    pub max_connections: u32
}

#[derive(Clone)]
pub struct FcmConfig {
    pub endpoint: Url,
    pub server_key: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let dedup_ttl_secs: u64 = get_env_value_or_default("DEDUP_TTL_SECS", 3600);
        let fanout_workers = get_env_value_or_default("FANOUT_WORKERS", 8);
        let max_tokens_per_call = get_env_value_or_default("FCM_MAX_TOKENS_PER_CALL", 500);
        let storage_timeout_secs: u64 = get_env_value_or_default("STORAGE_TIMEOUT_SECS", 5);
        let gateway_timeout_secs: u64 = get_env_value_or_default("GATEWAY_TIMEOUT_SECS", 5);
        let shutdown_grace_secs: u64 = get_env_value_or_default("SHUTDOWN_GRACE_SECS", 10);
        let fallback_channels: String = get_optional_env_value("MONITOR_CHANNELS");
        Self {
            dedup_ttl: Duration::from_secs(dedup_ttl_secs),
            fanout_workers,
            max_tokens_per_call,
            storage_timeout: Duration::from_secs(storage_timeout_secs),
            gateway_timeout: Duration::from_secs(gateway_timeout_secs),
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
            fallback_channels: fallback_channels
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            url: get_env_mandatory_value("DATABASE_URL")?,
            max_connections: get_env_value_or_default("DATABASE_MAX_CONNECTIONS", 10)
        })
    }
}

impl FcmConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint = get_env_value_or_default("FCM_ENDPOINT", "https://fcm.googleapis.com/fcm/send".to_owned());
        Ok(Self {
            endpoint: endpoint.parse()?,
            server_key: get_env_mandatory_value("FCM_SERVER_KEY")?,
        })
    }
}
