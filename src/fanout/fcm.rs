use std::collections::HashMap;
use std::time::Duration;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use crate::config::FcmConfig;
use crate::domain::NotificationPriority;
use super::{BatchOutcome, PushGateway};

const DEFAULT_SOUND: &str = "alarm_sound";

/// FCM legacy HTTP multicast client. One POST per token chunk; the
/// response carries success/failure counts plus a per-token result list
/// in the same order as the request.
pub struct FcmGateway {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    server_key: String,
}

impl FcmGateway {
    pub fn new(config: &FcmConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("couldn't build the FCM HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            server_key: config.server_key.clone(),
        })
    }
}

#[derive(Serialize)]
struct FcmRequest<'a> {
    registration_ids: &'a [String],
    priority: String,
    notification: FcmNotification<'a>,
    data: &'a HashMap<String, String>,
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
    sound: &'a str,
}

#[derive(Deserialize)]
struct FcmResponse {
    #[serde(default)]
    success: u32,
    #[serde(default)]
    failure: u32,
    #[serde(default)]
    results: Vec<FcmResult>,
}

#[derive(Deserialize)]
struct FcmResult {
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl PushGateway for FcmGateway {
    async fn send_batch(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
        priority: NotificationPriority,
        sound: Option<&str>,
    ) -> anyhow::Result<BatchOutcome> {
        let request = FcmRequest {
            registration_ids: tokens,
            priority: priority.to_string(),
            notification: FcmNotification {
                title,
                body,
                sound: sound.unwrap_or(DEFAULT_SOUND),
            },
            data,
        };
        let response: FcmResponse = self.client.post(self.endpoint.clone())
            .header(AUTHORIZATION, format!("key={}", self.server_key))
            .json(&request)
            .send()
            .await
            .context("the push gateway is unreachable")?
            .error_for_status()
            .context("the push gateway rejected the batch")?
            .json()
            .await
            .context("couldn't decode the push gateway response")?;

        let per_token_errors = tokens.iter()
            .zip(response.results.iter())
            .filter_map(|(token, result)| result.error.as_ref().map(|error| (token.clone(), error.clone())))
            .collect();
        Ok(BatchOutcome {
            success_count: response.success,
            failure_count: response.failure,
            per_token_errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_the_legacy_wire_shape() {
        let tokens = vec!["token-1".to_owned(), "token-2".to_owned()];
        let data = HashMap::from([("gift_id".to_owned(), "123".to_owned())]);
        let request = FcmRequest {
            registration_ids: &tokens,
            priority: NotificationPriority::High.to_string(),
            notification: FcmNotification { title: "t", body: "b", sound: DEFAULT_SOUND },
            data: &data,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["registration_ids"], serde_json::json!(["token-1", "token-2"]));
        assert_eq!(json["priority"], "high");
        assert_eq!(json["notification"]["sound"], "alarm_sound");
        assert_eq!(json["data"]["gift_id"], "123");
    }

    #[test]
    fn response_decodes_counts_and_errors() {
        let raw = r#"{"multicast_id": 1, "success": 2, "failure": 1,
            "results": [{"message_id": "a"}, {"error": "NotRegistered"}, {"message_id": "b"}]}"#;
        let response: FcmResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.success, 2);
        assert_eq!(response.failure, 1);
        assert_eq!(response.results.len(), 3);
        assert_eq!(response.results[1].error.as_deref(), Some("NotRegistered"));
    }
}
