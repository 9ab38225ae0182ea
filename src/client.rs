use std::future::Future;

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CollectorError, Result};
use crate::models::{FarmRequest, ServerFarmResponse};

pub const RESTORE_PATH: &str = "/api/farm/restore";
pub const SYNC_PATH: &str = "/api/farm/sync";

/// Server side of restore and sync.
pub trait RemoteClient: Send + Sync {
    /// Fetches every site and farm the server holds for this identity.
    fn get_farms_by_identity(
        &self,
        request: &FarmRequest,
    ) -> impl Future<Output = Result<Vec<ServerFarmResponse>>> + Send;

    /// Uploads sites with their farms. Succeeds only if the server accepted all of them.
    fn push_farms(
        &self,
        payload: &[ServerFarmResponse],
    ) -> impl Future<Output = Result<()>> + Send;
}

// ===== HTTP CLIENT =====

#[derive(Debug, Clone)]
pub struct FarmApiClient {
    api_url: String,
    http_client: reqwest::Client,
}

impl FarmApiClient {
    /// Creates a client for `api_url`, which must not end with a slash.
    pub fn new(api_url: &str) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("farmcollector_rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path);
        tracing::debug!("POST {}", url);

        let response = self.http_client.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(CollectorError::Network(format!(
                "{} returned {}: {}",
                url,
                status,
                describe_error_body(&text)
            )));
        }
        decode_body(&text)
    }
}

/// Decodes a response body, reporting server-side error payloads when the
/// expected shape does not match.
pub fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    match serde_json::from_str::<T>(body) {
        Ok(value) => Ok(value),
        Err(e) => {
            if let Ok(error_response) = serde_json::from_str::<serde_json::Value>(body) {
                if error_response.get("error").is_some() || error_response.get("message").is_some() {
                    return Err(CollectorError::Network(describe_error_body(body)));
                }
            }
            Err(CollectorError::Decode(format!("{} - Response: {}", e, body)))
        }
    }
}

/// Short description of an error body: its `error` or `message` field when present.
pub fn describe_error_body(body: &str) -> String {
    if let Ok(error_response) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(error_msg) = error_response.get("error") {
            return format!("Server error: {}", error_msg);
        } else if let Some(message) = error_response.get("message") {
            return format!("Server message: {}", message);
        }
    }
    body.to_string()
}

impl RemoteClient for FarmApiClient {
    async fn get_farms_by_identity(&self, request: &FarmRequest) -> Result<Vec<ServerFarmResponse>> {
        let snapshot: Vec<ServerFarmResponse> = self.post_json(RESTORE_PATH, request).await?;
        tracing::info!("Server returned {} collection sites", snapshot.len());
        Ok(snapshot)
    }

    async fn push_farms(&self, payload: &[ServerFarmResponse]) -> Result<()> {
        let _: serde_json::Value = self.post_json(SYNC_PATH, payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_paths() {
        let client = FarmApiClient::new("https://collector.example.org/").unwrap();
        assert_eq!(client.api_url(), "https://collector.example.org");
        assert_eq!(
            client.endpoint(RESTORE_PATH),
            "https://collector.example.org/api/farm/restore"
        );
    }

    #[test]
    fn test_decode_snapshot() {
        let body = r#"[{"device_id":"d1","collection_site":{"local_cs_id":3,"name":"Kiambu"},
                       "farms":[{"remote_id":"x","farmer_name":"Amina","site_id":3}]}]"#;
        let snapshot: Vec<ServerFarmResponse> = decode_body(body).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].collection_site.local_cs_id, 3);
        assert_eq!(snapshot[0].farms[0].farmer_name, "Amina");
    }

    #[test]
    fn test_error_payload_is_network_error() {
        let result: Result<Vec<ServerFarmResponse>> = decode_body(r#"{"error":"unknown device"}"#);
        match result {
            Err(CollectorError::Network(message)) => {
                assert_eq!(message, "Server error: \"unknown device\"")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let result: Result<Vec<ServerFarmResponse>> = decode_body("<html>oops</html>");
        assert!(matches!(result, Err(CollectorError::Decode(_))));
    }

    #[test]
    fn test_describe_message_key() {
        assert_eq!(
            describe_error_body(r#"{"message":"try later"}"#),
            "Server message: \"try later\""
        );
        assert_eq!(describe_error_body("plain"), "plain");
    }
}
