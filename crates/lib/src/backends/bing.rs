//! Search-augmented chat via a sidecar endpoint (!bing).
//!
//! The sidecar owns the Bing session and any server-side state; from this
//! core's point of view the call is a single POST with a prompt and a text
//! response.

use super::SearchBackend;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum BingError {
    #[error("bing request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("bing api error: {0}")]
    Api(String),
}

#[derive(Debug, Deserialize)]
struct BingResponse {
    #[serde(default)]
    response: Option<String>,
}

/// Client for the Bing sidecar: POST `{"prompt": ...}`, read `response`.
#[derive(Clone)]
pub struct BingClient {
    endpoint: String,
    client: reqwest::Client,
}

impl BingClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn ask(&self, prompt: &str) -> Result<String, BingError> {
        let res = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BingError::Api(format!("{} {}", status, body)));
        }
        let data: BingResponse = res.json().await?;
        data.response
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BingError::Api("response contained no text".to_string()))
    }
}

#[async_trait]
impl SearchBackend for BingClient {
    async fn ask(&self, prompt: &str) -> Result<String, String> {
        BingClient::ask(self, prompt).await.map_err(|e| e.to_string())
    }
}
