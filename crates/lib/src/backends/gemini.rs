//! Gemini generateContent client (!bard): conversational, with the
//! per-conversation history kept client-side and replayed on each request.

use super::ConversationBackend;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-pro";

#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("gemini request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gemini api error: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    text: String,
}

impl Content {
    fn new(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: &'a [Content],
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

/// Gemini API client keyed by conversation id.
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
    conversations: Arc<RwLock<HashMap<String, Vec<Content>>>>,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            client: reqwest::Client::new(),
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn generate(&self, contents: &[Content]) -> Result<String, GeminiError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = GenerateRequest { contents };
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(GeminiError::Api(format!("{} {}", status, body)));
        }
        let data: GenerateResponse = res.json().await?;
        let text = data
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(GeminiError::Api("response contained no candidates".to_string()));
        }
        Ok(text.trim().to_string())
    }

    pub async fn ask(&self, prompt: &str, conversation_id: &str) -> Result<String, GeminiError> {
        let mut history = {
            let g = self.conversations.read().await;
            g.get(conversation_id).cloned().unwrap_or_default()
        };
        history.push(Content::new("user", prompt));
        let reply = self.generate(&history).await?;
        history.push(Content::new("model", reply.clone()));
        self.conversations
            .write()
            .await
            .insert(conversation_id.to_string(), history);
        Ok(reply)
    }

    pub async fn has_conversation(&self, conversation_id: &str) -> bool {
        self.conversations.read().await.contains_key(conversation_id)
    }
}

#[async_trait]
impl ConversationBackend for GeminiClient {
    async fn ask(&self, prompt: &str, conversation_id: &str) -> Result<String, String> {
        GeminiClient::ask(self, prompt, conversation_id)
            .await
            .map_err(|e| e.to_string())
    }

    async fn has_conversation(&self, conversation_id: &str) -> bool {
        GeminiClient::has_conversation(self, conversation_id).await
    }
}
