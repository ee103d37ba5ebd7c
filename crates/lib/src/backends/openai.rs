//! OpenAI chat-completions clients: a one-shot completion client (!gpt)
//! and a conversational client (!chat, mention chat) that keeps message
//! history per conversation id and replays it on every request.

use super::{CompletionBackend, ConversationBackend};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, thiserror::Error)]
pub enum OpenAiError {
    #[error("openai request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("openai api error: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// One-shot completion client: a single user message per request, no
/// history anywhere.
#[derive(Clone)]
pub struct OpenAiClient {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, OpenAiError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
        };
        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OpenAiError::Api(format!("{} {}", status, body)));
        }
        let data: ChatResponse = res.json().await?;
        data.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OpenAiError::Api("response contained no choices".to_string()))
    }

    pub async fn ask(&self, prompt: &str) -> Result<String, OpenAiError> {
        self.chat(&[ChatMessage::user(prompt)]).await
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn ask(&self, prompt: &str) -> Result<String, String> {
        OpenAiClient::ask(self, prompt).await.map_err(|e| e.to_string())
    }
}

/// Conversational client: the per-conversation history is this backend's
/// session store, so `has_conversation` answers the core's capability
/// query after restarts and expiries.
pub struct OpenAiChat {
    inner: OpenAiClient,
    conversations: Arc<RwLock<HashMap<String, Vec<ChatMessage>>>>,
}

impl OpenAiChat {
    pub fn new(api_key: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            inner: OpenAiClient::new(api_key, endpoint),
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn ask(&self, prompt: &str, conversation_id: &str) -> Result<String, OpenAiError> {
        let mut history = {
            let g = self.conversations.read().await;
            g.get(conversation_id).cloned().unwrap_or_default()
        };
        history.push(ChatMessage::user(prompt));
        let reply = self.inner.chat(&history).await?;
        history.push(ChatMessage::assistant(reply.clone()));
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
impl ConversationBackend for OpenAiChat {
    async fn ask(&self, prompt: &str, conversation_id: &str) -> Result<String, String> {
        OpenAiChat::ask(self, prompt, conversation_id)
            .await
            .map_err(|e| e.to_string())
    }

    async fn has_conversation(&self, conversation_id: &str) -> bool {
        OpenAiChat::has_conversation(self, conversation_id).await
    }
}
