//! Transport contract: the narrow interface the bot core requires of the
//! chat server. Implemented by [`crate::mattermost::MattermostClient`] and
//! by mocks in tests.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("transport api error: {0}")]
    Api(String),
}

/// One post inside a fetched thread.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadPost {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub create_at: i64,
}

/// A thread as the server returns it: posts by id plus the server's own
/// ordering of those ids.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadPosts {
    #[serde(default)]
    pub posts: HashMap<String, ThreadPost>,
    #[serde(default)]
    pub order: Vec<String>,
}

/// Outbound and thread-history operations against the chat server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a post; threaded under `root_id` when non-empty, referencing
    /// uploaded files when `file_ids` is non-empty.
    async fn create_post(
        &self,
        channel_id: &str,
        root_id: &str,
        message: &str,
        file_ids: &[String],
    ) -> Result<(), TransportError>;

    /// Upload a local file to a channel; returns the server file id.
    async fn upload_file(&self, channel_id: &str, path: &Path) -> Result<String, TransportError>;

    /// Fetch every post in the thread containing `post_id`.
    async fn get_thread(&self, post_id: &str) -> Result<ThreadPosts, TransportError>;
}
