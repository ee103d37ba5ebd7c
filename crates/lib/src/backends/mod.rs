//! AI backend clients and the traits the dispatcher speaks.
//!
//! Each trait is the narrow contract the core needs; errors cross the seam
//! as strings and are wrapped into `BackendError` by the dispatcher.

mod bing;
mod gemini;
mod image;
mod openai;

pub use bing::{BingClient, BingError};
pub use gemini::{GeminiClient, GeminiError};
pub use image::{ImageClient, ImageError};
pub use openai::{OpenAiChat, OpenAiClient, OpenAiError};

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// One-shot completion: stateless, a single request per prompt.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn ask(&self, prompt: &str) -> Result<String, String>;
}

/// Conversational backend: keeps history keyed by conversation id.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    async fn ask(&self, prompt: &str, conversation_id: &str) -> Result<String, String>;
    /// Whether this backend already tracks the conversation. The core never
    /// inspects the session itself.
    async fn has_conversation(&self, conversation_id: &str) -> bool;
}

/// Search-augmented chat: one-shot from the core's point of view.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn ask(&self, prompt: &str) -> Result<String, String>;
}

/// Image generation: produce links, then fetch one into local scratch.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn get_image_links(&self, prompt: &str) -> Result<Vec<String>, String>;
    async fn download_and_save(
        &self,
        links: &[String],
        dest_dir: &Path,
    ) -> Result<PathBuf, String>;
}
