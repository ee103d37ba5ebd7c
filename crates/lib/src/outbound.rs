//! Outbound delivery: post replies and upload generated files.
//!
//! File delivery deletes the local scratch file only after the referencing
//! post succeeds; on upload or post failure the file stays on disk so a
//! generated image is never silently lost.

use crate::transport::{Transport, TransportError};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("posting reply failed: {0}")]
    Post(#[source] TransportError),
    #[error("uploading {path} failed: {source}")]
    Upload {
        path: String,
        #[source]
        source: TransportError,
    },
}

/// Post a text reply, threaded under `root_id` when non-empty.
pub async fn send_text(
    transport: &dyn Transport,
    channel_id: &str,
    root_id: &str,
    text: &str,
) -> Result<(), DeliveryError> {
    transport
        .create_post(channel_id, root_id, text, &[])
        .await
        .map_err(DeliveryError::Post)
}

/// Upload a scratch file, post a caption referencing it, then delete the
/// local file. Removal happens only after the post succeeded; a removal
/// failure is logged, not surfaced, since the reply already went out.
pub async fn send_file(
    transport: &dyn Transport,
    channel_id: &str,
    root_id: &str,
    caption: &str,
    path: &Path,
) -> Result<(), DeliveryError> {
    let file_id = transport
        .upload_file(channel_id, path)
        .await
        .map_err(|e| DeliveryError::Upload {
            path: path.display().to_string(),
            source: e,
        })?;
    transport
        .create_post(channel_id, root_id, caption, &[file_id])
        .await
        .map_err(DeliveryError::Post)?;
    if let Err(e) = tokio::fs::remove_file(path).await {
        log::warn!("outbound: could not remove scratch file {}: {}", path.display(), e);
    }
    Ok(())
}
