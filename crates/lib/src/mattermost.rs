//! Mattermost client (API v4): REST calls plus the websocket event stream.
//!
//! The websocket loop authenticates with a challenge frame right after
//! connect and forwards each raw text frame to the bot; on connection loss
//! it backs off briefly and reconnects until stopped.

use crate::transport::{ThreadPosts, Transport, TransportError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Mattermost REST + websocket client. Token auth is set at construction;
/// password auth fills the token via [`MattermostClient::login`].
pub struct MattermostClient {
    base_url: String,
    token: RwLock<Option<String>>,
    running: AtomicBool,
    client: reqwest::Client,
}

impl MattermostClient {
    pub fn new(
        server_url: &str,
        port: u16,
        timeout_secs: u64,
        access_token: Option<String>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url(server_url, port),
            token: RwLock::new(access_token),
            running: AtomicBool::new(false),
            client,
        })
    }

    /// POST /api/v4/users/login — fetch a session token from login id and
    /// password. The token arrives in the response `Token` header.
    pub async fn login(&self, login_id: &str, password: &str) -> Result<(), TransportError> {
        let url = format!("{}/api/v4/users/login", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&json!({ "login_id": login_id, "password": password }))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Api(format!("login failed: {} {}", status, body)));
        }
        let token = res
            .headers()
            .get("Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| TransportError::Api("login response missing Token header".to_string()))?;
        *self.token.write().await = Some(token);
        log::info!("mattermost: logged in as {}", login_id);
        Ok(())
    }

    async fn auth_token(&self) -> Result<String, TransportError> {
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| TransportError::Api("not authenticated".to_string()))
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Start the websocket event loop and forward raw frames to
    /// `inbound_tx`. Returns a handle to await on shutdown.
    pub fn start_events(self: Arc<Self>, inbound_tx: mpsc::Sender<String>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("mattermost: starting websocket event loop");
        tokio::spawn(async move {
            run_event_loop(self, inbound_tx).await;
        })
    }

    /// One websocket connection: authenticate, then forward text frames
    /// until the connection or the receiving side closes.
    async fn connect_and_read(&self, inbound_tx: &mpsc::Sender<String>) -> Result<bool, TransportError> {
        let token = self.auth_token().await?;
        let ws_url = format!("{}/api/v4/websocket", websocket_base(&self.base_url));
        let (mut ws, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .map_err(|e| TransportError::Api(format!("websocket connect: {}", e)))?;
        let challenge = json!({
            "seq": 1,
            "action": "authentication_challenge",
            "data": { "token": token }
        });
        ws.send(Message::Text(challenge.to_string()))
            .await
            .map_err(|e| TransportError::Api(format!("websocket send: {}", e)))?;
        log::debug!("mattermost: websocket connected to {}", ws_url);
        while let Some(frame) = ws.next().await {
            if !self.running() {
                return Ok(false);
            }
            let frame = frame.map_err(|e| TransportError::Api(format!("websocket read: {}", e)))?;
            match frame {
                Message::Text(text) => {
                    if inbound_tx.send(text).await.is_err() {
                        log::debug!("mattermost: inbound channel closed, stopping loop");
                        return Ok(false);
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(true)
    }
}

fn base_url(server_url: &str, port: u16) -> String {
    let host = server_url.trim().trim_end_matches('/');
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    format!("https://{}:{}", host, port)
}

fn websocket_base(base_url: &str) -> String {
    base_url.replacen("https://", "wss://", 1)
}

async fn run_event_loop(client: Arc<MattermostClient>, inbound_tx: mpsc::Sender<String>) {
    while client.running() {
        match client.connect_and_read(&inbound_tx).await {
            Ok(true) => {
                log::warn!("mattermost: websocket closed, reconnecting");
            }
            Ok(false) => break,
            Err(e) => {
                log::warn!("mattermost websocket error: {}", e);
            }
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
    log::info!("mattermost: websocket event loop stopped");
}

#[derive(Debug, Deserialize)]
struct FileUploadResponse {
    #[serde(default)]
    file_infos: Vec<FileInfo>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    id: String,
}

#[async_trait]
impl Transport for MattermostClient {
    async fn create_post(
        &self,
        channel_id: &str,
        root_id: &str,
        message: &str,
        file_ids: &[String],
    ) -> Result<(), TransportError> {
        let token = self.auth_token().await?;
        let url = format!("{}/api/v4/posts", self.base_url);
        let mut body = json!({ "channel_id": channel_id, "message": message });
        if !root_id.is_empty() {
            body["root_id"] = json!(root_id);
        }
        if !file_ids.is_empty() {
            body["file_ids"] = json!(file_ids);
        }
        let res = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Api(format!(
                "create post failed: {} {}",
                status, body
            )));
        }
        Ok(())
    }

    async fn upload_file(&self, channel_id: &str, path: &Path) -> Result<String, TransportError> {
        let token = self.auth_token().await?;
        let url = format!("{}/api/v4/files", self.base_url);
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TransportError::Api(format!("reading {}: {}", path.display(), e)))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let form = reqwest::multipart::Form::new()
            .text("channel_id", channel_id.to_string())
            .part("files", reqwest::multipart::Part::bytes(bytes).file_name(filename));
        let res = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .multipart(form)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Api(format!(
                "file upload failed: {} {}",
                status, body
            )));
        }
        let data: FileUploadResponse = res.json().await?;
        data.file_infos
            .into_iter()
            .next()
            .map(|f| f.id)
            .ok_or_else(|| TransportError::Api("upload response contained no file info".to_string()))
    }

    async fn get_thread(&self, post_id: &str) -> Result<ThreadPosts, TransportError> {
        let token = self.auth_token().await?;
        let url = format!("{}/api/v4/posts/{}/thread", self.base_url, post_id);
        let res = self.client.get(&url).bearer_auth(&token).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Api(format!(
                "thread fetch failed: {} {}",
                status, body
            )));
        }
        let data: ThreadPosts = res.json().await?;
        Ok(data)
    }
}
