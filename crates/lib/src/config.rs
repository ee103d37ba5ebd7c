//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.matcha/config.json`); every
//! credential can also come from the environment, which takes precedence.
//! A missing backend credential disables that command with a startup
//! warning; a missing server url, username, or credential pair is fatal.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Mattermost connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-backend credentials and endpoints.
    #[serde(default)]
    pub backends: BackendsConfig,

    /// Router and context settings.
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Mattermost server url, identity, and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Server host or url (e.g. "chat.example.com"). Overridden by
    /// MATTERMOST_SERVER_URL env.
    pub server_url: Option<String>,

    /// The bot's own account name, used for loop prevention and mentions.
    /// Overridden by MATTERMOST_USERNAME env.
    pub username: Option<String>,

    /// Personal access token. Overridden by MATTERMOST_ACCESS_TOKEN env.
    /// When absent, loginId + password are used instead.
    pub access_token: Option<String>,

    /// Login id for password auth. Overridden by MATTERMOST_LOGIN_ID env.
    pub login_id: Option<String>,

    /// Password for password auth. Overridden by MATTERMOST_PASSWORD env.
    pub password: Option<String>,

    /// HTTPS port (default 443).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds (default 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    443
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            username: None,
            access_token: None,
            login_id: None,
            password: None,
            port: default_port(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Backend credentials. Each absent entry disables its command path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendsConfig {
    /// OpenAI key for !gpt and !chat. Overridden by OPENAI_API_KEY env.
    pub openai_api_key: Option<String>,
    /// Chat-completions endpoint override (default api.openai.com).
    /// Overridden by OPENAI_API_ENDPOINT env.
    pub openai_api_endpoint: Option<String>,
    /// Sidecar endpoint for !bing. Overridden by BING_API_ENDPOINT env.
    pub bing_api_endpoint: Option<String>,
    /// Gemini key for !bard. Overridden by BARD_API_KEY env.
    pub bard_api_key: Option<String>,
    /// Bing Image Creator auth cookie (_U) for !pic. Overridden by
    /// BING_AUTH_COOKIE env.
    pub bing_auth_cookie: Option<String>,
}

/// Which command grammar the router runs: explicit !-prefixed commands, or
/// mention-addressed free-form chat (with plain replies inside an existing
/// thread treated as threaded chat).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandGrammar {
    #[default]
    Prefix,
    Mention,
}

/// Router and thread-context settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Command grammar: "prefix" (default) or "mention".
    #[serde(default)]
    pub grammar: CommandGrammar,

    /// How many prior thread posts are folded into a cold-thread prompt
    /// (default 2). The host server's thread is authoritative; this only
    /// bounds what is re-sent to a backend.
    #[serde(default = "default_max_past")]
    pub max_past: usize,

    /// Scratch directory for generated images pending upload.
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
}

fn default_max_past() -> usize {
    2
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("images")
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            grammar: CommandGrammar::default(),
            max_past: default_max_past(),
            image_dir: default_image_dir(),
        }
    }
}

/// Fatal construction-time configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("server url must be provided")]
    MissingServerUrl,
    #[error("username must be provided")]
    MissingUsername,
    #[error("either an access token or a password must be provided")]
    MissingCredentials,
    #[error("building http client: {0}")]
    Http(String),
}

/// Env value when set and non-empty, otherwise the trimmed config value.
fn env_or(var: &str, fallback: Option<&String>) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            fallback
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

pub fn resolve_server_url(config: &Config) -> Option<String> {
    env_or("MATTERMOST_SERVER_URL", config.server.server_url.as_ref())
}

pub fn resolve_username(config: &Config) -> Option<String> {
    env_or("MATTERMOST_USERNAME", config.server.username.as_ref())
}

pub fn resolve_access_token(config: &Config) -> Option<String> {
    env_or("MATTERMOST_ACCESS_TOKEN", config.server.access_token.as_ref())
}

pub fn resolve_login_id(config: &Config) -> Option<String> {
    env_or("MATTERMOST_LOGIN_ID", config.server.login_id.as_ref())
}

pub fn resolve_password(config: &Config) -> Option<String> {
    env_or("MATTERMOST_PASSWORD", config.server.password.as_ref())
}

pub fn resolve_openai_api_key(config: &Config) -> Option<String> {
    env_or("OPENAI_API_KEY", config.backends.openai_api_key.as_ref())
}

pub fn resolve_openai_endpoint(config: &Config) -> Option<String> {
    env_or(
        "OPENAI_API_ENDPOINT",
        config.backends.openai_api_endpoint.as_ref(),
    )
}

pub fn resolve_bing_endpoint(config: &Config) -> Option<String> {
    env_or("BING_API_ENDPOINT", config.backends.bing_api_endpoint.as_ref())
}

pub fn resolve_bard_api_key(config: &Config) -> Option<String> {
    env_or("BARD_API_KEY", config.backends.bard_api_key.as_ref())
}

pub fn resolve_bing_auth_cookie(config: &Config) -> Option<String> {
    env_or("BING_AUTH_COOKIE", config.backends.bing_auth_cookie.as_ref())
}

/// Resolve config path from env or default (~/.matcha/config.json).
pub fn default_config_path() -> PathBuf {
    std::env::var("MATCHA_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".matcha").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or MATCHA_CONFIG_PATH). Missing file
/// => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server_port_and_timeout() {
        let s = ServerConfig::default();
        assert_eq!(s.port, 443);
        assert_eq!(s.timeout_secs, 30);
    }

    #[test]
    fn default_chat_settings() {
        let c = ChatConfig::default();
        assert_eq!(c.grammar, CommandGrammar::Prefix);
        assert_eq!(c.max_past, 2);
        assert_eq!(c.image_dir, PathBuf::from("images"));
    }

    #[test]
    fn parse_camel_case_config() {
        let json = r#"{
            "server": { "serverUrl": "chat.example.com", "username": "matcha" },
            "backends": { "openaiApiKey": "sk-test" },
            "chat": { "grammar": "mention", "maxPast": 4 }
        }"#;
        let config: Config = serde_json::from_str(json).expect("parse config");
        assert_eq!(config.server.server_url.as_deref(), Some("chat.example.com"));
        assert_eq!(config.backends.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.chat.grammar, CommandGrammar::Mention);
        assert_eq!(config.chat.max_past, 4);
        // unset sections keep their defaults
        assert_eq!(config.server.port, 443);
    }

    #[test]
    fn env_or_prefers_non_empty_config_value() {
        let value = Some("  spaced  ".to_string());
        assert_eq!(
            env_or("MATCHA_TEST_UNSET_VAR", value.as_ref()),
            Some("spaced".to_string())
        );
        let empty = Some("   ".to_string());
        assert_eq!(env_or("MATCHA_TEST_UNSET_VAR", empty.as_ref()), None);
    }
}
