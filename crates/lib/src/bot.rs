//! The bot: wires the websocket event stream through normalization,
//! routing, thread resolution, backend dispatch, and outbound delivery.
//!
//! Every normalized event runs on its own spawned task, and outbound
//! delivery is spawned again off that task, so a slow backend or post
//! never stalls event intake. There is no cancellation and no retry; a
//! failed dispatch is logged, reported to the failure sink when one is
//! attached, and answered with the error text when feasible.

use crate::backends::{
    BingClient, CompletionBackend, ConversationBackend, GeminiClient, ImageBackend, ImageClient,
    OpenAiChat, OpenAiClient, SearchBackend,
};
use crate::command::{Capabilities, Command, CommandKind, CommandRouter};
use crate::config::{self, CommandGrammar, Config, ConfigError};
use crate::event::{self, InboundEvent};
use crate::mattermost::MattermostClient;
use crate::outbound;
use crate::thread::{self, ConversationLocks};
use crate::transport::Transport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const HELP_TEXT: &str = "!gpt [prompt], answer without conversation context\n\
!chat [prompt], chat with conversation context\n\
!bing [prompt], chat with context powered by Bing AI\n\
!bard [prompt], chat with context powered by Gemini\n\
!pic [prompt], image generation by Bing Image Creator\n\
!help, show this message";

/// A backend call failed. The event task survives; only this event's reply
/// is affected.
#[derive(Debug, thiserror::Error)]
#[error("{command} backend failed: {cause}")]
pub struct BackendError {
    pub command: CommandKind,
    pub cause: String,
}

/// Failure surfaced at a task boundary, delivered on the structured
/// failure sink so observers and tests can assert on it.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub channel_id: String,
    pub command: Option<CommandKind>,
    pub error: String,
}

/// The assembled bot: transport, router, and whichever backends were
/// configured at startup. All fields are read-only after construction;
/// conversation state lives in the backends.
pub struct Bot {
    transport: Arc<dyn Transport>,
    router: CommandRouter,
    completion: Option<Arc<dyn CompletionBackend>>,
    chat: Option<Arc<dyn ConversationBackend>>,
    search: Option<Arc<dyn SearchBackend>>,
    threaded: Option<Arc<dyn ConversationBackend>>,
    image: Option<Arc<dyn ImageBackend>>,
    locks: ConversationLocks,
    max_past: usize,
    image_dir: PathBuf,
    failure_tx: Option<mpsc::Sender<TaskFailure>>,
}

impl Bot {
    /// Bare bot with no backends; attach them with the `with_*` builders.
    pub fn new(
        transport: Arc<dyn Transport>,
        username: impl Into<String>,
        grammar: CommandGrammar,
    ) -> Self {
        Self {
            transport,
            router: CommandRouter::new(grammar, username),
            completion: None,
            chat: None,
            search: None,
            threaded: None,
            image: None,
            locks: ConversationLocks::new(),
            max_past: 2,
            image_dir: PathBuf::from("images"),
            failure_tx: None,
        }
    }

    pub fn with_completion(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.completion = Some(backend);
        self
    }

    pub fn with_chat(mut self, backend: Arc<dyn ConversationBackend>) -> Self {
        self.chat = Some(backend);
        self
    }

    pub fn with_search(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.search = Some(backend);
        self
    }

    pub fn with_threaded(mut self, backend: Arc<dyn ConversationBackend>) -> Self {
        self.threaded = Some(backend);
        self
    }

    pub fn with_image(mut self, backend: Arc<dyn ImageBackend>) -> Self {
        self.image = Some(backend);
        self
    }

    pub fn with_max_past(mut self, max_past: usize) -> Self {
        self.max_past = max_past;
        self
    }

    pub fn with_image_dir(mut self, dir: PathBuf) -> Self {
        self.image_dir = dir;
        self
    }

    /// Attach the structured failure sink.
    pub fn with_failure_sink(mut self, tx: mpsc::Sender<TaskFailure>) -> Self {
        self.failure_tx = Some(tx);
        self
    }

    /// Build the bot and its Mattermost client from config. Missing server
    /// url, username, or all credentials are fatal; a missing backend
    /// credential only disables that command with a warning.
    pub fn from_config(config: &Config) -> Result<(Bot, Arc<MattermostClient>), ConfigError> {
        let server_url = config::resolve_server_url(config).ok_or(ConfigError::MissingServerUrl)?;
        let username = config::resolve_username(config).ok_or(ConfigError::MissingUsername)?;
        let access_token = config::resolve_access_token(config);
        if access_token.is_none() && config::resolve_password(config).is_none() {
            return Err(ConfigError::MissingCredentials);
        }
        let client = MattermostClient::new(
            &server_url,
            config.server.port,
            config.server.timeout_secs,
            access_token,
        )
        .map_err(|e| ConfigError::Http(e.to_string()))?;
        let client = Arc::new(client);

        let grammar = config.chat.grammar;
        let mut bot = Bot::new(client.clone(), &username, grammar)
            .with_max_past(config.chat.max_past)
            .with_image_dir(config.chat.image_dir.clone());

        if let Some(key) = config::resolve_openai_api_key(config) {
            let endpoint = config::resolve_openai_endpoint(config);
            bot = bot.with_completion(Arc::new(OpenAiClient::new(key.clone(), endpoint.clone())));
            let chat = Arc::new(OpenAiChat::new(key, endpoint));
            bot = bot.with_chat(chat.clone());
            if grammar == CommandGrammar::Mention {
                bot = bot.with_threaded(chat);
            }
        } else {
            log::warn!("openai api key not provided, !gpt and !chat will not work");
        }

        if let Some(endpoint) = config::resolve_bing_endpoint(config) {
            bot = bot.with_search(Arc::new(BingClient::new(endpoint)));
        } else {
            log::warn!("bing api endpoint not provided, !bing will not work");
        }

        if grammar == CommandGrammar::Prefix {
            if let Some(key) = config::resolve_bard_api_key(config) {
                bot = bot.with_threaded(Arc::new(GeminiClient::new(key)));
            } else {
                log::warn!("bard api key not provided, !bard will not work");
            }
        }

        if let Some(cookie) = config::resolve_bing_auth_cookie(config) {
            let image = ImageClient::new(cookie).map_err(|e| ConfigError::Http(e.to_string()))?;
            bot = bot.with_image(Arc::new(image));
        } else {
            log::warn!("bing auth cookie not provided, !pic will not work");
        }

        Ok((bot, client))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            completion: self.completion.is_some(),
            chat: self.chat.is_some(),
            search: self.search.is_some(),
            threaded: self.threaded.is_some(),
            image: self.image.is_some(),
        }
    }

    /// Run until the transport stops: read raw frames, normalize, and
    /// spawn one task per inbound event. Malformed events are logged and
    /// skipped; they never break the stream loop.
    pub async fn run(self: Arc<Self>, client: Arc<MattermostClient>) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let events = client.clone().start_events(tx);
        while let Some(raw) = rx.recv().await {
            match event::normalize(&raw) {
                Ok(Some(ev)) => {
                    let bot = self.clone();
                    tokio::spawn(async move {
                        bot.handle_event(ev).await;
                    });
                }
                Ok(None) => {}
                Err(e) => log::warn!("dropping malformed event: {}", e),
            }
        }
        events.await?;
        Ok(())
    }

    /// Process one inbound event end to end.
    pub async fn handle_event(&self, event: InboundEvent) {
        if self.router.is_self(&event.sender_name) {
            log::debug!("ignoring own message in {}", event.channel_display_name);
            return;
        }
        let command = self
            .router
            .classify(&event.text, self.capabilities(), !event.root_id.is_empty());
        if command == Command::None {
            return;
        }
        log::info!(
            "dispatching for {} in channel {}",
            event.sender_name,
            event.channel_display_name
        );
        if let Err(err) = self.dispatch(&event, command).await {
            log::error!("dispatch in channel {} failed: {}", event.channel_id, err);
            self.report(
                event.channel_id.clone(),
                Some(err.command),
                err.to_string(),
            )
            .await;
            // best effort: surface the failure where the command was issued
            self.send_text_detached(event.channel_id.clone(), event.root_id.clone(), err.to_string());
        }
    }

    /// Invoke exactly one backend for the classified command.
    async fn dispatch(&self, event: &InboundEvent, command: Command) -> Result<(), BackendError> {
        match command {
            Command::Help => {
                self.send_text_detached(
                    event.channel_id.clone(),
                    event.root_id.clone(),
                    HELP_TEXT.to_string(),
                );
                Ok(())
            }
            Command::Complete(arg) => {
                let Some(backend) = self.completion.as_ref() else {
                    return Ok(());
                };
                let reply = backend.ask(&arg).await.map_err(|cause| BackendError {
                    command: CommandKind::Complete,
                    cause,
                })?;
                self.send_text_detached(event.channel_id.clone(), event.root_id.clone(), reply);
                Ok(())
            }
            Command::SearchChat(arg) => {
                let Some(backend) = self.search.as_ref() else {
                    return Ok(());
                };
                let reply = backend.ask(&arg).await.map_err(|cause| BackendError {
                    command: CommandKind::SearchChat,
                    cause,
                })?;
                self.send_text_detached(event.channel_id.clone(), event.root_id.clone(), reply);
                Ok(())
            }
            Command::Chat(arg) => {
                let backend = self.chat.clone();
                self.dispatch_conversation(CommandKind::Chat, backend, event, &arg)
                    .await
            }
            Command::ThreadedChat(arg) => {
                let backend = self.threaded.clone();
                self.dispatch_conversation(CommandKind::ThreadedChat, backend, event, &arg)
                    .await
            }
            Command::Image(arg) => self.dispatch_image(event, &arg).await,
            Command::None => Ok(()),
        }
    }

    /// Conversational dispatch: serialize per conversation, resolve the
    /// context window, call the backend, reply into the thread.
    async fn dispatch_conversation(
        &self,
        kind: CommandKind,
        backend: Option<Arc<dyn ConversationBackend>>,
        event: &InboundEvent,
        arg: &str,
    ) -> Result<(), BackendError> {
        let Some(backend) = backend else {
            return Ok(());
        };
        let lock_key = if event.root_id.is_empty() {
            &event.post_id
        } else {
            &event.root_id
        };
        // hold across the existence check and the backend call so two
        // messages in one thread cannot both observe a cold session
        let _guard = self.locks.acquire(lock_key).await;
        let has_session = if event.root_id.is_empty() {
            false
        } else {
            backend.has_conversation(&event.root_id).await
        };
        let resolved = thread::resolve(
            self.transport.as_ref(),
            &event.post_id,
            &event.root_id,
            arg,
            has_session,
            self.max_past,
        )
        .await
        .map_err(|e| BackendError {
            command: kind,
            cause: e.to_string(),
        })?;
        let reply = backend
            .ask(&resolved.prompt, &resolved.conversation_id)
            .await
            .map_err(|cause| BackendError { command: kind, cause })?;
        self.send_text_detached(event.channel_id.clone(), resolved.conversation_id, reply);
        Ok(())
    }

    /// Image dispatch: links then download; a failure in either step aborts
    /// the flow with no partial reply. Upload and post run detached.
    async fn dispatch_image(&self, event: &InboundEvent, arg: &str) -> Result<(), BackendError> {
        let Some(backend) = self.image.as_ref() else {
            return Ok(());
        };
        let links = backend
            .get_image_links(arg)
            .await
            .map_err(|cause| BackendError {
                command: CommandKind::Image,
                cause,
            })?;
        let path = backend
            .download_and_save(&links, &self.image_dir)
            .await
            .map_err(|cause| BackendError {
                command: CommandKind::Image,
                cause,
            })?;
        let transport = self.transport.clone();
        let failure_tx = self.failure_tx.clone();
        let channel_id = event.channel_id.clone();
        let root_id = event.root_id.clone();
        let caption = arg.to_string();
        tokio::spawn(async move {
            if let Err(e) =
                outbound::send_file(transport.as_ref(), &channel_id, &root_id, &caption, &path).await
            {
                log::error!(
                    "file delivery to {} failed, scratch kept at {}: {}",
                    channel_id,
                    path.display(),
                    e
                );
                report(failure_tx, channel_id, Some(CommandKind::Image), e.to_string()).await;
            }
        });
        Ok(())
    }

    /// Deliver a text reply on a spawned task so a slow post never stalls
    /// the event task.
    fn send_text_detached(&self, channel_id: String, root_id: String, text: String) {
        let transport = self.transport.clone();
        let failure_tx = self.failure_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = outbound::send_text(transport.as_ref(), &channel_id, &root_id, &text).await
            {
                log::error!("posting reply to {} failed: {}", channel_id, e);
                report(failure_tx, channel_id, None, e.to_string()).await;
            }
        });
    }

    async fn report(&self, channel_id: String, command: Option<CommandKind>, error: String) {
        report(self.failure_tx.clone(), channel_id, command, error).await;
    }
}

async fn report(
    tx: Option<mpsc::Sender<TaskFailure>>,
    channel_id: String,
    command: Option<CommandKind>,
    error: String,
) {
    if let Some(tx) = tx {
        let _ = tx
            .send(TaskFailure {
                channel_id,
                command,
                error,
            })
            .await;
    }
}
