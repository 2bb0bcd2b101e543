// File: src/services/dispatcher.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use relaybot_ai::sanitize::truncate;
use relaybot_common::models::{InboundMessage, OutboundReply};

use crate::platforms::ChatPlatform;
use crate::services::permissions::PermissionPolicy;
use crate::services::response_generator::ResponseGenerator;
use crate::state::BotState;

pub const DEFAULT_ERROR_REPLY: &str =
    "Sorry, something went wrong while answering. Please try again in a moment.";

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Prefixes that address the bot, matched case-insensitively.
    pub command_names: Vec<String>,
    /// Prompts become `Message from user <name>: <text>`.
    pub send_username: bool,
    /// Prefix replies with `@<name>`.
    pub mention_user: bool,
    pub error_reply: String,
    /// Sent on permission denial; `None` drops silently.
    pub denial_message: Option<String>,
    pub permissions: PermissionPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            command_names: vec!["!gpt".to_string()],
            send_username: true,
            mention_user: true,
            error_reply: DEFAULT_ERROR_REPLY.to_string(),
            denial_message: None,
            permissions: PermissionPolicy::default(),
        }
    }
}

/// How the dispatch loop schedules messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// One task per message; replies may complete out of order.
    Concurrent,
    /// Each message finishes before the next one starts.
    Serial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not addressed to the bot.
    NotForBot,
    Permission,
    Cooldown,
    RateLimited,
}

/// Terminal state of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Replied { cached: bool },
    Dropped(DropReason),
    /// The error reply was sent (or attempted).
    Failed,
}

/// Returns the prompt if `text` starts with one of `commands`.
pub fn extract_command<'a>(text: &'a str, commands: &[String]) -> Option<&'a str> {
    let trimmed = text.trim_start();
    commands.iter().find_map(|cmd| {
        let head = trimmed.get(..cmd.len())?;
        if head.eq_ignore_ascii_case(cmd) {
            Some(trimmed[cmd.len()..].trim())
        } else {
            None
        }
    })
}

/// Runs every inbound message through permission, cooldown, cache and
/// generation, and sends exactly one reply or none.
pub struct MessageDispatcher {
    state: Arc<BotState>,
    generator: Arc<ResponseGenerator>,
    platform: Arc<dyn ChatPlatform>,
    config: DispatchConfig,
}

impl MessageDispatcher {
    pub fn new(
        state: Arc<BotState>,
        generator: Arc<ResponseGenerator>,
        platform: Arc<dyn ChatPlatform>,
        config: DispatchConfig,
    ) -> Self {
        Self { state, generator, platform, config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Processes one message to a terminal state. Never returns an error:
    /// failures are logged and answered with the configured error reply.
    pub async fn handle(&self, msg: InboundMessage) -> DispatchOutcome {
        let prompt = if msg.addressed {
            Some(msg.text.trim())
        } else {
            extract_command(&msg.text, &self.config.command_names)
        };
        let prompt = match prompt {
            Some(p) if !p.is_empty() => p,
            _ => {
                trace!("Ignoring message from {} in {}", msg.user_name, msg.channel);
                return DispatchOutcome::Dropped(DropReason::NotForBot);
            }
        };

        let metrics = self.state.metrics();
        metrics.record_processed();

        if !self.config.permissions.allows(&msg.roles) {
            debug!("Permission denied for {} in {}", msg.user_name, msg.channel);
            if let Some(denial) = &self.config.denial_message {
                let text = self.decorate(&msg, denial);
                if let Err(e) = self.deliver(&msg, text).await {
                    warn!("Failed to send denial message: {}", e);
                }
            }
            return self.drop_message(DropReason::Permission);
        }

        let user_key = msg.user_key();
        if !self.state.limiter().check_cooldown(&user_key) {
            debug!(
                "{} is on cooldown ({:?} left)",
                user_key,
                self.state.limiter().cooldown_remaining(&user_key)
            );
            return self.drop_message(DropReason::Cooldown);
        }

        let prompt = if self.config.send_username {
            format!("Message from user {}: {}", msg.user_name, prompt)
        } else {
            prompt.to_string()
        };

        let scope = msg.conversation_scope();
        if let Some(cached) = self.state.cached_reply_in(scope, &prompt) {
            debug!("Cache hit for {}", user_key);
            return match self.deliver(&msg, self.decorate(&msg, &cached)).await {
                Ok(()) => {
                    metrics.record_reply();
                    DispatchOutcome::Replied { cached: true }
                }
                Err(e) => {
                    error!("Failed to send cached reply to {}: {}", msg.channel, e);
                    metrics.record_error();
                    DispatchOutcome::Failed
                }
            };
        }

        let generation = match self.generator.generate_in(scope, &prompt, &user_key).await {
            Ok(g) => g,
            Err(e) if e.is_rejection() => {
                info!("Dropping message from {}: {}", user_key, e);
                return self.drop_message(DropReason::RateLimited);
            }
            Err(e) => {
                error!("Error generating reply for {}: {}", user_key, e);
                return self.fail(&msg).await;
            }
        };

        // cached alongside the history entry, whether or not the send succeeds
        if !generation.fallback {
            self.state.store_reply_in(scope, &prompt, &generation.text);
        }

        let text = self.decorate(&msg, &generation.text);
        match self.deliver(&msg, text).await {
            Ok(()) => {
                metrics.record_reply();
                DispatchOutcome::Replied { cached: false }
            }
            Err(e) => {
                error!("Failed to send reply to {}: {}", msg.channel, e);
                metrics.record_error();
                DispatchOutcome::Failed
            }
        }
    }

    /// Receives messages until the channel closes or `shutdown` flips to true.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mode: DispatchMode,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Dispatcher started ({:?})", mode);
        let mut in_flight = JoinSet::new();

        loop {
            let msg = tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(m) => m,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match mode {
                DispatchMode::Serial => {
                    self.handle(msg).await;
                }
                DispatchMode::Concurrent => {
                    let dispatcher = Arc::clone(&self);
                    in_flight.spawn(async move { dispatcher.handle(msg).await });
                    while let Some(done) = in_flight.try_join_next() {
                        if let Err(e) = done {
                            error!("Dispatch task panicked: {:?}", e);
                        }
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            info!("Waiting for {} in-flight messages", in_flight.len());
            let drain = async {
                while let Some(done) = in_flight.join_next().await {
                    if let Err(e) = done {
                        error!("Dispatch task panicked: {:?}", e);
                    }
                }
            };
            if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
                warn!("In-flight messages did not finish in time, aborting them");
                in_flight.abort_all();
            }
        }
        info!("Dispatcher stopped");
    }

    fn decorate(&self, msg: &InboundMessage, text: &str) -> String {
        if self.config.mention_user && !msg.user_name.is_empty() {
            format!("@{} {}", msg.user_name, text)
        } else {
            text.to_string()
        }
    }

    async fn deliver(&self, msg: &InboundMessage, text: String) -> Result<(), crate::Error> {
        let limit = self.platform.max_message_len();
        let text = if text.chars().count() > limit {
            debug!("Reply over platform limit {}, truncating", limit);
            truncate(&text, limit)
        } else {
            text
        };
        self.platform
            .send_message(&OutboundReply {
                channel: msg.channel.clone(),
                text,
                reply_to: msg.reply_to.clone(),
            })
            .await
    }

    async fn fail(&self, msg: &InboundMessage) -> DispatchOutcome {
        self.state.metrics().record_error();
        let text = self.decorate(msg, &self.config.error_reply);
        if let Err(e) = self.deliver(msg, text).await {
            error!("Failed to send error reply to {}: {}", msg.channel, e);
        }
        DispatchOutcome::Failed
    }

    fn drop_message(&self, reason: DropReason) -> DispatchOutcome {
        self.state.metrics().record_dropped();
        DispatchOutcome::Dropped(reason)
    }
}
