// File: relaybot-common/src/models/message.rs

use serde::{Deserialize, Serialize};

use crate::models::platform::Platform;

/// Permission-relevant flags the platform attached to the sender.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderRoles {
    pub subscriber: bool,
    pub moderator: bool,
    pub broadcaster: bool,
    pub admin: bool,
}

/// Conversation scope shared by every Twitch channel and the HTTP caller.
pub const GLOBAL_SCOPE: &str = "";

/// A chat message delivered by a platform adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub platform: Platform,
    /// IRC channel (`#name`) or Telegram chat id.
    pub channel: String,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub roles: SenderRoles,
    /// Set by adapters that already decided the bot was addressed (Telegram
    /// private chat or mention). Otherwise a command prefix is required.
    pub addressed: bool,
    /// Platform message id to thread the reply onto, if the platform supports it.
    pub reply_to: Option<String>,
}

impl InboundMessage {
    /// Key used for per-user cooldown and first-interaction tracking.
    pub fn user_key(&self) -> String {
        if self.user_id.is_empty() {
            format!("{}:{}", self.platform, self.user_name.to_lowercase())
        } else {
            format!("{}:{}", self.platform, self.user_id)
        }
    }

    /// History and cache scope of the message. Every Telegram chat keeps its
    /// own conversation; Twitch channels share the global one.
    pub fn conversation_scope(&self) -> &str {
        match self.platform {
            Platform::Telegram => &self.channel,
            Platform::TwitchIRC => GLOBAL_SCOPE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub channel: String,
    pub text: String,
    pub reply_to: Option<String>,
}
