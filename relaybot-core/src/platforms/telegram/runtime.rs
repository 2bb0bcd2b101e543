//! src/platforms/telegram/runtime.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use relaybot_common::models::{InboundMessage, OutboundReply, Platform, SenderRoles};

use crate::Error;
use crate::config::TelegramConfig;
use crate::platforms::{ChatPlatform, ConnectionStatus, PlatformIntegration};

use super::client::{Message, MessageEntity, TelegramClient, User};

pub const EMPTY_PROMPT: &str = "Hola";
pub const UNAUTHORIZED_GROUP_REPLY: &str =
    "Only my owner can add me to groups, so I'm leaving. Bye!";

/// Who the bot is, learned from `getMe`.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: i64,
    /// `@username`, lowercase.
    pub mention: String,
}

impl BotIdentity {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id,
            mention: format!("@{}", user.username.as_deref().unwrap_or_default().to_lowercase()),
        }
    }
}

/// Slices `text` by UTF-16 offsets, as Telegram entities count them.
fn utf16_slice(text: &str, offset: usize, length: usize) -> Option<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let end = offset.checked_add(length)?;
    let slice = units.get(offset..end)?;
    String::from_utf16(slice).ok()
}

fn entity_addresses_bot(text: &str, entity: &MessageEntity, bot: &BotIdentity) -> bool {
    match entity.kind.as_str() {
        "mention" => utf16_slice(text, entity.offset, entity.length)
            .is_some_and(|m| m.to_lowercase() == bot.mention),
        "text_mention" => entity.user.as_ref().is_some_and(|u| u.id == bot.id),
        "bot_command" => utf16_slice(text, entity.offset, entity.length)
            .is_some_and(|c| c.to_lowercase().contains(&bot.mention)),
        _ => false,
    }
}

/// Private chats always address the bot; in groups it must be replied to or mentioned.
pub fn should_respond(msg: &Message, bot: &BotIdentity) -> bool {
    if msg.chat.is_private() {
        return true;
    }
    if bot.mention.len() <= 1 {
        return false;
    }
    if msg
        .reply_to_message
        .as_ref()
        .and_then(|r| r.from.as_ref())
        .is_some_and(|u| u.id == bot.id)
    {
        return true;
    }

    let text = msg.body();
    if msg.body_entities().iter().any(|e| entity_addresses_bot(text, e, bot)) {
        return true;
    }
    text.to_lowercase().contains(&bot.mention)
}

/// Drops a leading `@bot` mention; an empty result becomes [`EMPTY_PROMPT`].
pub fn clean_prompt(text: &str, bot: &BotIdentity) -> String {
    let trimmed = text.trim();
    let cleaned = match trimmed.get(..bot.mention.len()) {
        Some(head) if bot.mention.len() > 1 && head.eq_ignore_ascii_case(&bot.mention) => {
            trimmed[bot.mention.len()..].trim_start()
        }
        _ => trimmed,
    };
    if cleaned.is_empty() {
        EMPTY_PROMPT.to_string()
    } else {
        cleaned.to_string()
    }
}

/// What to do with one incoming Telegram message.
#[derive(Debug)]
pub enum TelegramAction {
    Ignore,
    /// The bot was added to a group by someone allowed to.
    Greet { chat_id: i64 },
    /// The bot was added by someone else: say so and leave.
    Leave { chat_id: i64 },
    Dispatch(InboundMessage),
}

pub fn classify(msg: &Message, bot: &BotIdentity, config: &TelegramConfig) -> TelegramAction {
    if msg.new_chat_members.iter().any(|m| m.id == bot.id) {
        let inviter = msg.from.as_ref().map(|u| u.id);
        return match inviter {
            Some(id) if config.admin_users.contains(&id) => TelegramAction::Greet { chat_id: msg.chat.id },
            _ => TelegramAction::Leave { chat_id: msg.chat.id },
        };
    }

    let Some(from) = msg.from.as_ref() else {
        return TelegramAction::Ignore;
    };
    if from.is_bot || msg.body().is_empty() {
        return TelegramAction::Ignore;
    }
    if !should_respond(msg, bot) {
        return TelegramAction::Ignore;
    }
    if !config.allowed_groups.is_empty() && !config.allowed_groups.contains(&msg.chat.id) {
        debug!("(TelegramPlatform) chat {} not in allowed groups", msg.chat.id);
        return TelegramAction::Ignore;
    }

    TelegramAction::Dispatch(InboundMessage {
        platform: Platform::Telegram,
        channel: msg.chat.id.to_string(),
        user_id: from.id.to_string(),
        user_name: from.display_name().to_string(),
        text: clean_prompt(msg.body(), bot),
        roles: SenderRoles {
            admin: config.admin_users.contains(&from.id),
            ..Default::default()
        },
        addressed: true,
        reply_to: Some(msg.message_id.to_string()),
    })
}

pub fn greeting(bot: &BotIdentity) -> String {
    format!(
        "Hi everyone! To talk to me, mention me with {0}\nExample: {0} how are you?",
        bot.mention
    )
}

pub struct TelegramPlatform {
    config: TelegramConfig,
    client: TelegramClient,
    connection_status: Arc<Mutex<ConnectionStatus>>,
    identity: Mutex<Option<BotIdentity>>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramPlatform {
    pub fn new(config: TelegramConfig) -> Result<Self, Error> {
        let client = TelegramClient::new(&config.bot_token, config.poll_timeout_secs)?;
        Ok(Self {
            config,
            client,
            connection_status: Arc::new(Mutex::new(ConnectionStatus::Disconnected)),
            identity: Mutex::new(None),
            poll_handle: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> Option<BotIdentity> {
        self.identity.lock().clone()
    }

    async fn poll_loop(
        client: TelegramClient,
        config: TelegramConfig,
        bot: BotIdentity,
        status: Arc<Mutex<ConnectionStatus>>,
        inbound: mpsc::Sender<InboundMessage>,
    ) {
        let mut offset: i64 = 0;
        loop {
            let updates = match client.get_updates(offset, config.poll_timeout_secs).await {
                Ok(u) => {
                    *status.lock() = ConnectionStatus::Connected;
                    u
                }
                Err(e) => {
                    warn!("(TelegramPlatform) poll failed, retrying: {}", e);
                    *status.lock() = ConnectionStatus::Reconnecting;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(msg) = update.message else { continue };

                match classify(&msg, &bot, &config) {
                    TelegramAction::Ignore => {}
                    TelegramAction::Greet { chat_id } => {
                        info!("(TelegramPlatform) added to chat {}", chat_id);
                        if let Err(e) = client.send_message(chat_id, &greeting(&bot), None).await {
                            error!("(TelegramPlatform) failed to send greeting: {}", e);
                        }
                    }
                    TelegramAction::Leave { chat_id } => {
                        warn!("(TelegramPlatform) added to chat {} by a non-admin, leaving", chat_id);
                        if let Err(e) = client.send_message(chat_id, UNAUTHORIZED_GROUP_REPLY, None).await {
                            error!("(TelegramPlatform) failed to send leave notice: {}", e);
                        }
                        if let Err(e) = client.leave_chat(chat_id).await {
                            error!("(TelegramPlatform) failed to leave chat: {}", e);
                        }
                    }
                    TelegramAction::Dispatch(inbound_msg) => {
                        if inbound.send(inbound_msg).await.is_err() {
                            info!("(TelegramPlatform) dispatcher gone, stopping poll loop");
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    async fn send_message(&self, reply: &OutboundReply) -> Result<(), Error> {
        let chat_id: i64 = reply
            .channel
            .parse()
            .map_err(|_| Error::Platform(format!("Invalid Telegram chat id {:?}", reply.channel)))?;
        let reply_to = reply.reply_to.as_deref().and_then(|id| id.parse().ok());
        self.client.send_message(chat_id, &reply.text, reply_to).await
    }
}

#[async_trait]
impl PlatformIntegration for TelegramPlatform {
    async fn connect(&self, inbound: mpsc::Sender<InboundMessage>) -> Result<(), Error> {
        if self.poll_handle.lock().is_some() {
            info!("(TelegramPlatform) connect => already connected");
            return Ok(());
        }

        let me = match self.client.get_me().await {
            Ok(me) => me,
            Err(e) => {
                *self.connection_status.lock() = ConnectionStatus::Error(e.to_string());
                return Err(e);
            }
        };
        let bot = BotIdentity::from_user(&me);
        info!("(TelegramPlatform) bot ready as {} ({})", bot.mention, me.first_name);
        *self.identity.lock() = Some(bot.clone());

        let handle = tokio::spawn(Self::poll_loop(
            self.client.clone(),
            self.config.clone(),
            bot,
            Arc::clone(&self.connection_status),
            inbound,
        ));
        *self.poll_handle.lock() = Some(handle);
        *self.connection_status.lock() = ConnectionStatus::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Error> {
        if let Some(h) = self.poll_handle.lock().take() {
            h.abort();
        }
        *self.connection_status.lock() = ConnectionStatus::Disconnected;
        info!("(TelegramPlatform) polling stopped");
        Ok(())
    }

    async fn get_connection_status(&self) -> Result<ConnectionStatus, Error> {
        Ok(self.connection_status.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bot() -> BotIdentity {
        BotIdentity { id: 99, mention: "@relay_bot".to_string() }
    }

    fn message(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    fn group_msg(text: &str) -> Message {
        message(json!({
            "message_id": 1,
            "from": { "id": 7, "first_name": "Ana", "username": "ana" },
            "chat": { "id": -100, "type": "group" },
            "text": text
        }))
    }

    #[test]
    fn test_private_chat_always_addressed() {
        let msg = message(json!({
            "message_id": 1,
            "from": { "id": 7, "first_name": "Ana" },
            "chat": { "id": 7, "type": "private" },
            "text": "hola"
        }));
        assert!(should_respond(&msg, &bot()));
    }

    #[test]
    fn test_group_requires_mention_or_reply() {
        assert!(!should_respond(&group_msg("just chatting"), &bot()));
        assert!(should_respond(&group_msg("hey @Relay_Bot what's up"), &bot()));

        let reply = message(json!({
            "message_id": 2,
            "from": { "id": 7, "first_name": "Ana" },
            "chat": { "id": -100, "type": "group" },
            "text": "and then?",
            "reply_to_message": {
                "message_id": 1,
                "from": { "id": 99, "is_bot": true, "first_name": "Relay" },
                "chat": { "id": -100, "type": "group" },
                "text": "earlier answer"
            }
        }));
        assert!(should_respond(&reply, &bot()));
    }

    #[test]
    fn test_mention_entity_with_utf16_offset() {
        // the emoji takes two UTF-16 units
        let msg = message(json!({
            "message_id": 1,
            "from": { "id": 7, "first_name": "Ana" },
            "chat": { "id": -100, "type": "group" },
            "text": "🔥 @relay_bot hi",
            "entities": [{ "type": "mention", "offset": 3, "length": 10 }]
        }));
        let entity = &msg.entities[0];
        assert!(entity_addresses_bot(msg.body(), entity, &bot()));
    }

    #[test]
    fn test_clean_prompt() {
        assert_eq!(clean_prompt("@relay_bot   how are you?", &bot()), "how are you?");
        assert_eq!(clean_prompt("@RELAY_BOT", &bot()), EMPTY_PROMPT);
        assert_eq!(clean_prompt("tell @relay_bot hi", &bot()), "tell @relay_bot hi");
    }

    #[test]
    fn test_classify_dispatch_and_allowed_groups() {
        let config = TelegramConfig::default();
        match classify(&group_msg("@relay_bot hi"), &bot(), &config) {
            TelegramAction::Dispatch(m) => {
                assert_eq!(m.channel, "-100");
                assert_eq!(m.text, "hi");
                assert_eq!(m.user_key(), "telegram:7");
                assert_eq!(m.reply_to.as_deref(), Some("1"));
                assert!(m.addressed);
            }
            other => panic!("unexpected {:?}", other),
        }

        let config = TelegramConfig { allowed_groups: vec![-5], ..Default::default() };
        assert!(matches!(
            classify(&group_msg("@relay_bot hi"), &bot(), &config),
            TelegramAction::Ignore
        ));
    }

    #[test]
    fn test_classify_added_to_group() {
        let added = message(json!({
            "message_id": 3,
            "from": { "id": 7, "first_name": "Ana" },
            "chat": { "id": -100, "type": "group" },
            "new_chat_members": [{ "id": 99, "is_bot": true, "first_name": "Relay" }]
        }));
        let config = TelegramConfig::default();
        assert!(matches!(classify(&added, &bot(), &config), TelegramAction::Leave { chat_id: -100 }));

        let config = TelegramConfig { admin_users: vec![7], ..Default::default() };
        assert!(matches!(classify(&added, &bot(), &config), TelegramAction::Greet { chat_id: -100 }));
    }

    #[test]
    fn test_bots_are_ignored() {
        let msg = message(json!({
            "message_id": 1,
            "from": { "id": 8, "is_bot": true, "first_name": "Other" },
            "chat": { "id": 8, "type": "private" },
            "text": "hi"
        }));
        assert!(matches!(classify(&msg, &bot(), &TelegramConfig::default()), TelegramAction::Ignore));
    }
}
