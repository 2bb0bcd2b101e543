//! src/platforms/telegram/client.rs
//!
//! Thin Bot API client over reqwest: just the calls the relay needs.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

use crate::Error;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub username: Option<String>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(if self.first_name.is_empty() { "anon" } else { self.first_name.as_str() })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Chat {
    pub fn is_private(&self) -> bool {
        self.kind == "private"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    /// In UTF-16 code units.
    pub offset: usize,
    pub length: usize,
    pub user: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    #[serde(default)]
    pub caption_entities: Vec<MessageEntity>,
    pub reply_to_message: Option<Box<Message>>,
    #[serde(default)]
    pub new_chat_members: Vec<User>,
}

impl Message {
    pub fn body(&self) -> &str {
        self.text.as_deref().or(self.caption.as_deref()).unwrap_or("")
    }

    pub fn body_entities(&self) -> &[MessageEntity] {
        if self.entities.is_empty() {
            &self.caption_entities
        } else {
            &self.entities
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Bot API calls used by the Telegram platform.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    api: String,
}

impl TelegramClient {
    /// `poll_timeout_secs` is the long-poll wait; the HTTP timeout leaves room on top of it.
    pub fn new(token: &str, poll_timeout_secs: u64) -> Result<Self, Error> {
        Self::with_base(TELEGRAM_API_BASE, token, poll_timeout_secs)
    }

    pub fn with_base(base: &str, token: &str, poll_timeout_secs: u64) -> Result<Self, Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 15))
            .build()?;
        Ok(Self {
            http,
            api: format!("{}/bot{}", base.trim_end_matches('/'), token),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, Error> {
        trace!("Telegram call {} {}", method, body);
        let resp: ApiResponse<T> = self
            .http
            .post(format!("{}/{}", self.api, method))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        match (resp.ok, resp.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(Error::Platform(format!(
                "Telegram {} failed: {}",
                method,
                resp.description.unwrap_or_else(|| "no description".into())
            ))),
        }
    }

    pub async fn get_me(&self) -> Result<User, Error> {
        self.call("getMe", json!({})).await
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, Error> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<(), Error> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(id) = reply_to {
            body["reply_to_message_id"] = json!(id);
            body["allow_sending_without_reply"] = json!(true);
        }
        let _: Value = self.call("sendMessage", body).await?;
        Ok(())
    }

    pub async fn leave_chat(&self, chat_id: i64) -> Result<(), Error> {
        let _: bool = self.call("leaveChat", json!({ "chat_id": chat_id })).await?;
        Ok(())
    }
}
