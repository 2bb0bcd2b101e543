// File: src/platforms/mod.rs

use async_trait::async_trait;
use tokio::sync::mpsc;

use relaybot_common::models::{InboundMessage, OutboundReply, Platform};

use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
    Error(String),
}

/// Outbound side of a chat platform, the seam the dispatcher talks to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    fn platform(&self) -> Platform;

    /// Hard per-message limit of the transport, in characters.
    fn max_message_len(&self) -> usize {
        self.platform().max_message_len()
    }

    async fn send_message(&self, reply: &OutboundReply) -> Result<(), Error>;
}

/// Connection lifecycle. Inbound messages are pushed into the sender given to
/// `connect` until `disconnect` is called.
#[async_trait]
pub trait PlatformIntegration: ChatPlatform {
    async fn connect(&self, inbound: mpsc::Sender<InboundMessage>) -> Result<(), Error>;
    async fn disconnect(&self) -> Result<(), Error>;
    async fn get_connection_status(&self) -> Result<ConnectionStatus, Error>;
}

pub mod telegram;
pub mod twitch_irc;
