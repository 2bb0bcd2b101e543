//! src/platforms/twitch_irc/runtime.rs
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use relaybot_common::models::{InboundMessage, OutboundReply, Platform, SenderRoles};

use crate::Error;
use crate::config::{ReconnectPolicy, TwitchConfig};
use crate::platforms::{ChatPlatform, ConnectionStatus, PlatformIntegration};

use super::client::{ParsedTwitchMsg, TwitchIrcClient};

/// Users seen subscribing during this session, keyed by lowercase login.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    users: DashSet<String>,
}

impl SubscriberRegistry {
    pub fn insert(&self, login: &str) {
        self.users.insert(login.to_lowercase());
    }

    pub fn contains(&self, login: &str) -> bool {
        self.users.contains(&login.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Translates one IRC line into an inbound chat message, recording
/// subscription notices in `subscribers` along the way.
pub fn translate_line(
    msg: &ParsedTwitchMsg,
    subscribers: &SubscriberRegistry,
) -> Option<InboundMessage> {
    match msg.command.as_str() {
        "USERNOTICE" => {
            if matches!(msg.tag("msg-id"), Some("sub" | "resub")) {
                if let Some(login) = msg.tag("login") {
                    info!("(TwitchIrcPlatform) {} subscribed", login);
                    subscribers.insert(login);
                }
            }
            None
        }
        "PRIVMSG" => {
            let channel = msg.params.first()?.clone();
            let text = msg.trailing.clone()?;
            let login = msg.nick().map(str::to_string).or_else(|| msg.tag("login").map(str::to_string))?;

            let broadcaster = msg.has_badge("broadcaster") || channel.trim_start_matches('#') == login;
            let roles = SenderRoles {
                subscriber: msg.tag("subscriber") == Some("1")
                    || msg.has_badge("subscriber")
                    || msg.has_badge("founder")
                    || subscribers.contains(&login),
                moderator: msg.tag("mod") == Some("1") || msg.has_badge("moderator"),
                broadcaster,
                admin: false,
            };

            Some(InboundMessage {
                platform: Platform::TwitchIRC,
                channel,
                user_id: msg.tag("user-id").unwrap_or_default().to_string(),
                user_name: msg.tag("display-name").map(str::to_string).unwrap_or(login),
                text,
                roles,
                addressed: false,
                reply_to: None,
            })
        }
        _ => None,
    }
}

/// Opens a logged-in IRC session.
#[async_trait]
pub trait IrcConnector: Send + Sync {
    async fn open(&self) -> Result<TwitchIrcClient, Error>;
}

/// Logs in to Twitch over TLS with the configured credentials.
struct TlsLogin {
    username: String,
    oauth_token: String,
}

#[async_trait]
impl IrcConnector for TlsLogin {
    async fn open(&self) -> Result<TwitchIrcClient, Error> {
        if !self.oauth_token.starts_with("oauth:") {
            return Err(Error::Platform("Twitch IRC token must start with 'oauth:'".into()));
        }
        if self.username.is_empty() {
            return Err(Error::Platform("Twitch IRC credentials missing user_name".into()));
        }
        TwitchIrcClient::connect(&self.username, &self.oauth_token).await
    }
}

/// Pumps one connection at a time into the dispatcher, reconnecting
/// and re-joining channels whenever the server drops us.
struct Session {
    connector: Arc<dyn IrcConnector>,
    channels: Vec<String>,
    own_name: String,
    policy: ReconnectPolicy,
    client: Arc<Mutex<Option<TwitchIrcClient>>>,
    status: Arc<Mutex<ConnectionStatus>>,
    subscribers: Arc<SubscriberRegistry>,
    inbound: mpsc::Sender<InboundMessage>,
}

enum SessionEnd {
    Lost,
    Closed,
}

impl Session {
    /// Joins the configured channels and makes `client` the active connection.
    fn attach(&self, mut client: TwitchIrcClient) -> Result<mpsc::UnboundedReceiver<ParsedTwitchMsg>, Error> {
        let Some(incoming) = client.incoming.take() else {
            client.shutdown();
            return Err(Error::Platform("No incoming channel in TwitchIrcClient".into()));
        };
        let joined = self.channels.iter().try_for_each(|channel| client.join_channel(channel));
        if let Err(e) = joined {
            client.shutdown();
            return Err(e);
        }

        *self.client.lock() = Some(client);
        *self.status.lock() = ConnectionStatus::Connected;
        info!("(TwitchIrcPlatform) connected as {}, joining {:?}", self.own_name, self.channels);
        Ok(incoming)
    }

    async fn run(self, mut incoming: mpsc::UnboundedReceiver<ParsedTwitchMsg>) {
        loop {
            if let SessionEnd::Closed = self.pump(&mut incoming).await {
                break;
            }

            *self.status.lock() = ConnectionStatus::Reconnecting;
            if let Some(old) = self.client.lock().take() {
                old.shutdown();
            }
            match self.reconnect().await {
                Some(next) => incoming = next,
                None => break,
            }
        }
        info!("(TwitchIrcPlatform) session ended.");
    }

    async fn pump(&self, incoming: &mut mpsc::UnboundedReceiver<ParsedTwitchMsg>) -> SessionEnd {
        while let Some(line) = incoming.recv().await {
            match line.command.as_str() {
                "RECONNECT" => {
                    warn!("(TwitchIrcPlatform) server requested reconnect");
                    return SessionEnd::Lost;
                }
                "NOTICE" => {
                    if let Some(text) = &line.trailing {
                        warn!("(TwitchIrcPlatform) NOTICE: {}", text);
                    }
                }
                _ => {}
            }

            let Some(msg) = translate_line(&line, &self.subscribers) else {
                debug!("(TwitchIrcPlatform) ignoring {}", line.command);
                continue;
            };
            if msg.user_name.eq_ignore_ascii_case(&self.own_name) {
                continue;
            }
            if self.inbound.send(msg).await.is_err() {
                info!("(TwitchIrcPlatform) dispatcher gone, stopping read loop");
                return SessionEnd::Closed;
            }
        }
        warn!("(TwitchIrcPlatform) connection lost");
        SessionEnd::Lost
    }

    /// Retries until a connection is attached or the dispatcher goes away.
    async fn reconnect(&self) -> Option<mpsc::UnboundedReceiver<ParsedTwitchMsg>> {
        let mut attempt: u32 = 0;
        loop {
            if self.inbound.is_closed() {
                return None;
            }
            let delay = self.policy.delay(attempt);
            attempt = attempt.saturating_add(1);
            info!("(TwitchIrcPlatform) reconnecting in {:?} (attempt {})", delay, attempt);
            tokio::time::sleep(delay).await;

            let attached = match self.connector.open().await {
                Ok(client) => self.attach(client),
                Err(e) => Err(e),
            };
            match attached {
                Ok(incoming) => return Some(incoming),
                Err(e) => warn!("(TwitchIrcPlatform) reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }
}

pub struct TwitchIrcPlatform {
    config: TwitchConfig,
    connector: Arc<dyn IrcConnector>,
    connection_status: Arc<Mutex<ConnectionStatus>>,
    client: Arc<Mutex<Option<TwitchIrcClient>>>,
    session_handle: Mutex<Option<JoinHandle<()>>>,
    subscribers: Arc<SubscriberRegistry>,
}

impl TwitchIrcPlatform {
    pub fn new(config: TwitchConfig) -> Self {
        let login = TlsLogin {
            username: config.username.clone(),
            oauth_token: config.oauth_token.clone(),
        };
        Self::with_connector(config, Arc::new(login))
    }

    pub fn with_connector(config: TwitchConfig, connector: Arc<dyn IrcConnector>) -> Self {
        Self {
            config,
            connector,
            connection_status: Arc::new(Mutex::new(ConnectionStatus::Disconnected)),
            client: Arc::new(Mutex::new(None)),
            session_handle: Mutex::new(None),
            subscribers: Arc::new(SubscriberRegistry::default()),
        }
    }

    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }
}

#[async_trait]
impl ChatPlatform for TwitchIrcPlatform {
    fn platform(&self) -> Platform {
        Platform::TwitchIRC
    }

    async fn send_message(&self, reply: &OutboundReply) -> Result<(), Error> {
        let guard = self.client.lock();
        match guard.as_ref() {
            Some(cli) => cli.send_privmsg(&reply.channel, &reply.text, reply.reply_to.as_deref()),
            None => Err(Error::Platform("No active Twitch IRC connection".into())),
        }
    }
}

#[async_trait]
impl PlatformIntegration for TwitchIrcPlatform {
    async fn connect(&self, inbound: mpsc::Sender<InboundMessage>) -> Result<(), Error> {
        if self.client.lock().is_some() {
            info!("(TwitchIrcPlatform) connect => already connected");
            return Ok(());
        }

        let client = match self.connector.open().await {
            Ok(c) => c,
            Err(e) => {
                let msg = format!("Error connecting to Twitch IRC => {}", e);
                error!("{}", msg);
                *self.connection_status.lock() = ConnectionStatus::Error(msg);
                return Err(e);
            }
        };

        let session = Session {
            connector: Arc::clone(&self.connector),
            channels: self.config.channels.clone(),
            own_name: self.config.username.clone(),
            policy: self.config.reconnect.clone(),
            client: Arc::clone(&self.client),
            status: Arc::clone(&self.connection_status),
            subscribers: Arc::clone(&self.subscribers),
            inbound,
        };
        let incoming = session.attach(client)?;
        let handle = tokio::spawn(session.run(incoming));
        *self.session_handle.lock() = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Error> {
        // stop the session first so it cannot reconnect behind our back
        if let Some(h) = self.session_handle.lock().take() {
            h.abort();
        }
        *self.connection_status.lock() = ConnectionStatus::Disconnected;

        if let Some(cli) = self.client.lock().take() {
            for channel in &self.config.channels {
                if let Err(e) = cli.part_channel(channel) {
                    debug!("(TwitchIrcPlatform) PART {} skipped: {}", channel, e);
                }
            }
            cli.shutdown();
        }
        info!("(TwitchIrcPlatform) disconnected");
        Ok(())
    }

    async fn get_connection_status(&self) -> Result<ConnectionStatus, Error> {
        Ok(self.connection_status.lock().clone())
    }
}
