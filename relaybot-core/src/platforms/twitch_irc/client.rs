//! src/platforms/twitch_irc/client.rs

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, split};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tokio_native_tls::native_tls;
use tokio_native_tls::TlsConnector;
use tracing::{debug, error, info, trace, warn};

use crate::Error;

pub const TWITCH_IRC_HOST: &str = "irc.chat.twitch.tv";
pub const TWITCH_IRC_TLS_PORT: u16 = 6697;

/// One raw IRC line split into its parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTwitchMsg {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
}

impl ParsedTwitchMsg {
    pub fn parse_irc_line(line: &str) -> Self {
        let mut rest = line.trim();
        let mut msg = Self::default();

        // @tags
        if let Some(stripped) = rest.strip_prefix('@') {
            let (tag_str, remainder) = stripped.split_once(' ').unwrap_or((stripped, ""));
            msg.tags = parse_tags(tag_str);
            rest = remainder.trim_start();
        }

        // :prefix
        if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, remainder) = stripped.split_once(' ').unwrap_or((stripped, ""));
            msg.prefix = Some(prefix.to_string());
            rest = remainder.trim_start();
        }

        let (command, remainder) = rest.split_once(' ').unwrap_or((rest, ""));
        msg.command = command.to_uppercase();
        rest = remainder;

        let params_part = if let Some(trailing) = rest.strip_prefix(':') {
            msg.trailing = Some(trailing.to_string());
            ""
        } else if let Some(idx) = rest.find(" :") {
            msg.trailing = Some(rest[idx + 2..].to_string());
            &rest[..idx]
        } else {
            rest
        };
        msg.params
            .extend(params_part.split_whitespace().map(|s| s.to_string()));

        msg
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|v| v.as_str()).filter(|v| !v.is_empty())
    }

    /// Nick from a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        prefix.split_once('!').map(|(nick, _)| nick)
    }

    /// Badge names from the `badges` tag, e.g. `subscriber/12` gives `subscriber`.
    pub fn badges(&self) -> Vec<&str> {
        self.tag("badges")
            .map(|b| {
                b.split(',')
                    .filter_map(|badge| badge.split('/').next())
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_badge(&self, name: &str) -> bool {
        self.badges().contains(&name)
    }
}

/// Splits `key=value;key=value` and unescapes IRCv3 tag values.
fn parse_tags(tag_str: &str) -> HashMap<String, String> {
    tag_str
        .split(';')
        .filter(|kv| !kv.is_empty())
        .map(|kv| {
            let (key, value) = kv.split_once('=').unwrap_or((kv, ""));
            (key.to_string(), unescape_tag_value(value))
        })
        .collect()
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Low-level IRC client that connects to Twitch via TLS.
pub struct TwitchIrcClient {
    raw_outgoing: mpsc::UnboundedSender<String>,

    /// Taken by the platform runtime once after connecting.
    pub incoming: Option<mpsc::UnboundedReceiver<ParsedTwitchMsg>>,

    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl TwitchIrcClient {
    /// Connects with TLS, sends PASS/NICK/CAP and spawns the read/write tasks.
    pub async fn connect(username: &str, oauth_token: &str) -> Result<Self, Error> {
        let tcp = TcpStream::connect((TWITCH_IRC_HOST, TWITCH_IRC_TLS_PORT))
            .await
            .map_err(|e| Error::Platform(format!("TCP connect error: {e}")))?;

        let native_connector = native_tls::TlsConnector::new()
            .map_err(|e| Error::Platform(format!("TLSConnector::new() => {e}")))?;
        let connector = TlsConnector::from(native_connector);

        let tls_stream = connector
            .connect(TWITCH_IRC_HOST, tcp)
            .await
            .map_err(|e| Error::Platform(format!("TLS connect() => {e}")))?;

        let client = Self::from_stream(tls_stream);
        client.send_raw_line(&format!("PASS {}", oauth_token))?;
        client.send_raw_line(&format!("NICK {}", username))?;
        client.send_raw_line("CAP REQ :twitch.tv/commands twitch.tv/tags twitch.tv/membership")?;
        Ok(client)
    }

    /// Runs the IRC read/write loops over an already established stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = split(stream);

        let (tx_outgoing, rx_outgoing) = mpsc::unbounded_channel::<String>();
        let (tx_incoming, rx_incoming) = mpsc::unbounded_channel::<ParsedTwitchMsg>();

        let write_task = tokio::spawn(Self::writer_loop(write_half, rx_outgoing));
        let read_task = tokio::spawn(Self::reader_loop(read_half, tx_incoming, tx_outgoing.clone()));

        Self {
            raw_outgoing: tx_outgoing,
            incoming: Some(rx_incoming),
            read_task,
            write_task,
        }
    }

    async fn reader_loop<R>(
        read_half: R,
        tx_incoming: mpsc::UnboundedSender<ParsedTwitchMsg>,
        tx_outgoing: mpsc::UnboundedSender<String>,
    ) where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(read_half);
        let mut line_buffer = String::new();

        loop {
            line_buffer.clear();
            match reader.read_line(&mut line_buffer).await {
                Ok(0) => {
                    info!("(TwitchIrcClient) read_loop => EOF");
                    break;
                }
                Ok(_) => {
                    let line = line_buffer.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    trace!("<< {}", line);

                    let parsed = ParsedTwitchMsg::parse_irc_line(line);
                    if parsed.command == "PING" {
                        let token = parsed.trailing.as_deref().unwrap_or("tmi.twitch.tv");
                        if tx_outgoing.send(format!("PONG :{}", token)).is_err() {
                            warn!("(TwitchIrcClient) writer gone, cannot answer PING");
                            break;
                        }
                        debug!("Auto PONG -> {}", token);
                        continue;
                    }

                    if tx_incoming.send(parsed).is_err() {
                        debug!("(TwitchIrcClient) incoming receiver dropped");
                        break;
                    }
                }
                Err(e) => {
                    error!("(TwitchIrcClient) read error => {:?}", e);
                    break;
                }
            }
        }

        info!("(TwitchIrcClient) reader_loop ended.");
    }

    async fn writer_loop<W>(mut write_half: W, mut rx_outgoing: mpsc::UnboundedReceiver<String>)
    where
        W: AsyncWrite + Unpin,
    {
        let mut writer = BufWriter::new(&mut write_half);

        while let Some(line) = rx_outgoing.recv().await {
            if line.starts_with("PASS ") {
                trace!(">> PASS ***");
            } else {
                trace!(">> {}", line);
            }
            let written = async {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\r\n").await?;
                writer.flush().await
            };
            if let Err(e) = written.await {
                error!("writer error => {:?}", e);
                break;
            }
        }

        info!("(TwitchIrcClient) writer_loop ended.");
    }

    /// Queues one line for the writer; fails once the writer has stopped.
    pub fn send_raw_line(&self, line: &str) -> Result<(), Error> {
        self.raw_outgoing
            .send(line.to_string())
            .map_err(|_| Error::Platform("Twitch IRC connection is closed".into()))
    }

    /// True once the writer has stopped and nothing more can be sent.
    pub fn is_closed(&self) -> bool {
        self.raw_outgoing.is_closed()
    }

    pub fn join_channel(&self, channel: &str) -> Result<(), Error> {
        self.send_raw_line(&format!("JOIN {}", channel))
    }

    pub fn part_channel(&self, channel: &str) -> Result<(), Error> {
        self.send_raw_line(&format!("PART {}", channel))
    }

    /// Sends a chat line; `reply_to` threads it onto a message id.
    pub fn send_privmsg(&self, channel: &str, message: &str, reply_to: Option<&str>) -> Result<(), Error> {
        // IRC lines cannot carry newlines
        let message = message.replace(['\r', '\n'], " ");
        let cmd = match reply_to {
            Some(id) => format!("@reply-parent-msg-id={} PRIVMSG {} :{}", id, channel, message),
            None => format!("PRIVMSG {} :{}", channel, message),
        };
        self.send_raw_line(&cmd)
    }

    pub fn shutdown(self) {
        self.read_task.abort();
        self.write_task.abort();
    }
}
