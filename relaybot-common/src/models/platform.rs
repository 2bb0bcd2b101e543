// File: relaybot-common/src/models/platform.rs

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    #[serde(rename = "twitch-irc")]
    TwitchIRC,
    Telegram,
}

impl Platform {
    /// Hard ceiling the platform itself enforces on a single outbound message.
    pub fn max_message_len(&self) -> usize {
        match self {
            Platform::TwitchIRC => 500,
            Platform::Telegram => 4096,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::TwitchIRC => write!(f, "twitch-irc"),
            Platform::Telegram => write!(f, "telegram"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twitch" | "twitch-irc" => Ok(Platform::TwitchIRC),
            "telegram" => Ok(Platform::Telegram),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}
