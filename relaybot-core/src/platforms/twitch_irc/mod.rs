pub mod client;
pub mod runtime;

pub use client::{ParsedTwitchMsg, TwitchIrcClient};
pub use runtime::{translate_line, IrcConnector, SubscriberRegistry, TwitchIrcPlatform};
