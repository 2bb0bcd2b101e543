pub mod client;
pub mod runtime;

pub use client::TelegramClient;
pub use runtime::{classify, clean_prompt, should_respond, BotIdentity, TelegramAction, TelegramPlatform};
