// src/lib.rs

pub mod cache;
pub mod config;
pub mod http;
pub mod metrics;
pub mod persona;
pub mod platforms;
pub mod ratelimit;
pub mod services;
pub mod state;
pub mod tasks;
pub mod test_utils;

pub use config::BotConfig;
pub use relaybot_common::error::Error;
pub use state::BotState;
