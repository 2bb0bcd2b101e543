// File: relaybot-common/src/models/mod.rs
pub mod conversation;
pub mod message;
pub mod metrics;
pub mod platform;

pub use conversation::{ConversationTurn, Role};
pub use message::{GLOBAL_SCOPE, InboundMessage, OutboundReply, SenderRoles};
pub use metrics::MetricsSnapshot;
pub use platform::Platform;
