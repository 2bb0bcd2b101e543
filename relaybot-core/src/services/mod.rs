// File: src/services/mod.rs

pub mod dispatcher;
pub mod permissions;
pub mod response_generator;

pub use dispatcher::{DispatchConfig, DispatchMode, DispatchOutcome, DropReason, MessageDispatcher};
pub use permissions::PermissionPolicy;
pub use response_generator::{Attempt, GeneratorConfig, Generation, ResponseGenerator, TokenBudgetPolicy};
