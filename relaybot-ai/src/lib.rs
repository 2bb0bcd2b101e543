pub mod memory;
pub mod models;
pub mod provider;
pub mod sanitize;
pub mod traits;

// Re-export public APIs
pub use memory::ConversationHistory;
pub use models::{ModelFamily, ProviderConfig, SamplingParams};
pub use provider::OpenAiProvider;
pub use sanitize::{Sanitizer, SanitizerConfig};
pub use traits::{CompletionApi, CompletionChoice, CompletionRequest, CompletionResponse, FinishReason};
