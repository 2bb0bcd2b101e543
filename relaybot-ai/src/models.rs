use serde::{Serialize, Deserialize};

/// Configuration for an OpenAI-compatible provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for API requests
    pub api_base: Option<String>,

    /// API key for authentication
    pub api_key: String,

    /// Model used for every request
    pub default_model: String,

    /// Per-request timeout enforced by the HTTP client
    pub timeout_secs: u64,
}

impl ProviderConfig {
    pub const DEFAULT_API_BASE: &'static str = "https://api.openai.com/v1";

    pub fn api_base(&self) -> &str {
        self.api_base
            .as_deref()
            .unwrap_or(Self::DEFAULT_API_BASE)
            .trim_end_matches('/')
    }
}

/// Sampling knobs sent along with a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl SamplingParams {
    /// Pulls temperature and top-p down to `safer` without ever raising them.
    pub fn toward(&self, safer: &SamplingParams) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature.min(safer.temperature),
            top_p: self.top_p.min(safer.top_p),
            ..*self
        }
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            frequency_penalty: 0.5,
            presence_penalty: 0.0,
        }
    }
}

/// How a model wants its parameters shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Reasoning models: `max_completion_tokens`, no sampling parameters.
    Reasoning,
    /// Current chat models: `max_completion_tokens` plus sampling.
    Chat,
    /// Older models: `max_tokens` plus sampling.
    Legacy,
}

const REASONING_MARKERS: &[&str] = &["gpt-5", "o1", "o3", "o4-mini"];
const CHAT_MARKERS: &[&str] = &["gpt-5-chat", "gpt-4o", "gpt-4-turbo", "gpt-4.1"];
const LEGACY_MARKERS: &[&str] = &["gpt-3.5-turbo", "gpt-4-0613", "gpt-4-0314", "gpt-4-32k", "text-davinci"];

impl ModelFamily {
    pub fn detect(model: &str) -> Self {
        let model = model.to_lowercase();
        // chat markers win: "gpt-5-chat-latest" also contains "gpt-5"
        if CHAT_MARKERS.iter().any(|m| model.contains(m)) {
            ModelFamily::Chat
        } else if LEGACY_MARKERS.iter().any(|m| model.contains(m)) {
            ModelFamily::Legacy
        } else if REASONING_MARKERS.iter().any(|m| model.starts_with(m) || model.contains(&format!("/{m}"))) {
            ModelFamily::Reasoning
        } else {
            ModelFamily::Chat
        }
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(self, ModelFamily::Reasoning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_family_detection() {
        assert_eq!(ModelFamily::detect("gpt-5-mini"), ModelFamily::Reasoning);
        assert_eq!(ModelFamily::detect("o3-mini"), ModelFamily::Reasoning);
        assert_eq!(ModelFamily::detect("gpt-5-chat-latest"), ModelFamily::Chat);
        assert_eq!(ModelFamily::detect("gpt-4o-mini"), ModelFamily::Chat);
        assert_eq!(ModelFamily::detect("gpt-3.5-turbo"), ModelFamily::Legacy);
        assert_eq!(ModelFamily::detect("some-local-model"), ModelFamily::Chat);
    }

    #[test]
    fn test_toward_never_raises() {
        let hot = SamplingParams { temperature: 1.2, top_p: 1.0, ..Default::default() };
        let cold = SamplingParams { temperature: 0.2, top_p: 0.5, ..Default::default() };
        let safer = SamplingParams { temperature: 0.5, top_p: 0.8, ..Default::default() };

        let pulled = hot.toward(&safer);
        assert_eq!(pulled.temperature, 0.5);
        assert_eq!(pulled.top_p, 0.8);
        assert_eq!(pulled.frequency_penalty, hot.frequency_penalty);

        assert_eq!(cold.toward(&safer), cold);
    }
}
