use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info, trace};

use relaybot_common::Error;

use crate::models::{ModelFamily, ProviderConfig};
use crate::traits::{CompletionApi, CompletionRequest, CompletionResponse};

/// Stop sequences that keep chat models from writing the next speaker's line.
pub const STOP_SEQUENCES: [&str; 4] = ["\n\n", "User:", "Human:", "Assistant:"];

/// OpenAI-compatible chat completion provider
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Create a new provider with the given configuration
    pub fn new(config: ProviderConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Shapes the request body for the model family: token parameter name and
    /// whether sampling parameters are accepted at all.
    pub fn build_payload(request: &CompletionRequest) -> Value {
        let family = ModelFamily::detect(&request.model);

        let mut payload = json!({
            "model": request.model,
            "messages": request.messages,
        });

        match family {
            ModelFamily::Legacy => {
                payload["max_tokens"] = json!(request.token_budget);
            }
            ModelFamily::Chat | ModelFamily::Reasoning => {
                payload["max_completion_tokens"] = json!(request.token_budget);
            }
        }

        if !family.is_reasoning() {
            payload["temperature"] = json!(request.sampling.temperature);
            payload["top_p"] = json!(request.sampling.top_p);
            payload["frequency_penalty"] = json!(request.sampling.frequency_penalty);
            payload["presence_penalty"] = json!(request.sampling.presence_penalty);
            payload["stop"] = json!(STOP_SEQUENCES);
        }

        payload
    }
}

#[async_trait]
impl CompletionApi for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        let api_base = self.config.api_base();
        let payload = Self::build_payload(&request);

        info!(
            "Making API call to {}/chat/completions (model={}, budget={}, turns={})",
            api_base,
            request.model,
            request.token_budget,
            request.messages.len()
        );
        trace!("Request payload: {}", payload);

        let response = self.client
            .post(format!("{}/chat/completions", api_base))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        // Get the raw response text first for better error handling
        let response_text = response.text().await?;
        debug!("Raw API response ({}): {}", status, response_text);

        let data = match serde_json::from_str::<Value>(&response_text) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to parse API response as JSON: {:?}", e);
                return Err(Error::Completion(format!(
                    "API returned non-JSON response ({}): {}",
                    status, e
                )));
            }
        };

        if let Some(err) = data.get("error") {
            error!("API returned error: {:?}", err);
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error");
            return Err(Error::Completion(format!("{}: {}", status, message)));
        }

        if !status.is_success() {
            return Err(Error::Completion(format!("API returned status {}", status)));
        }

        CompletionResponse::from_json(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SamplingParams;
    use relaybot_common::models::ConversationTurn;

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest {
            model: model.to_string(),
            messages: vec![
                ConversationTurn::system("persona"),
                ConversationTurn::user("hello"),
            ],
            sampling: SamplingParams::default(),
            token_budget: 120,
        }
    }

    #[test]
    fn test_chat_payload_has_sampling_and_completion_tokens() {
        let payload = OpenAiProvider::build_payload(&request("gpt-4o-mini"));
        assert_eq!(payload["max_completion_tokens"], 120);
        assert!(payload.get("max_tokens").is_none());
        assert_eq!(payload["temperature"], 1.0);
        assert_eq!(payload["stop"].as_array().map(|a| a.len()), Some(4));
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_reasoning_payload_skips_sampling() {
        let payload = OpenAiProvider::build_payload(&request("gpt-5-nano"));
        assert_eq!(payload["max_completion_tokens"], 120);
        assert!(payload.get("temperature").is_none());
        assert!(payload.get("top_p").is_none());
        assert!(payload.get("stop").is_none());
    }

    #[test]
    fn test_legacy_payload_uses_max_tokens() {
        let payload = OpenAiProvider::build_payload(&request("gpt-3.5-turbo"));
        assert_eq!(payload["max_tokens"], 120);
        assert!(payload.get("max_completion_tokens").is_none());
    }
}
