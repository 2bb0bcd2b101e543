use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use relaybot_common::models::ConversationTurn;
use relaybot_common::Error;

use crate::models::SamplingParams;

/// Why the model stopped producing output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    /// Output hit the token budget.
    Length,
    ContentFilter,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Everything one completion call needs.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ConversationTurn>,
    pub sampling: SamplingParams,
    pub token_budget: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionChoice {
    pub content: Option<String>,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    pub choices: Vec<CompletionChoice>,
}

impl CompletionResponse {
    /// Convenience constructor for a single-choice response.
    pub fn single(content: impl Into<String>, finish_reason: FinishReason) -> Self {
        let content = content.into();
        Self {
            choices: vec![CompletionChoice {
                content: if content.is_empty() { None } else { Some(content) },
                finish_reason: Some(finish_reason),
            }],
        }
    }

    /// Builds a response from a chat/completions JSON body.
    ///
    /// Content is taken from `message.content`, then `text`, then
    /// `delta.content`; a choice with none of them has empty content.
    pub fn from_json(body: &Value) -> Result<Self, Error> {
        let choices = body
            .get("choices")
            .and_then(|c| c.as_array())
            .ok_or_else(|| Error::Completion("Response missing 'choices' array".into()))?;

        let choices = choices
            .iter()
            .map(|choice| {
                let content = choice
                    .pointer("/message/content")
                    .and_then(|v| v.as_str())
                    .or_else(|| choice.get("text").and_then(|v| v.as_str()))
                    .or_else(|| choice.pointer("/delta/content").and_then(|v| v.as_str()))
                    .map(|s| s.to_string());
                let finish_reason = choice
                    .get("finish_reason")
                    .and_then(|v| v.as_str())
                    .map(FinishReason::parse);
                CompletionChoice { content, finish_reason }
            })
            .collect();

        Ok(Self { choices })
    }

    /// Trimmed content of the first choice; empty when absent.
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.content.as_deref())
            .map(str::trim)
            .unwrap_or("")
    }

    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.choices.first().and_then(|c| c.finish_reason.as_ref())
    }

    pub fn is_length_truncated(&self) -> bool {
        matches!(self.finish_reason(), Some(FinishReason::Length))
    }
}

/// Black-box completion endpoint.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error>;
}
