// File: src/services/response_generator.rs

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use relaybot_ai::{
    CompletionApi, CompletionRequest, ModelFamily, SamplingParams, Sanitizer, SanitizerConfig,
};
use relaybot_common::Error;
use relaybot_common::models::GLOBAL_SCOPE;

use crate::state::BotState;

pub const DEFAULT_FALLBACK_REPLY: &str =
    "Sorry, I couldn't come up with an answer to that. Try asking another way!";

/// Maps the reply length limit onto a completion token budget.
#[derive(Debug, Clone)]
pub struct TokenBudgetPolicy {
    /// Longest reply we intend to send, in characters.
    pub max_output_chars: usize,
    pub safety_margin: u32,
    pub min_tokens: u32,
    pub max_tokens: u32,
    /// Hard cap for enlarged retry budgets.
    pub ceiling: u32,
    pub length_retry_multiplier: f32,
}

impl Default for TokenBudgetPolicy {
    fn default() -> Self {
        Self {
            max_output_chars: 399,
            safety_margin: 20,
            min_tokens: 32,
            max_tokens: 150,
            ceiling: 1024,
            length_retry_multiplier: 2.0,
        }
    }
}

impl TokenBudgetPolicy {
    /// Roughly four characters per token plus a margin, clamped to
    /// `[min_tokens, max_tokens]`.
    pub fn initial(&self) -> u32 {
        let chars = u32::try_from(self.max_output_chars).unwrap_or(u32::MAX);
        let raw = chars.div_ceil(4).saturating_add(self.safety_margin);
        raw.clamp(self.min_tokens, self.max_tokens.max(self.min_tokens))
    }

    /// Budget for a retry after `budget` ran out; never smaller than `budget`.
    pub fn enlarged(&self, budget: u32) -> u32 {
        let grown = (budget as f32 * self.length_retry_multiplier.max(1.0)).ceil() as u32;
        grown.min(self.ceiling).max(budget)
    }
}

/// Rungs of the retry ladder for empty completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Initial,
    /// Same sampling, larger budget. Only entered when the model ran out of tokens.
    LengthRetry,
    /// Safer sampling and the larger budget.
    Conservative,
}

impl Attempt {
    /// Rung to try after an empty response, `None` once the ladder is exhausted.
    pub fn next(self, length_truncated: bool) -> Option<Attempt> {
        match self {
            Attempt::Initial if length_truncated => Some(Attempt::LengthRetry),
            Attempt::Initial | Attempt::LengthRetry => Some(Attempt::Conservative),
            Attempt::Conservative => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Attempt::Initial => "initial",
            Attempt::LengthRetry => "length-retry",
            Attempt::Conservative => "conservative",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub model: String,
    /// Sampling for users the bot already talked to.
    pub sampling: SamplingParams,
    /// Sampling for a user's first interaction.
    pub first_sampling: SamplingParams,
    /// Values the conservative rung pulls sampling toward.
    pub conservative_sampling: SamplingParams,
    pub budget: TokenBudgetPolicy,
    pub sanitizer: SanitizerConfig,
    /// Sent when every rung came back empty. Empty disables the fallback.
    pub fallback_reply: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            sampling: SamplingParams::default(),
            first_sampling: SamplingParams {
                temperature: 0.7,
                top_p: 0.9,
                ..SamplingParams::default()
            },
            conservative_sampling: SamplingParams {
                temperature: 0.5,
                top_p: 0.8,
                ..SamplingParams::default()
            },
            budget: TokenBudgetPolicy::default(),
            sanitizer: SanitizerConfig::default(),
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
        }
    }
}

/// Result of one `generate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    /// Completion calls made.
    pub attempts: u32,
    /// The ladder ran dry and `text` is the fallback reply.
    pub fallback: bool,
}

/// Turns a user prompt into a reply: admission checks, the completion call
/// with its retry ladder, sanitizing and recording the exchange.
pub struct ResponseGenerator {
    api: Arc<dyn CompletionApi>,
    state: Arc<BotState>,
    sanitizer: Sanitizer,
    config: GeneratorConfig,
}

impl ResponseGenerator {
    pub fn new(api: Arc<dyn CompletionApi>, state: Arc<BotState>, config: GeneratorConfig) -> Self {
        let mut sanitizer_config = config.sanitizer.clone();
        if ModelFamily::detect(&config.model).is_reasoning() {
            // reasoning models tend to answer in markdown and ramble
            sanitizer_config.strip_markdown = true;
            sanitizer_config.terse = true;
        }
        Self {
            api,
            state,
            sanitizer: Sanitizer::new(sanitizer_config),
            config,
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Generates a reply in the global conversation.
    pub async fn generate(&self, user_text: &str, user_key: &str) -> Result<Generation, Error> {
        self.generate_in(GLOBAL_SCOPE, user_text, user_key).await
    }

    /// Generates a reply for `user_text` on behalf of `user_key`, using and
    /// extending the conversation of `scope`.
    ///
    /// Fails with [`Error::CircuitOpen`] or [`Error::RateLimited`] before any
    /// call is made, and with the transport error if a completion call fails.
    /// Every call of the retry ladder passes the global call window; a retry
    /// turned away by it also fails with [`Error::RateLimited`]. Once the
    /// ladder is exhausted on empty completions the configured fallback reply
    /// is returned, or [`Error::EmptyCompletion`] when the fallback is empty.
    pub async fn generate_in(
        &self,
        scope: &str,
        user_text: &str,
        user_key: &str,
    ) -> Result<Generation, Error> {
        let limiter = self.state.limiter();
        if !limiter.circuit_allows() {
            warn!("Circuit open, rejecting request from {}", user_key);
            return Err(Error::CircuitOpen);
        }
        if !limiter.check_global_rate() {
            warn!("Global rate limit reached, rejecting request from {}", user_key);
            limiter.release_circuit_trial();
            self.state.metrics().record_rate_limited();
            return Err(Error::RateLimited);
        }

        let first_interaction = self.state.mark_seen(user_key);
        let base_sampling = if first_interaction {
            self.config.first_sampling
        } else {
            self.config.sampling
        };
        let messages = self.state.with_history_in(scope, |h| h.prompt_with(user_text));

        let mut attempt = Attempt::Initial;
        let mut budget = self.config.budget.initial();
        let mut attempts = 0u32;

        loop {
            if attempt != Attempt::Initial && !limiter.check_global_rate() {
                warn!(
                    "Global rate limit reached before the {} attempt for {}",
                    attempt.as_str(),
                    user_key
                );
                self.state.metrics().record_rate_limited();
                return Err(Error::RateLimited);
            }

            let sampling = match attempt {
                Attempt::Conservative => base_sampling.toward(&self.config.conservative_sampling),
                Attempt::Initial | Attempt::LengthRetry => base_sampling,
            };
            let request = CompletionRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                sampling,
                token_budget: budget,
            };

            attempts += 1;
            debug!(
                attempt = attempt.as_str(),
                budget,
                first_interaction,
                "Requesting completion for {}",
                user_key
            );

            let started = Instant::now();
            let result = self.api.complete(request).await;
            self.state.metrics().record_api_call(started.elapsed(), result.is_ok());
            let response = match result {
                Ok(r) => {
                    limiter.record_api_success();
                    r
                }
                Err(e) => {
                    error!("Completion call failed ({}): {}", attempt.as_str(), e);
                    limiter.record_api_failure();
                    return Err(e);
                }
            };

            let text = self.sanitizer.sanitize(response.content());
            if !text.is_empty() {
                self.state.with_history_in(scope, |h| h.append(user_text, text.as_str()));
                info!(attempts, "Generated reply for {} ({} chars)", user_key, text.chars().count());
                return Ok(Generation { text, attempts, fallback: false });
            }

            let truncated = response.is_length_truncated();
            match attempt.next(truncated) {
                Some(next) => {
                    warn!(
                        "Empty completion on {} attempt (finish_reason={:?}), moving to {}",
                        attempt.as_str(),
                        response.finish_reason(),
                        next.as_str()
                    );
                    // both later rungs share one enlarged budget
                    if attempt == Attempt::Initial {
                        budget = self.config.budget.enlarged(budget);
                    }
                    attempt = next;
                }
                None if self.config.fallback_reply.is_empty() => {
                    warn!("Empty completion after {} attempts and no fallback reply configured", attempts);
                    return Err(Error::EmptyCompletion);
                }
                None => {
                    warn!("Empty completion after {} attempts, sending fallback reply", attempts);
                    self.state.metrics().record_fallback();
                    return Ok(Generation {
                        text: self.config.fallback_reply.clone(),
                        attempts,
                        fallback: true,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_budget_from_char_limit() {
        let policy = TokenBudgetPolicy::default();
        // ceil(399 / 4) + 20
        assert_eq!(policy.initial(), 120);

        let policy = TokenBudgetPolicy { max_output_chars: 10, ..Default::default() };
        assert_eq!(policy.initial(), 32);

        let policy = TokenBudgetPolicy { max_output_chars: 4000, ..Default::default() };
        assert_eq!(policy.initial(), 150);
    }

    #[test]
    fn test_enlarged_budget_is_capped() {
        let policy = TokenBudgetPolicy::default();
        assert_eq!(policy.enlarged(120), 240);
        assert_eq!(policy.enlarged(240), 480);
        assert_eq!(policy.enlarged(900), 1024);

        let policy = TokenBudgetPolicy { length_retry_multiplier: 1.5, ..Default::default() };
        assert_eq!(policy.enlarged(120), 180);
    }

    #[test]
    fn test_retry_ladder_transitions() {
        assert_eq!(Attempt::Initial.next(true), Some(Attempt::LengthRetry));
        assert_eq!(Attempt::Initial.next(false), Some(Attempt::Conservative));
        assert_eq!(Attempt::LengthRetry.next(true), Some(Attempt::Conservative));
        assert_eq!(Attempt::LengthRetry.next(false), Some(Attempt::Conservative));
        assert_eq!(Attempt::Conservative.next(true), None);
    }
}
