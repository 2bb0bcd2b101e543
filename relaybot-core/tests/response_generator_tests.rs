// File: relaybot-core/tests/response_generator_tests.rs

use std::sync::Arc;
use std::time::Duration;

use relaybot_ai::{CompletionResponse, FinishReason, SanitizerConfig};
use relaybot_common::models::Role;
use relaybot_core::Error;
use relaybot_core::ratelimit::RateLimitConfig;
use relaybot_core::services::response_generator::{GeneratorConfig, ResponseGenerator, DEFAULT_FALLBACK_REPLY};
use relaybot_core::state::{BotState, CacheConfig};
use relaybot_core::test_utils::ScriptedCompletionApi;
use tokio_test::assert_ok;

fn state_with(limits: RateLimitConfig) -> Arc<BotState> {
    Arc::new(BotState::new("You are a test bot.", 3, CacheConfig::default(), limits))
}

fn generator(api: Arc<ScriptedCompletionApi>, state: Arc<BotState>) -> ResponseGenerator {
    ResponseGenerator::new(api, state, GeneratorConfig::default())
}

#[tokio::test]
async fn test_length_truncated_empty_then_content_returns_second() {
    let api = Arc::new(ScriptedCompletionApi::new(vec![
        Ok(CompletionResponse::single("", FinishReason::Length)),
        Ok(CompletionResponse::single("  Second   try  worked. ", FinishReason::Stop)),
    ]));
    let state = state_with(RateLimitConfig::default());
    let generator = generator(api.clone(), state.clone());

    let generation = assert_ok!(generator.generate("hello", "twitch-irc:1").await);
    assert_eq!(generation.text, "Second try worked.");
    assert_eq!(generation.attempts, 2);
    assert!(!generation.fallback);

    let requests = api.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].token_budget, 120);
    assert_eq!(requests[1].token_budget, 240);
    // the length retry keeps the sampling of the first attempt
    assert_eq!(requests[0].sampling, requests[1].sampling);

    // the sanitized reply is what history keeps
    let snapshot = state.with_history(|h| h.snapshot());
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[1].content(), "hello");
    assert_eq!(snapshot[2].content(), "Second try worked.");
}

#[tokio::test]
async fn test_always_empty_returns_fallback_after_three_calls() {
    let api = Arc::new(ScriptedCompletionApi::repeating(CompletionResponse::single(
        "",
        FinishReason::Length,
    )));
    let state = state_with(RateLimitConfig::default());
    let generator = generator(api.clone(), state.clone());

    let generation = assert_ok!(generator.generate("hello", "twitch-irc:1").await);
    assert_eq!(generation.text, DEFAULT_FALLBACK_REPLY);
    assert!(generation.fallback);
    assert_eq!(api.call_count(), 3);

    let requests = api.requests();
    assert_eq!(requests[1].token_budget, 240);
    assert_eq!(requests[2].token_budget, 240);
    // conservative rung pulls first-interaction sampling (0.7/0.9) down to 0.5/0.8
    assert_eq!(requests[2].sampling.temperature, 0.5);
    assert_eq!(requests[2].sampling.top_p, 0.8);

    // fallback replies are not remembered
    assert_eq!(state.history_len(), 1);
    assert_eq!(state.metrics().counters().fallback_replies, 1);
}

#[tokio::test]
async fn test_empty_without_length_skips_length_retry() {
    let api = Arc::new(ScriptedCompletionApi::repeating(CompletionResponse::single(
        "",
        FinishReason::Stop,
    )));
    let generator = generator(api.clone(), state_with(RateLimitConfig::default()));

    let generation = assert_ok!(generator.generate("hello", "u").await);
    assert!(generation.fallback);
    assert_eq!(api.call_count(), 2);
}

#[tokio::test]
async fn test_empty_fallback_reply_surfaces_empty_completion() {
    let api = Arc::new(ScriptedCompletionApi::repeating(CompletionResponse::single(
        "",
        FinishReason::Length,
    )));
    let config = GeneratorConfig {
        fallback_reply: String::new(),
        ..Default::default()
    };
    let generator = ResponseGenerator::new(api, state_with(RateLimitConfig::default()), config);

    let err = generator.generate("hello", "u").await.unwrap_err();
    assert!(matches!(err, Error::EmptyCompletion));
}

#[tokio::test]
async fn test_first_interaction_uses_distinct_sampling() {
    let api = Arc::new(ScriptedCompletionApi::repeating(CompletionResponse::single(
        "ok",
        FinishReason::Stop,
    )));
    let generator = generator(api.clone(), state_with(RateLimitConfig::default()));

    generator.generate("one", "twitch-irc:1").await.unwrap();
    generator.generate("two", "twitch-irc:1").await.unwrap();
    generator.generate("three", "twitch-irc:2").await.unwrap();

    let temps: Vec<f32> = api.requests().iter().map(|r| r.sampling.temperature).collect();
    assert_eq!(temps, vec![0.7, 1.0, 0.7]);
}

#[tokio::test]
async fn test_request_carries_system_history_and_user_turn() {
    let api = Arc::new(ScriptedCompletionApi::repeating(CompletionResponse::single(
        "answer",
        FinishReason::Stop,
    )));
    let generator = generator(api.clone(), state_with(RateLimitConfig::default()));

    generator.generate("first", "u").await.unwrap();
    generator.generate("second", "u").await.unwrap();

    let last = api.requests().pop().unwrap();
    let roles: Vec<Role> = last.messages.iter().map(|t| t.role()).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
    assert_eq!(last.messages[0].content(), "You are a test bot.");
    assert_eq!(last.messages[3].content(), "second");
}

#[tokio::test]
async fn test_reply_is_truncated_to_app_limit() {
    let api = Arc::new(ScriptedCompletionApi::repeating(CompletionResponse::single(
        "word ".repeat(100),
        FinishReason::Stop,
    )));
    let config = GeneratorConfig {
        sanitizer: SanitizerConfig {
            max_length: 50,
            ..Default::default()
        },
        ..Default::default()
    };
    let generator = ResponseGenerator::new(api, state_with(RateLimitConfig::default()), config);

    let generation = generator.generate("talk a lot", "u").await.unwrap();
    assert!(generation.text.chars().count() <= 50);
    assert!(generation.text.ends_with("..."));
}

#[tokio::test]
async fn test_global_rate_limit_rejects_without_calling_api() {
    let api = Arc::new(ScriptedCompletionApi::repeating(CompletionResponse::single(
        "ok",
        FinishReason::Stop,
    )));
    let state = state_with(RateLimitConfig {
        max_calls_per_window: 2,
        window: Duration::from_secs(60),
        ..Default::default()
    });
    let generator = generator(api.clone(), state);

    assert!(generator.generate("a", "u1").await.is_ok());
    assert!(generator.generate("b", "u2").await.is_ok());
    let err = generator.generate("c", "u3").await.unwrap_err();
    assert!(matches!(err, Error::RateLimited));
    assert_eq!(api.call_count(), 2);
}

#[tokio::test]
async fn test_api_failures_open_the_circuit() {
    let api = Arc::new(ScriptedCompletionApi::new(vec![
        Err(Error::Completion("500".into())),
        Err(Error::Completion("500".into())),
    ]));
    let state = state_with(RateLimitConfig {
        circuit_threshold: 2,
        ..Default::default()
    });
    let generator = generator(api.clone(), state.clone());

    assert!(matches!(generator.generate("a", "u").await, Err(Error::Completion(_))));
    assert!(matches!(generator.generate("b", "u").await, Err(Error::Completion(_))));
    assert!(matches!(generator.generate("c", "u").await, Err(Error::CircuitOpen)));
    assert_eq!(api.call_count(), 2);
    assert_eq!(state.metrics_snapshot().circuit_state, "OPEN");
    // failed calls leave history untouched
    assert_eq!(state.history_len(), 1);
}

#[tokio::test]
async fn test_retry_calls_count_against_the_global_window() {
    let api = Arc::new(ScriptedCompletionApi::repeating(CompletionResponse::single(
        "",
        FinishReason::Length,
    )));
    let state = state_with(RateLimitConfig {
        max_calls_per_window: 2,
        ..Default::default()
    });
    let generator = generator(api.clone(), state.clone());

    let err = generator.generate("hello", "u").await.unwrap_err();
    assert!(matches!(err, Error::RateLimited));
    assert_eq!(api.call_count(), 2);
    assert_eq!(state.history_len(), 1);
    assert_eq!(state.metrics().counters().rate_limited, 1);
}

#[tokio::test]
async fn test_api_calls_are_timed_and_failures_counted() {
    let api = Arc::new(ScriptedCompletionApi::new(vec![
        Ok(CompletionResponse::single("fine", FinishReason::Stop)),
        Err(Error::Completion("502".into())),
    ]));
    let state = state_with(RateLimitConfig::default());
    let generator = generator(api, state.clone());

    assert!(generator.generate("a", "u").await.is_ok());
    assert!(generator.generate("b", "u").await.is_err());

    let snapshot = state.metrics_snapshot();
    assert_eq!(snapshot.api_calls, 2);
    assert_eq!(snapshot.api_errors, 1);
    assert_eq!(snapshot.api_error_rate, 50.0);
    assert!(snapshot.avg_api_latency_ms >= 0.0);
}

#[tokio::test]
async fn test_rate_rejection_hands_back_the_circuit_trial() {
    let api = Arc::new(ScriptedCompletionApi::new(vec![
        Err(Error::Completion("500".into())),
        Ok(CompletionResponse::single("recovered", FinishReason::Stop)),
    ]));
    let state = state_with(RateLimitConfig {
        circuit_threshold: 1,
        circuit_timeout: Duration::from_millis(20),
        max_calls_per_window: 2,
        window: Duration::from_millis(200),
        ..Default::default()
    });
    let generator = generator(api.clone(), state.clone());

    assert!(generator.generate("a", "u").await.is_err());
    // uses up the window while the circuit is still open
    assert!(state.limiter().check_global_rate());
    tokio::time::sleep(Duration::from_millis(30)).await;

    // the trial is admitted by the circuit, then turned away by the window
    assert!(matches!(generator.generate("b", "u").await, Err(Error::RateLimited)));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let generation = generator.generate("c", "u").await.unwrap();
    assert_eq!(generation.text, "recovered");
    assert_eq!(state.metrics_snapshot().circuit_state, "CLOSED");
}

#[tokio::test]
async fn test_scoped_generation_leaves_global_history_alone() {
    let api = Arc::new(ScriptedCompletionApi::repeating(CompletionResponse::single(
        "hi",
        FinishReason::Stop,
    )));
    let state = state_with(RateLimitConfig::default());
    let generator = generator(api.clone(), state.clone());

    generator.generate_in("42", "hello", "telegram:1").await.unwrap();
    assert_eq!(state.history_len_in("42"), 3);
    assert_eq!(state.history_len(), 1);
}
