// File: src/config.rs

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use relaybot_ai::{ProviderConfig, SamplingParams, SanitizerConfig};
use relaybot_common::models::Platform;

use crate::Error;
use crate::ratelimit::RateLimitConfig;
use crate::services::dispatcher::{DispatchConfig, DEFAULT_ERROR_REPLY};
use crate::services::permissions::PermissionPolicy;
use crate::services::response_generator::{GeneratorConfig, TokenBudgetPolicy, DEFAULT_FALLBACK_REPLY};
use crate::state::CacheConfig;

#[derive(Debug, Clone, Default)]
pub struct TwitchConfig {
    pub username: String,
    /// `oauth:` prefixed chat token.
    pub oauth_token: String,
    pub channels: Vec<String>,
    pub reconnect: ReconnectPolicy,
}

/// Exponential backoff between attempts to re-establish a lost chat connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 1.5,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the zero-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if scaled.is_finite() && scaled < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max_delay
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// User ids allowed to add the bot to groups.
    pub admin_users: Vec<i64>,
    /// Chats the bot may answer in. Empty means any.
    pub allowed_groups: Vec<i64>,
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            admin_users: Vec::new(),
            allowed_groups: Vec::new(),
            poll_timeout_secs: 30,
        }
    }
}

/// Full runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub provider: ProviderConfig,
    pub generator: GeneratorConfig,
    pub limits: RateLimitConfig,
    pub cache: CacheConfig,
    pub dispatch: DispatchConfig,
    pub history_length: usize,
    pub context_file: PathBuf,
    pub maintenance_interval: Duration,
    pub twitch: TwitchConfig,
    pub telegram: TelegramConfig,
    pub http_port: u16,
}

/// Typed reads over a key lookup, remembering every malformed value.
struct EnvReader<F> {
    lookup: F,
    errors: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    /// Like `string`, but a key that is set to nothing yields the empty string.
    fn string_or_empty(&self, key: &str, default: &str) -> String {
        match (self.lookup)(key) {
            Some(v) => v.trim().to_string(),
            None => default.to_string(),
        }
    }

    fn parse<T: FromStr>(&mut self, key: &str, default: T) -> T {
        match self.raw(key) {
            None => default,
            Some(v) => match v.parse() {
                Ok(parsed) => parsed,
                Err(_) => {
                    self.errors.push(format!("{key}: invalid value {v:?}"));
                    default
                }
            },
        }
    }

    fn flag(&mut self, key: &str, default: bool) -> bool {
        match self.raw(key).map(|v| v.to_lowercase()) {
            None => default,
            Some(v) => match v.as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => {
                    self.errors.push(format!("{key}: expected a boolean, got {v:?}"));
                    default
                }
            },
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.raw(key)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn id_list(&mut self, key: &str) -> Vec<i64> {
        let mut ids = Vec::new();
        for item in self.list(key) {
            match item.parse() {
                Ok(id) => ids.push(id),
                Err(_) => self.errors.push(format!("{key}: invalid id {item:?}")),
            }
        }
        ids
    }

    fn secs(&mut self, key: &str, default: u64) -> Duration {
        Duration::from_secs(self.parse(key, default))
    }
}

impl BotConfig {
    /// Reads the process environment. Call `dotenv` first to pick up `.env`.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unset keys take their
    /// defaults; malformed values are collected into one [`Error::Config`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader { lookup, errors: Vec::new() };
        let sampling_defaults = SamplingParams::default();

        let frequency_penalty = env.parse("FREQUENCY_PENALTY", sampling_defaults.frequency_penalty);
        let presence_penalty = env.parse("PRESENCE_PENALTY", sampling_defaults.presence_penalty);
        let sampling = |temperature: f32, top_p: f32| SamplingParams {
            temperature,
            top_p,
            frequency_penalty,
            presence_penalty,
        };

        let model = env.string("MODEL_NAME", "gpt-4o-mini");
        let max_message_length: usize = env.parse("MAX_MESSAGE_LENGTH", 399);

        let provider = ProviderConfig {
            api_base: env.raw("OPENAI_API_BASE"),
            api_key: env.string("OPENAI_API_KEY", ""),
            default_model: model.clone(),
            timeout_secs: env.parse("REQUEST_TIMEOUT_SECS", 30),
        };

        let generator = GeneratorConfig {
            model,
            sampling: sampling(env.parse("TEMPERATURE", 1.0), env.parse("TOP_P", 1.0)),
            first_sampling: sampling(env.parse("FIRST_TEMPERATURE", 0.7), env.parse("FIRST_TOP_P", 0.9)),
            conservative_sampling: sampling(
                env.parse("CONSERVATIVE_TEMPERATURE", 0.5),
                env.parse("CONSERVATIVE_TOP_P", 0.8),
            ),
            budget: TokenBudgetPolicy {
                max_output_chars: max_message_length,
                safety_margin: 20,
                min_tokens: env.parse("MIN_TOKENS", 32),
                max_tokens: env.parse("MAX_TOKENS", 150),
                ceiling: env.parse("TOKEN_CEILING", 1024),
                length_retry_multiplier: env.parse("LENGTH_RETRY_MULTIPLIER", 2.0),
            },
            sanitizer: SanitizerConfig {
                max_length: max_message_length,
                strip_markdown: env.flag("STRIP_MARKDOWN", false),
                terse: env.flag("TERSE_TRUNCATION", false),
                ..SanitizerConfig::default()
            },
            // FALLBACK_REPLY= turns the fallback off
            fallback_reply: env.string_or_empty("FALLBACK_REPLY", DEFAULT_FALLBACK_REPLY),
        };

        let limits = RateLimitConfig {
            cooldown: env.secs("COOLDOWN_DURATION", 10),
            window: env.secs("RATE_WINDOW_SECS", 60),
            max_calls_per_window: env.parse("RATE_MAX_CALLS", 50),
            degraded_max_calls: env.parse("RATE_DEGRADED_MAX_CALLS", 30),
            purge_multiplier: env.parse("COOLDOWN_PURGE_MULTIPLIER", 30),
            circuit_threshold: env.parse("CIRCUIT_THRESHOLD", 5),
            circuit_timeout: env.secs("CIRCUIT_TIMEOUT_SECS", 30),
        };

        let cache = CacheConfig {
            ttl: env.secs("CACHE_TTL_SECS", 300),
            max_entries: env.parse("CACHE_MAX_ENTRIES", 50),
            key_length: env.parse("CACHE_KEY_LENGTH", 100),
        };

        let mut command_names: Vec<String> = env.list("COMMAND_NAME");
        if command_names.is_empty() {
            command_names.push("!gpt".to_string());
        }
        let dispatch = DispatchConfig {
            command_names,
            send_username: env.flag("SEND_USERNAME", true),
            mention_user: env.flag("MENTION_USER", true),
            error_reply: env.string("ERROR_REPLY", DEFAULT_ERROR_REPLY),
            denial_message: env.raw("DENIAL_MESSAGE"),
            permissions: PermissionPolicy {
                subscribers_only: env.flag("SUBSCRIBERS_ONLY", false),
                moderators_bypass: env.flag("MODERATORS_BYPASS", true),
            },
        };

        let twitch = TwitchConfig {
            username: env.string("TWITCH_USER", "").to_lowercase(),
            oauth_token: env.string("TWITCH_AUTH", ""),
            channels: env
                .list("CHANNELS")
                .into_iter()
                .map(|c| normalize_channel(&c))
                .collect(),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(env.parse("RECONNECT_INTERVAL_MS", 1000)),
                multiplier: env.parse("RECONNECT_DECAY", 1.5),
                max_delay: env.secs("RECONNECT_MAX_DELAY_SECS", 30),
            },
        };

        let telegram = TelegramConfig {
            bot_token: env.string("TELEGRAM_BOT_TOKEN", ""),
            admin_users: env.id_list("ADMIN_USERS"),
            allowed_groups: env.id_list("ALLOWED_GROUPS"),
            poll_timeout_secs: env.parse("POLL_TIMEOUT_SECS", 30),
        };

        let config = BotConfig {
            provider,
            generator,
            limits,
            cache,
            dispatch,
            history_length: env.parse("HISTORY_LENGTH", 5),
            context_file: PathBuf::from(env.string("CONTEXT_FILE", "./file_context.txt")),
            maintenance_interval: env.secs("MAINTENANCE_INTERVAL_SECS", 300),
            twitch,
            telegram,
            http_port: env.parse("PORT", 3000),
        };

        if env.errors.is_empty() {
            Ok(config)
        } else {
            Err(Error::Config(env.errors.join("; ")))
        }
    }

    /// Checks that everything `platform` needs is present.
    pub fn validate(&self, platform: Platform) -> Result<(), Error> {
        let mut problems = Vec::new();

        if self.provider.api_key.is_empty() {
            problems.push("OPENAI_API_KEY is required".to_string());
        }
        let budget = &self.generator.budget;
        if budget.min_tokens > budget.max_tokens {
            problems.push(format!(
                "MIN_TOKENS ({}) must not exceed MAX_TOKENS ({})",
                budget.min_tokens, budget.max_tokens
            ));
        }
        if self.generator.sanitizer.max_length == 0 {
            problems.push("MAX_MESSAGE_LENGTH must be positive".to_string());
        }

        match platform {
            Platform::TwitchIRC => {
                if self.twitch.username.is_empty() {
                    problems.push("TWITCH_USER is required for twitch".to_string());
                }
                if self.twitch.oauth_token.is_empty() {
                    problems.push("TWITCH_AUTH is required for twitch".to_string());
                } else if !self.twitch.oauth_token.starts_with("oauth:") {
                    problems.push("TWITCH_AUTH must start with 'oauth:'".to_string());
                }
                if self.twitch.channels.is_empty() {
                    problems.push("CHANNELS must list at least one channel".to_string());
                }
            }
            Platform::Telegram => {
                if self.telegram.bot_token.is_empty() {
                    problems.push("TELEGRAM_BOT_TOKEN is required for telegram".to_string());
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}

/// Lowercases and adds the leading `#` IRC expects.
pub fn normalize_channel(name: &str) -> String {
    let name = name.trim().to_lowercase();
    if name.starts_with('#') {
        name
    } else {
        format!("#{name}")
    }
}
