pub mod circuit;
pub mod cooldown;
pub mod window;

use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub use circuit::{CircuitBreaker, CircuitState};
pub use cooldown::CooldownTracker;
pub use window::RateWindow;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub cooldown: Duration,
    pub window: Duration,
    pub max_calls_per_window: u32,
    /// Cap used while the API keeps failing.
    pub degraded_max_calls: u32,
    /// Cooldown records idle longer than `cooldown * purge_multiplier` are dropped.
    pub purge_multiplier: u32,
    pub circuit_threshold: u32,
    pub circuit_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(10),
            window: Duration::from_secs(60),
            max_calls_per_window: 50,
            degraded_max_calls: 30,
            purge_multiplier: 30,
            circuit_threshold: 5,
            circuit_timeout: Duration::from_secs(30),
        }
    }
}

/// Gates requests per user (cooldown) and globally (call window + circuit).
pub struct RateLimiter {
    cooldowns: CooldownTracker,
    window: Mutex<RateWindow>,
    circuit: Mutex<CircuitBreaker>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            cooldowns: CooldownTracker::new(config.cooldown),
            window: Mutex::new(RateWindow::new(
                config.window,
                config.max_calls_per_window,
                config.degraded_max_calls,
                Instant::now(),
            )),
            circuit: Mutex::new(CircuitBreaker::new(config.circuit_threshold, config.circuit_timeout)),
            config,
        }
    }

    pub fn check_cooldown(&self, user_key: &str) -> bool {
        self.check_cooldown_at(user_key, Instant::now())
    }

    pub fn check_cooldown_at(&self, user_key: &str, now: Instant) -> bool {
        self.cooldowns.check_at(user_key, now)
    }

    pub fn cooldown_remaining(&self, user_key: &str) -> Option<Duration> {
        self.cooldowns.remaining_at(user_key, Instant::now())
    }

    pub fn check_global_rate(&self) -> bool {
        self.check_global_rate_at(Instant::now())
    }

    pub fn check_global_rate_at(&self, now: Instant) -> bool {
        self.window.lock().check_at(now)
    }

    pub fn circuit_allows(&self) -> bool {
        self.circuit_allows_at(Instant::now())
    }

    pub fn circuit_allows_at(&self, now: Instant) -> bool {
        self.circuit.lock().allow_at(now)
    }

    /// Call when a request admitted by the circuit is dropped before calling the API.
    pub fn release_circuit_trial(&self) {
        self.circuit.lock().release_trial();
    }

    pub fn record_api_success(&self) {
        self.window.lock().record_success();
        self.circuit.lock().record_success();
    }

    pub fn record_api_failure(&self) {
        self.record_api_failure_at(Instant::now());
    }

    pub fn record_api_failure_at(&self, now: Instant) {
        self.window.lock().record_failure();
        self.circuit.lock().record_failure_at(now);
    }

    /// Drops cooldown records idle for more than `purge_multiplier` cooldowns.
    pub fn purge_stale_cooldowns(&self) -> usize {
        self.purge_stale_cooldowns_at(Instant::now())
    }

    pub fn purge_stale_cooldowns_at(&self, now: Instant) -> usize {
        self.cooldowns.purge_idle_at(now, self.idle_horizon())
    }

    /// How long a user may stay quiet before per-user records are forgotten.
    pub fn idle_horizon(&self) -> Duration {
        self.config.cooldown * self.config.purge_multiplier.max(1)
    }

    pub fn cooldown_entries(&self) -> usize {
        self.cooldowns.len()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.lock().state()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(config: RateLimitConfig) -> RateLimiter {
        RateLimiter::new(config)
    }

    #[test]
    fn test_cooldown_true_then_false_then_true() {
        let rl = limiter(RateLimitConfig {
            cooldown: Duration::from_secs(10),
            ..Default::default()
        });
        let t0 = Instant::now();
        assert!(rl.check_cooldown_at("twitch-irc:1", t0));
        assert!(!rl.check_cooldown_at("twitch-irc:1", t0));
        assert!(!rl.check_cooldown_at("twitch-irc:1", t0 + Duration::from_millis(9_999)));
        assert!(rl.check_cooldown_at("twitch-irc:1", t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_rejected_check_does_not_extend_cooldown() {
        let rl = limiter(RateLimitConfig {
            cooldown: Duration::from_secs(10),
            ..Default::default()
        });
        let t0 = Instant::now();
        assert!(rl.check_cooldown_at("u", t0));
        assert!(!rl.check_cooldown_at("u", t0 + Duration::from_secs(9)));
        // measured from t0, not from the rejected attempt
        assert!(rl.check_cooldown_at("u", t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_cooldown_is_per_user() {
        let rl = limiter(RateLimitConfig::default());
        let t0 = Instant::now();
        assert!(rl.check_cooldown_at("a", t0));
        assert!(rl.check_cooldown_at("b", t0));
        assert!(!rl.check_cooldown_at("a", t0));
    }

    #[test]
    fn test_purge_stale_cooldowns() {
        let rl = limiter(RateLimitConfig {
            cooldown: Duration::from_secs(10),
            purge_multiplier: 3,
            ..Default::default()
        });
        let t0 = Instant::now();
        rl.check_cooldown_at("old", t0);
        rl.check_cooldown_at("fresh", t0 + Duration::from_secs(25));

        assert_eq!(rl.purge_stale_cooldowns_at(t0 + Duration::from_secs(31)), 1);
        assert_eq!(rl.cooldown_entries(), 1);
    }

    #[test]
    fn test_window_caps_and_resets() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(60), 3, 2, t0);
        assert!(window.check_at(t0));
        assert!(window.check_at(t0));
        assert!(window.check_at(t0));
        assert!(!window.check_at(t0 + Duration::from_secs(59)));
        assert_eq!(window.call_count(), 3);

        assert!(window.check_at(t0 + Duration::from_secs(60)));
        assert_eq!(window.call_count(), 1);
        assert_eq!(window.window_reset_at(), t0 + Duration::from_secs(120));
    }

    #[test]
    fn test_window_degrades_after_error_streak() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(60), 5, 2, t0);
        for _ in 0..4 {
            window.record_failure();
        }
        assert_eq!(window.current_cap(), 2);
        assert!(window.check_at(t0));
        assert!(window.check_at(t0));
        assert!(!window.check_at(t0));

        window.record_success();
        assert_eq!(window.current_cap(), 5);
        assert!(window.check_at(t0));
    }

    #[test]
    fn test_circuit_opens_and_recovers() {
        let t0 = Instant::now();
        let mut circuit = CircuitBreaker::new(2, Duration::from_secs(30));
        assert!(circuit.allow_at(t0));

        circuit.record_failure_at(t0);
        assert_eq!(circuit.state(), CircuitState::Closed);
        circuit.record_failure_at(t0);
        assert!(matches!(circuit.state(), CircuitState::Open { .. }));
        assert!(!circuit.allow_at(t0 + Duration::from_secs(29)));

        assert!(circuit.allow_at(t0 + Duration::from_secs(30)));
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        // a failed trial re-opens immediately
        circuit.record_failure_at(t0 + Duration::from_secs(31));
        assert!(!circuit.allow_at(t0 + Duration::from_secs(32)));

        assert!(circuit.allow_at(t0 + Duration::from_secs(61)));
        circuit.record_success();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.failures(), 0);
    }

    #[test]
    fn test_half_open_admits_one_trial_at_a_time() {
        let t0 = Instant::now();
        let mut circuit = CircuitBreaker::new(1, Duration::from_secs(30));
        circuit.record_failure_at(t0);

        let after = t0 + Duration::from_secs(30);
        let admitted: Vec<bool> = (0..5).map(|_| circuit.allow_at(after)).collect();
        assert_eq!(admitted, vec![true, false, false, false, false]);
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        circuit.record_success();
        assert!(circuit.allow_at(after));
        assert!(circuit.allow_at(after));
    }

    #[test]
    fn test_limiter_rejects_burst_while_trial_pending() {
        let rl = limiter(RateLimitConfig {
            circuit_threshold: 1,
            circuit_timeout: Duration::from_secs(30),
            ..Default::default()
        });
        let t0 = Instant::now();
        rl.record_api_failure_at(t0);

        let after = t0 + Duration::from_secs(31);
        assert!(rl.circuit_allows_at(after));
        assert!(!rl.circuit_allows_at(after));

        // the failed trial re-opens for another full timeout
        rl.record_api_failure_at(after);
        assert!(!rl.circuit_allows_at(after + Duration::from_secs(29)));
        assert!(rl.circuit_allows_at(after + Duration::from_secs(30)));
    }

    #[test]
    fn test_released_trial_can_be_retaken() {
        let rl = limiter(RateLimitConfig {
            circuit_threshold: 1,
            ..Default::default()
        });
        let t0 = Instant::now();
        rl.record_api_failure_at(t0);

        let after = t0 + rl.config().circuit_timeout;
        assert!(rl.circuit_allows_at(after));
        rl.release_circuit_trial();
        assert!(rl.circuit_allows_at(after));
        assert!(!rl.circuit_allows_at(after));
    }
}
