// File: src/ratelimit/circuit.rs

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open { .. } => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Stops calling the completion API after repeated failures.
///
/// Opens after `threshold` consecutive failures and rejects for `timeout`.
/// Half-open admits a single trial call; everything else is rejected until
/// the trial's success closes the circuit or its failure re-opens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failures: u32,
    trial_in_flight: bool,
    threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            trial_in_flight: false,
            threshold: threshold.max(1),
            timeout,
        }
    }

    pub fn allow_at(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Open { until } if now < until => false,
            CircuitState::Open { .. } => {
                info!("Circuit timeout elapsed, admitting a trial call");
                self.state = CircuitState::HalfOpen;
                self.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen if self.trial_in_flight => false,
            CircuitState::HalfOpen => {
                self.trial_in_flight = true;
                true
            }
            CircuitState::Closed => true,
        }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            info!("Circuit closed");
        }
        self.failures = 0;
        self.trial_in_flight = false;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        self.failures = self.failures.saturating_add(1);
        self.trial_in_flight = false;
        let trip = self.state == CircuitState::HalfOpen || self.failures >= self.threshold;
        if trip && !matches!(self.state, CircuitState::Open { .. }) {
            warn!("Circuit opened after {} consecutive failures", self.failures);
            self.state = CircuitState::Open { until: now + self.timeout };
        }
    }

    /// Gives back an admitted trial that never reached the API.
    pub fn release_trial(&mut self) {
        self.trial_in_flight = false;
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
