//! Circuit breaker (C7) guarding the LLM client.
//!
//! Three states, matching the standard breaker pattern applied here to the
//! single in-process LLM client rather than a pool of remote hosts:
//! closed (requests pass through), open (requests are rejected until the
//! cooldown elapses), and half-open (a single trial request is allowed
//! through to probe recovery; success closes the breaker, failure reopens
//! it and restarts the cooldown).

use crate::error::CircuitError;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for State {
    fn from(value: u8) -> Self {
        match value {
            1 => State::Open,
            2 => State::HalfOpen,
            _ => State::Closed,
        }
    }
}

/// Tracks consecutive LLM failures and trips open after a configured
/// threshold, matching the retry/error classification the LLM client uses
/// to decide what counts as a breaker-relevant failure.
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
    cooldown: Duration,
    opened_at_millis: AtomicU64,
    half_open_trial_in_flight: std::sync::atomic::AtomicBool,
    epoch: Instant,
    epoch_unix_millis: u64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: AtomicU8::new(State::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            failure_threshold,
            cooldown,
            opened_at_millis: AtomicU64::new(0),
            half_open_trial_in_flight: std::sync::atomic::AtomicBool::new(false),
            epoch: Instant::now(),
            epoch_unix_millis: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    fn now_millis(&self) -> u64 {
        self.epoch_unix_millis + self.epoch.elapsed().as_millis() as u64
    }

    /// Checks whether a call may proceed, transitioning `Open -> HalfOpen`
    /// once the cooldown has elapsed. Returns [`CircuitError::Open`] if the
    /// breaker is open (cooldown not yet elapsed) or already running a
    /// half-open trial.
    pub fn check(&self) -> Result<(), CircuitError> {
        match State::from(self.state.load(Ordering::Acquire)) {
            State::Closed => Ok(()),
            State::HalfOpen => {
                if self
                    .half_open_trial_in_flight
                    .swap(true, Ordering::AcqRel)
                {
                    Err(CircuitError::Open)
                } else {
                    Ok(())
                }
            }
            State::Open => {
                let opened_at = self.opened_at_millis.load(Ordering::Acquire);
                if self.now_millis().saturating_sub(opened_at) >= self.cooldown.as_millis() as u64
                {
                    self.state.store(State::HalfOpen as u8, Ordering::Release);
                    self.half_open_trial_in_flight
                        .store(true, Ordering::Release);
                    Ok(())
                } else {
                    Err(CircuitError::Open)
                }
            }
        }
    }

    /// Records a successful call. Closes the breaker and resets the
    /// failure counter, whether the success came from `Closed` or from a
    /// half-open trial.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.state.store(State::Closed as u8, Ordering::Release);
        self.half_open_trial_in_flight
            .store(false, Ordering::Release);
    }

    /// Records a failed call. A failed half-open trial reopens the
    /// breaker immediately; a failure while closed trips the breaker once
    /// `failure_threshold` consecutive failures have accumulated.
    pub fn record_failure(&self) {
        let was_half_open =
            State::from(self.state.load(Ordering::Acquire)) == State::HalfOpen;
        self.half_open_trial_in_flight
            .store(false, Ordering::Release);

        if was_half_open {
            self.trip();
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.failure_threshold {
            self.trip();
        }
    }

    fn trip(&self) {
        self.opened_at_millis
            .store(self.now_millis(), Ordering::Release);
        self.state.store(State::Open as u8, Ordering::Release);
    }

    /// Current state name, for the `/metrics` circuit_state gauge (C11).
    pub fn state_label(&self) -> &'static str {
        match State::from(self.state.load(Ordering::Acquire)) {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half_open",
        }
    }
}
