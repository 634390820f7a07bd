//! In-process token-bucket rate limiter (C6) guarding LLM calls.
//!
//! Two independent buckets: a requests/minute bucket, always active, and
//! an optional tokens/minute bucket when the deployment configures a
//! token budget. Both refill continuously rather than in discrete ticks,
//! so `try_acquire` never has to wait for a fixed-interval reset.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct Bucket {
    capacity: f64,
    refill_per_secs: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64) -> Self {
        Self {
            capacity,
            refill_per_secs: capacity / 60.0,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_secs).min(self.capacity);
        self.last_refill = now;
    }

    /// Attempts to take `cost` units. Returns the seconds to wait if
    /// insufficient tokens are currently available.
    fn try_take(&mut self, cost: f64, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            Ok(())
        } else {
            let deficit = cost - self.tokens;
            let wait_secs = deficit / self.refill_per_secs;
            Err(Duration::from_secs_f64(wait_secs.max(0.0)))
        }
    }

    /// Debits `amount` units without requiring availability, letting the
    /// balance go negative. Used to charge actual post-hoc usage the
    /// caller couldn't have known in advance; a subsequent `try_take`
    /// simply waits longer for the balance to refill back above zero.
    fn debit(&mut self, amount: f64, now: Instant) {
        self.refill(now);
        self.tokens -= amount;
    }
}

/// Guards LLM request volume against the configured requests/min and,
/// optionally, tokens/min budgets.
pub struct RateLimiter {
    requests: Mutex<Bucket>,
    tokens: Option<Mutex<Bucket>>,
}

impl RateLimiter {
    /// Builds a limiter from requests/min and an optional tokens/min cap
    ///.
    pub fn new(requests_per_minute: u32, tokens_per_minute: Option<u32>) -> Self {
        Self {
            requests: Mutex::new(Bucket::new(requests_per_minute as f64)),
            tokens: tokens_per_minute.map(|tpm| Mutex::new(Bucket::new(tpm as f64))),
        }
    }

    /// Attempts to reserve one request slot. The token bucket, when
    /// configured, is consulted but not charged here — its actual cost
    /// isn't known until the LLM reports usage (see [`Self::record_usage`]);
    /// this only blocks a new call while a prior call's post-hoc debit has
    /// driven the balance negative. Returns the caller's required wait if
    /// either bucket is unavailable.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut request_guard = self.requests.lock().expect("rate limiter mutex poisoned");
        request_guard.try_take(1.0, now)?;

        if let Some(token_bucket) = &self.tokens {
            let mut token_guard = token_bucket.lock().expect("rate limiter mutex poisoned");
            if let Err(wait) = token_guard.try_take(0.0, now) {
                // Refund the request-bucket reservation since the call won't proceed.
                request_guard.tokens = (request_guard.tokens + 1.0).min(request_guard.capacity);
                return Err(wait);
            }
        }

        Ok(())
    }

    /// Blocks until a request slot (and, if a tokens/min budget is
    /// configured, a non-negative token balance) is available, retrying
    /// `try_acquire` after the reported wait each time capacity is
    /// exhausted. Returns `Err(())` if `cancel` fires first, letting
    /// shutdown interrupt a waiting analyzer instead of stalling the
    /// drain deadline.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ()> {
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(()),
                        () = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
                    }
                }
            }
        }
    }

    /// Charges the tokens/min bucket with the actual usage a completed
    /// LLM call reported. A no-op when no tokens/min budget is
    /// configured. May drive the balance negative; the next `acquire`
    /// then waits for it to refill back above zero (spec §4.6).
    pub fn record_usage(&self, actual_tokens: u64) {
        if let Some(token_bucket) = &self.tokens {
            let mut guard = token_bucket.lock().expect("rate limiter mutex poisoned");
            guard.debit(actual_tokens as f64, Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_freely_under_budget() {
        let limiter = RateLimiter::new(60, None);
        assert!(limiter.try_acquire().is_ok());
    }

    #[test]
    fn request_bucket_exhausts_and_refuses() {
        let limiter = RateLimiter::new(1, None);
        assert!(limiter.try_acquire().is_ok());
        let result = limiter.try_acquire();
        assert!(result.is_err(), "second request should exceed 1 rpm budget");
    }

    #[test]
    fn token_bucket_post_hoc_debit_blocks_next_acquire() {
        let limiter = RateLimiter::new(60, Some(100));
        assert!(limiter.try_acquire().is_ok());
        // Usage reported after the call drives the token balance negative.
        limiter.record_usage(500);
        let result = limiter.try_acquire();
        assert!(result.is_err(), "negative token balance should block the next acquire");
    }

    #[test]
    fn token_bucket_no_op_when_unconfigured() {
        let limiter = RateLimiter::new(60, None);
        limiter.record_usage(1_000_000);
        assert!(limiter.try_acquire().is_ok(), "no tpm budget means usage is never charged");
    }

    #[tokio::test]
    async fn acquire_returns_immediately_when_capacity_available() {
        let limiter = RateLimiter::new(60, None);
        let cancel = CancellationToken::new();
        assert!(limiter.acquire(&cancel).await.is_ok());
    }

    #[tokio::test]
    async fn acquire_is_interrupted_by_cancellation() {
        let limiter = RateLimiter::new(1, None);
        limiter.try_acquire().expect("exhaust the bucket");

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(limiter.acquire(&cancel).await.is_err());
    }
}
