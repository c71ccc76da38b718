//! Retry policy for remote calls
//!
//! The policy is an explicit state machine: every failed call feeds a
//! [`Failure`] and the per-call [`RetryState`] into [`RetryPolicy::decide`],
//! which answers with how long to wait or why to give up. Waiting itself
//! goes through a [`Sleeper`], so tests never touch real time.

use crate::error::{FetchError, TransportError};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Role needed to query entities
const READER_ROLE: &str = "Storage Table Data Reader";

/// Default jitter fraction (±20%)
pub const DEFAULT_JITTER: f64 = 0.2;

/// Default cap on any single wait
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Granularity of cancellable sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// A failed remote call, before classification
#[derive(Debug, Clone)]
pub enum Failure {
    /// Non-2xx response
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },

    /// Network-level failure
    Transport(TransportError),
}

impl Failure {
    /// 429, 5xx and transport failures are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Failure::Status { status, .. } => *status == 429 || (500..600).contains(status),
            Failure::Transport(_) => true,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Failure::Status { retry_after, .. } => *retry_after,
            Failure::Transport(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Failure::Status { status, body, .. } => format!("HTTP {}: {}", status, snippet(body)),
            Failure::Transport(e) => e.to_string(),
        }
    }

    /// Terminal error for a failure the policy will not retry
    fn rejected(&self) -> FetchError {
        match self {
            Failure::Status { status, body, .. } if *status == 401 || *status == 403 => {
                FetchError::Rejected {
                    status: *status,
                    message: format!(
                        "{} - check the tenant and ensure the '{}' role is granted",
                        snippet(body),
                        READER_ROLE
                    ),
                }
            }
            Failure::Status { status, body, .. } => FetchError::Rejected {
                status: *status,
                message: snippet(body),
            },
            Failure::Transport(e) => FetchError::RetriesExhausted {
                attempts: 1,
                last: e.to_string(),
            },
        }
    }
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let body = body.trim();
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Per-call retry bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Retries scheduled so far
    pub retries: u32,

    /// Sum of all scheduled waits
    pub elapsed_backoff: Duration,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts made, including the one that just failed
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// What to do after a failed call
#[derive(Debug, Clone)]
pub enum RetryDecision {
    /// Wait this long, then call again
    Retry(Duration),

    /// Stop; this error is terminal for the call
    GiveUp(FetchError),
}

/// Exponential backoff with jitter and Retry-After support
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff: DEFAULT_MAX_BACKOFF,
            jitter: DEFAULT_JITTER,
        }
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Jitter fraction, clamped to [0, 1]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Un-jittered delay before retry number `retry` (1-based)
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Delay before retry number `retry`, with jitter applied
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter <= 0.0 {
            return base;
        }

        let factor = 1.0 + rand::rng().random_range(-self.jitter..=self.jitter);
        base.mul_f64(factor).min(self.max_backoff)
    }

    /// Classify a failure and advance the state
    pub fn decide(&self, state: &mut RetryState, failure: &Failure) -> RetryDecision {
        if !failure.is_transient() {
            return RetryDecision::GiveUp(failure.rejected());
        }

        if state.retries >= self.max_retries {
            return RetryDecision::GiveUp(FetchError::RetriesExhausted {
                attempts: state.attempts(),
                last: failure.describe(),
            });
        }

        state.retries += 1;
        let wait = match failure.retry_after() {
            Some(hint) => hint.min(self.max_backoff),
            None => self.delay(state.retries),
        };
        state.elapsed_backoff += wait;

        RetryDecision::Retry(wait)
    }
}

/// Blocking wait used between retries
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`; returns false if the wait was cut short by cancellation
    fn sleep(&self, duration: Duration) -> bool;
}

/// Real-time sleeper that wakes early when the run is cancelled
pub struct ShutdownAwareSleeper {
    shutdown: Arc<AtomicBool>,
}

impl ShutdownAwareSleeper {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self { shutdown }
    }
}

impl Sleeper for ShutdownAwareSleeper {
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> Failure {
        Failure::Status {
            status: code,
            retry_after: None,
            body: String::new(),
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(100))
            .with_max_backoff(Duration::from_secs(1))
            .with_jitter(0.0)
    }

    #[test]
    fn test_transient_classification() {
        assert!(status(429).is_transient());
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(Failure::Transport(TransportError::Timeout).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(403).is_transient());
        assert!(!status(404).is_transient());
    }

    #[test]
    fn test_permanent_4xx_gives_up_immediately() {
        let mut state = RetryState::new();
        match policy(5).decide(&mut state, &status(404)) {
            RetryDecision::GiveUp(FetchError::Rejected { status, .. }) => assert_eq!(status, 404),
            other => panic!("unexpected decision: {:?}", other),
        }
        assert_eq!(state.retries, 0);
    }

    #[test]
    fn test_auth_rejection_carries_hint() {
        let mut state = RetryState::new();
        match policy(5).decide(&mut state, &status(403)) {
            RetryDecision::GiveUp(FetchError::Rejected { message, .. }) => {
                assert!(message.contains("Storage Table Data Reader"))
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_exhaustion_after_max_retries() {
        let policy = policy(3);
        let mut state = RetryState::new();

        for _ in 0..3 {
            assert!(matches!(
                policy.decide(&mut state, &status(503)),
                RetryDecision::Retry(_)
            ));
        }

        match policy.decide(&mut state, &status(503)) {
            RetryDecision::GiveUp(FetchError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(last.contains("503"));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_zero_retries_fails_first_transient() {
        let mut state = RetryState::new();
        assert!(matches!(
            policy(0).decide(&mut state, &status(500)),
            RetryDecision::GiveUp(FetchError::RetriesExhausted { attempts: 1, .. })
        ));
    }

    #[test]
    fn test_base_delay_monotonic_and_capped() {
        let policy = policy(20);
        let mut previous = Duration::ZERO;
        for retry in 1..=40 {
            let delay = policy.base_delay(retry);
            assert!(delay >= previous, "retry {} decreased", retry);
            assert!(delay <= policy.max_backoff);
            previous = delay;
        }
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay(10), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::new(10, Duration::from_millis(1000))
            .with_max_backoff(Duration::from_secs(3))
            .with_jitter(0.2);

        for _ in 0..200 {
            let d = policy.delay(1);
            assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1200));

            // Near the cap jitter never pushes past it
            let d = policy.delay(3);
            assert!(d <= Duration::from_secs(3));
        }
    }

    #[test]
    fn test_retry_after_takes_precedence() {
        let mut state = RetryState::new();
        let failure = Failure::Status {
            status: 429,
            retry_after: Some(Duration::from_millis(700)),
            body: String::new(),
        };
        match policy(5).decide(&mut state, &failure) {
            RetryDecision::Retry(wait) => assert_eq!(wait, Duration::from_millis(700)),
            other => panic!("unexpected decision: {:?}", other),
        }

        let huge = Failure::Status {
            status: 503,
            retry_after: Some(Duration::from_secs(3600)),
            body: String::new(),
        };
        match policy(5).decide(&mut state, &huge) {
            RetryDecision::Retry(wait) => assert_eq!(wait, Duration::from_secs(1)),
            other => panic!("unexpected decision: {:?}", other),
        }
        assert_eq!(state.retries, 2);
        assert_eq!(state.elapsed_backoff, Duration::from_millis(1700));
    }

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        let body = "é".repeat(300);
        let s = snippet(&body);
        assert!(s.ends_with("..."));
        assert!(s.len() <= 203);
    }

    #[test]
    fn test_shutdown_sleeper_wakes_early() {
        let shutdown = Arc::new(AtomicBool::new(true));
        let sleeper = ShutdownAwareSleeper::new(shutdown);
        let start = Instant::now();
        assert!(!sleeper.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
