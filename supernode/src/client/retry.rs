use std::{io, time::Duration};

use log::warn;

use crate::error::TransportError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Bounded exponential backoff for transient network failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per operation, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// The delay to wait after the failed attempt number `attempt` (starting at 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);

        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Returns `true` if `err` is worth another attempt.
///
/// A refused connection is only transient while connecting, once a session
/// exists every closed, reset or refused stream is fatal.
pub fn is_retryable(err: &io::Error, connecting: bool) -> bool {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => true,
        io::ErrorKind::ConnectionRefused => connecting,
        _ => false,
    }
}

/// Attempt bookkeeping for a single retried operation.
pub struct Attempts<'a> {
    policy: &'a RetryPolicy,
    op: &'static str,
    connecting: bool,
    attempt: u32,
}

impl<'a> Attempts<'a> {
    /// Tracks the attempts of `op` over an established session.
    pub fn new(policy: &'a RetryPolicy, op: &'static str) -> Self {
        Self {
            policy,
            op,
            connecting: false,
            attempt: 1,
        }
    }

    /// Tracks the attempts of establishing a connection.
    pub fn connecting(policy: &'a RetryPolicy, op: &'static str) -> Self {
        Self {
            connecting: true,
            ..Self::new(policy, op)
        }
    }

    /// The number of the attempt in flight.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Waits out the backoff after a failed attempt.
    ///
    /// # Returns
    /// `Ok(())` if the caller should try again, or the final `TransportError`
    /// if `err` is fatal or the attempts are exhausted.
    pub async fn backoff(&mut self, err: io::Error) -> Result<(), TransportError> {
        if !is_retryable(&err, self.connecting) || self.attempt >= self.policy.max_attempts {
            return Err(TransportError {
                op: self.op,
                attempts: self.attempt,
                source: err,
            });
        }

        let delay = self.policy.backoff(self.attempt);
        warn!(
            op = self.op,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64;
            "transient failure, retrying: {err}"
        );

        tokio::time::sleep(delay).await;
        self.attempt += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
        };

        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(5), Duration::from_millis(1000));
        assert_eq!(p.backoff(64), Duration::from_millis(1000));
    }

    #[test]
    fn classification() {
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);

        assert!(is_retryable(&timed_out, false));
        assert!(is_retryable(&refused, true));
        assert!(!is_retryable(&refused, false));
        assert!(!is_retryable(&eof, false));
        assert!(!is_retryable(&reset, true));
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let p = policy(3);
        let mut attempts = Attempts::new(&p, "test");

        assert!(attempts.backoff(io::ErrorKind::TimedOut.into()).await.is_ok());
        assert!(attempts.backoff(io::ErrorKind::TimedOut.into()).await.is_ok());

        let err = attempts
            .backoff(io::ErrorKind::TimedOut.into())
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.op, "test");
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let p = policy(5);
        let mut attempts = Attempts::new(&p, "test");

        let err = attempts
            .backoff(io::ErrorKind::BrokenPipe.into())
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(err.source.kind(), io::ErrorKind::BrokenPipe);
    }
}
