use std::{io, time::Duration};

use log::info;
use tokio::{net::TcpStream, time};

use super::retry::{Attempts, RetryPolicy};
use crate::error::TransportError;

/// Opens a TCP connection to the aggregator, retrying refused and timed out attempts.
///
/// # Arguments
/// * `addr` - The aggregator's `host:port`.
/// * `policy` - How many times and how often to retry.
/// * `attempt_timeout` - Upper bound on a single connection attempt.
///
/// # Errors
/// A `TransportError` once the attempts are exhausted or on a fatal error.
pub async fn connect(
    addr: &str,
    policy: &RetryPolicy,
    attempt_timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let mut attempts = Attempts::connecting(policy, "connect");

    loop {
        let res = match time::timeout(attempt_timeout, TcpStream::connect(addr)).await {
            Ok(res) => res,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connecting to {addr} took longer than {attempt_timeout:?}"),
            )),
        };

        match res {
            Ok(stream) => {
                info!(attempt = attempts.attempt(); "connected to aggregator at {addr}");
                return Ok(stream);
            }
            Err(e) => attempts.backoff(e).await?,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn connects_to_a_listener() -> io::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();

        let policy = policy(1);
        let (stream, accepted) = tokio::join!(
            connect(&addr, &policy, Duration::from_secs(5)),
            listener.accept()
        );

        assert!(stream.is_ok());
        assert!(accepted.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn refused_connections_exhaust_the_attempts() -> io::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        drop(listener);

        let err = connect(&addr, &policy(3), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert_eq!(err.op, "connect");
        assert_eq!(err.attempts, 3);
        assert_eq!(err.source.kind(), io::ErrorKind::ConnectionRefused);
        Ok(())
    }
}
