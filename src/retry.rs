//! Bounded linear backoff shared by the storage layer and the delivery loop.

use backoff::backoff::Backoff;
use std::time::Duration;

/// SQLite primary result codes that signal lock contention.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Linear backoff: the n-th retry waits `base * n`; gives up after `max_attempts`
/// total attempts.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts: max_attempts.max(1),
            attempt: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Backoff for LinearBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            None
        } else {
            Some(self.base * self.attempt)
        }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Whether a storage error is worth another attempt.
///
/// Lock contention, I/O failures and pool exhaustion are transient. Constraint
/// violations, decode errors and everything else are permanent.
pub fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
            .unwrap_or(false),
        _ => false,
    }
}

/// Wrap a storage error for `backoff::future::retry`.
pub fn classify_sqlx(err: sqlx::Error) -> backoff::Error<sqlx::Error> {
    if is_transient_sqlx(&err) {
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_delays_then_gives_up() {
        let mut b = LinearBackoff::new(Duration::from_millis(100), 3);
        assert_eq!(b.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(b.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(b.next_backoff(), None);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut b = LinearBackoff::new(Duration::from_millis(10), 2);
        assert_eq!(b.next_backoff(), Some(Duration::from_millis(10)));
        assert_eq!(b.next_backoff(), None);
        b.reset();
        assert_eq!(b.next_backoff(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let mut b = LinearBackoff::new(Duration::from_millis(10), 0);
        assert_eq!(b.max_attempts(), 1);
        assert_eq!(b.next_backoff(), None);
    }

    #[test]
    fn test_sqlx_classification() {
        assert!(is_transient_sqlx(&sqlx::Error::PoolTimedOut));
        assert!(!is_transient_sqlx(&sqlx::Error::RowNotFound));
        assert!(!is_transient_sqlx(&sqlx::Error::ColumnNotFound(
            "x".to_string()
        )));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = AtomicU32::new(0);
        let result: Result<u32, sqlx::Error> = backoff::future::retry(
            LinearBackoff::new(Duration::from_millis(1), 3),
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(classify_sqlx(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(n)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_failure() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = AtomicU32::new(0);
        let result: Result<(), sqlx::Error> = backoff::future::retry(
            LinearBackoff::new(Duration::from_millis(1), 3),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(classify_sqlx(sqlx::Error::RowNotFound))
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
