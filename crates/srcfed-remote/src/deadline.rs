//! Request deadlines
//!
//! A caller's timeout travels down every remote call as an absolute
//! [`Deadline`]; running out yields [`RemoteError::Timeout`].

use crate::error::RemoteError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Absolute deadline, or none
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    /// Deadline `timeout` from now
    #[inline]
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    /// Deadline at `instant`
    #[inline]
    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Time left, `None` if unbounded
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Output of `fut`, or `None` if the deadline passes first
    ///
    /// An already expired deadline returns `None` without polling `fut`.
    pub async fn limit<F: Future>(&self, fut: F) -> Option<F::Output> {
        match self.0 {
            None => Some(fut.await),
            Some(_) if self.is_expired() => None,
            Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        }
    }

    /// Run `fut` against the deadline
    ///
    /// An already expired deadline fails without polling `fut`.
    ///
    /// # Errors
    /// Returns [`RemoteError::Timeout`] if the deadline passes first, or the
    /// error of `fut`
    pub async fn run<T, F>(&self, remote: &str, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        self.limit(fut).await.unwrap_or_else(|| {
            Err(RemoteError::Timeout {
                remote: remote.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn no_deadline_runs_to_completion() {
        let out = Deadline::none().run("r", async { Ok::<_, RemoteError>(7) }).await;
        assert_eq!(out, Ok(7));
        assert_eq!(Deadline::none().remaining(), None);
    }

    #[tokio::test]
    async fn expired_deadline_skips_future() {
        let polled = AtomicBool::new(false);
        let deadline = Deadline::after(Duration::ZERO);
        let out = deadline
            .run("r", async {
                polled.store(true, Ordering::SeqCst);
                Ok::<_, RemoteError>(())
            })
            .await;
        assert_eq!(out, Err(RemoteError::Timeout { remote: "r".into() }));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn slow_future_times_out() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let out = deadline
            .run("peer", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, RemoteError>(())
            })
            .await;
        assert!(matches!(out, Err(RemoteError::Timeout { remote }) if remote == "peer"));
    }

    #[tokio::test]
    async fn inner_error_passes_through() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let out: Result<(), _> = deadline
            .run("r", async { Err(RemoteError::UnknownInstance("x".into())) })
            .await;
        assert_eq!(out, Err(RemoteError::UnknownInstance("x".into())));
    }

    #[tokio::test]
    async fn limit_reports_expiry_as_none() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let out = deadline
            .limit(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(out.is_none());
        assert_eq!(Deadline::none().limit(async { 3 }).await, Some(3));
    }
}
