//! Readiness polling.
//!
//! Unique responsibility: wait, without busy-spinning, until a remote
//! resource reaches a terminal state or a deadline elapses.
//!
//! The loop is a small bounded state machine:
//! 1) run the injected read function,
//! 2) classify the observation as [`PollOutcome::Ready`], [`PollOutcome::Failed`]
//!    or [`PollOutcome::Pending`],
//! 3) stop on a terminal outcome, otherwise check the deadline and sleep,
//!    never past the deadline.
//!
//! Time comes from `tokio::time`, so tests drive it with a paused clock.

use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::hostman_error::{ReconcileError, Result};

/// Interval and deadline of a polling loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep between two reads.
    pub interval: Duration,
    /// Maximum total wait.
    pub timeout: Duration,
}

impl PollConfig {
    /// Build from milliseconds, as read from the environment.
    #[must_use]
    pub const fn from_millis(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

/// Result of one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// Terminal success; carries the observed value.
    Ready(T),
    /// Terminal failure; carries the observed status.
    Failed(String),
    /// Not terminal yet; carries the observed status for logging.
    Pending(Option<String>),
}

/// Success and failure vocabulary of a status field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadinessStates {
    /// Statuses meaning "ready".
    pub success: Vec<String>,
    /// Statuses meaning "will never become ready".
    pub failure: Vec<String>,
}

impl ReadinessStates {
    /// Build from string slices.
    #[must_use]
    pub fn new(success: &[&str], failure: &[&str]) -> Self {
        Self {
            success: success.iter().map(|s| (*s).to_string()).collect(),
            failure: failure.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Classify an observed status (case-insensitive).
    #[must_use]
    pub fn classify<T>(&self, status: Option<&str>, value: T) -> PollOutcome<T> {
        let Some(status) = status else {
            return PollOutcome::Pending(None);
        };
        if self.success.iter().any(|s| s.eq_ignore_ascii_case(status)) {
            PollOutcome::Ready(value)
        } else if self.failure.iter().any(|s| s.eq_ignore_ascii_case(status)) {
            PollOutcome::Failed(status.to_string())
        } else {
            PollOutcome::Pending(Some(status.to_string()))
        }
    }
}

/// What counts as confirmation that a deleted resource is gone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GoneCriterion {
    /// Any read error confirms deletion; non-404 errors are logged.
    #[default]
    AnyError,
    /// Only a 404 confirms deletion; other errors abort the wait.
    NotFound,
}

/// Run `observe` until it reports a terminal outcome or the deadline passes.
///
/// `what` names the awaited condition in logs and in the timeout error;
/// `resource` and `id` label a `ReadinessFailed` error. The last sleep is
/// shortened so the final read happens at the deadline.
///
/// # Errors
///
/// - any error returned by `observe`,
/// - `ReadinessFailed` on a failure outcome (no further reads),
/// - `Timeout` once `cfg.timeout` has elapsed without a terminal outcome,
///   including a success first observed at the deadline.
pub async fn poll_until<T, F, Fut>(
    resource: &'static str,
    id: &str,
    what: &str,
    cfg: PollConfig,
    mut observe: F,
) -> Result<T>
where
    T: Send,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<PollOutcome<T>>> + Send,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;
    let timed_out = || ReconcileError::Timeout {
        what: format!("{what} ({resource} {id})"),
        waited: cfg.timeout,
    };

    loop {
        attempt = attempt.saturating_add(1);

        match observe().await? {
            // A later read that only lands at the deadline does not count.
            PollOutcome::Ready(_) if attempt > 1 && started.elapsed() >= cfg.timeout => {
                return Err(timed_out());
            }
            PollOutcome::Ready(value) => {
                debug!(resource, id, attempt, "{what}: ready");
                return Ok(value);
            }
            PollOutcome::Failed(status) => {
                return Err(ReconcileError::ReadinessFailed {
                    resource,
                    id: id.to_string(),
                    status,
                });
            }
            PollOutcome::Pending(status) => {
                debug!(resource, id, attempt, status = status.as_deref(), "{what}: pending");
            }
        }

        let remaining = cfg.timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(timed_out());
        }

        tokio::time::sleep(cfg.interval.min(remaining)).await;
    }
}

/// Wait until `read` yields a status in `states.success`.
///
/// # Errors
///
/// See [`poll_until`].
pub async fn wait_until_ready<T, F, Fut, S>(
    resource: &'static str,
    id: &str,
    states: &ReadinessStates,
    cfg: PollConfig,
    mut read: F,
    status_of: S,
) -> Result<T>
where
    T: Send,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
    S: Fn(&T) -> Option<String> + Sync,
{
    let status_of = &status_of;
    poll_until(resource, id, "readiness", cfg, move || {
        let fut = read();
        async move {
            let observed = fut.await?;
            let status = status_of(&observed);
            Ok::<_, ReconcileError>(states.classify(status.as_deref(), observed))
        }
    })
    .await
}

/// Wait until `read` fails, meaning the resource is gone.
///
/// # Errors
///
/// See [`poll_until`]; with [`GoneCriterion::NotFound`] a non-404 read error
/// is returned as is.
pub async fn wait_until_gone<T, F, Fut>(
    resource: &'static str,
    id: &str,
    criterion: GoneCriterion,
    cfg: PollConfig,
    mut read: F,
) -> Result<()>
where
    T: Send,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
{
    poll_until(resource, id, "deletion", cfg, move || {
        let fut = read();
        async move {
            match fut.await {
                Ok(_) => Ok(PollOutcome::Pending(None)),
                Err(e) if e.is_not_found() => Ok(PollOutcome::Ready(())),
                Err(e) => match criterion {
                    GoneCriterion::AnyError => {
                        // Not a confirmed 404: may also be a transient failure.
                        warn!(resource, id, error = %e, "read failed after delete, assuming resource is gone");
                        Ok(PollOutcome::Ready(()))
                    }
                    GoneCriterion::NotFound => Err(e),
                },
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_is_case_insensitive_and_tolerates_missing_status() {
        let states = ReadinessStates::new(&["ready", "running"], &["error"]);
        assert_eq!(states.classify(Some("READY"), 1), PollOutcome::Ready(1));
        assert_eq!(states.classify(Some("error"), 1), PollOutcome::Failed("error".into()));
        assert_eq!(
            states.classify(Some("provisioning"), 1),
            PollOutcome::Pending(Some("provisioning".into()))
        );
        assert_eq!(states.classify(None, 1), PollOutcome::Pending(None));
    }
}
