//! Bounded polling.
//!
//! `poll_until` re-runs a check at a fixed interval until it reports
//! done, the timeout elapses, or the cancellation signal fires. The last
//! sleep is clipped to the deadline so the wait never overshoots it by
//! more than one check.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Interval and overall timeout of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Check(E),
}

/// Run `check` until it returns `Ok(true)`.
///
/// `cancel` is a shutdown flag; the poll stops with `Cancelled` as soon
/// as it reads `true`. A dropped sender is treated as "never cancelled".
pub async fn poll_until<F, Fut, E>(
    config: PollConfig,
    mut cancel: Option<watch::Receiver<bool>>,
    mut check: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let deadline = Instant::now() + config.timeout;
    let mut attempts: u32 = 0;

    loop {
        if cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(PollError::Cancelled);
        }

        attempts += 1;
        if check().await.map_err(PollError::Check)? {
            debug!(attempts, "poll condition met");
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            debug!(attempts, timeout = ?config.timeout, "poll timed out");
            return Err(PollError::TimedOut(config.timeout));
        }
        let wait = config.interval.min(deadline - now);

        let mut sender_gone = false;
        match cancel.as_mut() {
            Some(rx) => {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    changed = rx.changed() => {
                        if changed.is_err() {
                            sender_gone = true;
                        }
                    }
                }
            }
            None => tokio::time::sleep(wait).await,
        }
        if sender_gone {
            cancel = None;
        }
    }
}
