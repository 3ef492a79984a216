//! Bounded polling of transfer status.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::upstream::{TransferState, TransferStatus, UpstreamClient};

/// Fixed-interval poll schedule with an overall deadline.
///
/// Each [`tick`](Self::tick) sleeps one interval (shortened to fit the
/// deadline) and reports whether another probe is allowed.
#[derive(Debug)]
pub struct PollTimer<'a> {
    clock: &'a dyn Clock,
    interval: Duration,
    timeout: Duration,
    started: Duration,
}

impl<'a> PollTimer<'a> {
    /// Starts the timer now.
    #[must_use]
    pub fn start(clock: &'a dyn Clock, interval: Duration, timeout: Duration) -> Self {
        Self {
            clock,
            interval,
            timeout,
            started: clock.now(),
        }
    }

    /// Time since the timer started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.started)
    }

    /// Waits for the next probe; `false` once the deadline has passed.
    pub async fn tick(&mut self) -> bool {
        let elapsed = self.elapsed();
        if elapsed >= self.timeout {
            return false;
        }
        let wait = self.interval.min(self.timeout - elapsed);
        self.clock.sleep(wait).await;
        true
    }
}

/// How monitoring a transfer ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// The service reports completion.
    Succeeded(TransferStatus),
    /// The service reports a terminal failure.
    Failed(TransferState),
    /// The transfer sat in the remote queue longer than the grace window.
    Stalled {
        /// Time spent queued remotely.
        queued_for: Duration,
    },
    /// The deadline passed without a terminal state.
    TimedOut {
        /// Last state observed, if any.
        last_state: Option<TransferState>,
    },
}

/// Limits for [`monitor_transfer`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Time between status probes.
    pub poll_interval: Duration,
    /// Overall deadline.
    pub timeout: Duration,
    /// Longest tolerated wait in the remote queue.
    pub remote_queue_grace: Duration,
}

/// Polls a transfer until it finishes, stalls or the deadline passes.
///
/// A transfer missing from the queue and poll errors are logged and polled
/// again; only the deadline ends monitoring in those cases.
pub async fn monitor_transfer(
    client: &UpstreamClient,
    clock: &dyn Clock,
    transfer_id: &str,
    settings: MonitorSettings,
) -> TransferOutcome {
    let mut timer = PollTimer::start(clock, settings.poll_interval, settings.timeout);
    let mut last_state: Option<TransferState> = None;
    let mut queued_since: Option<Duration> = None;

    loop {
        match client.get_download_status(transfer_id).await {
            Ok(Some(status)) => {
                if last_state.as_ref() != Some(&status.state) {
                    info!(transfer_id, state = %status.state, "transfer state");
                }
                if status.state.is_success() {
                    return TransferOutcome::Succeeded(status);
                }
                if status.state.is_failure() {
                    return TransferOutcome::Failed(status.state);
                }

                if status.state == TransferState::QueuedRemote {
                    let since = *queued_since.get_or_insert(timer.elapsed());
                    let queued_for = timer.elapsed().saturating_sub(since);
                    if queued_for >= settings.remote_queue_grace {
                        return TransferOutcome::Stalled { queued_for };
                    }
                } else {
                    queued_since = None;
                }
                last_state = Some(status.state);
            }
            Ok(None) => debug!(transfer_id, "transfer not listed"),
            Err(error) => warn!(transfer_id, %error, "status poll failed"),
        }

        if !timer.tick().await {
            return TransferOutcome::TimedOut { last_state };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_poll_timer_is_bounded() {
        let clock = ManualClock::default();
        let mut timer = PollTimer::start(&clock, Duration::from_secs(5), Duration::from_secs(12));

        let mut ticks = 0;
        while timer.tick().await {
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(5),
                Duration::from_secs(2)
            ]
        );
    }

    #[tokio::test]
    async fn test_poll_timer_zero_timeout_never_sleeps() {
        let clock = ManualClock::default();
        let mut timer = PollTimer::start(&clock, Duration::from_secs(5), Duration::ZERO);
        assert!(!timer.tick().await);
        assert!(clock.sleeps().is_empty());
    }
}
