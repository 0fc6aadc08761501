//! Heartbeat delivery with bounded retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, warn};

use super::transport::HeartbeatTransport;
use crate::domain::HealthState;

/// Default number of attempts per heartbeat.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default fixed delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Retry settings for heartbeat delivery.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Total attempts per heartbeat, including the first one.
    pub max_retries: u32,
    /// Delay between a network failure and the next attempt.
    pub retry_delay: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// How a single heartbeat ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The endpoint answered with a 2xx status.
    Delivered { status: u16, attempts: u32 },
    /// The endpoint answered with a non-2xx status. Not retried.
    Rejected { status: u16, attempts: u32 },
    /// Every attempt failed at the network level.
    GaveUp { attempts: u32 },
}

/// Sends heartbeats, retrying network failures with a fixed backoff.
///
/// Failures never reach the caller: every call ends in exactly one
/// [`NotifyOutcome`], which callers are free to ignore.
pub struct RetryingNotifier<T: HeartbeatTransport> {
    transport: Arc<T>,
    config: NotifierConfig,
}

impl<T: HeartbeatTransport> RetryingNotifier<T> {
    pub fn new(transport: Arc<T>, config: NotifierConfig) -> Self {
        Self { transport, config }
    }

    /// Announce `state` for the container whose heartbeat URL is `base_url`.
    pub async fn notify(&self, base_url: &str, state: HealthState) -> NotifyOutcome {
        let url = state.heartbeat_url(base_url);
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 1;

        loop {
            match self.transport.get(&url).await {
                Ok(status) if (200..300).contains(&status) => {
                    debug!(url = %url, %state, status, "Heartbeat delivered");
                    return NotifyOutcome::Delivered {
                        status,
                        attempts: attempt,
                    };
                }
                Ok(status) => {
                    warn!(url = %url, %state, status, "Heartbeat rejected by endpoint");
                    return NotifyOutcome::Rejected {
                        status,
                        attempts: attempt,
                    };
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        url = %url,
                        %state,
                        error = %e,
                        "Could not send heartbeat, trying again ({}/{})",
                        attempt,
                        max_attempts
                    );
                    sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        url = %url,
                        %state,
                        error = %e,
                        "Could not send heartbeat, giving up ({}/{})",
                        attempt,
                        max_attempts
                    );
                    return NotifyOutcome::GaveUp { attempts: attempt };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, TransportReply};

    fn notifier(transport: Arc<RecordingTransport>, max_retries: u32) -> RetryingNotifier<RecordingTransport> {
        RetryingNotifier::new(
            transport,
            NotifierConfig {
                max_retries,
                retry_delay: Duration::from_secs(2),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let transport = Arc::new(RecordingTransport::always(TransportReply::Refused));
        let notifier = notifier(transport.clone(), 3);

        let start = tokio::time::Instant::now();
        let outcome = notifier
            .notify("https://hc-ping.com/abc", HealthState::Healthy)
            .await;

        assert_eq!(outcome, NotifyOutcome::GaveUp { attempts: 3 });
        assert_eq!(transport.request_count(), 3);
        // Two backoffs between three attempts.
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_separated_by_backoff() {
        let transport = Arc::new(RecordingTransport::always(TransportReply::Refused));
        let notifier = notifier(transport.clone(), 3);

        notifier
            .notify("https://hc-ping.com/abc", HealthState::Healthy)
            .await;

        let times = transport.request_times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(2));
        assert_eq!(times[2] - times[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_success_status_is_not_retried() {
        let transport = Arc::new(RecordingTransport::always(TransportReply::Status(500)));
        let notifier = notifier(transport.clone(), 3);

        let outcome = notifier
            .notify("https://hc-ping.com/abc", HealthState::Starting)
            .await;

        assert_eq!(
            outcome,
            NotifyOutcome::Rejected {
                status: 500,
                attempts: 1
            }
        );
        assert_eq!(transport.urls(), vec!["https://hc-ping.com/abc/start"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_network_failure() {
        let transport = Arc::new(RecordingTransport::scripted(
            vec![TransportReply::Refused],
            TransportReply::Status(200),
        ));
        let notifier = notifier(transport.clone(), 3);

        let outcome = notifier
            .notify("https://hc-ping.com/abc", HealthState::Unhealthy)
            .await;

        assert_eq!(
            outcome,
            NotifyOutcome::Delivered {
                status: 200,
                attempts: 2
            }
        );
        assert_eq!(
            transport.urls(),
            vec!["https://hc-ping.com/abc/fail", "https://hc-ping.com/abc/fail"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_sends_once() {
        let transport = Arc::new(RecordingTransport::always(TransportReply::Refused));
        let notifier = notifier(transport.clone(), 0);

        let outcome = notifier
            .notify("https://hc-ping.com/abc", HealthState::Healthy)
            .await;

        assert_eq!(outcome, NotifyOutcome::GaveUp { attempts: 1 });
        assert_eq!(transport.request_count(), 1);
    }
}
