//! Getting (and staying) connected to a device.
//!
//! Both serial links go through the same cycle:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected -> ...
//!                     |
//!                     +-> Failed (attempt budget spent, terminal)
//! ```

use std::{fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::DeviceConfig,
    endpoint::{Connector, Device},
    error::Error,
};

/// Where a link is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkState {
    /// Not connected, but will try again.
    Disconnected,

    /// An attempt at opening the device is in progress.
    Connecting,

    /// The device is open.
    Connected,

    /// Gave up. Stays this way until the process restarts.
    Failed,
}

impl Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Bounded exponential backoff.
///
/// Each outage gets a fresh budget of `max_attempts` attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Wait after the first failed attempt.
    pub initial_delay_ms: u64,

    /// The wait doubles per failed attempt, up to this.
    pub max_delay_ms: u64,

    /// Attempts per outage before giving up for good.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// The waits between attempts, in order.
    /// There is one fewer than there are attempts.
    pub fn delays(&self) -> Backoff {
        Backoff {
            next: Duration::from_millis(self.initial_delay_ms),
            max: Duration::from_millis(self.max_delay_ms),
            remaining: self.max_attempts.saturating_sub(1),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.max_attempts == 0 {
            return Err(Error::BadConfig(
                "Reconnecting needs at least one attempt".into(),
            ));
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err(Error::BadConfig(format!(
                "The initial reconnect delay ({} ms) is larger than the maximum ({} ms)",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }

        Ok(())
    }
}

/// See [`ReconnectPolicy::delays`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    remaining: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let delay = self.next.min(self.max);
        self.next = delay.saturating_mul(2);

        Some(delay)
    }
}

/// Open the device, retrying according to the policy.
///
/// Publishes progress on `state`, but never [`LinkState::Connected`]:
/// the caller does that once the device is actually usable.
///
/// Returns `None` if the budget is spent (state is then [`LinkState::Failed`])
/// or if cancelled.
pub(crate) async fn connect(
    connector: &Connector,
    device: &DeviceConfig,
    policy: &ReconnectPolicy,
    state: &watch::Sender<LinkState>,
    shutdown: &CancellationToken,
) -> Option<Box<dyn Device>> {
    let mut delays = policy.delays();
    let mut attempt = 1;

    loop {
        state.send_replace(LinkState::Connecting);

        match connector.open(device) {
            Ok(opened) => {
                info!(%attempt, "Connected");

                if device.settle_ms > 0 {
                    debug!(settle_ms = device.settle_ms, "Letting the device settle");
                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(device.settle_time()) => {}
                    }
                }

                return Some(opened);
            }
            Err(e) => match delays.next() {
                Some(delay) => {
                    warn!(%attempt, ?delay, "Could not connect: {e}. Retrying");
                    state.send_replace(LinkState::Disconnected);

                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    error!(
                        %attempt,
                        "Could not connect: {e}. Giving up, no more attempts until restart"
                    );
                    state.send_replace(LinkState::Failed);
                    return None;
                }
            },
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::endpoint::{EndpointId, MockEndpoints};

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn delays_double_up_to_max() {
        let policy = ReconnectPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 500,
            max_attempts: 6,
        };

        let delays = policy.delays().collect::<Vec<_>>();

        assert_eq!(delays, vec![ms(100), ms(200), ms(400), ms(500), ms(500)]);
    }

    #[test]
    fn single_attempt_means_no_delays() {
        let policy = ReconnectPolicy {
            max_attempts: 1,
            ..Default::default()
        };

        assert_eq!(policy.delays().count(), 0);
    }

    #[test]
    fn zero_attempts_is_bad() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            ..Default::default()
        };

        assert!(policy.validate().is_err());
    }

    #[test]
    fn initial_larger_than_max_is_bad() {
        let policy = ReconnectPolicy {
            initial_delay_ms: 2,
            max_delay_ms: 1,
            max_attempts: 1,
        };

        let err = policy.validate().unwrap_err().try_into_bad_config().unwrap();
        assert!(err.contains("2 ms"));
    }

    fn fast(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay_ms: 1,
            max_delay_ms: 4,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn connects_after_refusals() {
        let mocks = MockEndpoints::default();
        mocks.refuse_next("flaky", 2);

        let connector = Connector::new(mocks.clone());
        let device = DeviceConfig::scanner(EndpointId::mock("flaky"));
        let (state, _) = watch::channel(LinkState::Disconnected);

        let opened =
            connect(&connector, &device, &fast(3), &state, &CancellationToken::new()).await;

        assert!(opened.is_some());
        assert_eq!(*state.borrow(), LinkState::Connecting);
        assert_eq!(mocks.times_opened("flaky"), 1);
    }

    #[tokio::test]
    async fn gives_up_when_budget_is_spent() {
        let mocks = MockEndpoints::default();
        mocks.refuse_next("flaky", 3);

        let connector = Connector::new(mocks.clone());
        let device = DeviceConfig::scanner(EndpointId::mock("flaky"));
        let (state, _) = watch::channel(LinkState::Disconnected);

        let opened =
            connect(&connector, &device, &fast(3), &state, &CancellationToken::new()).await;

        assert!(opened.is_none());
        assert_eq!(*state.borrow(), LinkState::Failed);
        assert_eq!(mocks.times_opened("flaky"), 0);
    }

    #[tokio::test]
    async fn cancel_stops_retrying() {
        let mocks = MockEndpoints::default();
        mocks.refuse_always("gone");

        let connector = Connector::new(mocks);
        let device = DeviceConfig::scanner(EndpointId::mock("gone"));
        let (state, _) = watch::channel(LinkState::Disconnected);
        let policy = ReconnectPolicy {
            initial_delay_ms: 60_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
        };

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let opened = connect(&connector, &device, &policy, &state, &shutdown).await;

        assert!(opened.is_none());
        assert_eq!(*state.borrow(), LinkState::Disconnected);
    }
}
