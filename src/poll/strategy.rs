// src/poll/strategy.rs

use std::time::Duration;

/// Interval of the timer backend when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a [`super::ReadinessBridge`] learns that its socket should be re-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollStrategy {
  /// Watch the socket's readiness descriptor. Requires `MessageSocket::descriptor`.
  Descriptor,
  /// Re-check the socket every interval. Works for any socket at the cost of latency and CPU.
  Timer(Duration),
  /// `Descriptor` when the socket exposes one, otherwise `Timer(DEFAULT_POLL_INTERVAL)`.
  #[default]
  Auto,
}

/// Configuration for a [`super::ReadinessBridge`].
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
  pub strategy: PollStrategy,
}

impl BridgeConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_strategy(mut self, strategy: PollStrategy) -> Self {
    self.strategy = strategy;
    self
  }

  /// Shorthand for the timer backend with the given interval.
  pub fn with_poll_interval(self, interval: Duration) -> Self {
    self.with_strategy(PollStrategy::Timer(interval))
  }
}
