//! Tunables of an [`ObserverManager`](crate::ObserverManager).

use std::time::Duration;

/// Default method call timeout of the bus library.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(25);

pub const DEFAULT_DISPATCH_LANES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Number of sequential dispatch lanes. Events of one object always land
    /// on the same lane.
    pub dispatch_lanes: usize,
    /// Deadline for calls that do not name their own.
    pub call_timeout: Duration,
    /// Fetch properties of objects whose `Appeared` event carries none.
    pub fetch_missing_properties: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            dispatch_lanes: DEFAULT_DISPATCH_LANES,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            fetch_missing_properties: true,
        }
    }
}

impl ManagerConfig {
    /// Clamped to at least one lane.
    pub fn with_dispatch_lanes(mut self, lanes: usize) -> Self {
        self.dispatch_lanes = lanes.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_fetch_missing_properties(mut self, fetch: bool) -> Self {
        self.fetch_missing_properties = fetch;
        self
    }
}
