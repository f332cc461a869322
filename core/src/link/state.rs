//! Link lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the link is in its scan/connect cycle.
///
/// `Ready` is the only state in which text moves; `Disconnected` and
/// `Failed` end a cycle, and a fresh scan starts the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// Nothing in flight, no device recorded.
    Idle,
    /// Filtered scan running, waiting for a matching advertisement.
    Scanning,
    /// A matching peripheral was recorded; scan stopped.
    DeviceFound,
    /// GATT connection opened, waiting for the adapter to confirm.
    Connecting,
    /// Connected, waiting for the service discovery result.
    ServiceDiscovery,
    /// Notifications enabled; `send` and inbound dispatch are live.
    Ready,
    /// Torn down by `disconnect`, or the peripheral dropped us.
    Disconnected,
    /// The last scan or connect attempt failed.
    Failed,
}

impl LinkState {
    /// States a fresh `start_scan` may be issued from.
    pub fn can_start_scan(self) -> bool {
        matches!(
            self,
            LinkState::Idle | LinkState::Disconnected | LinkState::Failed
        )
    }

    /// States `connect` may be issued from: a freshly found device, or a
    /// retry after a failed attempt.
    pub fn can_connect(self) -> bool {
        matches!(self, LinkState::DeviceFound | LinkState::Failed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Idle => "idle",
            LinkState::Scanning => "scanning",
            LinkState::DeviceFound => "device found",
            LinkState::Connecting => "connecting",
            LinkState::ServiceDiscovery => "service discovery",
            LinkState::Ready => "ready",
            LinkState::Disconnected => "disconnected",
            LinkState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}
