//! Fixed GATT identifiers and link timing configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// GATT service the peripheral exposes the text characteristic under.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef0);

/// The single write/notify characteristic all text moves through.
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xabcdef12_3456_7890_abcd_ef1234567890);

/// MTU requested once service discovery completes. Best-effort: a refusal
/// never fails the connection.
pub const REQUESTED_MTU: u16 = 517;

/// Timing knobs for the link's two suspending operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// How long a scan waits for a matching advertisement before failing.
    pub scan_timeout: Duration,
    /// Upper bound on a connect attempt. `None` waits indefinitely for the
    /// adapter to report connected or disconnected.
    pub connect_timeout: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
            connect_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scan_timeout_is_ten_seconds() {
        let config = LinkConfig::default();
        assert_eq!(config.scan_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_default_connect_timeout_is_bounded() {
        let config = LinkConfig::default();
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_gatt_identifiers() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "12345678-1234-5678-1234-56789abcdef0"
        );
        assert_eq!(
            CHARACTERISTIC_UUID.to_string(),
            "abcdef12-3456-7890-abcd-ef1234567890"
        );
        assert_eq!(REQUESTED_MTU, 517);
    }
}
