//! Radio adapter boundary.
//!
//! The link drives an abstract BLE central through [`RadioAdapter`] and
//! consumes the asynchronous [`RadioEvent`]s it pushes back over an mpsc
//! channel. Platform stacks (btleplug, a scripted test double) live behind
//! this trait; the state machine never talks to hardware directly.
//!
//! Capability and permission checks happen exactly once here, via
//! [`RadioAdapter::is_available`] — the state machine never re-checks
//! permissions inline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Opaque identifier for an advertising peripheral, issued by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to one open GATT connection.
///
/// Issued by [`RadioAdapter::open_connection`] and owned exclusively by the
/// link; every path that leaves the connected states passes it back through
/// [`RadioAdapter::close_connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Errors surfaced by adapter implementations.
#[derive(Debug, Clone, Error)]
pub enum RadioError {
    #[error("radio unavailable or not permitted")]
    Unavailable,
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("gatt operation failed: {0}")]
    Gatt(String),
}

/// Asynchronous events pushed by the adapter to the link's event pump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RadioEvent {
    /// An advertisement passed the adapter's name filter.
    DeviceDiscovered {
        device: DeviceId,
        name: String,
        rssi: Option<i16>,
    },
    /// The peripheral accepted the connection.
    Connected { connection: ConnectionHandle },
    /// The peripheral rejected or dropped the connection.
    Disconnected { connection: ConnectionHandle },
    /// Service discovery finished successfully.
    ServicesDiscovered { connection: ConnectionHandle },
    /// Service discovery failed.
    ServiceDiscoveryFailed {
        connection: ConnectionHandle,
        reason: String,
    },
    /// A notification arrived on a characteristic.
    CharacteristicChanged {
        connection: ConnectionHandle,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// Platform BLE central abstraction.
///
/// Calls are submission-style: they resolve when the operation was handed
/// to the platform stack. Scan matches, connection state changes, discovery
/// results, and inbound notifications arrive later as [`RadioEvent`]s on
/// the channel handed to [`BleLink::new`](crate::BleLink::new).
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Pre-flight capability check: radio present and permitted.
    async fn is_available(&self) -> bool;

    /// Begin a scan filtered to peripherals advertising exactly `name`.
    async fn start_scan(&self, name: &str) -> Result<(), RadioError>;

    /// Stop an active scan. Safe to call when no scan is running.
    async fn stop_scan(&self) -> Result<(), RadioError>;

    /// Open a GATT connection to a previously discovered peripheral.
    async fn open_connection(&self, device: &DeviceId) -> Result<ConnectionHandle, RadioError>;

    /// Kick off service discovery; the outcome arrives as an event.
    async fn discover_services(&self, connection: ConnectionHandle) -> Result<(), RadioError>;

    /// Enable notifications on one characteristic of one service.
    async fn enable_notifications(
        &self,
        connection: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), RadioError>;

    /// Ask the peripheral for a larger MTU. Best-effort; callers ignore
    /// failures.
    async fn request_mtu(&self, connection: ConnectionHandle, mtu: u16) -> Result<(), RadioError>;

    /// Submit a write to one characteristic. Resolves on submission, not on
    /// end-to-end delivery.
    async fn write_characteristic(
        &self,
        connection: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), RadioError>;

    /// Release a connection. Idempotent.
    async fn close_connection(&self, connection: ConnectionHandle) -> Result<(), RadioError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        let device = DeviceId("aa:bb:cc:dd:ee:ff".to_string());
        assert_eq!(device.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_connection_handle_display() {
        assert_eq!(ConnectionHandle(7).to_string(), "conn#7");
    }

    #[test]
    fn test_radio_error_display() {
        assert_eq!(
            RadioError::Unavailable.to_string(),
            "radio unavailable or not permitted"
        );
        assert!(RadioError::Gatt("no such characteristic".to_string())
            .to_string()
            .contains("no such characteristic"));
    }

    #[test]
    fn test_radio_event_serialization() {
        let event = RadioEvent::CharacteristicChanged {
            connection: ConnectionHandle(1),
            characteristic: crate::link::config::CHARACTERISTIC_UUID,
            value: vec![0x48, 0x69],
        };
        let json = serde_json::to_string(&event).expect("serialize");
        let back: RadioEvent = serde_json::from_str(&json).expect("deserialize");
        match back {
            RadioEvent::CharacteristicChanged { value, .. } => assert_eq!(value, vec![0x48, 0x69]),
            _ => panic!("wrong event type after round trip"),
        }
    }
}
