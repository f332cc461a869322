//! BLE Link module
//!
//! Everything the link needs to take a peripheral from "advertising
//! somewhere nearby" to "exchanging text":
//!
//! - **adapter**: the `RadioAdapter` boundary the platform BLE stack sits
//!   behind, plus the asynchronous events it pushes back
//! - **config**: the fixed GATT identifiers and the link's timing knobs
//! - **state**: the scan/connect lifecycle states
//! - **client**: the `BleLink` state machine itself
//!
//! The core logic here is testable without real BLE hardware.

pub mod adapter;
pub mod client;
pub mod config;
pub mod state;

#[cfg(test)]
pub(crate) mod fake;

pub use adapter::{ConnectionHandle, DeviceId, RadioAdapter, RadioError, RadioEvent};
pub use client::{BleLink, LinkError};
pub use config::{LinkConfig, CHARACTERISTIC_UUID, REQUESTED_MTU, SERVICE_UUID};
pub use state::LinkState;
