// bletext-core — BLE text link
//
// Central-role client for a single peripheral: discover it by advertised
// name, connect, enable notifications on one fixed GATT characteristic,
// and exchange UTF-8 text. The platform radio sits behind the
// `RadioAdapter` trait, so the state machine runs identically against a
// native stack or a scripted test double.

pub mod link;

#[cfg(feature = "btleplug")]
pub mod radio;

pub use link::adapter::{ConnectionHandle, DeviceId, RadioAdapter, RadioError, RadioEvent};
pub use link::client::{BleLink, LinkError};
pub use link::config::{LinkConfig, CHARACTERISTIC_UUID, REQUESTED_MTU, SERVICE_UUID};
pub use link::state::LinkState;

#[cfg(feature = "btleplug")]
pub use radio::BtleplugRadio;
