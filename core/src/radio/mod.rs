//! Platform radio implementations.
//!
//! Only the btleplug-backed central is provided; it sits behind the
//! `btleplug` cargo feature so the state machine stays buildable on hosts
//! without a Bluetooth stack.

mod btleplug;

pub use self::btleplug::BtleplugRadio;
