//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy side of a session:
//! discovery, the per-peripheral connection lifecycle, characteristic
//! classification and the radio seam with its btleplug implementation.

pub mod characteristics;
pub mod connection;
pub mod platform;
pub mod radio;
pub mod scanner;
pub mod uuids;

pub use characteristics::{CharacteristicBinding, CharacteristicPurpose};
pub use connection::{ConnectionEvent, ConnectionState, ConnectionStateMachine};
pub use platform::BtleplugRadio;
pub use radio::{Outcome, RadioEvent, RadioStack};
pub use scanner::{DiscoveryController, ScanTicket, ScanTimer};
pub use uuids::*;
