//! Error types for the facesynth-link crate.

use thiserror::Error;

use crate::ble::connection::ConnectionState;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No peripheral with this identity is registered.
    #[error("Peripheral not found: {identifier}")]
    PeripheralNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// The radio stack rejected a connection attempt.
    #[error("Connection to {identifier} failed: {reason}")]
    ConnectFailed {
        /// The peripheral that could not be connected.
        identifier: String,
        /// Description of why the connection failed.
        reason: String,
    },

    /// Service or characteristic discovery failed.
    #[error("Discovery on {identifier} failed: {reason}")]
    DiscoveryFailed {
        /// The peripheral being discovered.
        identifier: String,
        /// Description of why discovery failed.
        reason: String,
    },

    /// Enabling notifications on a characteristic failed.
    #[error("Subscription to {characteristic} on {identifier} failed: {reason}")]
    SubscriptionFailed {
        /// The peripheral owning the characteristic.
        identifier: String,
        /// The characteristic UUID.
        characteristic: String,
        /// Description of why the subscription failed.
        reason: String,
    },

    /// An inbound payload could not be decoded.
    #[error("Malformed frame: {context}")]
    MalformedFrame {
        /// Description of what was wrong with the payload.
        context: String,
    },

    /// An outbound write was not acknowledged.
    #[error("Write to {identifier} failed: {reason}")]
    WriteFailed {
        /// The peripheral the write was addressed to.
        identifier: String,
        /// Description of why the write failed.
        reason: String,
    },

    /// The peripheral went away without being asked to.
    #[error("Peripheral {identifier} disconnected unexpectedly")]
    UnexpectedDisconnect {
        /// The peripheral that disconnected.
        identifier: String,
    },

    /// A lifecycle callback arrived in a state that does not accept it.
    #[error("Invalid transition for {identifier}: {event} while {state}")]
    InvalidTransition {
        /// The peripheral the callback was for.
        identifier: String,
        /// The state the peripheral was in.
        state: ConnectionState,
        /// The callback that was received.
        event: &'static str,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MalformedFrame {
            context: "not hexadecimal: \"zz\"".to_string(),
        };
        assert_eq!(err.to_string(), "Malformed frame: not hexadecimal: \"zz\"");

        let err = Error::InvalidTransition {
            identifier: "AA:BB".to_string(),
            state: ConnectionState::Connected,
            event: "connected",
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for AA:BB: connected while Connected"
        );
    }
}
