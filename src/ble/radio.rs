//! The seam between the session logic and the Bluetooth stack.
//!
//! Requests go out through [`RadioStack`]; every method returns
//! immediately and its completion comes back later as a [`RadioEvent`] on
//! the session's event channel. Events are consumed one at a time, in
//! delivery order.

use bytes::Bytes;
use uuid::Uuid;

use crate::registry::PeripheralId;

/// Completion result carried by a [`RadioEvent`]; the error is the stack's
/// description of the failure.
pub type Outcome<T> = std::result::Result<T, String>;

/// Fire-and-forget requests to the underlying Bluetooth stack.
#[cfg_attr(test, mockall::automock)]
pub trait RadioStack: Send + Sync {
    /// Start listening for advertisements, optionally filtered to a service.
    fn start_scan(&self, service: Option<Uuid>);

    /// Stop listening for advertisements.
    fn stop_scan(&self);

    /// Request a connection. Completes with [`RadioEvent::Connected`] or
    /// [`RadioEvent::ConnectFailed`].
    fn connect(&self, peripheral: &PeripheralId);

    /// Tear down a connection or a pending connection attempt.
    fn cancel_connection(&self, peripheral: &PeripheralId);

    /// Discover all services. Completes with [`RadioEvent::ServicesDiscovered`].
    fn discover_services(&self, peripheral: &PeripheralId);

    /// Discover the characteristics of one service. Completes with
    /// [`RadioEvent::CharacteristicsDiscovered`].
    fn discover_characteristics(&self, peripheral: &PeripheralId, service: Uuid);

    /// Discover the descriptors of one characteristic. Completes with
    /// [`RadioEvent::DescriptorsDiscovered`].
    fn discover_descriptors(&self, peripheral: &PeripheralId, characteristic: Uuid);

    /// Enable or disable notifications. Completes with
    /// [`RadioEvent::NotificationStateChanged`].
    fn set_notify(&self, peripheral: &PeripheralId, characteristic: Uuid, enabled: bool);

    /// Read a characteristic value. Completes with [`RadioEvent::ValueUpdated`].
    fn read_value(&self, peripheral: &PeripheralId, characteristic: Uuid);

    /// Write without waiting for a response. Completes with
    /// [`RadioEvent::WriteCompleted`].
    fn write_without_response(&self, peripheral: &PeripheralId, characteristic: Uuid, data: Bytes);
}

/// A callback from the Bluetooth stack (or the scan timer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// The adapter was powered on or off.
    AdapterStateChanged {
        /// Whether the adapter is usable.
        powered_on: bool,
    },
    /// The stack refused to start scanning.
    ScanFailed {
        /// Why scanning failed.
        reason: String,
    },
    /// A scan timeout armed for `generation` fired.
    ScanTimeout {
        /// The scan generation the timeout belongs to.
        generation: u64,
    },
    /// An advertisement was received.
    AdvertisementObserved {
        /// The advertising peripheral.
        peripheral: PeripheralId,
        /// Advertised local name, if present.
        local_name: Option<String>,
        /// Signal strength in dBm.
        rssi: Option<i16>,
    },
    /// A connect request succeeded.
    Connected {
        /// The connected peripheral.
        peripheral: PeripheralId,
    },
    /// A connect request failed.
    ConnectFailed {
        /// The peripheral that could not be connected.
        peripheral: PeripheralId,
        /// Why the connection failed.
        reason: String,
    },
    /// Service discovery completed.
    ServicesDiscovered {
        /// The peripheral.
        peripheral: PeripheralId,
        /// Discovered service UUIDs.
        result: Outcome<Vec<Uuid>>,
    },
    /// Characteristic discovery for one service completed.
    CharacteristicsDiscovered {
        /// The peripheral.
        peripheral: PeripheralId,
        /// The service that was searched.
        service: Uuid,
        /// Discovered characteristic UUIDs.
        result: Outcome<Vec<Uuid>>,
    },
    /// Descriptor discovery for one characteristic completed.
    DescriptorsDiscovered {
        /// The peripheral.
        peripheral: PeripheralId,
        /// The characteristic that was searched.
        characteristic: Uuid,
        /// Discovered descriptor UUIDs.
        result: Outcome<Vec<Uuid>>,
    },
    /// A notification enable/disable request completed.
    NotificationStateChanged {
        /// The peripheral.
        peripheral: PeripheralId,
        /// The characteristic.
        characteristic: Uuid,
        /// Whether the characteristic is now notifying.
        result: Outcome<bool>,
    },
    /// A characteristic value arrived, by notification or read.
    ValueUpdated {
        /// The peripheral.
        peripheral: PeripheralId,
        /// The characteristic.
        characteristic: Uuid,
        /// The raw value.
        value: Vec<u8>,
    },
    /// A write completed.
    WriteCompleted {
        /// The peripheral.
        peripheral: PeripheralId,
        /// The characteristic.
        characteristic: Uuid,
        /// Whether the stack accepted the write.
        result: Outcome<()>,
    },
    /// The peripheral disconnected, locally or remotely initiated.
    Disconnected {
        /// The peripheral.
        peripheral: PeripheralId,
    },
}

impl RadioEvent {
    /// The peripheral this event concerns, if any.
    pub fn peripheral(&self) -> Option<&PeripheralId> {
        match self {
            Self::AdapterStateChanged { .. } | Self::ScanFailed { .. } | Self::ScanTimeout { .. } => {
                None
            }
            Self::AdvertisementObserved { peripheral, .. }
            | Self::Connected { peripheral }
            | Self::ConnectFailed { peripheral, .. }
            | Self::ServicesDiscovered { peripheral, .. }
            | Self::CharacteristicsDiscovered { peripheral, .. }
            | Self::DescriptorsDiscovered { peripheral, .. }
            | Self::NotificationStateChanged { peripheral, .. }
            | Self::ValueUpdated { peripheral, .. }
            | Self::WriteCompleted { peripheral, .. }
            | Self::Disconnected { peripheral } => Some(peripheral),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_peripheral() {
        let id = PeripheralId::from("AA:BB:CC:DD:EE:FF");
        let event = RadioEvent::Connected {
            peripheral: id.clone(),
        };
        assert_eq!(event.peripheral(), Some(&id));

        let event = RadioEvent::ScanTimeout { generation: 1 };
        assert_eq!(event.peripheral(), None);
    }
}
