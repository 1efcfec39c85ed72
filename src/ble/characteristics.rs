//! GATT characteristic classification.
//!
//! Discovered characteristics are matched against the configured UUIDs and
//! recorded on the owning peripheral as [`CharacteristicBinding`]s.

use std::fmt;
use uuid::Uuid;

use crate::config::CharacteristicIdentities;
use crate::registry::{PeripheralHandle, PeripheralId, PeripheralRole};

/// Logical purpose of a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CharacteristicPurpose {
    /// Notifications from the primary peripheral.
    Receive,
    /// Telemetry frames are written here.
    Transmit,
    /// Notifications carrying the auxiliary sensor value.
    AuxiliaryReceive,
}

impl CharacteristicPurpose {
    /// Match a characteristic UUID against the configured identities.
    pub fn classify(uuid: Uuid, identities: &CharacteristicIdentities) -> Option<Self> {
        if uuid == identities.transmit {
            Some(Self::Transmit)
        } else if uuid == identities.receive {
            Some(Self::Receive)
        } else if uuid == identities.auxiliary_receive {
            Some(Self::AuxiliaryReceive)
        } else {
            None
        }
    }

    /// Whether notifications should be enabled for this purpose.
    pub fn is_notifying(&self) -> bool {
        matches!(self, Self::Receive | Self::AuxiliaryReceive)
    }

    /// Whether a peripheral with `role` may hold a binding for this purpose.
    pub fn permitted_for(&self, role: PeripheralRole) -> bool {
        match self {
            Self::Transmit => role == PeripheralRole::Primary,
            Self::Receive | Self::AuxiliaryReceive => true,
        }
    }
}

impl fmt::Display for CharacteristicPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receive => write!(f, "Receive"),
            Self::Transmit => write!(f, "Transmit"),
            Self::AuxiliaryReceive => write!(f, "AuxiliaryReceive"),
        }
    }
}

/// A characteristic bound to a purpose on one peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicBinding {
    /// The owning peripheral.
    pub peripheral: PeripheralId,
    /// What the characteristic is used for.
    pub purpose: CharacteristicPurpose,
    /// The characteristic UUID.
    pub characteristic: Uuid,
}

impl PeripheralHandle {
    /// All bindings recorded on this peripheral.
    pub fn bindings(&self) -> Vec<CharacteristicBinding> {
        [
            CharacteristicPurpose::Receive,
            CharacteristicPurpose::Transmit,
            CharacteristicPurpose::AuxiliaryReceive,
        ]
        .into_iter()
        .filter_map(|purpose| {
            self.binding(purpose).map(|characteristic| CharacteristicBinding {
                peripheral: self.id().clone(),
                purpose,
                characteristic,
            })
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::*;

    #[test]
    fn test_classify_default_identities() {
        let ids = CharacteristicIdentities::default();
        assert_eq!(
            CharacteristicPurpose::classify(UART_RX_UUID, &ids),
            Some(CharacteristicPurpose::Transmit)
        );
        assert_eq!(
            CharacteristicPurpose::classify(UART_TX_UUID, &ids),
            Some(CharacteristicPurpose::Receive)
        );
        assert_eq!(
            CharacteristicPurpose::classify(HEART_RATE_MEASUREMENT_UUID, &ids),
            Some(CharacteristicPurpose::AuxiliaryReceive)
        );
        assert_eq!(CharacteristicPurpose::classify(UART_SERVICE_UUID, &ids), None);
    }

    #[test]
    fn test_transmit_only_on_primary() {
        let transmit = CharacteristicPurpose::Transmit;
        assert!(transmit.permitted_for(PeripheralRole::Primary));
        assert!(!transmit.permitted_for(PeripheralRole::Auxiliary));
        assert!(CharacteristicPurpose::AuxiliaryReceive.permitted_for(PeripheralRole::Auxiliary));
    }

    #[test]
    fn test_notifying_purposes() {
        assert!(CharacteristicPurpose::Receive.is_notifying());
        assert!(CharacteristicPurpose::AuxiliaryReceive.is_notifying());
        assert!(!CharacteristicPurpose::Transmit.is_notifying());
    }
}
