//! Session configuration.
//!
//! Identity constants, the scan timeout and sensor source ranges are
//! supplied by the application rather than discovered at runtime.

use std::ops::RangeInclusive;
use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::*;

/// Default scan timeout.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(17);

/// Advertised names used to classify peripherals into roles.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdentityPatterns {
    /// Advertised name of the `Primary` (actuator) peripheral.
    pub primary_name: String,
    /// Advertised name of the `Auxiliary` (sensor) peripheral.
    pub auxiliary_name: String,
}

impl Default for IdentityPatterns {
    fn default() -> Self {
        Self {
            primary_name: PRIMARY_ADVERTISED_NAME.to_string(),
            auxiliary_name: AUXILIARY_ADVERTISED_NAME.to_string(),
        }
    }
}

/// Characteristic UUIDs used to classify discovered characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicIdentities {
    /// Notifying characteristic on the primary peripheral.
    pub receive: Uuid,
    /// Writable characteristic telemetry frames are sent to.
    pub transmit: Uuid,
    /// Notifying characteristic carrying the auxiliary sensor value.
    pub auxiliary_receive: Uuid,
}

impl Default for CharacteristicIdentities {
    fn default() -> Self {
        Self {
            receive: UART_TX_UUID,
            transmit: UART_RX_UUID,
            auxiliary_receive: HEART_RATE_MEASUREMENT_UUID,
        }
    }
}

/// Source ranges of the raw sensor values mapped into outbound frames.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceRanges {
    /// Brow raise blend shape.
    pub brows: RangeInclusive<f32>,
    /// Jaw open blend shape.
    pub jaw_open: RangeInclusive<f32>,
    /// Head pitch (orientation z).
    pub pitch: RangeInclusive<f32>,
    /// Inbound auxiliary integer.
    pub aux: RangeInclusive<f32>,
}

impl Default for SourceRanges {
    fn default() -> Self {
        Self {
            brows: 0.2..=1.0,
            jaw_open: 0.0..=1.0,
            pitch: -0.8..=0.2,
            aux: 400.0..=600.0,
        }
    }
}

/// Configuration for a [`SessionManager`](crate::session::SessionManager).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Advertised names for role classification.
    pub identities: IdentityPatterns,
    /// Characteristic UUIDs for binding classification.
    pub characteristics: CharacteristicIdentities,
    /// Service UUID advertisements are filtered to while scanning.
    /// `None` scans without a filter.
    pub scan_service: Option<Uuid>,
    /// How long a scan runs before it is stopped unconditionally.
    pub scan_timeout: Duration,
    /// Start scanning as soon as the adapter reports it is powered on.
    pub scan_on_power_on: bool,
    /// Raw sensor ranges for frame mapping.
    pub source_ranges: SourceRanges,
    /// Inbound value assumed before the first notification arrives.
    pub initial_inbound_value: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identities: IdentityPatterns::default(),
            characteristics: CharacteristicIdentities::default(),
            scan_service: Some(UART_SERVICE_UUID),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            scan_on_power_on: true,
            source_ranges: SourceRanges::default(),
            initial_inbound_value: 128,
        }
    }
}

impl SessionConfig {
    /// Set the advertised names used for role classification.
    pub fn with_identities(
        mut self,
        primary_name: impl Into<String>,
        auxiliary_name: impl Into<String>,
    ) -> Self {
        self.identities = IdentityPatterns {
            primary_name: primary_name.into(),
            auxiliary_name: auxiliary_name.into(),
        };
        self
    }

    /// Set the characteristic UUIDs used for binding classification.
    pub fn with_characteristics(mut self, characteristics: CharacteristicIdentities) -> Self {
        self.characteristics = characteristics;
        self
    }

    /// Set the scan service filter.
    pub fn with_scan_service(mut self, service: Option<Uuid>) -> Self {
        self.scan_service = service;
        self
    }

    /// Set the scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Enable or disable scanning when the adapter powers on.
    pub fn with_scan_on_power_on(mut self, enabled: bool) -> Self {
        self.scan_on_power_on = enabled;
        self
    }

    /// Set the sensor source ranges.
    pub fn with_source_ranges(mut self, ranges: SourceRanges) -> Self {
        self.source_ranges = ranges;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_hardware() {
        let config = SessionConfig::default();
        assert_eq!(config.scan_timeout, Duration::from_secs(17));
        assert_eq!(config.scan_service, Some(UART_SERVICE_UUID));
        assert_eq!(config.identities.primary_name, "Adafruit Bluefruit LE");
        assert_eq!(config.identities.auxiliary_name, "Bluefruit Glove");
        assert_eq!(config.characteristics.transmit, UART_RX_UUID);
        assert_eq!(config.characteristics.receive, UART_TX_UUID);
        assert_eq!(config.initial_inbound_value, 128);
    }

    #[test]
    fn test_builder_overrides() {
        let config = SessionConfig::default()
            .with_identities("Left", "Right")
            .with_scan_timeout(Duration::from_secs(3))
            .with_scan_service(None)
            .with_scan_on_power_on(false);

        assert_eq!(config.identities.primary_name, "Left");
        assert_eq!(config.identities.auxiliary_name, "Right");
        assert_eq!(config.scan_timeout, Duration::from_secs(3));
        assert_eq!(config.scan_service, None);
        assert!(!config.scan_on_power_on);
    }
}
