//! BLE Service and Characteristic UUIDs and advertised names.
//!
//! These are the defaults used by [`SessionConfig`](crate::config::SessionConfig);
//! every one of them can be overridden there.

use uuid::Uuid;

// UART Service (Nordic NUS, as exposed by Adafruit Bluefruit LE modules)
/// Nordic UART Service UUID. Scanning is filtered to this service.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
/// UART RX characteristic UUID (write to peripheral).
pub const UART_RX_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// UART TX characteristic UUID (notifications from peripheral).
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);

// Heart Rate Measurement (Standard BLE), reused by the glove sensor
/// Heart Rate Measurement characteristic UUID (Notify). The glove sends
/// its sensor value here as hexadecimal text.
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = uuid_from_u16(0x2a37);

/// Advertised local name of the actuator peripheral.
pub const PRIMARY_ADVERTISED_NAME: &str = "Adafruit Bluefruit LE";
/// Advertised local name of the sensor glove peripheral.
pub const AUXILIARY_ADVERTISED_NAME: &str = "Bluefruit Glove";

/// Expand a 16-bit Bluetooth SIG assigned number into a full UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb | ((short as u128) << 96))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            UART_SERVICE_UUID.to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            HEART_RATE_MEASUREMENT_UUID.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_uuid_from_u16() {
        assert_eq!(uuid_from_u16(0x2a37), HEART_RATE_MEASUREMENT_UUID);
        assert_eq!(
            uuid_from_u16(0x180d).to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_uart_characteristics_are_distinct() {
        assert_ne!(UART_RX_UUID, UART_TX_UUID);
        assert_ne!(UART_SERVICE_UUID, UART_RX_UUID);
    }
}
