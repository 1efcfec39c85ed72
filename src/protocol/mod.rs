//! Protocol module for the telemetry wire format.
//!
//! This module contains the implementations for:
//! - Outbound telemetry frame encoding
//! - Inbound hexadecimal payload decoding

pub mod frame;

pub use frame::{decode, encode, TelemetryFrame, FRAME_FIELDS, FRAME_LEN};
