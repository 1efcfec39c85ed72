// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # facesynth-link
//!
//! A Bluetooth Low Energy central that streams face-tracking telemetry to a
//! sound synthesizer and reads a value back from a sensor glove.
//!
//! A session manages at most two peripherals at once:
//!
//! - **Primary**: a UART-style board. Telemetry frames are written to its
//!   transmit characteristic without response.
//! - **Auxiliary**: a glove whose notifications carry a hexadecimal integer
//!   that is folded back into the next outbound frame.
//!
//! ## Features
//!
//! - **Time-bounded discovery**: scanning stops after a fixed timeout
//! - **Role classification**: peripherals are matched by advertised name
//! - **Connection lifecycle**: connect, discover, bind and subscribe in order
//! - **Best-effort telemetry**: frames that cannot be sent are dropped
//! - **Inbound samples**: decoded values published as they arrive
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use facesynth_link::{Result, SensorSample, SessionConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Scanning starts as soon as the adapter is powered on
//!     let session = SessionManager::with_btleplug(SessionConfig::default()).await?;
//!
//!     let mut interval = tokio::time::interval(std::time::Duration::from_millis(50));
//!     for _ in 0..200 {
//!         interval.tick().await;
//!
//!         // Raw tracker values; the glove value is filled in automatically
//!         let outcome = session.send_sample(SensorSample::new(0.6, 0.3, -0.2));
//!         if !outcome.is_written() {
//!             println!("Frame dropped: {:?}", outcome);
//!         }
//!     }
//!
//!     println!("Last glove value: {}", session.last_inbound_value());
//!
//!     session.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod telemetry;
pub mod utils;

// Re-exports for convenience
pub use config::{
    CharacteristicIdentities, IdentityPatterns, SessionConfig, SourceRanges,
    DEFAULT_SCAN_TIMEOUT,
};
pub use error::{Error, Result};
pub use session::{CallbackHandle, SessionManager};
pub use utils::{clamp_to_byte, map_range, map_to_byte};

// Re-export commonly used types from submodules
pub use ble::characteristics::{CharacteristicBinding, CharacteristicPurpose};
pub use ble::connection::{ConnectionEvent, ConnectionState};
pub use ble::radio::{RadioEvent, RadioStack};
pub use protocol::TelemetryFrame;
pub use registry::{PeripheralHandle, PeripheralId, PeripheralRole};
pub use telemetry::{DropReason, InboundSample, SendOutcome, SensorSample, TelemetryStats};
