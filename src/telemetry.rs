//! Telemetry channel.
//!
//! Owns the outbound write path to the `Primary` peripheral and the inbound
//! decode path from the `Auxiliary` peripheral. Outbound frames are
//! best-effort: a frame that cannot be written right now is dropped, never
//! queued. Inbound values are published as they arrive and never buffered.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::ble::characteristics::CharacteristicPurpose;
use crate::ble::connection::ConnectionState;
use crate::ble::radio::RadioStack;
use crate::config::SourceRanges;
use crate::error::Result;
use crate::protocol::{decode, TelemetryFrame};
use crate::registry::{PeripheralId, PeripheralRegistry};
use crate::utils::map_to_byte;

/// Raw sensor values supplied by the application.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorSample {
    /// Brow raise, nominally within [`SourceRanges::brows`].
    pub brows: f32,
    /// Jaw openness, nominally within [`SourceRanges::jaw_open`].
    pub jaw_open: f32,
    /// Head pitch, nominally within [`SourceRanges::pitch`].
    pub pitch: f32,
    /// Auxiliary value, nominally within [`SourceRanges::aux`]. `None` uses
    /// the last value received from the auxiliary peripheral.
    pub aux: Option<f32>,
}

impl SensorSample {
    /// Create a sample that reuses the last inbound value for `aux`.
    pub fn new(brows: f32, jaw_open: f32, pitch: f32) -> Self {
        Self {
            brows,
            jaw_open,
            pitch,
            aux: None,
        }
    }

    /// Set an explicit auxiliary value.
    pub fn with_aux(mut self, aux: f32) -> Self {
        self.aux = Some(aux);
        self
    }

    /// Map every value into `0..=255` and build a frame.
    ///
    /// Values outside their source range are clamped, never wrapped.
    pub fn to_frame(&self, ranges: &SourceRanges, fallback_aux: i64) -> TelemetryFrame {
        let aux = self.aux.unwrap_or(fallback_aux as f32);

        TelemetryFrame::new(
            map_to_byte(self.brows, ranges.brows.clone()),
            map_to_byte(self.jaw_open, ranges.jaw_open.clone()),
            map_to_byte(self.pitch, ranges.pitch.clone()),
            map_to_byte(aux, ranges.aux.clone()),
        )
    }
}

/// A value decoded from the auxiliary peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InboundSample {
    /// The peripheral the notification came from.
    pub peripheral: PeripheralId,
    /// The decoded value.
    pub value: i64,
    /// When the notification was decoded.
    pub received_at: DateTime<Utc>,
}

/// Why a frame was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No `Primary` peripheral is registered.
    NoPrimary,
    /// The `Primary` peripheral is not fully connected.
    NotConnected(ConnectionState),
    /// The `Primary` peripheral has no `Transmit` characteristic.
    NoTransmitBinding,
}

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The write was issued.
    Written,
    /// The frame was discarded.
    Dropped(DropReason),
}

impl SendOutcome {
    /// Whether the write was issued.
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written)
    }
}

/// Diagnostic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetryStats {
    /// Frames handed to the radio.
    pub frames_written: u64,
    /// Frames discarded before reaching the radio.
    pub frames_dropped: u64,
    /// Writes the radio reported as failed.
    pub write_failures: u64,
    /// Inbound samples decoded and published.
    pub samples_received: u64,
    /// Inbound payloads discarded as malformed.
    pub malformed_samples: u64,
}

/// Outbound send path and inbound decode path.
pub struct TelemetryChannel {
    /// Last successfully decoded inbound value.
    last_value: i64,
    /// Set while a write is outstanding.
    sending: bool,
    /// Counters.
    stats: TelemetryStats,
    /// Inbound sample channel.
    inbound_tx: broadcast::Sender<InboundSample>,
}

impl TelemetryChannel {
    /// Create a channel whose last known inbound value starts at
    /// `initial_value`.
    pub fn new(initial_value: i64) -> Self {
        let (inbound_tx, _) = broadcast::channel(64);

        Self {
            last_value: initial_value,
            sending: false,
            stats: TelemetryStats::default(),
            inbound_tx,
        }
    }

    /// Write a frame to the `Primary` peripheral if it is ready, otherwise
    /// drop it.
    pub fn send(
        &mut self,
        registry: &PeripheralRegistry,
        radio: &dyn RadioStack,
        frame: TelemetryFrame,
    ) -> SendOutcome {
        let Some(primary) = registry.primary() else {
            return self.dropped(DropReason::NoPrimary);
        };

        if !primary.state().is_connected() {
            return self.dropped(DropReason::NotConnected(primary.state()));
        }

        let Some(transmit) = primary.binding(CharacteristicPurpose::Transmit) else {
            return self.dropped(DropReason::NoTransmitBinding);
        };

        trace!("Sending frame {} to {}", frame, primary.id());

        radio.write_without_response(primary.id(), transmit, frame.encode());
        self.sending = true;
        self.stats.frames_written += 1;

        SendOutcome::Written
    }

    /// Handle a value from a bound characteristic.
    ///
    /// Only `AuxiliaryReceive` values are decoded. A malformed payload
    /// leaves the last known value untouched and returns
    /// [`Error::MalformedFrame`](crate::Error::MalformedFrame).
    pub fn on_notification(
        &mut self,
        peripheral: &PeripheralId,
        purpose: CharacteristicPurpose,
        payload: &[u8],
    ) -> Result<Option<InboundSample>> {
        if purpose != CharacteristicPurpose::AuxiliaryReceive {
            trace!(
                "Ignoring {} bytes from {} characteristic on {}",
                payload.len(),
                purpose,
                peripheral
            );
            return Ok(None);
        }

        let value = match decode(payload) {
            Ok(value) => value,
            Err(e) => {
                self.stats.malformed_samples += 1;
                return Err(e);
            }
        };

        debug!("Value received from {}: {}", peripheral, value);

        self.last_value = value;
        self.stats.samples_received += 1;

        let sample = InboundSample {
            peripheral: peripheral.clone(),
            value,
            received_at: Utc::now(),
        };

        let _ = self.inbound_tx.send(sample.clone());

        Ok(Some(sample))
    }

    /// The stack accepted a write.
    pub fn on_write_confirmed(&mut self) {
        trace!("Frame sent");
        self.sending = false;
    }

    /// The stack rejected a write. Not retried; the next frame supersedes it.
    pub fn on_write_failed(&mut self, peripheral: &PeripheralId, reason: &str) {
        debug!("Write to {} failed: {}", peripheral, reason);
        self.sending = false;
        self.stats.write_failures += 1;
    }

    /// Last successfully decoded inbound value.
    pub fn last_value(&self) -> i64 {
        self.last_value
    }

    /// Whether a write is outstanding.
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Diagnostic counters.
    pub fn stats(&self) -> TelemetryStats {
        self.stats
    }

    /// Subscribe to inbound samples.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundSample> {
        self.inbound_tx.subscribe()
    }

    fn dropped(&mut self, reason: DropReason) -> SendOutcome {
        trace!("Dropping frame: {:?}", reason);
        self.stats.frames_dropped += 1;
        SendOutcome::Dropped(reason)
    }
}
