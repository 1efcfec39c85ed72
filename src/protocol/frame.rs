//! Telemetry frame encoding and inbound payload decoding.
//!
//! Outbound frames are ASCII text: four 3-digit zero-padded decimal fields
//! separated by `,` and terminated by `\n`, e.g. `128,000,255,128\n`.
//!
//! Inbound payloads are ASCII text holding a base-16 integer, e.g. `1F4`.

use bytes::Bytes;
use std::fmt;

use crate::error::{Error, Result};

/// Number of fields in a telemetry frame.
pub const FRAME_FIELDS: usize = 4;

/// Length of an encoded frame in bytes (`DDD,DDD,DDD,DDD\n`).
pub const FRAME_LEN: usize = FRAME_FIELDS * 4;

/// One outbound telemetry snapshot.
///
/// Each frame carries absolute values, so a dropped or reordered frame is
/// superseded by the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetryFrame {
    /// Brow position.
    pub brows: u8,
    /// Jaw openness.
    pub jaw: u8,
    /// Head pitch.
    pub pitch: u8,
    /// Externally supplied sensor value.
    pub aux: u8,
}

impl TelemetryFrame {
    /// Create a new frame from already clamped values.
    pub fn new(brows: u8, jaw: u8, pitch: u8, aux: u8) -> Self {
        Self {
            brows,
            jaw,
            pitch,
            aux,
        }
    }

    /// Encode the frame into wire bytes.
    pub fn encode(&self) -> Bytes {
        encode(self.brows, self.jaw, self.pitch, self.aux)
    }

    /// Parse a frame from its wire text.
    ///
    /// Accepts exactly what [`encode`] produces.
    pub fn parse(text: &str) -> Result<Self> {
        let body = text.strip_suffix('\n').ok_or_else(|| Error::MalformedFrame {
            context: "frame is not terminated by a line break".to_string(),
        })?;

        let mut fields = [0u8; FRAME_FIELDS];
        let mut count = 0;

        for part in body.split(',') {
            if count == FRAME_FIELDS {
                return Err(Error::MalformedFrame {
                    context: format!("expected {} fields in {:?}", FRAME_FIELDS, text),
                });
            }
            fields[count] = parse_field(part)?;
            count += 1;
        }

        if count != FRAME_FIELDS {
            return Err(Error::MalformedFrame {
                context: format!("expected {} fields in {:?}", FRAME_FIELDS, text),
            });
        }

        Ok(Self::new(fields[0], fields[1], fields[2], fields[3]))
    }

    /// The fields in wire order.
    pub fn fields(&self) -> [u8; FRAME_FIELDS] {
        [self.brows, self.jaw, self.pitch, self.aux]
    }
}

impl fmt::Display for TelemetryFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:03},{:03},{:03},{:03}",
            self.brows, self.jaw, self.pitch, self.aux
        )
    }
}

fn parse_field(part: &str) -> Result<u8> {
    if part.len() != 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::MalformedFrame {
            context: format!("field {:?} is not a 3-digit decimal", part),
        });
    }

    part.parse::<u8>().map_err(|_| Error::MalformedFrame {
        context: format!("field {:?} exceeds 255", part),
    })
}

/// Encode four clamped values into an outbound frame.
///
/// # Example
///
/// ```
/// use facesynth_link::protocol::encode;
///
/// assert_eq!(&encode(128, 0, 255, 128)[..], b"128,000,255,128\n");
/// ```
pub fn encode(brows: u8, jaw: u8, pitch: u8, aux: u8) -> Bytes {
    Bytes::from(format!("{:03},{:03},{:03},{:03}\n", brows, jaw, pitch, aux))
}

/// Decode an inbound notification payload into an integer.
///
/// The payload is UTF-8 text holding a base-16 integer. A leading sign is
/// accepted; surrounding whitespace is not.
///
/// # Errors
///
/// Returns [`Error::MalformedFrame`] if the payload is not UTF-8 or not
/// hexadecimal.
///
/// # Example
///
/// ```
/// use facesynth_link::protocol::decode;
///
/// assert_eq!(decode(b"1F4").unwrap(), 500);
/// assert!(decode(b"not-hex").is_err());
/// ```
pub fn decode(payload: &[u8]) -> Result<i64> {
    let text = std::str::from_utf8(payload).map_err(|e| Error::MalformedFrame {
        context: format!("payload is not UTF-8: {}", e),
    })?;

    i64::from_str_radix(text, 16).map_err(|_| Error::MalformedFrame {
        context: format!("not hexadecimal: {:?}", text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_encode_pads_each_field() {
        assert_eq!(&encode(128, 0, 255, 128)[..], b"128,000,255,128\n");
        assert_eq!(&encode(1, 22, 3, 45)[..], b"001,022,003,045\n");
        assert_eq!(encode(0, 0, 0, 0).len(), FRAME_LEN);
    }

    #[test]
    fn test_frame_display_matches_wire_body() {
        let frame = TelemetryFrame::new(7, 70, 200, 9);
        assert_eq!(frame.to_string(), "007,070,200,009");
        assert_eq!(&frame.encode()[..], b"007,070,200,009\n");
        assert_eq!(frame.fields(), [7, 70, 200, 9]);
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(assert_ok!(decode(b"1F4")), 500);
        assert_eq!(assert_ok!(decode(b"1f4")), 500);
        assert_eq!(decode(b"0").unwrap(), 0);
        assert_eq!(decode(b"-A").unwrap(), -10);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(
            decode(b"not-hex"),
            Err(Error::MalformedFrame { .. })
        ));
        assert!(matches!(decode(b""), Err(Error::MalformedFrame { .. })));
        assert!(matches!(decode(b" 1F4"), Err(Error::MalformedFrame { .. })));
        assert!(matches!(
            decode(&[0xff, 0xfe]),
            Err(Error::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in [
            "128,000,255,128",
            "128,000,255\n",
            "128,000,255,128,001\n",
            "128,0,255,128\n",
            "128,000,256,128\n",
            "12a,000,255,128\n",
            "+12,000,255,128\n",
        ] {
            assert!(
                TelemetryFrame::parse(text).is_err(),
                "expected {:?} to be rejected",
                text
            );
        }
    }

    proptest! {
        #[test]
        fn prop_encode_then_parse_is_identity(
            brows in any::<u8>(),
            jaw in any::<u8>(),
            pitch in any::<u8>(),
            aux in any::<u8>(),
        ) {
            let wire = encode(brows, jaw, pitch, aux);
            let text = std::str::from_utf8(&wire).unwrap();
            let frame = TelemetryFrame::parse(text).unwrap();
            prop_assert_eq!(frame, TelemetryFrame::new(brows, jaw, pitch, aux));
        }

        #[test]
        fn prop_decode_inverts_upper_hex(value in 0i64..=i64::MAX) {
            let text = format!("{:X}", value);
            prop_assert_eq!(decode(text.as_bytes()).unwrap(), value);
        }
    }
}
