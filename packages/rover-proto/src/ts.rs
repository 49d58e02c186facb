//! TS (Telemetry Stream) frame codec.
//!
//! Unidirectional rover → mothership telemetry over TCP. Every frame is a
//! fixed 16-byte header followed by a small fixed payload:
//!
//! ```text
//! header (16 bytes, big-endian):
//!   frame_type:u8  rover_id:u8  battery:u8
//!   pos_x:u8  pos_y:u8  pos_z:u8  state:u8
//!   checksum:u32   (CRC32 of the payload, 0 when empty)
//!   payload_len:u32
//!   freq:u8        (rover report rate, Hz)
//!
//! payload (9 bytes, all u8):
//!   proc_use  storage  velocity  heading  sensors
//!   progress  dest_x  dest_y  dest_z
//! ```
//!
//! Header byte fields are saturating casts of the rover's float state to
//! 0..255 — the wire trades precision for size, the operator channel
//! carries the full-precision values. The decoder verifies the declared
//! payload length and the CRC; a reader that hits either error drops the
//! connection rather than resynchronizing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::rover::RoverState;

/// Serialized header size.
pub const HEADER_LEN: usize = 16;
/// Serialized INFO payload size.
pub const PAYLOAD_LEN: usize = 9;

/// Frame types carried in `TsHeader::frame_type`. Value 1 is unused on the
/// wire (historical gap, kept so the other ids stay stable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Hello = 0,
    Info = 2,
    End = 3,
    Fin = 4,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Hello),
            2 => Some(Self::Info),
            3 => Some(Self::End),
            4 => Some(Self::Fin),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TsError {
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("checksum mismatch: header says {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

/// Decoded frame header. `frame_type` stays raw so unknown types can be
/// logged by the receiver instead of killing the connection in the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    pub frame_type: u8,
    pub rover_id: u8,
    pub battery: u8,
    pub pos_x: u8,
    pub pos_y: u8,
    pub pos_z: u8,
    pub state: u8,
    pub checksum: u32,
    pub payload_len: u32,
    pub freq: u8,
}

impl TsHeader {
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }
}

/// Telemetry metrics carried in an INFO payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoPayload {
    pub proc_use: u8,
    pub storage: u8,
    pub velocity: u8,
    pub heading: u8,
    pub sensors: u8,
    pub progress: u8,
    pub dest_x: u8,
    pub dest_y: u8,
    pub dest_z: u8,
}

/// A fully decoded frame. `payload` is `None` for zero-length payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsFrame {
    pub header: TsHeader,
    pub payload: Option<InfoPayload>,
}

/// Saturating cast used for every float → wire-byte field.
fn to_byte(v: f32) -> u8 {
    // `as` on floats saturates: negatives → 0, > 255 → 255, NaN → 0.
    v as u8
}

fn encode_payload(rover: &RoverState) -> [u8; PAYLOAD_LEN] {
    [
        rover.proc_use,
        rover.storage,
        to_byte(rover.velocity),
        to_byte(rover.heading),
        rover.sensors,
        rover.progress_pct,
        to_byte(rover.destination[0]),
        to_byte(rover.destination[1]),
        to_byte(rover.destination[2]),
    ]
}

/// Encode one frame from the rover's current state. Every frame type
/// carries the full payload; the receiver only interprets it for INFO.
pub fn encode_frame(frame_type: FrameType, rover: &RoverState, freq: u8) -> Bytes {
    let payload = encode_payload(rover);
    let checksum = crc32fast::hash(&payload);

    let mut buf = BytesMut::with_capacity(HEADER_LEN + PAYLOAD_LEN);
    buf.put_u8(frame_type as u8);
    buf.put_u8(rover.id as u8);
    buf.put_u8(to_byte(rover.battery_pct));
    buf.put_u8(to_byte(rover.position[0]));
    buf.put_u8(to_byte(rover.position[1]));
    buf.put_u8(to_byte(rover.position[2]));
    buf.put_u8(rover.status as u8);
    buf.put_u32(checksum);
    buf.put_u32(payload.len() as u32);
    buf.put_u8(freq);
    buf.put_slice(&payload);
    buf.freeze()
}

/// Decode a header from exactly [`HEADER_LEN`] bytes.
pub fn decode_header(buf: &[u8]) -> Result<TsHeader, TsError> {
    if buf.len() != HEADER_LEN {
        return Err(TsError::InvalidLength {
            expected: HEADER_LEN,
            actual: buf.len(),
        });
    }
    let mut buf = buf;
    Ok(TsHeader {
        frame_type: buf.get_u8(),
        rover_id: buf.get_u8(),
        battery: buf.get_u8(),
        pos_x: buf.get_u8(),
        pos_y: buf.get_u8(),
        pos_z: buf.get_u8(),
        state: buf.get_u8(),
        checksum: buf.get_u32(),
        payload_len: buf.get_u32(),
        freq: buf.get_u8(),
    })
}

/// Validate payload length + CRC against a decoded header and assemble the
/// frame. The payload slice must be exactly what the header declared.
pub fn decode_frame(header: TsHeader, payload: &[u8]) -> Result<TsFrame, TsError> {
    if payload.len() != header.payload_len as usize {
        return Err(TsError::InvalidLength {
            expected: header.payload_len as usize,
            actual: payload.len(),
        });
    }
    let computed = if payload.is_empty() {
        0
    } else {
        crc32fast::hash(payload)
    };
    if computed != header.checksum {
        return Err(TsError::ChecksumMismatch {
            expected: header.checksum,
            actual: computed,
        });
    }

    let payload = if payload.is_empty() {
        None
    } else {
        if payload.len() < PAYLOAD_LEN {
            return Err(TsError::InvalidLength {
                expected: PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        let mut p = payload;
        Some(InfoPayload {
            proc_use: p.get_u8(),
            storage: p.get_u8(),
            velocity: p.get_u8(),
            heading: p.get_u8(),
            sensors: p.get_u8(),
            progress: p.get_u8(),
            dest_x: p.get_u8(),
            dest_y: p.get_u8(),
            dest_z: p.get_u8(),
        })
    };

    Ok(TsFrame { header, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rover::RoverState;

    fn sample_rover() -> RoverState {
        let mut r = RoverState::new(3, 0.5);
        r.position = [1.0, 2.0, 3.0];
        r.destination = [10.0, 0.0, 3.0];
        r.velocity = 1.5;
        r.heading = 90.0;
        r.battery_pct = 87.4;
        r.proc_use = 42;
        r.storage = 17;
        r.sensors = 2;
        r.progress_pct = 55;
        r
    }

    #[test]
    fn info_round_trip() {
        let rover = sample_rover();
        let bytes = encode_frame(FrameType::Info, &rover, 2);

        let header = decode_header(&bytes[..HEADER_LEN]).unwrap();
        let frame = decode_frame(header, &bytes[HEADER_LEN..]).unwrap();

        assert_eq!(header.kind(), Some(FrameType::Info));
        assert_eq!(header.rover_id, 3);
        assert_eq!(header.battery, 87);
        assert_eq!((header.pos_x, header.pos_y, header.pos_z), (1, 2, 3));
        assert_eq!(header.freq, 2);
        assert_eq!(header.payload_len as usize, PAYLOAD_LEN);

        let p = frame.payload.unwrap();
        assert_eq!(p.velocity, 1);
        assert_eq!(p.heading, 90);
        assert_eq!(p.progress, 55);
        assert_eq!((p.dest_x, p.dest_y, p.dest_z), (10, 0, 3));
    }

    #[test]
    fn saturating_casts_clamp_to_byte_range() {
        let mut rover = sample_rover();
        rover.position = [-5.0, 300.0, 0.0];
        rover.velocity = 1000.0;
        let bytes = encode_frame(FrameType::Info, &rover, 1);
        let header = decode_header(&bytes[..HEADER_LEN]).unwrap();
        assert_eq!(header.pos_x, 0);
        assert_eq!(header.pos_y, 255);
        let frame = decode_frame(header, &bytes[HEADER_LEN..]).unwrap();
        assert_eq!(frame.payload.unwrap().velocity, 255);
    }

    #[test]
    fn payload_length_mismatch_rejected() {
        let rover = sample_rover();
        let bytes = encode_frame(FrameType::Info, &rover, 1);
        let header = decode_header(&bytes[..HEADER_LEN]).unwrap();
        // Truncated payload.
        let err = decode_frame(header, &bytes[HEADER_LEN..HEADER_LEN + 4]).unwrap_err();
        assert!(matches!(err, TsError::InvalidLength { .. }));
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let rover = sample_rover();
        let bytes = encode_frame(FrameType::Info, &rover, 1);
        let header = decode_header(&bytes[..HEADER_LEN]).unwrap();
        let mut payload = bytes[HEADER_LEN..].to_vec();
        payload[0] ^= 0xff;
        let err = decode_frame(header, &payload).unwrap_err();
        assert!(matches!(err, TsError::ChecksumMismatch { .. }));
    }

    #[test]
    fn empty_payload_decodes_with_zero_checksum() {
        let header = TsHeader {
            frame_type: FrameType::End as u8,
            rover_id: 1,
            battery: 0,
            pos_x: 0,
            pos_y: 0,
            pos_z: 0,
            state: 0,
            checksum: 0,
            payload_len: 0,
            freq: 1,
        };
        let frame = decode_frame(header, &[]).unwrap();
        assert!(frame.payload.is_none());
    }

    #[test]
    fn short_header_rejected() {
        let err = decode_header(&[0u8; 7]).unwrap_err();
        assert_eq!(
            err,
            TsError::InvalidLength {
                expected: HEADER_LEN,
                actual: 7
            }
        );
    }
}
