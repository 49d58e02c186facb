//! ML (MissionLink) datagram codec.
//!
//! Bidirectional mission traffic between rovers and the mothership over
//! UDP. Every datagram is a fixed 20-byte header plus a typed payload:
//!
//! ```text
//! header (20 bytes, big-endian):
//!   version:u8 (=1)  msg_type:u8  flags:u8  hdr_len:u8 (=20)
//!   seq:u32  ack:u32
//!   stream_id:u16  payload_len:u16
//!   checksum:u32   (CRC32 of the payload, 0 when empty)
//! ```
//!
//! Reliability is layered on top by the endpoints: `NEEDS_ACK` marks a
//! message the peer must acknowledge, `ACK_ONLY` marks a bare
//! acknowledgement, `RETX` marks a retransmission. The codec itself is
//! stateless — it neither tracks sequences nor retries.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::mission::MissionSpec;

/// Serialized header size. Also carried in the `hdr_len` field.
pub const HEADER_LEN: usize = 20;
/// Protocol version carried in every header.
pub const VERSION: u8 = 1;
/// Receive buffer size used by both endpoints.
pub const MAX_DATAGRAM: usize = 4096;

/// `flags` bit: the peer must acknowledge this message.
pub const FLAG_NEEDS_ACK: u8 = 0x01;
/// `flags` bit: this message is a bare acknowledgement.
pub const FLAG_ACK_ONLY: u8 = 0x02;
/// `flags` bit: this message is a retransmission.
pub const FLAG_RETX: u8 = 0x04;

/// Message types carried in `MlHeader::msg_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MlType {
    Ready = 0,
    Mission = 1,
    Progress = 2,
    Done = 3,
    Ack = 4,
    NoMission = 5,
    RequestMission = 6,
}

impl MlType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Ready),
            1 => Some(Self::Mission),
            2 => Some(Self::Progress),
            3 => Some(Self::Done),
            4 => Some(Self::Ack),
            5 => Some(Self::NoMission),
            6 => Some(Self::RequestMission),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MlError {
    #[error("datagram too short: {actual} bytes, need at least {expected}")]
    TooShort { expected: usize, actual: usize },
    #[error("payload length mismatch: header says {declared}, got {actual}")]
    PayloadLengthMismatch { declared: usize, actual: usize },
    #[error("checksum mismatch: header says {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("bad {kind} payload: {reason}")]
    BadPayload {
        kind: &'static str,
        reason: &'static str,
    },
}

/// Decoded datagram header. `msg_type` stays raw so receivers can log
/// unknown types; [`MlHeader::kind`] does the enum conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MlHeader {
    pub version: u8,
    pub msg_type: u8,
    pub flags: u8,
    pub hdr_len: u8,
    pub seq: u32,
    pub ack: u32,
    pub stream_id: u16,
    pub payload_len: u16,
    pub checksum: u32,
}

impl MlHeader {
    pub fn kind(&self) -> Option<MlType> {
        MlType::from_u8(self.msg_type)
    }

    pub fn needs_ack(&self) -> bool {
        self.flags & FLAG_NEEDS_ACK != 0
    }

    pub fn is_ack_only(&self) -> bool {
        self.flags & FLAG_ACK_ONLY != 0
    }

    pub fn is_retx(&self) -> bool {
        self.flags & FLAG_RETX != 0
    }
}

/// Assemble a complete datagram.
pub fn build_message(
    msg_type: MlType,
    seq: u32,
    ack: u32,
    stream_id: u16,
    flags: u8,
    payload: &[u8],
) -> Bytes {
    let checksum = if payload.is_empty() {
        0
    } else {
        crc32fast::hash(payload)
    };

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(VERSION);
    buf.put_u8(msg_type as u8);
    buf.put_u8(flags);
    buf.put_u8(HEADER_LEN as u8);
    buf.put_u32(seq);
    buf.put_u32(ack);
    buf.put_u16(stream_id);
    buf.put_u16(payload.len() as u16);
    buf.put_u32(checksum);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a datagram into header + payload, verifying length and CRC.
pub fn parse_message(data: &[u8]) -> Result<(MlHeader, Bytes), MlError> {
    if data.len() < HEADER_LEN {
        return Err(MlError::TooShort {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }

    let mut buf = data;
    let header = MlHeader {
        version: buf.get_u8(),
        msg_type: buf.get_u8(),
        flags: buf.get_u8(),
        hdr_len: buf.get_u8(),
        seq: buf.get_u32(),
        ack: buf.get_u32(),
        stream_id: buf.get_u16(),
        payload_len: buf.get_u16(),
        checksum: buf.get_u32(),
    };

    let payload = &data[HEADER_LEN..];
    if payload.len() != header.payload_len as usize {
        return Err(MlError::PayloadLengthMismatch {
            declared: header.payload_len as usize,
            actual: payload.len(),
        });
    }
    let computed = if payload.is_empty() {
        0
    } else {
        crc32fast::hash(payload)
    };
    if computed != header.checksum {
        return Err(MlError::ChecksumMismatch {
            expected: header.checksum,
            actual: computed,
        });
    }

    Ok((header, Bytes::copy_from_slice(payload)))
}

/// Rebuild a datagram as a retransmission: identical in every field except
/// the `RETX` flag. Retransmitted bytes must otherwise match the original
/// so the receiver's duplicate handling sees the same message.
pub fn set_retx(data: &[u8]) -> Result<Bytes, MlError> {
    let (header, payload) = parse_message(data)?;
    let kind = header.kind().ok_or(MlError::BadPayload {
        kind: "header",
        reason: "unknown message type",
    })?;
    Ok(build_message(
        kind,
        header.seq,
        header.ack,
        header.stream_id,
        header.flags | FLAG_RETX,
        &payload,
    ))
}

// ── Typed payloads ────────────────────────────────────────────────────────────

/// MISSION payload, 19 bytes.
pub fn encode_mission(m: &MissionSpec) -> Bytes {
    let mut buf = BytesMut::with_capacity(19);
    buf.put_u8(m.mission_id);
    buf.put_u16(m.task_number);
    buf.put_f32(m.x);
    buf.put_f32(m.y);
    buf.put_f32(m.radius);
    buf.put_f32(m.duration_s);
    buf.freeze()
}

pub fn decode_mission(payload: &[u8]) -> Result<MissionSpec, MlError> {
    if payload.len() != 19 {
        return Err(MlError::BadPayload {
            kind: "MISSION",
            reason: "expected 19 bytes",
        });
    }
    let mut buf = payload;
    Ok(MissionSpec {
        mission_id: buf.get_u8(),
        task_number: buf.get_u16(),
        x: buf.get_f32(),
        y: buf.get_f32(),
        radius: buf.get_f32(),
        duration_s: buf.get_f32(),
    })
}

/// PROGRESS payload, 12 bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    pub mission_id: u8,
    /// 0 = in progress. Other values reserved.
    pub status: u8,
    pub percent: u8,
    pub battery: u8,
    pub x: f32,
    pub y: f32,
}

pub fn encode_progress(p: &ProgressReport) -> Bytes {
    let mut buf = BytesMut::with_capacity(12);
    buf.put_u8(p.mission_id);
    buf.put_u8(p.status);
    buf.put_u8(p.percent);
    buf.put_u8(p.battery);
    buf.put_f32(p.x);
    buf.put_f32(p.y);
    buf.freeze()
}

pub fn decode_progress(payload: &[u8]) -> Result<ProgressReport, MlError> {
    if payload.len() != 12 {
        return Err(MlError::BadPayload {
            kind: "PROGRESS",
            reason: "expected 12 bytes",
        });
    }
    let mut buf = payload;
    Ok(ProgressReport {
        mission_id: buf.get_u8(),
        status: buf.get_u8(),
        percent: buf.get_u8(),
        battery: buf.get_u8(),
        x: buf.get_f32(),
        y: buf.get_f32(),
    })
}

/// DONE payload, 2 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoneReport {
    pub mission_id: u8,
    /// 0 = success.
    pub result_code: u8,
}

pub fn encode_done(d: &DoneReport) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u8(d.mission_id);
    buf.put_u8(d.result_code);
    buf.freeze()
}

pub fn decode_done(payload: &[u8]) -> Result<DoneReport, MlError> {
    if payload.len() != 2 {
        return Err(MlError::BadPayload {
            kind: "DONE",
            reason: "expected 2 bytes",
        });
    }
    Ok(DoneReport {
        mission_id: payload[0],
        result_code: payload[1],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mission() -> MissionSpec {
        MissionSpec {
            mission_id: 4,
            task_number: 7,
            x: 10.0,
            y: -2.5,
            radius: 2.0,
            duration_s: 60.0,
        }
    }

    #[test]
    fn mission_message_round_trip() {
        let mission = sample_mission();
        let msg = build_message(
            MlType::Mission,
            9,
            3,
            2,
            FLAG_NEEDS_ACK,
            &encode_mission(&mission),
        );

        let (header, payload) = parse_message(&msg).unwrap();
        assert_eq!(header.version, VERSION);
        assert_eq!(header.kind(), Some(MlType::Mission));
        assert_eq!(header.hdr_len as usize, HEADER_LEN);
        assert_eq!(header.seq, 9);
        assert_eq!(header.ack, 3);
        assert_eq!(header.stream_id, 2);
        assert!(header.needs_ack());
        assert!(!header.is_retx());
        assert_eq!(decode_mission(&payload).unwrap(), mission);
    }

    #[test]
    fn empty_payload_round_trip() {
        let msg = build_message(MlType::Ready, 1, 0, 5, FLAG_NEEDS_ACK, &[]);
        assert_eq!(msg.len(), HEADER_LEN);
        let (header, payload) = parse_message(&msg).unwrap();
        assert_eq!(header.kind(), Some(MlType::Ready));
        assert_eq!(header.checksum, 0);
        assert!(payload.is_empty());
    }

    #[test]
    fn progress_round_trip() {
        let report = ProgressReport {
            mission_id: 2,
            status: 0,
            percent: 55,
            battery: 93,
            x: 4.5,
            y: 9.0,
        };
        let msg = build_message(
            MlType::Progress,
            12,
            0,
            1,
            FLAG_NEEDS_ACK,
            &encode_progress(&report),
        );
        let (_, payload) = parse_message(&msg).unwrap();
        assert_eq!(decode_progress(&payload).unwrap(), report);
    }

    #[test]
    fn done_round_trip() {
        let done = DoneReport {
            mission_id: 6,
            result_code: 0,
        };
        let msg = build_message(MlType::Done, 30, 0, 3, FLAG_NEEDS_ACK, &encode_done(&done));
        let (_, payload) = parse_message(&msg).unwrap();
        assert_eq!(decode_done(&payload).unwrap(), done);
    }

    #[test]
    fn truncated_datagram_rejected() {
        let err = parse_message(&[1, 0, 0]).unwrap_err();
        assert!(matches!(err, MlError::TooShort { .. }));
    }

    #[test]
    fn declared_length_must_match() {
        let msg = build_message(MlType::Done, 1, 0, 1, 0, &[6, 0]);
        // Chop one payload byte off.
        let err = parse_message(&msg[..msg.len() - 1]).unwrap_err();
        assert!(matches!(err, MlError::PayloadLengthMismatch { .. }));
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let msg = build_message(MlType::Done, 1, 0, 1, 0, &[6, 0]);
        let mut bytes = msg.to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let err = parse_message(&bytes).unwrap_err();
        assert!(matches!(err, MlError::ChecksumMismatch { .. }));
    }

    #[test]
    fn retx_rebuild_differs_only_in_flag() {
        let original = build_message(
            MlType::Mission,
            9,
            3,
            2,
            FLAG_NEEDS_ACK,
            &encode_mission(&sample_mission()),
        );
        let retx = set_retx(&original).unwrap();
        assert_eq!(retx.len(), original.len());
        let (h_orig, p_orig) = parse_message(&original).unwrap();
        let (h_retx, p_retx) = parse_message(&retx).unwrap();
        assert!(h_retx.is_retx());
        assert_eq!(h_retx.flags, h_orig.flags | FLAG_RETX);
        assert_eq!(h_retx.seq, h_orig.seq);
        assert_eq!(h_retx.ack, h_orig.ack);
        assert_eq!(p_retx, p_orig);
    }

    #[test]
    fn wrong_size_payloads_rejected() {
        assert!(decode_mission(&[0u8; 18]).is_err());
        assert!(decode_progress(&[0u8; 11]).is_err());
        assert!(decode_done(&[0u8; 3]).is_err());
    }

    #[test]
    fn mission_payload_is_19_bytes() {
        assert_eq!(encode_mission(&sample_mission()).len(), 19);
    }
}
