//! Binary frame format for the kettle link.
//!
//! Frame layout (6 bytes header + payload):
//!
//! ```text
//! +-------+------------+-----+--------+--------+----------+
//! | magic | frame_type | seq | len_lo | len_hi | checksum |
//! | 0xA5  |   1 byte   |  1  |   1    |   1    |  1 byte  |
//! +-------+------------+-----+--------+--------+----------+
//! | payload                                               |
//! | len bytes, payload[0] is the protocol version byte    |
//! +-------------------------------------------------------+
//! ```
//!
//! The checksum algorithm is selected by the payload's version byte, see
//! [`ChecksumKind`].

use crate::error::ProtocolError;
use crate::BUFFER_CAPACITY;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Magic byte that starts every frame.
pub const MAGIC: u8 = 0xA5;

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 6;

/// Offset of the checksum byte within the header.
const CHECKSUM_OFFSET: usize = 5;

/// Frame type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Unsolicited report or host command.
    Message,
    /// Reply to a specific request.
    Ack,
}

impl FrameType {
    pub fn as_u8(self) -> u8 {
        match self {
            FrameType::Message => 0x22,
            FrameType::Ack => 0x12,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x22 => Ok(FrameType::Message),
            0x12 => Ok(FrameType::Ack),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::Message => write!(f, "MESSAGE"),
            FrameType::Ack => write!(f, "ACK"),
        }
    }
}

/// Checksum algorithm, selected by payload byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// Sum of the five header bytes preceding the checksum.
    HeaderSum,
    /// Running subtraction over the whole frame, checksum slot read as 0x01.
    FrameDifference,
}

impl ChecksumKind {
    pub fn for_payload(payload: &[u8]) -> Self {
        if payload.first() == Some(&1) {
            ChecksumKind::FrameDifference
        } else {
            ChecksumKind::HeaderSum
        }
    }
}

/// Computes the checksum for a frame given its header fields and payload.
pub fn checksum(frame_type: u8, seq: u8, len: u16, payload: &[u8]) -> u8 {
    let [len_lo, len_hi] = len.to_le_bytes();
    let header = [MAGIC, frame_type, seq, len_lo, len_hi];

    match ChecksumKind::for_payload(payload) {
        ChecksumKind::HeaderSum => header.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)),
        ChecksumKind::FrameDifference => header
            .iter()
            .chain(std::iter::once(&0x01))
            .chain(payload.iter())
            .fold(0u8, |acc, b| acc.wrapping_sub(*b)),
    }
}

/// Verifies the checksum of a complete raw frame (header + payload).
pub(crate) fn verify(raw: &[u8]) -> bool {
    if raw.len() < HEADER_SIZE {
        return false;
    }
    let len = u16::from_le_bytes([raw[3], raw[4]]);
    checksum(raw[1], raw[2], len, &raw[HEADER_SIZE..]) == raw[CHECKSUM_OFFSET]
}

/// A parsed kettle frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message or ack.
    pub frame_type: FrameType,
    /// Sequence number.
    pub seq: u8,
    /// Frame payload.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, seq: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            seq,
            payload: payload.into(),
        }
    }

    pub fn message(seq: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Message, seq, payload)
    }

    pub fn ack(seq: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Ack, seq, payload)
    }

    /// Protocol version byte embedded in the payload.
    pub fn version_byte(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Command id embedded in the payload.
    pub fn command_id(&self) -> Option<u8> {
        self.payload.get(1).copied()
    }

    /// Total encoded length (header + payload).
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let total = self.encoded_len();
        if total > BUFFER_CAPACITY {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: BUFFER_CAPACITY,
            });
        }

        let len = self.payload.len() as u16;
        let frame_type = self.frame_type.as_u8();

        buf.reserve(total);
        buf.put_u8(MAGIC);
        buf.put_u8(frame_type);
        buf.put_u8(self.seq);
        buf.put_u16_le(len);
        buf.put_u8(checksum(frame_type, self.seq, len, &self.payload));
        buf.put_slice(&self.payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_my_temp_packet() {
        let frame = Frame::message(0x1C, vec![0x01, 0xF3, 0xA3, 0x00, 0xB3]);
        let encoded = frame.encode().unwrap();
        assert_eq!(
            encoded.as_ref(),
            &[0xA5, 0x22, 0x1C, 0x05, 0x00, 0xCD, 0x01, 0xF3, 0xA3, 0x00, 0xB3]
        );
    }

    #[test]
    fn test_v1_checksum_compact_status() {
        let payload = [
            0x01, 0x41, 0x40, 0x00, 0x00, 0x00, 0xB3, 0x8F, 0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(checksum(0x22, 0xB5, 12, &payload), 0xB3);
    }

    #[test]
    fn test_v0_checksum_is_header_sum() {
        let payload = [0x00, 0x40, 0x40, 0x00];
        // 0xA5 + 0x22 + 0x10 + 0x04 + 0x00 = 0xDB
        assert_eq!(checksum(0x22, 0x10, 4, &payload), 0xDB);
        assert_eq!(ChecksumKind::for_payload(&payload), ChecksumKind::HeaderSum);
    }

    #[test]
    fn test_v0_checksum_wraps() {
        // 0xA5 + 0x12 + 0xFF + 0x04 = 0x1BA
        assert_eq!(checksum(0x12, 0xFF, 4, &[0x00, 0x41, 0x40, 0x00]), 0xBA);
    }

    #[test]
    fn test_empty_payload_uses_header_sum() {
        assert_eq!(ChecksumKind::for_payload(&[]), ChecksumKind::HeaderSum);
        let frame = Frame::ack(0, Bytes::new());
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), HEADER_SIZE);
        assert!(verify(&encoded));
    }

    #[test]
    fn test_verify_detects_corruption() {
        let frame = Frame::message(0x42, vec![0x01, 0x40, 0x40, 0x00]);
        let mut encoded = frame.encode().unwrap();
        assert!(verify(&encoded));

        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(!verify(&encoded));
    }

    #[test]
    fn test_frame_type_roundtrip() {
        assert_eq!(FrameType::from_u8(0x22).unwrap(), FrameType::Message);
        assert_eq!(FrameType::from_u8(0x12).unwrap(), FrameType::Ack);
        assert!(matches!(
            FrameType::from_u8(0x99),
            Err(ProtocolError::UnknownFrameType(0x99))
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let frame = Frame::message(1, vec![0u8; BUFFER_CAPACITY]);
        let result = frame.encode();
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::ack(7, vec![0x01, 0xF2, 0xA3, 0x00, 0x00]);
        assert_eq!(frame.version_byte(), Some(0x01));
        assert_eq!(frame.command_id(), Some(0xF2));
        assert_eq!(frame.encoded_len(), 11);

        let empty = Frame::ack(7, Bytes::new());
        assert_eq!(empty.command_id(), None);
    }
}
