//! Protocol error types and acknowledgment status codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while building frames or handling key material.
///
/// Inbound framing problems (bad magic, bad checksum, garbage lengths) are
/// not errors: the decoder resynchronizes over them.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("invalid registration key: {0}")]
    InvalidKey(String),

    #[error("invalid packet capture: {0}")]
    InvalidCapture(String),

    #[error("hex error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Status byte carried in an ack payload at offset 4.
///
/// The kettle reports 0 for success; any other value is a command-specific
/// failure. Acks shorter than 5 bytes carry no status and count as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Failed(u8),
}

impl AckStatus {
    /// Reads the status byte from an ack payload.
    pub fn from_payload(payload: &[u8]) -> Self {
        match payload.get(4) {
            Some(&code) => Self::from_code(code),
            None => AckStatus::Ok,
        }
    }

    pub fn from_code(code: u8) -> Self {
        if code == 0 {
            AckStatus::Ok
        } else {
            AckStatus::Failed(code)
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            AckStatus::Ok => 0,
            AckStatus::Failed(code) => *code,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, AckStatus::Ok)
    }

    /// Human-readable meaning of this status for the given command id.
    pub fn describe(&self, command_id: u8) -> &'static str {
        match (self, command_id) {
            (AckStatus::Ok, _) => "accepted",
            (AckStatus::Failed(1), crate::message::CMD_REGISTER) => "device not in pairing mode",
            (AckStatus::Failed(1), crate::message::CMD_HELLO) => "registration key rejected",
            (AckStatus::Failed(_), _) => "rejected by device",
        }
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckStatus::Ok => write!(f, "OK"),
            AckStatus::Failed(code) => write!(f, "FAILED({:#04x})", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CMD_HELLO, CMD_REGISTER, CMD_SET_MODE};

    #[test]
    fn test_ack_status_from_payload() {
        assert_eq!(AckStatus::from_payload(&[0x01, 0x81, 0xD1, 0x00]), AckStatus::Ok);
        assert_eq!(
            AckStatus::from_payload(&[0x01, 0x81, 0xD1, 0x00, 0x00]),
            AckStatus::Ok
        );
        assert_eq!(
            AckStatus::from_payload(&[0x01, 0x81, 0xD1, 0x00, 0x01]),
            AckStatus::Failed(1)
        );
        assert_eq!(AckStatus::from_payload(&[]), AckStatus::Ok);
    }

    #[test]
    fn test_ack_status_describe() {
        assert_eq!(
            AckStatus::Failed(1).describe(CMD_REGISTER),
            "device not in pairing mode"
        );
        assert_eq!(
            AckStatus::Failed(1).describe(CMD_HELLO),
            "registration key rejected"
        );
        assert_eq!(AckStatus::Failed(1).describe(CMD_SET_MODE), "rejected by device");
        assert_eq!(AckStatus::Ok.describe(CMD_HELLO), "accepted");
    }

    #[test]
    fn test_ack_status_display() {
        assert_eq!(format!("{}", AckStatus::Ok), "OK");
        assert_eq!(format!("{}", AckStatus::Failed(2)), "FAILED(0x02)");
        assert_eq!(AckStatus::Failed(2).code(), 2);
        assert!(!AckStatus::Failed(2).is_ok());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::FrameTooLarge { size: 600, max: 512 };
        assert!(err.to_string().contains("600"));

        let err = ProtocolError::BufferTooSmall {
            needed: 9,
            available: 4,
        };
        assert!(err.to_string().contains('9'));

        let err = ProtocolError::UnknownFrameType(0x33);
        assert!(err.to_string().contains("0x33"));

        let err = ProtocolError::UnsupportedVersion(7);
        assert!(err.to_string().contains('7'));

        let err = ProtocolError::InvalidKey("too short".to_string());
        assert!(err.to_string().contains("too short"));
    }
}
