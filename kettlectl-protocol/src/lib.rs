//! # kettlectl-protocol
//!
//! Wire protocol for Cosori BLE kettles.
//!
//! This crate provides:
//! - Binary framing with magic byte, length and version-dependent checksum
//! - A bounded receive buffer with byte-at-a-time resynchronization
//! - Outbound frame building and 20-byte transport chunking
//! - Command payload builders for both protocol revisions
//! - Compact and extended status parsers
//! - Registration key handling

pub mod codec;
pub mod error;
pub mod frame;
pub mod key;
pub mod message;
pub mod status;

pub use codec::{Decoder, Encoder, Extract};
pub use error::{AckStatus, ProtocolError};
pub use frame::{Frame, FrameType, HEADER_SIZE, MAGIC};
pub use key::RegistrationKey;
pub use message::{resolve_heat_mode, Command, HeatPlan, Mode, ProtocolVersion};
pub use status::{CompactStatus, ExtendedStatus, StatusLayout};

/// Maximum payload size accepted when extracting frames.
pub const MAX_PAYLOAD_SIZE: usize = 256;

/// Capacity of the receive and send buffers.
pub const BUFFER_CAPACITY: usize = 512;

/// Largest write the BLE characteristic accepts.
pub const CHUNK_SIZE: usize = 20;

/// Lowest temperature the kettle accepts as a target (°F).
pub const MIN_TEMP_F: u8 = 104;

/// Highest temperature the kettle accepts as a target (°F).
pub const MAX_TEMP_F: u8 = 212;
