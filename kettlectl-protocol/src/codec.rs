//! Receive-side frame extraction and send-side frame building.
//!
//! The [`Decoder`] owns a bounded receive buffer with a read cursor. Inbound
//! BLE notifications may split or concatenate frames arbitrarily; the decoder
//! scans for the magic byte, validates length and checksum, and skips one
//! byte at a time on any mismatch until it is back in sync.
//!
//! The [`Encoder`] owns the send buffer for the single outbound frame in
//! flight and hands it out in transport-sized chunks.

use crate::frame::{self, Frame, FrameType, HEADER_SIZE, MAGIC};
use crate::{ProtocolError, BUFFER_CAPACITY, CHUNK_SIZE, MAX_PAYLOAD_SIZE};
use bytes::{Buf, Bytes, BytesMut};

/// Outcome of a single extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    /// A validated frame; the cursor has moved past it.
    Frame(Frame),
    /// A magic byte was found but the frame is not fully buffered yet.
    Incomplete,
    /// No magic byte remains in the unread region.
    Exhausted,
}

/// Bounded receive buffer that extracts frames from a byte stream.
pub struct Decoder {
    buffer: BytesMut,
    cursor: usize,
    capacity: usize,
    max_payload: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_limits(BUFFER_CAPACITY, MAX_PAYLOAD_SIZE)
    }

    /// Creates a decoder with explicit buffer capacity and payload bound.
    pub fn with_limits(capacity: usize, max_payload: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            cursor: 0,
            capacity,
            max_payload,
        }
    }

    /// Appends inbound bytes.
    ///
    /// If the buffer would exceed its capacity, every buffered byte is
    /// dropped first. Data larger than the whole capacity is dropped as well.
    /// Returns `false` when anything was discarded.
    pub fn append(&mut self, data: &[u8]) -> bool {
        let mut intact = true;

        if self.buffer.len() + data.len() > self.capacity {
            tracing::warn!(
                "Receive buffer overflow ({} + {} > {}), clearing",
                self.buffer.len(),
                data.len(),
                self.capacity
            );
            self.clear();
            intact = false;
        }

        if data.len() > self.capacity {
            tracing::warn!("Dropping {} byte notification larger than buffer", data.len());
            return false;
        }

        self.buffer.extend_from_slice(data);
        intact
    }

    /// Attempts to extract the next frame starting at the cursor.
    pub fn process_next_frame(&mut self) -> Extract {
        loop {
            let offset = match self.buffer[self.cursor..].iter().position(|&b| b == MAGIC) {
                Some(offset) => offset,
                None => {
                    self.cursor = self.buffer.len();
                    return Extract::Exhausted;
                }
            };
            self.cursor += offset;

            let available = self.buffer.len() - self.cursor;
            if available < HEADER_SIZE {
                return Extract::Incomplete;
            }

            let start = self.cursor;
            let len = u16::from_le_bytes([self.buffer[start + 3], self.buffer[start + 4]]) as usize;
            if len > self.max_payload {
                tracing::trace!("Skipping header with length {} at {}", len, start);
                self.cursor += 1;
                continue;
            }

            let total = HEADER_SIZE + len;
            if available < total {
                return Extract::Incomplete;
            }

            let raw = &self.buffer[start..start + total];
            if !frame::verify(raw) {
                tracing::trace!("Checksum mismatch at {}, resyncing", start);
                self.cursor += 1;
                continue;
            }

            let type_byte = raw[1];
            let seq = raw[2];
            let payload = Bytes::copy_from_slice(&raw[HEADER_SIZE..]);
            self.cursor += total;

            match FrameType::from_u8(type_byte) {
                Ok(frame_type) => {
                    return Extract::Frame(Frame {
                        frame_type,
                        seq,
                        payload,
                    })
                }
                Err(e) => {
                    tracing::debug!("Ignoring frame: {}", e);
                    continue;
                }
            }
        }
    }

    /// Returns the next frame, or `None` once the buffer is exhausted or
    /// holds only a partial frame.
    pub fn next_frame(&mut self) -> Option<Frame> {
        match self.process_next_frame() {
            Extract::Frame(frame) => Some(frame),
            Extract::Incomplete | Extract::Exhausted => None,
        }
    }

    /// Drops consumed bytes so the unread tail starts at offset 0.
    pub fn compact(&mut self) {
        if self.cursor == 0 {
            return;
        }
        if self.cursor >= self.buffer.len() {
            self.buffer.clear();
        } else {
            self.buffer.advance(self.cursor);
        }
        self.cursor = 0;
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Returns the number of bytes currently buffered, consumed or not.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Send buffer holding one built frame.
pub struct Encoder {
    buffer: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(BUFFER_CAPACITY),
        }
    }

    /// Replaces the buffer contents with the encoded frame.
    ///
    /// On failure the buffer is left empty.
    pub fn build(&mut self, frame: &Frame) -> Result<usize, ProtocolError> {
        self.buffer.clear();
        frame.encode_into(&mut self.buffer)?;
        Ok(self.buffer.len())
    }

    /// The built frame bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of transport writes needed for the built frame.
    pub fn chunk_count(&self) -> usize {
        self.buffer.len().div_ceil(CHUNK_SIZE)
    }

    /// Returns chunk `index` of the built frame.
    pub fn chunk(&self, index: usize) -> Option<&[u8]> {
        self.buffer.chunks(CHUNK_SIZE).nth(index)
    }

    /// Iterates over all chunks in send order.
    pub fn chunks(&self) -> std::slice::Chunks<'_, u8> {
        self.buffer.chunks(CHUNK_SIZE)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
