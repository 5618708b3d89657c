//! Outbound send session.
//!
//! At most one frame is in flight. Its chunks are released one at a time,
//! each gated on the transport reporting the previous write complete.

use crate::error::CoreError;
use kettlectl_protocol::{Encoder, Frame};

/// Result of a write-completion report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No write was outstanding.
    Ignored,
    /// More chunks remain; the next one may be released.
    Continue,
    /// The last chunk was written; the session is closed.
    Finished,
    /// The write failed; the session was abandoned.
    Failed,
}

/// The single in-flight outbound frame.
pub struct SendSession {
    encoder: Encoder,
    chunk_index: usize,
    total_chunks: usize,
    awaiting_write: bool,
}

impl SendSession {
    pub fn new() -> Self {
        Self {
            encoder: Encoder::new(),
            chunk_index: 0,
            total_chunks: 0,
            awaiting_write: false,
        }
    }

    /// Returns whether a frame is still being written.
    pub fn is_active(&self) -> bool {
        self.chunk_index < self.total_chunks || self.awaiting_write
    }

    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn awaiting_write(&self) -> bool {
        self.awaiting_write
    }

    /// Error describing the current session, for rejected sends.
    pub fn busy_error(&self) -> CoreError {
        CoreError::Busy {
            chunk_index: self.chunk_index,
            total_chunks: self.total_chunks,
            awaiting_write: self.awaiting_write,
        }
    }

    /// Builds `frame` into the send buffer and opens a session for it.
    pub fn begin(&mut self, frame: &Frame) -> Result<usize, CoreError> {
        if self.is_active() {
            return Err(self.busy_error());
        }

        if let Err(e) = self.encoder.build(frame) {
            self.reset();
            return Err(e.into());
        }

        self.chunk_index = 0;
        self.total_chunks = self.encoder.chunk_count();
        self.awaiting_write = false;
        Ok(self.total_chunks)
    }

    /// Releases the next chunk if no write is outstanding.
    pub fn next_chunk(&mut self) -> Option<&[u8]> {
        if self.awaiting_write || self.chunk_index >= self.total_chunks {
            return None;
        }
        let chunk = self.encoder.chunk(self.chunk_index)?;
        self.awaiting_write = true;
        Some(chunk)
    }

    /// Records completion of the outstanding write.
    pub fn on_write_complete(&mut self, success: bool) -> WriteOutcome {
        if !self.awaiting_write {
            return WriteOutcome::Ignored;
        }
        self.awaiting_write = false;

        if !success {
            self.reset();
            return WriteOutcome::Failed;
        }

        self.chunk_index += 1;
        if self.chunk_index >= self.total_chunks {
            self.reset();
            WriteOutcome::Finished
        } else {
            WriteOutcome::Continue
        }
    }

    /// Drops any in-flight frame.
    pub fn reset(&mut self) {
        self.encoder.clear();
        self.chunk_index = 0;
        self.total_chunks = 0;
        self.awaiting_write = false;
    }
}

impl Default for SendSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kettlectl_protocol::BUFFER_CAPACITY;

    fn hello_sized_frame() -> Frame {
        Frame::message(0, vec![0x01; 36])
    }

    #[test]
    fn test_chunks_released_one_at_a_time() {
        let mut session = SendSession::new();
        assert_eq!(session.begin(&hello_sized_frame()).unwrap(), 3);
        assert!(session.is_active());

        let first = session.next_chunk().unwrap().to_vec();
        assert_eq!(first.len(), 20);
        assert!(session.next_chunk().is_none());

        assert_eq!(session.on_write_complete(true), WriteOutcome::Continue);
        assert_eq!(session.next_chunk().unwrap().len(), 20);
        assert_eq!(session.on_write_complete(true), WriteOutcome::Continue);
        assert_eq!(session.next_chunk().unwrap().len(), 2);
        assert_eq!(session.on_write_complete(true), WriteOutcome::Finished);

        assert!(!session.is_active());
        assert!(session.next_chunk().is_none());
    }

    #[test]
    fn test_begin_rejected_while_active() {
        let mut session = SendSession::new();
        session.begin(&hello_sized_frame()).unwrap();
        session.next_chunk().unwrap();

        let err = session.begin(&Frame::message(1, vec![0x01, 0x40, 0x40, 0x00]));
        assert!(matches!(
            err,
            Err(CoreError::Busy {
                chunk_index: 0,
                total_chunks: 3,
                awaiting_write: true
            })
        ));
        assert_eq!(session.total_chunks(), 3);
        assert!(session.awaiting_write());
    }

    #[test]
    fn test_failed_write_abandons_session() {
        let mut session = SendSession::new();
        session.begin(&hello_sized_frame()).unwrap();
        session.next_chunk().unwrap();
        assert_eq!(session.on_write_complete(false), WriteOutcome::Failed);
        assert!(!session.is_active());
        assert_eq!(session.chunk_index(), 0);
    }

    #[test]
    fn test_spurious_completion_ignored() {
        let mut session = SendSession::new();
        assert_eq!(session.on_write_complete(true), WriteOutcome::Ignored);

        session.begin(&hello_sized_frame()).unwrap();
        assert_eq!(session.on_write_complete(true), WriteOutcome::Ignored);
        assert_eq!(session.chunk_index(), 0);
    }

    #[test]
    fn test_oversized_frame_fails_to_build() {
        let mut session = SendSession::new();
        let result = session.begin(&Frame::message(0, vec![0u8; BUFFER_CAPACITY]));
        assert!(matches!(result, Err(CoreError::Protocol(_))));
        assert!(!session.is_active());
    }

    proptest::proptest! {
        #[test]
        fn prop_chunks_reassemble_frame(
            seq in proptest::prelude::any::<u8>(),
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 2..=250),
        ) {
            let frame = Frame::message(seq, payload);
            let expected = frame.encode().unwrap();

            let mut session = SendSession::new();
            let total = session.begin(&frame).unwrap();
            proptest::prop_assert_eq!(total, expected.len().div_ceil(20));

            let mut written = Vec::new();
            while let Some(chunk) = session.next_chunk() {
                proptest::prop_assert!(chunk.len() <= 20);
                written.extend_from_slice(chunk);
                session.on_write_complete(true);
            }

            proptest::prop_assert!(!session.is_active());
            proptest::prop_assert_eq!(&written[..], &expected[..]);
        }
    }
}
