//! Transport seam between the engine and the BLE link.

use std::collections::vec_deque::Drain;
use std::collections::VecDeque;
use std::io;

/// Accepts one outbound chunk (at most 20 bytes) per call.
///
/// Completion is reported back to the engine separately through
/// `on_write_complete`, so `send` only has to queue or start the write.
pub trait Transport {
    fn send(&mut self, chunk: &[u8]) -> io::Result<()>;
}

impl<F> Transport for F
where
    F: FnMut(&[u8]) -> io::Result<()>,
{
    fn send(&mut self, chunk: &[u8]) -> io::Result<()> {
        self(chunk)
    }
}

/// Transport that queues chunks for the host to pick up.
#[derive(Debug, Default)]
pub struct Outbox {
    chunks: VecDeque<Vec<u8>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and yields queued chunks in send order.
    pub fn drain(&mut self) -> Drain<'_, Vec<u8>> {
        self.chunks.drain(..)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Transport for Outbox {
    fn send(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.chunks.push_back(chunk.to_vec());
        Ok(())
    }
}
