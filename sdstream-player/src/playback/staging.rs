//! Compressed staging buffer
//!
//! Holds bytes read from storage that the decoder has not consumed yet.
//! Owned exclusively by the producer context. Valid bytes always start at
//! offset 0; `compact` shifts the remainder down after every decode attempt.

use crate::error::Result;
use crate::storage::StorageHandle;
use tracing::trace;

/// Producer-owned byte staging area in front of the decoder
#[derive(Debug)]
pub struct StagingBuffer {
    data: Box<[u8]>,
    fill: usize,
    end_of_stream: bool,
}

impl StagingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            fill: 0,
            end_of_stream: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently valid
    pub fn fill_level(&self) -> usize {
        self.fill
    }

    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    /// Valid bytes, starting at offset 0
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.fill]
    }

    /// Storage reported a short read; no more bytes will arrive
    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Less than half full
    pub fn needs_refill(&self) -> bool {
        self.fill < self.data.len() / 2
    }

    /// Read up to `min(free space, chunk_size)` bytes from `handle`.
    ///
    /// A read shorter than requested marks end-of-stream. Returns the number
    /// of bytes appended.
    pub fn refill(&mut self, handle: &mut dyn StorageHandle, chunk_size: usize) -> Result<usize> {
        if self.end_of_stream {
            return Ok(0);
        }
        let requested = (self.data.len() - self.fill).min(chunk_size);
        if requested == 0 {
            return Ok(0);
        }

        let read = handle.read(&mut self.data[self.fill..self.fill + requested])?;
        self.fill += read;
        if read < requested {
            trace!("Short read ({} of {} bytes), end of stream", read, requested);
            self.end_of_stream = true;
        }
        Ok(read)
    }

    /// Drop the first `consumed` bytes and move the rest to offset 0
    pub fn compact(&mut self, consumed: usize) {
        let consumed = consumed.min(self.fill);
        if consumed == 0 {
            return;
        }
        self.data.copy_within(consumed..self.fill, 0);
        self.fill -= consumed;
    }

    /// Forget all staged bytes and the end-of-stream mark
    pub fn reset(&mut self) {
        self.fill = 0;
        self.end_of_stream = false;
    }
}
