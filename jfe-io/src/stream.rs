//! Chunked input loop shared by the encrypt, decrypt and metadata passes
//!
//! The loop reads into a pooled buffer, hands the filled prefix to a
//! processor, and carries whatever the processor did not consume to the
//! front of the buffer for the next read. The buffer only grows when it is
//! completely filled by a single unfinished token.

use crate::{CancellationToken, StreamConfig};
use jfe_codec::BufferPool;
use jfe_format::{JfeError, Result};
use std::io::{ErrorKind, Read};

/// What a processor did with one chunk.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkOutcome {
    /// Bytes at the front of the chunk that are fully processed
    pub consumed: usize,
    /// Stop reading; the processor has everything it needs
    pub stop: bool,
}

impl ChunkOutcome {
    pub(crate) fn consumed(consumed: usize) -> Self {
        Self {
            consumed,
            stop: false,
        }
    }
}

/// Receives successive chunks of input.
pub(crate) trait ChunkProcessor {
    /// Process `chunk`; `is_final` is set once the source is exhausted.
    fn process_chunk(&mut self, chunk: &[u8], is_final: bool) -> Result<ChunkOutcome>;
}

/// Feed `source` through `processor`, returning the number of bytes read.
pub(crate) fn drive<R: Read, P: ChunkProcessor>(
    source: &mut R,
    processor: &mut P,
    config: &StreamConfig,
    pool: &BufferPool,
    cancel: &CancellationToken,
) -> Result<u64> {
    let limits = &config.limits;
    let initial = config.initial_buffer_size.min(limits.max_buffer_bytes);
    let mut buffer = pool.rent_zeroed(initial);
    let mut filled = 0usize;
    let mut bytes_read = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(JfeError::Cancelled);
        }

        let read = read_some(source, &mut buffer[filled..])?;
        filled += read;
        bytes_read += read as u64;
        let is_final = read == 0;

        let outcome = processor.process_chunk(&buffer[..filled], is_final)?;
        if outcome.stop || is_final {
            return Ok(bytes_read);
        }

        let leftover = filled - outcome.consumed;
        if leftover == buffer.len() {
            buffer.grow(
                filled,
                limits.buffer_growth_min_increment,
                limits.max_buffer_bytes,
            )?;
        } else if outcome.consumed > 0 {
            buffer.copy_within(outcome.consumed..filled, 0);
        }
        filled = leftover;
    }
}

fn read_some<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    loop {
        match source.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
