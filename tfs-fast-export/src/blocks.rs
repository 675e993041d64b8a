use std::io::{self, Read};

use crate::error::Result;

/// A lazy, single-pass sequence of byte blocks.
///
/// File bodies flow through the pipeline as block sequences so that no stage
/// ever has to buffer a whole file. `len_hint` reports the declared total
/// length where one is known; consumers that need an exact length verify it
/// themselves while draining the stream.
pub trait BlockStream {
    /// Declared total length of the stream, if known up front.
    fn len_hint(&self) -> Option<u64>;

    /// Next block, or `None` at end-of-stream. Not restartable.
    fn next_block(&mut self) -> Result<Option<Vec<u8>>>;
}

impl BlockStream for Box<dyn BlockStream> {
    fn len_hint(&self) -> Option<u64> {
        (**self).len_hint()
    }

    fn next_block(&mut self) -> Result<Option<Vec<u8>>> {
        (**self).next_block()
    }
}

/// An in-memory block sequence.
pub struct MemoryBlocks {
    blocks: std::vec::IntoIter<Vec<u8>>,
    total: u64,
}

impl MemoryBlocks {
    pub fn new(blocks: Vec<Vec<u8>>) -> Self {
        let total = blocks.iter().map(|b| b.len() as u64).sum();
        MemoryBlocks {
            blocks: blocks.into_iter(),
            total,
        }
    }

    /// A stream with zero blocks and zero length.
    pub fn empty() -> Self {
        MemoryBlocks::new(Vec::new())
    }
}

impl BlockStream for MemoryBlocks {
    fn len_hint(&self) -> Option<u64> {
        Some(self.total)
    }

    fn next_block(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.blocks.next())
    }
}

/// Drain a stream into a single contiguous buffer.
pub fn collect(stream: &mut dyn BlockStream) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(stream.len_hint().unwrap_or(0) as usize);
    while let Some(block) = stream.next_block()? {
        out.extend_from_slice(&block);
    }
    Ok(out)
}

/// Adapter presenting a [`BlockStream`] as a `std::io::Read`.
///
/// Used to feed block sequences into readers such as the gzip inflater.
pub struct BlockReader<S> {
    inner: S,
    current: Vec<u8>,
    pos: usize,
}

impl<S: BlockStream> BlockReader<S> {
    pub fn new(inner: S) -> Self {
        BlockReader {
            inner,
            current: Vec::new(),
            pos: 0,
        }
    }
}

impl<S: BlockStream> Read for BlockReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.current.len() {
            match self.inner.next_block().map_err(io::Error::from)? {
                Some(block) => {
                    self.current = block;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
