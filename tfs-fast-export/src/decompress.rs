use std::io::Read;

use flate2::read::GzDecoder;

use crate::blocks::{BlockReader, BlockStream};
use crate::error::{ExportError, Result};

/// Read granularity for inflated output blocks.
const INFLATE_BLOCK_SIZE: usize = 1_000_000;

/// Per-blob compression code as stored in the file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            other => Err(ExportError::UnknownCompression(other)),
        }
    }
}

/// Decompress a blob block sequence according to its compression code.
///
/// Uncompressed blobs pass through untouched; gzip blobs are inflated
/// incrementally (gzip wrapping, not bare deflate) so that only one block is
/// resident at a time.
pub fn decompress(
    compression: Compression,
    blocks: Box<dyn BlockStream>,
) -> Box<dyn BlockStream> {
    match compression {
        Compression::None => blocks,
        Compression::Gzip => Box::new(GzipBlocks {
            reader: GzDecoder::new(BlockReader::new(blocks)),
            done: false,
        }),
    }
}

struct GzipBlocks {
    reader: GzDecoder<BlockReader<Box<dyn BlockStream>>>,
    done: bool,
}

impl BlockStream for GzipBlocks {
    fn len_hint(&self) -> Option<u64> {
        // The inflated length is not recorded alongside the blob.
        None
    }

    fn next_block(&mut self) -> Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        let mut block = vec![0u8; INFLATE_BLOCK_SIZE];
        let mut filled = 0usize;
        while filled < block.len() {
            let n = self.reader.read(&mut block[filled..])?;
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        block.truncate(filled);
        Ok(Some(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{collect, MemoryBlocks};
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert!(matches!(
            Compression::from_code(7),
            Err(ExportError::UnknownCompression(7))
        ));
    }

    #[test]
    fn pass_through_keeps_blocks() {
        let stream: Box<dyn BlockStream> =
            Box::new(MemoryBlocks::new(vec![b"abc".to_vec(), b"def".to_vec()]));
        let mut s = decompress(Compression::None, stream);
        assert_eq!(collect(&mut s).unwrap(), b"abcdef");
    }

    #[test]
    fn gzip_inflates_across_block_boundaries() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let compressed = gzip(&payload);
        // Feed the compressed bytes in awkwardly small blocks.
        let blocks: Vec<Vec<u8>> = compressed.chunks(7).map(|c| c.to_vec()).collect();
        let stream: Box<dyn BlockStream> = Box::new(MemoryBlocks::new(blocks));
        let mut s = decompress(Compression::Gzip, stream);
        assert_eq!(collect(&mut s).unwrap(), payload);
    }
}
