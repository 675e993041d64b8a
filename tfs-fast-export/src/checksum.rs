use md5::{Digest, Md5};

use crate::blocks::BlockStream;
use crate::error::{ExportError, Result};

/// Wraps a block sequence and folds an MD5 over everything that passes
/// through. At end-of-stream the running digest is compared against the
/// digest recorded in the database; a mismatch means the decompression or
/// undeltification went wrong and aborts the run.
pub struct Md5Validating<S> {
    inner: S,
    expected: Vec<u8>,
    running: Md5,
    context: String,
    finished: bool,
}

impl<S: BlockStream> Md5Validating<S> {
    pub fn new(expected: Vec<u8>, inner: S, context: impl Into<String>) -> Self {
        Md5Validating {
            inner,
            expected,
            running: Md5::new(),
            context: context.into(),
            finished: false,
        }
    }
}

impl<S: BlockStream> BlockStream for Md5Validating<S> {
    fn len_hint(&self) -> Option<u64> {
        self.inner.len_hint()
    }

    fn next_block(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        match self.inner.next_block()? {
            Some(block) => {
                self.running.update(&block);
                Ok(Some(block))
            }
            None => {
                self.finished = true;
                let digest = self.running.clone().finalize();
                if digest.as_slice() != self.expected.as_slice() {
                    return Err(ExportError::ChecksumMismatch {
                        context: self.context.clone(),
                    });
                }
                Ok(None)
            }
        }
    }
}
