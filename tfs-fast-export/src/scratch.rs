use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::blocks::BlockStream;
use crate::error::{ExportError, Result};

/// Default block size when streaming a scratch file back out.
pub const READ_BLOCK_SIZE: usize = 1_000_000;

/// Scoped on-disk storage for transient intermediate files.
///
/// Entries are keyed by name and bucketed into 256 hex-named subdirectories
/// to keep directory fan-out bounded. The whole tree is removed when the
/// value is dropped (or `cleanup` is called explicitly).
pub struct ScratchDir {
    location: Location,
}

enum Location {
    Owned(tempfile::TempDir),
    External(PathBuf),
}

impl ScratchDir {
    /// Create scratch storage at a caller-supplied location, or in a fresh
    /// system temp directory when `location` is `None`.
    ///
    /// An existing external location is rejected unless `clear_if_existing`
    /// is set, in which case it is wiped and recreated.
    pub fn new(location: Option<&Path>, clear_if_existing: bool) -> Result<Self> {
        match location {
            Some(loc) => {
                if loc.exists() {
                    if !clear_if_existing {
                        return Err(ExportError::invalid_options(format!(
                            "temporary directory location '{}' already exists",
                            loc.display()
                        )));
                    }
                    fs::remove_dir_all(loc)?;
                }
                fs::create_dir_all(loc)?;
                Ok(ScratchDir {
                    location: Location::External(loc.to_path_buf()),
                })
            }
            None => Ok(ScratchDir {
                location: Location::Owned(tempfile::tempdir()?),
            }),
        }
    }

    pub fn location(&self) -> &Path {
        match &self.location {
            Location::Owned(dir) => dir.path(),
            Location::External(path) => path,
        }
    }

    /// Map an entry name to its on-disk path, creating the shard directory
    /// on demand. Names must not navigate out of the tree.
    pub fn path_of(&self, name: &str) -> Result<PathBuf> {
        if name.contains("..") {
            return Err(ExportError::invalid_options(format!(
                "name '{name}' must not contain parent dir navigation"
            )));
        }
        let shard = self.location().join(format!("{:02X}", bucket(name)));
        if !shard.exists() {
            fs::create_dir_all(&shard)?;
        }
        Ok(shard.join(name))
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.path_of(name)?.exists())
    }

    /// Create a new entry, filled from `content` when given. Returns the
    /// full path of the new file.
    pub fn create(
        &self,
        name: &str,
        mut content: Option<&mut dyn BlockStream>,
    ) -> Result<PathBuf> {
        let path = self.path_of(name)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        if let Some(stream) = content.as_mut() {
            while let Some(block) = stream.next_block()? {
                file.write_all(&block)?;
            }
        }
        file.flush()?;
        Ok(path)
    }

    /// Create a new entry from an in-memory buffer.
    pub fn create_from_bytes(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_of(name)?;
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Stream an entry back out in blocks. With `delete_after`, the file is
    /// removed once the last block has been yielded.
    pub fn read(&self, name: &str, block_size: usize, delete_after: bool) -> Result<FileBlocks> {
        let path = self.path_of(name)?;
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(FileBlocks {
            file: Some(file),
            path,
            len,
            block_size,
            delete_after,
        })
    }

    /// Remove the whole tree now rather than at end of scope.
    pub fn cleanup(self) {}
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Location::External(path) = &self.location {
            let _ = fs::remove_dir_all(path);
        }
    }
}

fn bucket(name: &str) -> u8 {
    // FNV-1a folded down to the shard count.
    let mut h: u64 = 0xcbf29ce484222325;
    for b in name.as_bytes() {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x100000001b3);
    }
    (h % 256) as u8
}

/// Block stream over a scratch file, optionally self-deleting at EOF.
pub struct FileBlocks {
    file: Option<File>,
    path: PathBuf,
    len: u64,
    block_size: usize,
    delete_after: bool,
}

impl BlockStream for FileBlocks {
    fn len_hint(&self) -> Option<u64> {
        Some(self.len)
    }

    fn next_block(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };
        let mut block = vec![0u8; self.block_size];
        let mut filled = 0usize;
        while filled < block.len() {
            let n = file.read(&mut block[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            self.file = None;
            if self.delete_after {
                fs::remove_file(&self.path)?;
            }
            return Ok(None);
        }
        block.truncate(filled);
        Ok(Some(block))
    }
}
