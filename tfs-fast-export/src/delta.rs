use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{ExportError, Result};

/// Magic prefix of the legacy delta container stored by the source system.
pub const LEGACY_DELTA_MAGIC: &[u8; 4] = b"PA19";

const OP_COPY: u8 = 0x01;
const OP_LITERAL: u8 = 0x02;

const COPY_CHUNK: usize = 64 * 1024;

/// Binary delta primitive: reconstructs a target from a base and a delta.
///
/// The chain reconstructor drives this either fully in memory or through
/// files on disk, depending on the size of the file being materialized. The
/// production binding on Windows wraps the platform deltification library;
/// [`RawDelta`] is the portable implementation used by default and by the
/// test suite.
pub trait DeltaApplier {
    fn apply_in_memory(&self, base: &[u8], delta: &[u8]) -> Result<Vec<u8>>;

    fn apply_on_disk(&self, base: &Path, delta: &Path, out: &Path) -> Result<()>;
}

/// Pure-Rust delta codec over the legacy container framing.
///
/// A delta is the `PA19` magic followed by a sequence of copy ops (offset and
/// length into the base) and literal ops (raw bytes). Applying a delta whose
/// magic is the legacy one requires the accept flag, mirroring the apply flag
/// of the platform library.
pub struct RawDelta {
    accept_legacy_magic: bool,
}

impl RawDelta {
    pub fn new(accept_legacy_magic: bool) -> Self {
        RawDelta {
            accept_legacy_magic,
        }
    }
}

impl Default for RawDelta {
    fn default() -> Self {
        RawDelta::new(true)
    }
}

impl DeltaApplier for RawDelta {
    fn apply_in_memory(&self, base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
        let ops = self.check_magic(delta)?;
        let mut out = Vec::new();
        each_op(ops, |op| {
            match op {
                Op::Copy { offset, len } => {
                    let end = offset
                        .checked_add(len)
                        .filter(|end| *end <= base.len() as u64)
                        .ok_or_else(|| {
                            ExportError::DeltaApplyFailed(format!(
                                "copy beyond base end ({}+{} of {})",
                                offset,
                                len,
                                base.len()
                            ))
                        })?;
                    out.extend_from_slice(&base[offset as usize..end as usize]);
                }
                Op::Literal(bytes) => out.extend_from_slice(bytes),
            }
            Ok(())
        })?;
        Ok(out)
    }

    fn apply_on_disk(&self, base: &Path, delta: &Path, out: &Path) -> Result<()> {
        let mut delta_bytes = Vec::new();
        File::open(delta)?.read_to_end(&mut delta_bytes)?;
        let ops = self.check_magic(&delta_bytes)?;

        let mut base_file = File::open(base)?;
        let base_len = base_file.metadata()?.len();
        let mut writer = BufWriter::new(File::create(out)?);

        each_op(ops, |op| {
            match op {
                Op::Copy { offset, len } => {
                    if offset.checked_add(len).map_or(true, |end| end > base_len) {
                        return Err(ExportError::DeltaApplyFailed(format!(
                            "copy beyond base end ({offset}+{len} of {base_len})"
                        )));
                    }
                    base_file.seek(SeekFrom::Start(offset))?;
                    let mut remaining = len;
                    let mut chunk = vec![0u8; COPY_CHUNK];
                    while remaining > 0 {
                        let want = (remaining as usize).min(COPY_CHUNK);
                        base_file.read_exact(&mut chunk[..want])?;
                        writer.write_all(&chunk[..want])?;
                        remaining -= want as u64;
                    }
                }
                Op::Literal(bytes) => writer.write_all(bytes)?,
            }
            Ok(())
        })?;
        writer.flush()?;
        Ok(())
    }
}

impl RawDelta {
    fn check_magic<'a>(&self, delta: &'a [u8]) -> Result<&'a [u8]> {
        if delta.len() < LEGACY_DELTA_MAGIC.len() {
            return Err(ExportError::DeltaApplyFailed("truncated delta".into()));
        }
        let (magic, ops) = delta.split_at(LEGACY_DELTA_MAGIC.len());
        if magic != LEGACY_DELTA_MAGIC {
            return Err(ExportError::DeltaApplyFailed(format!(
                "unrecognized delta magic {magic:02x?}"
            )));
        }
        if !self.accept_legacy_magic {
            return Err(ExportError::DeltaApplyFailed(
                "legacy delta container not accepted".into(),
            ));
        }
        Ok(ops)
    }
}

enum Op<'a> {
    Copy { offset: u64, len: u64 },
    Literal(&'a [u8]),
}

fn each_op<'a>(mut ops: &'a [u8], mut f: impl FnMut(Op<'a>) -> Result<()>) -> Result<()> {
    while let Some((&tag, rest)) = ops.split_first() {
        match tag {
            OP_COPY => {
                if rest.len() < 12 {
                    return Err(ExportError::DeltaApplyFailed("truncated copy op".into()));
                }
                let offset = read_u64(&rest[..8]);
                let len = u64::from(read_u32(&rest[8..12]));
                f(Op::Copy { offset, len })?;
                ops = &rest[12..];
            }
            OP_LITERAL => {
                if rest.len() < 4 {
                    return Err(ExportError::DeltaApplyFailed("truncated literal op".into()));
                }
                let len = read_u32(&rest[..4]) as usize;
                if rest.len() < 4 + len {
                    return Err(ExportError::DeltaApplyFailed(
                        "literal op overruns delta".into(),
                    ));
                }
                f(Op::Literal(&rest[4..4 + len]))?;
                ops = &rest[4 + len..];
            }
            other => {
                return Err(ExportError::DeltaApplyFailed(format!(
                    "unknown delta op {other:#04x}"
                )));
            }
        }
    }
    Ok(())
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Build a delta turning `base` into `target`.
///
/// Uses a plain prefix/suffix match: good enough for the edit patterns in
/// fixtures and round-trip checks, which is all this codec is for.
pub fn create_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let prefix = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = base[prefix..]
        .iter()
        .rev()
        .zip(target[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = Vec::with_capacity(target.len() + 32);
    out.extend_from_slice(LEGACY_DELTA_MAGIC);
    if prefix > 0 {
        push_copy(&mut out, 0, prefix as u64);
    }
    let middle = &target[prefix..target.len() - suffix];
    if !middle.is_empty() {
        out.push(OP_LITERAL);
        out.extend_from_slice(&(middle.len() as u32).to_le_bytes());
        out.extend_from_slice(middle);
    }
    if suffix > 0 {
        push_copy(&mut out, (base.len() - suffix) as u64, suffix as u64);
    }
    out
}

fn push_copy(out: &mut Vec<u8>, mut offset: u64, mut len: u64) {
    while len > 0 {
        let take = len.min(u64::from(u32::MAX));
        out.push(OP_COPY);
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&(take as u32).to_le_bytes());
        offset += take;
        len -= take;
    }
}
