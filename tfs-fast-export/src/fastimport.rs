//! Serialization of git fast-import commands.
//!
//! Each command owns its wire representation; the export driver just writes
//! commands to an opaque byte sink in order. The grammar is line-oriented
//! with ASCII command tokens and UTF-8 payloads.

use std::io::Write;

use crate::blocks::BlockStream;
use crate::error::{ExportError, Result};

/// `NAME <EMAIL> SECS +HHMM` identity line payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonIdent {
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch.
    pub secs: i64,
    /// Timezone offset in seconds, applied as a signed `+HHMM` suffix.
    pub offset_secs: i32,
}

impl PersonIdent {
    fn format(&self) -> Result<Vec<u8>> {
        if self.name.ends_with(' ') {
            return Err(ExportError::CommandIllegal(format!(
                "name '{}' ends with space",
                self.name
            )));
        }
        let (sign, offset) = if self.offset_secs < 0 {
            ('-', -i64::from(self.offset_secs))
        } else {
            ('+', i64::from(self.offset_secs))
        };
        let sep = if self.name.is_empty() { "" } else { " " };
        Ok(format!(
            "{}{}<{}> {} {}{:02}{:02}",
            self.name,
            sep,
            self.email,
            self.secs,
            sign,
            offset / 3600,
            (offset / 60) % 60
        )
        .into_bytes())
    }
}

/// Inline blob content: a declared length plus the block stream carrying it.
pub struct Blob {
    pub len: u64,
    pub blocks: Box<dyn BlockStream>,
}

impl Blob {
    pub fn empty() -> Self {
        Blob {
            len: 0,
            blocks: Box::new(crate::blocks::MemoryBlocks::empty()),
        }
    }
}

/// Content source of a `file modify` command.
pub enum BlobRef {
    /// Reference to a previously emitted mark.
    Mark(u64),
    /// Inline `data` block following the command line.
    Inline(Blob),
}

pub struct ProgressCommand {
    message: String,
}

impl ProgressCommand {
    pub fn new(message: impl Into<String>) -> Result<Self> {
        let message = message.into();
        if message.contains('\n') {
            return Err(ExportError::CommandIllegal(
                "progress message must not contain any newlines".into(),
            ));
        }
        Ok(ProgressCommand { message })
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn serialize(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"progress ")?;
        out.write_all(self.message.as_bytes())?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

pub struct CommitCommand {
    /// Branch name, already converted to forward slashes.
    pub branch: String,
    pub mark: u64,
    /// Emitted only when the owner differs from the committer.
    pub author: Option<PersonIdent>,
    pub committer: PersonIdent,
    pub message: String,
    pub from: Option<u64>,
    pub merges: Vec<u64>,
}

impl CommitCommand {
    pub fn serialize(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"commit refs/heads/")?;
        out.write_all(self.branch.as_bytes())?;
        out.write_all(b"\n")?;
        write_mark_line(out, self.mark)?;
        if let Some(author) = &self.author {
            out.write_all(b"author ")?;
            out.write_all(&author.format()?)?;
            out.write_all(b"\n")?;
        }
        out.write_all(b"committer ")?;
        out.write_all(&self.committer.format()?)?;
        out.write_all(b"\n")?;
        serialize_data_bytes(out, self.message.as_bytes())?;
        if let Some(from) = self.from {
            out.write_all(b"from ")?;
            out.write_all(&format_mark(from))?;
            out.write_all(b"\n")?;
        }
        for merge in &self.merges {
            out.write_all(b"merge ")?;
            out.write_all(&format_mark(*merge))?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }
}

pub struct TagCommand {
    /// Tag name, already run through the tag-name sanitizer.
    pub name: String,
    pub from: u64,
    pub tagger: PersonIdent,
    pub message: String,
}

impl TagCommand {
    pub fn serialize(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"tag ")?;
        out.write_all(&format_path(check_path(&self.name)?, false))?;
        out.write_all(b"\nfrom ")?;
        out.write_all(&format_mark(self.from))?;
        out.write_all(b"\ntagger ")?;
        out.write_all(&self.tagger.format()?)?;
        out.write_all(b"\n")?;
        serialize_data_bytes(out, self.message.as_bytes())
    }
}

pub struct FileModifyCommand {
    pub path: String,
    pub mode: u32,
    pub content: BlobRef,
}

impl FileModifyCommand {
    pub fn serialize(self, out: &mut dyn Write) -> Result<()> {
        let path = check_path(&self.path)?;
        out.write_all(b"M ")?;
        out.write_all(format_mode(self.mode)?)?;
        out.write_all(b" ")?;
        let inline = if self.mode == 0o40000 {
            out.write_all(b"-")?;
            None
        } else {
            match self.content {
                BlobRef::Mark(mark) => {
                    out.write_all(&format_mark(mark))?;
                    None
                }
                BlobRef::Inline(blob) => {
                    out.write_all(b"inline")?;
                    Some(blob)
                }
            }
        };
        out.write_all(b" ")?;
        out.write_all(&format_path(path, false))?;
        out.write_all(b"\n")?;
        if let Some(blob) = inline {
            serialize_data(out, blob)?;
        }
        Ok(())
    }
}

pub struct FileDeleteCommand {
    pub path: String,
}

impl FileDeleteCommand {
    pub fn serialize(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"D ")?;
        out.write_all(&format_path(check_path(&self.path)?, false))?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

pub struct FileCopyCommand {
    pub src_path: String,
    pub dest_path: String,
}

impl FileCopyCommand {
    pub fn serialize(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"C ")?;
        out.write_all(&format_path(check_path(&self.src_path)?, true))?;
        out.write_all(b" ")?;
        out.write_all(&format_path(check_path(&self.dest_path)?, false))?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

pub struct FileRenameCommand {
    pub old_path: String,
    pub new_path: String,
}

impl FileRenameCommand {
    pub fn serialize(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"R ")?;
        out.write_all(&format_path(check_path(&self.old_path)?, true))?;
        out.write_all(b" ")?;
        out.write_all(&format_path(check_path(&self.new_path)?, false))?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

pub struct FileDeleteAllCommand;

impl FileDeleteAllCommand {
    pub fn serialize(&self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"deleteall\n")?;
        Ok(())
    }
}

/// Convert a numeric id into a mark identifier.
pub fn format_mark(id: u64) -> Vec<u8> {
    format!(":{id}").into_bytes()
}

fn write_mark_line(out: &mut dyn Write, id: u64) -> Result<()> {
    out.write_all(b"mark ")?;
    out.write_all(&format_mark(id))?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Check that a path is legal: non-empty and not starting at the root.
pub fn check_path(path: &str) -> Result<&str> {
    if path.is_empty() || path.starts_with('/') {
        return Err(ExportError::PathIllegal(path.to_string()));
    }
    Ok(path)
}

/// Format a path, quoting it if necessary.
pub fn format_path(path: &str, quote_spaces: bool) -> Vec<u8> {
    let (path, quote) = if path.contains('\n') {
        (path.replace('\n', "\\n"), true)
    } else {
        let quote = path.starts_with('"') || (quote_spaces && path.contains(' '));
        (path.to_string(), quote)
    };
    if quote {
        let mut out = Vec::with_capacity(path.len() + 2);
        out.push(b'"');
        out.extend_from_slice(path.as_bytes());
        out.push(b'"');
        out
    } else {
        path.into_bytes()
    }
}

/// Canonical octal token for a whitelisted file mode.
pub fn format_mode(mode: u32) -> Result<&'static [u8]> {
    match mode {
        0o755 | 0o100755 => Ok(b"755"),
        0o644 | 0o100644 => Ok(b"644"),
        0o40000 => Ok(b"040000"),
        0o120000 => Ok(b"120000"),
        0o160000 => Ok(b"160000"),
        other => Err(ExportError::UnknownMode(other)),
    }
}

/// Write a `data` framing for an in-memory payload.
pub fn serialize_data_bytes(out: &mut dyn Write, payload: &[u8]) -> Result<()> {
    write!(out, "data {}\n", payload.len())?;
    out.write_all(payload)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Write a `data` framing for a fragmented blob.
///
/// The declared length must exactly match the bytes the stream yields.
pub fn serialize_data(out: &mut dyn Write, mut blob: Blob) -> Result<()> {
    write!(out, "data {}\n", blob.len)?;
    let mut written: u64 = 0;
    while let Some(block) = blob.blocks.next_block()? {
        written += block.len() as u64;
        out.write_all(&block)?;
    }
    if written != blob.len {
        return Err(ExportError::BlobLengthMismatch {
            declared: blob.len,
            effective: written,
        });
    }
    out.write_all(b"\n")?;
    Ok(())
}
