use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Top-level error type for the exporter.
///
/// This consolidates the different failure sources of the pipeline: I/O and
/// SQL errors from below, and the conversion-specific fatal conditions that
/// abort an export run.
#[derive(Debug)]
pub enum ExportError {
    /// Wrapper around lower-level I/O failures.
    Io(io::Error),
    /// Wrapper around database driver failures.
    Sql(rusqlite::Error),
    /// The source database is not the supported schema generation.
    SchemaMismatch(String),
    /// Materialized file content diverges from the recorded digest.
    ChecksumMismatch { context: String },
    /// The delta primitive rejected a chain element.
    DeltaApplyFailed(String),
    /// A blob row carries a compression code we do not understand.
    UnknownCompression(i64),
    /// A file row carries a content type code we do not understand.
    UnknownContentType { file_id: i64, code: i64 },
    /// A file mode outside the fast-import whitelist.
    UnknownMode(u32),
    /// An empty path or a path starting with '/'.
    PathIllegal(String),
    /// A malformed author/committer/tagger identity or progress payload.
    CommandIllegal(String),
    /// A fragmented blob whose declared length does not match the bytes written.
    BlobLengthMismatch { declared: u64, effective: u64 },
    /// The user lookup hook failed for an identity the export needs.
    HookLookup(String),
    /// Invalid option or configuration supplied by the caller.
    InvalidOptions(String),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Io(err) => write!(f, "{err}"),
            ExportError::Sql(err) => write!(f, "{err}"),
            ExportError::SchemaMismatch(msg) => write!(f, "schema mismatch: {msg}"),
            ExportError::ChecksumMismatch { context } => {
                write!(f, "checksum mismatch (in context: {context})")
            }
            ExportError::DeltaApplyFailed(msg) => write!(f, "delta apply failed: {msg}"),
            ExportError::UnknownCompression(code) => {
                write!(f, "unexpected compression type {code}")
            }
            ExportError::UnknownContentType { file_id, code } => {
                write!(f, "unexpected content type {code} for file {file_id}")
            }
            ExportError::UnknownMode(mode) => write!(f, "unknown file mode {mode:o}"),
            ExportError::PathIllegal(path) => write!(f, "illegal path '{path}'"),
            ExportError::CommandIllegal(msg) => f.write_str(msg),
            ExportError::BlobLengthMismatch {
                declared,
                effective,
            } => write!(
                f,
                "fragmented blob length mismatch (declared: {declared}, effective: {effective})"
            ),
            ExportError::HookLookup(msg) => write!(f, "user lookup failed: {msg}"),
            ExportError::InvalidOptions(msg) => f.write_str(msg),
        }
    }
}

impl StdError for ExportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ExportError::Io(err) => Some(err),
            ExportError::Sql(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ExportError {
    fn from(err: io::Error) -> Self {
        ExportError::Io(err)
    }
}

impl From<rusqlite::Error> for ExportError {
    fn from(err: rusqlite::Error) -> Self {
        ExportError::Sql(err)
    }
}

impl From<ExportError> for io::Error {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}

impl ExportError {
    /// Convenience constructor for invalid option failures.
    pub fn invalid_options(msg: impl Into<String>) -> Self {
        ExportError::InvalidOptions(msg.into())
    }
}

/// Convenience result alias using [`ExportError`].
pub type Result<T> = std::result::Result<T, ExportError>;
