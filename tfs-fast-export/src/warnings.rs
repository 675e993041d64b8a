use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Best-effort sink for recoverable conversion problems.
///
/// Every warning goes to stderr (unless silenced) and, when configured, is
/// appended to a log file that is flushed when the sink is dropped.
pub struct Warnings {
    to_stderr: bool,
    file: Option<BufWriter<File>>,
    count: usize,
}

impl Warnings {
    pub fn new(to_stderr: bool, file: Option<&Path>) -> io::Result<Self> {
        let file = match file {
            Some(path) => Some(BufWriter::new(File::create(path)?)),
            None => None,
        };
        Ok(Warnings {
            to_stderr,
            file,
            count: 0,
        })
    }

    /// A sink that only counts, for tests and dry runs.
    pub fn silent() -> Self {
        Warnings {
            to_stderr: false,
            file: None,
            count: 0,
        }
    }

    pub fn warn(&mut self, line: impl AsRef<str>) {
        let line = line.as_ref();
        self.count += 1;
        if self.to_stderr {
            eprintln!("Warning: {line}");
        }
        if let Some(file) = self.file.as_mut() {
            let _ = writeln!(file, "{line}");
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl Drop for Warnings {
    fn drop(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }
}
