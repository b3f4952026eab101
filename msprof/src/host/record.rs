//! Output record file
//!
//! Collection modes append every job directory they create to
//! `<output>/<pid>_output_record`. Post-processing reads the list back and
//! deletes the file.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const OUTPUT_RECORD: &str = "output_record";

pub struct OutputRecord {
    path: PathBuf,
}

impl OutputRecord {
    /// Record file of this process under `output_dir`
    #[must_use]
    pub fn new(output_dir: &Path) -> Self {
        Self::for_pid(output_dir, std::process::id())
    }

    #[must_use]
    pub fn for_pid(output_dir: &Path, pid: u32) -> Self {
        Self { path: output_dir.join(format!("{pid}_{OUTPUT_RECORD}")) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one collected directory
    ///
    /// # Errors
    /// Returns an error if the record file cannot be written
    pub fn append(&self, dir: &Path) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", dir.display())
    }

    /// Read every recorded directory and delete the record
    ///
    /// A missing record file yields an empty list.
    ///
    /// # Errors
    /// Returns an error if the record exists but cannot be read or removed
    pub fn take(&self) -> std::io::Result<Vec<PathBuf>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        fs::remove_file(&self.path)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }
}
