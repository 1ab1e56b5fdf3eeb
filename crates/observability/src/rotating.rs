//! Append-only log file that resets itself past a size threshold.
//!
//! There is no numbered backlog: once the file grows beyond `max_bytes` it is
//! truncated and a marker line records the reset. Disk usage is therefore
//! bounded by roughly `max_bytes` plus one record.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug)]
pub struct SizeCappedFile {
    path: PathBuf,
    file: File,
    max_bytes: u64,
    len: u64,
}

impl SizeCappedFile {
    pub fn open(path: impl AsRef<Path>, max_bytes: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            max_bytes,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes currently in the file as tracked by this writer.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn reset(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.len = 0;
        let marker = format!(
            "[{}] log rotated after exceeding {} bytes\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            self.max_bytes
        );
        self.file.write_all(marker.as_bytes())?;
        self.len = marker.len() as u64;
        Ok(())
    }
}

impl Write for SizeCappedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.len > self.max_bytes {
            self.reset()?;
        }
        let written = self.file.write(buf)?;
        self.len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
