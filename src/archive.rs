//! Batch archives.
//!
//! [`ArchiveBuilder`] is the single writer for a batch: the collecting
//! thread adds one entry at a time, and a later entry with an already used
//! name replaces the earlier bytes in place (last write wins). The finished
//! zip stores entries uncompressed, in first-insertion order, with a fixed
//! timestamp so identical batches give identical archives.
//!
//! Where the finished bytes go is an [`ArchiveSink`]:
//!
//! - [`InlineSink`] hands the bytes back (callers embed them, e.g. base64 in JSON).
//! - [`DirectorySink`] writes `batch_{unix_millis}.zip` into a directory and
//!   returns the path.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// In-memory archive under construction.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    entries: Vec<(String, Vec<u8>)>,
    positions: HashMap<String, usize>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Returns `true` if it replaced an entry of the same name.
    pub fn add(&mut self, name: String, bytes: Vec<u8>) -> bool {
        match self.positions.get(&name) {
            Some(&pos) => {
                tracing::debug!(%name, "archive entry overwritten");
                self.entries[pos].1 = bytes;
                true
            }
            None => {
                self.positions.insert(name.clone(), self.entries.len());
                self.entries.push((name, bytes));
                false
            }
        }
    }

    /// Number of distinct entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Serialize to zip bytes.
    pub fn finish(self) -> Result<Vec<u8>, ArchiveError> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(0o644);
        for (name, bytes) in &self.entries {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }
        Ok(zip.finish()?.into_inner())
    }
}

/// Where a finished archive ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Inline(Vec<u8>),
    Stored(PathBuf),
}

impl Delivery {
    /// Standard base64 of inline bytes.
    pub fn base64(&self) -> Option<String> {
        match self {
            Delivery::Inline(bytes) => Some(STANDARD.encode(bytes)),
            Delivery::Stored(_) => None,
        }
    }
}

/// Destination for finished archives.
pub trait ArchiveSink: Send + Sync {
    fn deliver(&self, archive: Vec<u8>) -> Result<Delivery, ArchiveError>;
}

/// Returns the archive bytes to the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineSink;

impl ArchiveSink for InlineSink {
    fn deliver(&self, archive: Vec<u8>) -> Result<Delivery, ArchiveError> {
        Ok(Delivery::Inline(archive))
    }
}

/// Writes archives into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    file_name: Option<String>,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: None,
        }
    }

    /// Sink that always writes to `path`, replacing any existing file.
    pub fn to_file(path: &Path) -> Self {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            dir,
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        }
    }

    fn target(&self) -> PathBuf {
        if let Some(name) = &self.file_name {
            return self.dir.join(name);
        }
        let mut millis = chrono::Utc::now().timestamp_millis();
        loop {
            let path = self.dir.join(format!("batch_{millis}.zip"));
            if !path.exists() {
                return path;
            }
            millis += 1;
        }
    }
}

impl ArchiveSink for DirectorySink {
    fn deliver(&self, archive: Vec<u8>) -> Result<Delivery, ArchiveError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.target();
        crate::store::write_atomic(&path, &archive)?;
        tracing::info!(path = %path.display(), bytes = archive.len(), "archive written");
        Ok(Delivery::Stored(path))
    }
}
