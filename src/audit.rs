//! Append-only audit trail of issued certificates.
//!
//! One JSON object per line, one line per rendered certificate:
//!
//! ```json
//! {"datetime":"2026-10-18T09:30:00.000Z","identifier":"CERT-20261018-1a2b3c4d","person":"Ann Lee","course":"Go","filename":"CERT-CERT-20261018-1a2b3c4d-go-ann-lee.png","templateVersion":"3f2a9c01b7de"}
//! ```
//!
//! Writing the log is best-effort. Sinks report failures; the pipeline logs
//! them and carries on.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    /// ISO-8601 UTC with milliseconds.
    pub datetime: String,
    pub identifier: String,
    pub person: String,
    pub course: String,
    pub filename: String,
    pub template_version: String,
}

/// Format a timestamp the way log entries carry it.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render entries as JSONL, each line newline-terminated.
pub fn to_jsonl(entries: &[AuditLogEntry]) -> Result<String, AuditError> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&serde_json::to_string(entry)?);
        out.push('\n');
    }
    Ok(out)
}

/// Destination for audit lines.
pub trait AuditSink: Send + Sync {
    /// Short label for log messages.
    fn describe(&self) -> String;

    fn append(&self, entries: &[AuditLogEntry]) -> Result<(), AuditError>;
}

/// Appends to a local JSONL file, creating parent directories.
#[derive(Debug, Clone)]
pub struct JsonlFileSink {
    path: PathBuf,
}

impl JsonlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlFileSink {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn append(&self, entries: &[AuditLogEntry]) -> Result<(), AuditError> {
        if entries.is_empty() {
            return Ok(());
        }
        let payload = to_jsonl(entries)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(payload.as_bytes())?;
        Ok(())
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn append(&self, entries: &[AuditLogEntry]) -> Result<(), AuditError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(entries);
        Ok(())
    }
}
