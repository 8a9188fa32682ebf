//! Record identifiers: `{prefix}-{YYYYMMDD}-{8 hex}`.
//!
//! The date is UTC. The suffix is the first eight hex digits of a random
//! UUIDv4, so collisions inside one day are birthday-bounded at 2^32, not
//! impossible. One identifier is drawn per record (CSV row or single
//! request) and shared by every course of that record.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Source of record identifiers.
///
/// `Sync` so a batch can draw ids from worker threads if it wants to.
pub trait IdentifierGenerator: Send + Sync {
    fn next(&self, prefix: &str) -> String;
}

/// Production generator: today's UTC date plus a random suffix.
#[derive(Debug, Default, Clone, Copy)]
pub struct DailyRandomIds;

impl IdentifierGenerator for DailyRandomIds {
    fn next(&self, prefix: &str) -> String {
        format_identifier(prefix, Utc::now(), &Uuid::new_v4().simple().to_string()[..8])
    }
}

/// Assemble an identifier from its parts.
pub fn format_identifier(prefix: &str, at: DateTime<Utc>, suffix: &str) -> String {
    format!("{}-{}-{}", prefix, at.format("%Y%m%d"), suffix)
}
