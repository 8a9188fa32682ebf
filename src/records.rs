//! Tabular input and the record expander.
//!
//! A batch starts as CSV with a header row. Each data row is one record:
//! a person and one or more courses. The expander turns records into render
//! jobs, one per (record, course), all jobs of a record sharing one
//! identifier.
//!
//! ## Column resolution
//!
//! Column names are matched case-insensitively against fixed alias lists;
//! the first alias present as a column wins, even if its cell is empty:
//!
//! | Role | Accepted headers |
//! |---|---|
//! | person | `fio`, `name`, `full_name`, `full name`, `person`, `person_name`, `фио` |
//! | courses | `courses`, `course`, `курсы`, `курс` |
//!
//! The courses cell is split on `,` and `|`, each piece trimmed, empty pieces
//! dropped: `"Go | Rust,,"` → `["Go", "Rust"]`.
//!
//! ## Skips
//!
//! A record with a blank person or no courses is skipped, never an error.
//! Skips are reported in [`Expansion::skipped`] and at `debug` level.

use crate::ident::IdentifierGenerator;
use std::io::Read;
use thiserror::Error;

const PERSON_ALIASES: &[&str] = &[
    "fio",
    "name",
    "full_name",
    "full name",
    "person",
    "person_name",
    "фио",
];

const COURSE_ALIASES: &[&str] = &["courses", "course", "курсы", "курс"];

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// One input record: ordered column name → value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, String)>,
}

impl Row {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            columns: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of the first column whose name matches `name`, ignoring case
    /// and surrounding whitespace.
    pub fn get(&self, name: &str) -> Option<&str> {
        let wanted = name.to_lowercase();
        self.columns
            .iter()
            .find(|(k, _)| header_key(k) == wanted)
            .map(|(_, v)| v.as_str())
    }

    fn resolve(&self, aliases: &[&str]) -> Option<&str> {
        aliases.iter().find_map(|alias| self.get(alias))
    }

    /// Resolved person name, trimmed. Empty when no alias column exists.
    pub fn person(&self) -> String {
        self.resolve(PERSON_ALIASES)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    /// Resolved course list.
    pub fn courses(&self) -> Vec<String> {
        self.resolve(COURSE_ALIASES)
            .map(split_courses)
            .unwrap_or_default()
    }
}

fn header_key(header: &str) -> String {
    header.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Split a courses cell on `,` and `|`.
pub fn split_courses(raw: &str) -> Vec<String> {
    raw.split([',', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Streaming reader over CSV records.
///
/// Rows are produced one at a time so very large inputs never sit in memory
/// whole. Short rows are padded with empty cells; extra cells are dropped.
pub struct RowReader<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    record: csv::StringRecord,
}

impl<R: Read> RowReader<R> {
    pub fn new(input: R) -> Result<Self, RecordError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);
        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();
        Ok(Self {
            reader,
            headers,
            record: csv::StringRecord::new(),
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Pull up to `limit` rows. An empty vector means the input is exhausted.
    pub fn next_chunk(&mut self, limit: usize) -> Result<Vec<Row>, RecordError> {
        let mut rows = Vec::with_capacity(limit.min(1024));
        while rows.len() < limit {
            match self.next() {
                Some(row) => rows.push(row?),
                None => break,
            }
        }
        Ok(rows)
    }
}

impl<R: Read> Iterator for RowReader<R> {
    type Item = Result<Row, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.read_record(&mut self.record) {
                Ok(false) => return None,
                Ok(true) => {
                    if self.record.iter().all(str::is_empty) {
                        continue;
                    }
                    let columns = self
                        .headers
                        .iter()
                        .enumerate()
                        .map(|(i, h)| (h.clone(), self.record.get(i).unwrap_or("").to_string()))
                        .collect();
                    return Some(Ok(Row { columns }));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Read every record of a CSV document.
pub fn read_rows(input: impl Read) -> Result<Vec<Row>, RecordError> {
    RowReader::new(input)?.collect()
}

/// The unit of rendering work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    pub identifier: String,
    pub person: String,
    pub course: String,
    /// 1-based data row the job came from.
    pub row: usize,
}

/// Why a record produced no jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    BlankPerson,
    NoCourses,
}

/// A record that was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: SkipReason,
}

/// Jobs and skips from one expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    pub jobs: Vec<RenderJob>,
    pub skipped: Vec<SkippedRow>,
}

/// Expand records into render jobs, numbering rows from 1.
pub fn expand(rows: &[Row], ids: &dyn IdentifierGenerator, prefix: &str) -> Expansion {
    expand_from(rows, 1, ids, prefix)
}

/// Expand records whose first row has number `first_row`.
///
/// Exactly one identifier is drawn per kept record.
pub fn expand_from(
    rows: &[Row],
    first_row: usize,
    ids: &dyn IdentifierGenerator,
    prefix: &str,
) -> Expansion {
    let mut expansion = Expansion::default();
    for (offset, row) in rows.iter().enumerate() {
        let number = first_row + offset;
        let person = row.person();
        let courses = row.courses();

        let reason = if person.is_empty() {
            Some(SkipReason::BlankPerson)
        } else if courses.is_empty() {
            Some(SkipReason::NoCourses)
        } else {
            None
        };
        if let Some(reason) = reason {
            tracing::debug!(row = number, ?reason, "skipping record");
            expansion.skipped.push(SkippedRow {
                row: number,
                reason,
            });
            continue;
        }

        let identifier = ids.next(prefix);
        expansion
            .jobs
            .extend(courses.into_iter().map(|course| RenderJob {
                identifier: identifier.clone(),
                person: person.clone(),
                course,
                row: number,
            }));
    }
    expansion
}
