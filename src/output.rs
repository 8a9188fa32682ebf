//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Batch
//!
//! ```text
//! Template tpl_3f2a9c01b7de (version 3f2a9c01b7de)
//!     row 2: CERT-CERT-20261018-1a2b3c4d-go-ann-lee.png
//!     row 3: skipped (blank person name)
//!     row 4: CERT-CERT-20261018-77aa00ff-go-bob.png
//!     overwritten: CERT-CERT-20261018-77aa00ff-go-bob.png
//! Rendered 3 certificates (2 files), 1 row skipped
//! Archive: out/batch_1760779800000.zip
//! ```
//!
//! ## Template
//!
//! ```text
//! tpl_3f2a9c01b7de
//!     Type: image/png
//!     Version: 3f2a9c01b7de
//!     person-name   300,420 1200x120 center
//!     course        300,600 1200x100 center
//!     record-id      60,1100 600x40 left
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::archive::Delivery;
use crate::fields::FieldBox;
use crate::pipeline::{BatchEvent, BatchOutcome, SingleOutcome};
use crate::records::SkipReason;
use std::path::Path;

// ============================================================================
// Shared helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 certificate`, `2 certificates`.
fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

fn skip_reason(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::BlankPerson => "blank person name",
        SkipReason::NoCourses => "no courses",
    }
}

// ============================================================================
// Batch
// ============================================================================

/// Format one progress event from a running batch.
pub fn format_batch_event(event: &BatchEvent) -> Vec<String> {
    match event {
        BatchEvent::Started {
            template_id,
            template_version,
        } => vec![format!(
            "Template {} (version {})",
            template_id, template_version
        )],
        BatchEvent::RowSkipped { row, reason } => vec![format!(
            "{}row {}: skipped ({})",
            indent(1),
            row,
            skip_reason(*reason)
        )],
        BatchEvent::Rendered { filename, row } => {
            vec![format!("{}row {}: {}", indent(1), row, filename)]
        }
        BatchEvent::Overwritten { filename } => {
            vec![format!("{}overwritten: {}", indent(1), filename)]
        }
        BatchEvent::AuditFailed { sink, error } => {
            vec![format!("{}audit log {} not written: {}", indent(1), sink, error)]
        }
        BatchEvent::Finished {
            count,
            entries,
            skipped,
        } => {
            let mut line = format!("Rendered {}", plural(*count, "certificate"));
            if entries != count {
                line.push_str(&format!(" ({})", plural(*entries, "file")));
            }
            if *skipped > 0 {
                line.push_str(&format!(", {} skipped", plural(*skipped, "row")));
            }
            vec![line]
        }
    }
}

/// Where the archive went.
pub fn format_delivery(delivery: &Delivery) -> Vec<String> {
    match delivery {
        Delivery::Stored(path) => vec![format!("Archive: {}", path.display())],
        Delivery::Inline(bytes) => vec![format!("Archive: {} bytes inline", bytes.len())],
    }
}

/// Machine-readable batch result, shaped like the HTTP response body.
pub fn batch_response_json(outcome: &BatchOutcome) -> serde_json::Value {
    let mut body = serde_json::json!({
        "count": outcome.count,
        "entries": outcome.entries,
        "skipped": outcome.skipped,
        "templateVersion": outcome.template_version,
        "log": outcome.log_entries,
    });
    match &outcome.delivery {
        Delivery::Inline(_) => {
            body["zipBase64"] = serde_json::Value::from(outcome.delivery.base64());
        }
        Delivery::Stored(path) => {
            body["zipPath"] = serde_json::Value::from(path.display().to_string());
        }
    }
    body
}

/// Print the archive location to stdout.
pub fn print_delivery(delivery: &Delivery) {
    for line in format_delivery(delivery) {
        println!("{}", line);
    }
}

// ============================================================================
// Single request
// ============================================================================

/// Lines for a single request whose files were written into `out_dir`.
pub fn format_single_output(outcome: &SingleOutcome, out_dir: &Path) -> Vec<String> {
    let mut lines = vec![format!("Identifier {}", outcome.identifier)];
    for (name, bytes) in &outcome.files {
        lines.push(format!(
            "{}{} ({} bytes)",
            indent(1),
            out_dir.join(name).display(),
            bytes.len()
        ));
    }
    lines
}

pub fn print_single_output(outcome: &SingleOutcome, out_dir: &Path) {
    for line in format_single_output(outcome, out_dir) {
        println!("{}", line);
    }
}

// ============================================================================
// Templates
// ============================================================================

/// Describe a stored template and its fields.
pub fn format_template(id: &str, mime: &str, version: &str, fields: &[FieldBox]) -> Vec<String> {
    let mut lines = vec![
        id.to_string(),
        format!("{}Type: {}", indent(1), mime),
        format!("{}Version: {}", indent(1), version),
    ];
    if fields.is_empty() {
        lines.push(format!("{}(no fields saved)", indent(1)));
    }
    for field in fields {
        lines.push(format!(
            "{}{:<12} {:>4},{} {}x{} {}",
            indent(1),
            field.name.as_str(),
            field.x,
            field.y,
            field.w,
            field.h,
            field.align.as_str()
        ));
    }
    lines
}

pub fn print_template(id: &str, mime: &str, version: &str, fields: &[FieldBox]) {
    for line in format_template(id, mime, version, fields) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLogEntry;
    use crate::fields::{Align, FieldName};
    use std::path::PathBuf;

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn plural_singular_and_many() {
        assert_eq!(plural(1, "row"), "1 row");
        assert_eq!(plural(0, "row"), "0 rows");
        assert_eq!(plural(3, "file"), "3 files");
    }

    #[test]
    fn indent_four_spaces_per_level() {
        assert_eq!(indent(0), "");
        assert_eq!(indent(2), "        ");
    }

    // =========================================================================
    // Batch event tests
    // =========================================================================

    #[test]
    fn started_event() {
        let lines = format_batch_event(&BatchEvent::Started {
            template_id: "tpl_abc".into(),
            template_version: "abc".into(),
        });
        assert_eq!(lines, ["Template tpl_abc (version abc)"]);
    }

    #[test]
    fn rendered_and_skipped_rows() {
        let rendered = format_batch_event(&BatchEvent::Rendered {
            filename: "CERT-x-go-ann.png".into(),
            row: 2,
        });
        assert_eq!(rendered, ["    row 2: CERT-x-go-ann.png"]);

        let skipped = format_batch_event(&BatchEvent::RowSkipped {
            row: 3,
            reason: SkipReason::BlankPerson,
        });
        assert_eq!(skipped, ["    row 3: skipped (blank person name)"]);

        let no_courses = format_batch_event(&BatchEvent::RowSkipped {
            row: 4,
            reason: SkipReason::NoCourses,
        });
        assert_eq!(no_courses, ["    row 4: skipped (no courses)"]);
    }

    #[test]
    fn finished_plain() {
        let lines = format_batch_event(&BatchEvent::Finished {
            count: 3,
            entries: 3,
            skipped: 0,
        });
        assert_eq!(lines, ["Rendered 3 certificates"]);
    }

    #[test]
    fn finished_with_overwrites_and_skips() {
        let lines = format_batch_event(&BatchEvent::Finished {
            count: 2,
            entries: 1,
            skipped: 1,
        });
        assert_eq!(lines, ["Rendered 2 certificates (1 file), 1 row skipped"]);
    }

    #[test]
    fn audit_failure_is_reported() {
        let lines = format_batch_event(&BatchEvent::AuditFailed {
            sink: "logs/c.jsonl".into(),
            error: "permission denied".into(),
        });
        assert_eq!(
            lines,
            ["    audit log logs/c.jsonl not written: permission denied"]
        );
    }

    // =========================================================================
    // Delivery tests
    // =========================================================================

    fn outcome(delivery: Delivery) -> BatchOutcome {
        BatchOutcome {
            delivery,
            count: 1,
            entries: 1,
            skipped: 0,
            template_version: "abc".into(),
            log_entries: vec![AuditLogEntry {
                datetime: "2026-10-18T09:30:00.000Z".into(),
                identifier: "CERT-20261018-00000001".into(),
                person: "Ann".into(),
                course: "Go".into(),
                filename: "CERT-CERT-20261018-00000001-go-ann.png".into(),
                template_version: "abc".into(),
            }],
        }
    }

    #[test]
    fn delivery_lines() {
        assert_eq!(
            format_delivery(&Delivery::Stored(PathBuf::from("out/batch_1.zip"))),
            ["Archive: out/batch_1.zip"]
        );
        assert_eq!(
            format_delivery(&Delivery::Inline(vec![0; 10])),
            ["Archive: 10 bytes inline"]
        );
    }

    #[test]
    fn response_json_inline() {
        let body = batch_response_json(&outcome(Delivery::Inline(b"zip".to_vec())));
        assert_eq!(body["count"], 1);
        assert_eq!(body["zipBase64"], "emlw");
        assert_eq!(body["log"][0]["templateVersion"], "abc");
        assert!(body.get("zipPath").is_none());
    }

    #[test]
    fn response_json_stored() {
        let body = batch_response_json(&outcome(Delivery::Stored(PathBuf::from("a.zip"))));
        assert_eq!(body["zipPath"], "a.zip");
        assert!(body.get("zipBase64").is_none());
    }

    // =========================================================================
    // Single and template tests
    // =========================================================================

    #[test]
    fn single_output_lists_files() {
        let outcome = SingleOutcome {
            identifier: "CERT-20261018-00000001".into(),
            files: vec![("a.png".into(), vec![0; 5]), ("b.png".into(), vec![0; 7])],
            log_entries: Vec::new(),
        };
        let lines = format_single_output(&outcome, Path::new("out"));
        assert_eq!(
            lines,
            [
                "Identifier CERT-20261018-00000001",
                "    out/a.png (5 bytes)",
                "    out/b.png (7 bytes)",
            ]
        );
    }

    #[test]
    fn template_lines() {
        let fields = vec![FieldBox {
            name: FieldName::Course,
            x: 10,
            y: 20,
            w: 300,
            h: 40,
            align: Align::Right,
        }];
        let lines = format_template("tpl_abc", "image/png", "abc", &fields);
        assert_eq!(lines[0], "tpl_abc");
        assert_eq!(lines[1], "    Type: image/png");
        assert_eq!(lines[3], "    course         10,20 300x40 right");
    }

    #[test]
    fn template_without_fields() {
        let lines = format_template("tpl_abc", "image/jpeg", "abc", &[]);
        assert_eq!(lines.last().unwrap(), "    (no fields saved)");
    }
}
