//! Batch and single-request certificate generation.
//!
//! ## Batch flow
//!
//! ```text
//! rows ──chunk──► expand (one id per row) ──► render pool (rayon) ──mpsc──► collector
//!                                                                            │
//!                                             archive (single writer) ◄──────┤
//!                                             audit buffer (completion order)◄┘
//! ```
//!
//! The template and its fields are resolved and decoded once, then shared
//! read-only by every worker. Workers only render; the calling thread is the
//! one collector and owns the archive, so entries are added one at a time.
//!
//! ## Failure policy
//!
//! | Situation | Outcome |
//! |---|---|
//! | row with blank person or no courses | skipped, batch continues |
//! | template or fields missing, undecodable or zero-sized template | batch fails before rendering |
//! | no rows at all | [`PipelineError::EmptyInput`] |
//! | rows, but none valid | [`PipelineError::EmptyBatch`] |
//! | one job fails to render | remaining jobs are abandoned, batch fails |
//! | cancelled | in-flight jobs finish, nothing new starts, batch fails |
//! | audit sink fails | warning + event, archive still returned |
//!
//! A failed batch never delivers an archive; the partial one is dropped.
//!
//! ## Streaming
//!
//! [`BatchPipeline::run_csv`] pulls `chunk_size` rows at a time from the CSV
//! reader, so only one chunk of jobs is queued at once. The archive itself
//! still grows in memory until delivery.

use crate::archive::{ArchiveBuilder, ArchiveError, ArchiveSink, Delivery};
use crate::audit::{self, AuditLogEntry, AuditSink};
use crate::fields::{FieldBox, FieldValues};
use crate::ident::{DailyRandomIds, IdentifierGenerator};
use crate::imaging::{self, PreparedTemplate, RasterBackend, RenderError, RenderSettings};
use crate::naming;
use crate::records::{self, RecordError, RenderJob, Row, RowReader, SkipReason};
use crate::store::{StoreError, TemplateStore};
use chrono::Utc;
use rayon::prelude::*;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use thiserror::Error;

/// Identifier prefix used when the caller gives none (or an unusable one).
pub const DEFAULT_PREFIX: &str = "CERT";

/// Rows pulled from the input per chunk unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

static DAILY_IDS: DailyRandomIds = DailyRandomIds;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),
    #[error("No fields saved for template {0} (save fields first)")]
    FieldsNotFound(String),
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
    #[error("Input has no data rows")]
    EmptyInput,
    #[error("No valid rows in input ({skipped} skipped)")]
    EmptyBatch { skipped: usize },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Rendering {filename} failed: {source}")]
    Render {
        filename: String,
        #[source]
        source: RenderError,
    },
    #[error(transparent)]
    Records(#[from] RecordError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("Storage error: {0}")]
    Store(StoreError),
    #[error("Cannot start render workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Batch cancelled")]
    Cancelled,
}

/// Whose fault an error is, for mapping onto 4xx / 5xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Client,
    Server,
}

impl PipelineError {
    pub fn status_class(&self) -> StatusClass {
        match self {
            PipelineError::TemplateNotFound(_)
            | PipelineError::FieldsNotFound(_)
            | PipelineError::InvalidTemplate(_)
            | PipelineError::EmptyInput
            | PipelineError::EmptyBatch { .. }
            | PipelineError::InvalidRequest(_)
            | PipelineError::Records(_) => StatusClass::Client,
            PipelineError::Render { .. }
            | PipelineError::Archive(_)
            | PipelineError::Store(_)
            | PipelineError::WorkerPool(_)
            | PipelineError::Cancelled => StatusClass::Server,
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => PipelineError::TemplateNotFound(id),
            StoreError::FieldsNotFound(id) => PipelineError::FieldsNotFound(id),
            other => PipelineError::Store(other),
        }
    }
}

/// Cooperative cancellation flag shared between a caller and a running batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress events for CLI output.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Started {
        template_id: String,
        template_version: String,
    },
    RowSkipped {
        row: usize,
        reason: SkipReason,
    },
    Rendered {
        filename: String,
        row: usize,
    },
    /// A later job produced a file name already in the archive.
    Overwritten {
        filename: String,
    },
    AuditFailed {
        sink: String,
        error: String,
    },
    Finished {
        count: usize,
        entries: usize,
        skipped: usize,
    },
}

/// Result of a successful batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub delivery: Delivery,
    /// Rendered jobs, including any that overwrote an earlier archive entry.
    pub count: usize,
    /// Distinct files in the archive.
    pub entries: usize,
    pub skipped: usize,
    pub template_version: String,
    /// One entry per rendered job, in completion order.
    pub log_entries: Vec<AuditLogEntry>,
}

/// Template bytes decoded once, plus its fields.
struct ResolvedTemplate {
    id: String,
    version: String,
    prepared: PreparedTemplate,
    fields: Vec<FieldBox>,
}

fn resolve_template(
    backend: &impl RasterBackend,
    store: &dyn TemplateStore,
    template_id: &str,
) -> Result<ResolvedTemplate, PipelineError> {
    let asset = store.get(template_id)?;
    let fields = store.fields(template_id)?;
    let prepared = imaging::prepare(backend, &asset.bytes, asset.mime).map_err(|e| match e {
        RenderError::InvalidTemplate(msg) => PipelineError::InvalidTemplate(msg),
        other => PipelineError::Render {
            filename: format!("{template_id} (template)"),
            source: other,
        },
    })?;
    Ok(ResolvedTemplate {
        id: asset.id.clone(),
        version: asset.version(),
        prepared,
        fields,
    })
}

fn effective_prefix(prefix: &str) -> String {
    naming::sanitize_prefix(prefix).unwrap_or_else(|| DEFAULT_PREFIX.to_string())
}

fn log_entry(job: &RenderJob, filename: &str, version: &str) -> AuditLogEntry {
    AuditLogEntry {
        datetime: audit::timestamp(Utc::now()),
        identifier: job.identifier.clone(),
        person: job.person.clone(),
        course: job.course.clone(),
        filename: filename.to_string(),
        template_version: version.to_string(),
    }
}

fn write_audit(
    sinks: &[&dyn AuditSink],
    entries: &[AuditLogEntry],
    events: Option<&Sender<BatchEvent>>,
) {
    for sink in sinks {
        if let Err(e) = sink.append(entries) {
            tracing::warn!(sink = %sink.describe(), error = %e, "audit log append failed");
            if let Some(tx) = events {
                tx.send(BatchEvent::AuditFailed {
                    sink: sink.describe(),
                    error: e.to_string(),
                })
                .ok();
            }
        }
    }
}

/// What a worker hands back to the collector.
struct JobDone {
    job: RenderJob,
    filename: String,
    result: Result<Vec<u8>, RenderError>,
}

/// Collector-side state: the archive and the audit buffer.
struct Collector {
    archive: ArchiveBuilder,
    log: Vec<AuditLogEntry>,
    produced: usize,
    skipped: usize,
}

/// CSV-driven batch generation.
pub struct BatchPipeline<'a, B: RasterBackend> {
    backend: &'a B,
    store: &'a dyn TemplateStore,
    sink: &'a dyn ArchiveSink,
    ids: &'a dyn IdentifierGenerator,
    audit: Vec<&'a dyn AuditSink>,
    settings: RenderSettings,
    workers: usize,
    chunk_size: usize,
    cancel: CancelToken,
    events: Option<Sender<BatchEvent>>,
}

impl<'a, B: RasterBackend> BatchPipeline<'a, B> {
    pub fn new(backend: &'a B, store: &'a dyn TemplateStore, sink: &'a dyn ArchiveSink) -> Self {
        Self {
            backend,
            store,
            sink,
            ids: &DAILY_IDS,
            audit: Vec::new(),
            settings: RenderSettings::default(),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            chunk_size: DEFAULT_CHUNK_SIZE,
            cancel: CancelToken::new(),
            events: None,
        }
    }

    pub fn with_ids(mut self, ids: &'a dyn IdentifierGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_audit_sink(mut self, sink: &'a dyn AuditSink) -> Self {
        self.audit.push(sink);
        self
    }

    pub fn with_settings(mut self, settings: RenderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = rows.max(1);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_events(mut self, events: Sender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Token that cancels this pipeline's runs.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run a batch over rows already in memory.
    pub fn run(
        &self,
        rows: &[Row],
        template_id: &str,
        prefix: &str,
    ) -> Result<BatchOutcome, PipelineError> {
        if rows.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let chunks = rows.chunks(self.chunk_size).map(|c| Ok(c.to_vec()));
        self.execute(template_id, prefix, chunks)
    }

    /// Run a batch straight from CSV, `chunk_size` rows at a time.
    pub fn run_csv(
        &self,
        input: impl Read,
        template_id: &str,
        prefix: &str,
    ) -> Result<BatchOutcome, PipelineError> {
        let mut reader = RowReader::new(input)?;
        let first = reader.next_chunk(self.chunk_size)?;
        if first.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let chunk_size = self.chunk_size;
        let rest = std::iter::from_fn(move || match reader.next_chunk(chunk_size) {
            Ok(rows) if rows.is_empty() => None,
            Ok(rows) => Some(Ok(rows)),
            Err(e) => Some(Err(PipelineError::from(e))),
        });
        self.execute(template_id, prefix, std::iter::once(Ok(first)).chain(rest))
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(tx) = &self.events {
            tx.send(event).ok();
        }
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn execute(
        &self,
        template_id: &str,
        prefix: &str,
        chunks: impl Iterator<Item = Result<Vec<Row>, PipelineError>>,
    ) -> Result<BatchOutcome, PipelineError> {
        self.check_cancelled()?;
        let prefix = effective_prefix(prefix);
        let template = resolve_template(self.backend, self.store, template_id)?;
        tracing::info!(
            template = %template.id,
            version = %template.version,
            fields = template.fields.len(),
            workers = self.workers,
            "batch started"
        );
        self.emit(BatchEvent::Started {
            template_id: template.id.clone(),
            template_version: template.version.clone(),
        });

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("render-{i}"))
            .build()?;

        let mut collector = Collector {
            archive: ArchiveBuilder::new(),
            log: Vec::new(),
            produced: 0,
            skipped: 0,
        };
        let mut next_row = 1;

        for chunk in chunks {
            self.check_cancelled()?;
            let rows = chunk?;
            let expansion = records::expand_from(&rows, next_row, self.ids, &prefix);
            next_row += rows.len();
            for skip in &expansion.skipped {
                self.emit(BatchEvent::RowSkipped {
                    row: skip.row,
                    reason: skip.reason,
                });
            }
            collector.skipped += expansion.skipped.len();

            if let Err(e) = self.render_chunk(&pool, &template, expansion.jobs, &mut collector) {
                tracing::error!(template = %template.id, error = %e, "batch aborted");
                return Err(e);
            }
            if self.cancel.is_cancelled() {
                tracing::error!(template = %template.id, "batch cancelled");
                return Err(PipelineError::Cancelled);
            }
        }

        if collector.produced == 0 {
            tracing::error!(template = %template.id, skipped = collector.skipped, "no valid rows");
            return Err(PipelineError::EmptyBatch {
                skipped: collector.skipped,
            });
        }

        let entries = collector.archive.len();
        let delivery = self.sink.deliver(collector.archive.finish()?)?;
        write_audit(&self.audit, &collector.log, self.events.as_ref());

        tracing::info!(
            template = %template.id,
            count = collector.produced,
            entries,
            skipped = collector.skipped,
            "batch finished"
        );
        self.emit(BatchEvent::Finished {
            count: collector.produced,
            entries,
            skipped: collector.skipped,
        });

        Ok(BatchOutcome {
            delivery,
            count: collector.produced,
            entries,
            skipped: collector.skipped,
            template_version: template.version,
            log_entries: collector.log,
        })
    }

    /// Render one chunk of jobs on the pool and fold the results into the
    /// collector as they complete.
    fn render_chunk(
        &self,
        pool: &rayon::ThreadPool,
        template: &ResolvedTemplate,
        jobs: Vec<RenderJob>,
        collector: &mut Collector,
    ) -> Result<(), PipelineError> {
        if jobs.is_empty() {
            return Ok(());
        }
        let abort = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<JobDone>();
        let backend = self.backend;
        let settings = &self.settings;
        let cancel = &self.cancel;

        thread::scope(|scope| {
            let abort = &abort;
            scope.spawn(move || {
                pool.install(|| {
                    jobs.into_par_iter().for_each_with(tx, |tx, job| {
                        if abort.load(Ordering::Relaxed) || cancel.is_cancelled() {
                            return;
                        }
                        let filename = naming::certificate_filename(
                            &job.identifier,
                            &job.course,
                            &job.person,
                            settings.format,
                        );
                        let values = FieldValues {
                            person: job.person.clone(),
                            course: job.course.clone(),
                            identifier: job.identifier.clone(),
                        };
                        let result = imaging::render_prepared(
                            backend,
                            &template.prepared,
                            &template.fields,
                            &values,
                            settings,
                        );
                        tx.send(JobDone {
                            job,
                            filename,
                            result,
                        })
                        .ok();
                    });
                });
            });

            let mut failure = None;
            for done in rx {
                if failure.is_some() {
                    continue;
                }
                match done.result {
                    Ok(bytes) => {
                        tracing::debug!(file = %done.filename, row = done.job.row, "rendered");
                        collector
                            .log
                            .push(log_entry(&done.job, &done.filename, &template.version));
                        collector.produced += 1;
                        if collector.archive.add(done.filename.clone(), bytes) {
                            self.emit(BatchEvent::Overwritten {
                                filename: done.filename.clone(),
                            });
                        }
                        self.emit(BatchEvent::Rendered {
                            filename: done.filename,
                            row: done.job.row,
                        });
                    }
                    Err(source) => {
                        abort.store(true, Ordering::Relaxed);
                        failure = Some(PipelineError::Render {
                            filename: done.filename,
                            source,
                        });
                    }
                }
            }
            failure.map_or(Ok(()), Err)
        })
    }
}

/// One interactive request: one person, one or more courses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleRequest {
    pub template_id: String,
    pub person: String,
    pub courses: Vec<String>,
    pub prefix: String,
}

/// Files produced for a single request, in course order.
#[derive(Debug, Clone)]
pub struct SingleOutcome {
    pub identifier: String,
    pub files: Vec<(String, Vec<u8>)>,
    pub log_entries: Vec<AuditLogEntry>,
}

/// Sequential, one-record variant of the batch.
pub struct SingleRequestPipeline<'a, B: RasterBackend> {
    backend: &'a B,
    store: &'a dyn TemplateStore,
    ids: &'a dyn IdentifierGenerator,
    audit: Vec<&'a dyn AuditSink>,
    settings: RenderSettings,
}

impl<'a, B: RasterBackend> SingleRequestPipeline<'a, B> {
    pub fn new(backend: &'a B, store: &'a dyn TemplateStore) -> Self {
        Self {
            backend,
            store,
            ids: &DAILY_IDS,
            audit: Vec::new(),
            settings: RenderSettings::default(),
        }
    }

    pub fn with_ids(mut self, ids: &'a dyn IdentifierGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_audit_sink(mut self, sink: &'a dyn AuditSink) -> Self {
        self.audit.push(sink);
        self
    }

    pub fn with_settings(mut self, settings: RenderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn run(&self, request: &SingleRequest) -> Result<SingleOutcome, PipelineError> {
        if request.template_id.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "template id is required".to_string(),
            ));
        }
        let person = request.person.trim();
        if person.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "person name is required".to_string(),
            ));
        }
        let courses: Vec<&str> = request
            .courses
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if courses.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "at least one course is required".to_string(),
            ));
        }

        let template = resolve_template(self.backend, self.store, request.template_id.trim())?;
        let identifier = self.ids.next(&effective_prefix(&request.prefix));

        let mut files = Vec::with_capacity(courses.len());
        let mut log_entries = Vec::with_capacity(courses.len());
        for course in courses {
            let job = RenderJob {
                identifier: identifier.clone(),
                person: person.to_string(),
                course: course.to_string(),
                row: 1,
            };
            let filename =
                naming::certificate_filename(&identifier, course, person, self.settings.format);
            let values = FieldValues {
                person: job.person.clone(),
                course: job.course.clone(),
                identifier: identifier.clone(),
            };
            let bytes = imaging::render_prepared(
                self.backend,
                &template.prepared,
                &template.fields,
                &values,
                &self.settings,
            )
            .map_err(|source| PipelineError::Render {
                filename: filename.clone(),
                source,
            })?;
            log_entries.push(log_entry(&job, &filename, &template.version));
            files.push((filename, bytes));
        }

        write_audit(&self.audit, &log_entries, None);
        tracing::info!(%identifier, files = files.len(), "certificates generated");
        Ok(SingleOutcome {
            identifier,
            files,
            log_entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{DirectorySink, InlineSink};
    use crate::audit::{JsonlFileSink, MemoryAuditSink};
    use crate::ident::tests::SequentialIds;
    use crate::imaging::backend::tests::MockBackend;
    use crate::imaging::{OutputFormat, TemplateMime};
    use crate::store::MemoryStore;
    use crate::test_helpers::{png_bytes, seeded_template};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn rows(csv: &str) -> Vec<Row> {
        records::read_rows(csv.as_bytes()).unwrap()
    }

    fn zip_names(delivery: &Delivery) -> Vec<String> {
        let Delivery::Inline(bytes) = delivery else {
            panic!("expected inline delivery");
        };
        let zip = zip::ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        zip.file_names().map(str::to_string).collect()
    }

    /// Backend that cancels the batch as soon as it is asked to render.
    struct CancellingBackend {
        inner: MockBackend,
        token: CancelToken,
    }

    impl RasterBackend for CancellingBackend {
        fn prepare(
            &self,
            bytes: &[u8],
            mime: TemplateMime,
        ) -> Result<PreparedTemplate, RenderError> {
            self.inner.prepare(bytes, mime)
        }

        fn render(
            &self,
            template: &PreparedTemplate,
            overlay: &imaging::OverlayParams,
            format: OutputFormat,
        ) -> Result<Vec<u8>, RenderError> {
            self.token.cancel();
            self.inner.render(template, overlay, format)
        }
    }

    // =========================================================================
    // Batch
    // =========================================================================

    #[test]
    fn one_row_two_courses() {
        let backend = MockBackend::with_dimensions(1800, 1200);
        let store = MemoryStore::new();
        let id = seeded_template(&store, 1800, 1200);
        let ids = SequentialIds::default();
        let audit = MemoryAuditSink::new();
        let pipeline = BatchPipeline::new(&backend, &store, &InlineSink)
            .with_ids(&ids)
            .with_audit_sink(&audit);

        let outcome = pipeline
            .run(&rows("name,courses\nAnn Lee,Go|Rust\n"), &id, "CERT")
            .unwrap();

        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.entries, 2);
        assert_eq!(ids.issued(), 1);
        assert_eq!(backend.render_count(), 2);

        let mut names = zip_names(&outcome.delivery);
        names.sort();
        assert_eq!(
            names,
            [
                "CERT-CERT-20260101-00000001-go-ann-lee.png",
                "CERT-CERT-20260101-00000001-rust-ann-lee.png",
            ]
        );

        let logged = audit.entries();
        assert_eq!(logged.len(), 2);
        assert!(logged.iter().all(|e| e.identifier == "CERT-20260101-00000001"));
        assert!(logged.iter().all(|e| e.template_version == id[4..]));
        assert_eq!(outcome.template_version, &id[4..]);
    }

    #[test]
    fn all_rows_invalid_is_empty_batch() {
        let backend = MockBackend::with_dimensions(800, 600);
        let store = MemoryStore::new();
        let id = seeded_template(&store, 800, 600);
        let audit = MemoryAuditSink::new();
        let ids = SequentialIds::default();
        let pipeline = BatchPipeline::new(&backend, &store, &InlineSink)
            .with_ids(&ids)
            .with_audit_sink(&audit);

        let result = pipeline.run(&rows("name,courses\n,Go\nBob, | \n"), &id, "CERT");
        let err = result.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyBatch { skipped: 2 }));
        assert_eq!(err.status_class(), StatusClass::Client);
        assert_eq!(backend.render_count(), 0);
        assert!(audit.entries().is_empty());
    }

    #[test]
    fn no_rows_is_empty_input() {
        let backend = MockBackend::with_dimensions(800, 600);
        let store = MemoryStore::new();
        let pipeline = BatchPipeline::new(&backend, &store, &InlineSink);
        assert!(matches!(
            pipeline.run(&[], "tpl_missing", "CERT"),
            Err(PipelineError::EmptyInput)
        ));
        assert!(matches!(
            pipeline.run_csv("name,courses\n".as_bytes(), "tpl_missing", "CERT"),
            Err(PipelineError::EmptyInput)
        ));
    }

    #[test]
    fn zero_sized_template_aborts_without_archive() {
        let backend = MockBackend::with_dimensions(0, 0);
        let store = MemoryStore::new();
        let id = seeded_template(&store, 10, 10);
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let sink = DirectorySink::new(&out);
        let pipeline = BatchPipeline::new(&backend, &store, &sink);

        let err = pipeline
            .run(&rows("name,courses\nAnn,Go\n"), &id, "CERT")
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTemplate(_)));
        assert_eq!(backend.render_count(), 0);
        assert!(!out.exists());
    }

    #[test]
    fn missing_template_and_fields() {
        let backend = MockBackend::with_dimensions(800, 600);
        let store = MemoryStore::new();
        let pipeline = BatchPipeline::new(&backend, &store, &InlineSink);
        let input = rows("name,courses\nAnn,Go\n");

        let err = pipeline.run(&input, "tpl_000000000000", "CERT").unwrap_err();
        assert!(matches!(err, PipelineError::TemplateNotFound(_)));
        assert_eq!(err.status_class(), StatusClass::Client);

        let id = store.put(&png_bytes(20, 20)).unwrap();
        let err = pipeline.run(&input, &id, "CERT").unwrap_err();
        assert!(matches!(err, PipelineError::FieldsNotFound(_)));
    }

    #[test]
    fn render_failure_aborts_batch() {
        let backend = MockBackend::with_dimensions(1800, 1200).failing_on("Mallory");
        let store = MemoryStore::new();
        let id = seeded_template(&store, 1800, 1200);
        let audit = MemoryAuditSink::new();
        let tmp = TempDir::new().unwrap();
        let sink = DirectorySink::new(tmp.path().join("out"));
        let ids = SequentialIds::default();
        let pipeline = BatchPipeline::new(&backend, &store, &sink)
            .with_ids(&ids)
            .with_audit_sink(&audit)
            .with_workers(2);

        let err = pipeline
            .run(
                &rows("name,courses\nAnn,Go\nMallory,Rust\nBob,C\n"),
                &id,
                "CERT",
            )
            .unwrap_err();
        match &err {
            PipelineError::Render { filename, .. } => assert!(filename.contains("mallory")),
            other => panic!("expected render failure, got {other:?}"),
        }
        assert_eq!(err.status_class(), StatusClass::Server);
        assert!(audit.entries().is_empty());
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn duplicate_course_overwrites_entry() {
        let backend = MockBackend::with_dimensions(1800, 1200);
        let store = MemoryStore::new();
        let id = seeded_template(&store, 1800, 1200);
        let (tx, rx) = mpsc::channel();
        let ids = SequentialIds::default();
        let pipeline = BatchPipeline::new(&backend, &store, &InlineSink)
            .with_ids(&ids)
            .with_events(tx);

        let outcome = pipeline
            .run(&rows("name,courses\nAnn,Go|Go\n"), &id, "CERT")
            .unwrap();
        drop(pipeline);

        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.entries, 1);
        assert_eq!(outcome.log_entries.len(), 2);
        assert_eq!(zip_names(&outcome.delivery).len(), 1);

        let events: Vec<BatchEvent> = rx.iter().collect();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, BatchEvent::Overwritten { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn cancelled_before_start() {
        let backend = MockBackend::with_dimensions(800, 600);
        let store = MemoryStore::new();
        let id = seeded_template(&store, 800, 600);
        let pipeline = BatchPipeline::new(&backend, &store, &InlineSink);
        pipeline.cancel_token().cancel();

        let err = pipeline
            .run(&rows("name,courses\nAnn,Go\n"), &id, "CERT")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(err.status_class(), StatusClass::Server);
        assert_eq!(backend.render_count(), 0);
    }

    #[test]
    fn cancelled_mid_batch_discards_archive() {
        let token = CancelToken::new();
        let backend = CancellingBackend {
            inner: MockBackend::with_dimensions(1800, 1200),
            token: token.clone(),
        };
        let store = MemoryStore::new();
        let id = seeded_template(&store, 1800, 1200);
        let tmp = TempDir::new().unwrap();
        let sink = DirectorySink::new(tmp.path().join("out"));
        let audit = MemoryAuditSink::new();
        let pipeline = BatchPipeline::new(&backend, &store, &sink)
            .with_cancel_token(token)
            .with_audit_sink(&audit)
            .with_workers(1);

        let err = pipeline
            .run(&rows("name,courses\nAnn,Go|Rust|C|Zig\n"), &id, "CERT")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(backend.inner.render_count() < 4);
        assert!(!tmp.path().join("out").exists());
        assert!(audit.entries().is_empty());
    }

    #[test]
    fn audit_failure_keeps_archive() {
        let backend = MockBackend::with_dimensions(1800, 1200);
        let store = MemoryStore::new();
        let id = seeded_template(&store, 1800, 1200);
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let broken = JsonlFileSink::new(blocker.join("log.jsonl"));
        let memory = MemoryAuditSink::new();
        let (tx, rx) = mpsc::channel();
        let pipeline = BatchPipeline::new(&backend, &store, &InlineSink)
            .with_audit_sink(&broken)
            .with_audit_sink(&memory)
            .with_events(tx);

        let outcome = pipeline
            .run(&rows("name,courses\nAnn,Go\n"), &id, "CERT")
            .unwrap();
        drop(pipeline);

        assert_eq!(outcome.count, 1);
        assert_eq!(memory.entries().len(), 1);
        let events: Vec<BatchEvent> = rx.iter().collect();
        assert!(
            events
                .iter()
                .any(|e| matches!(e, BatchEvent::AuditFailed { .. }))
        );
        assert!(matches!(events.last(), Some(BatchEvent::Finished { count: 1, .. })));
    }

    #[test]
    fn streaming_matches_in_memory() {
        let csv = "fio,courses\nAnn,Go|Rust\n,Go\nBob,C\nCleo,\nDan,Zig|Go\n";
        let backend = MockBackend::with_dimensions(1800, 1200);
        let store = MemoryStore::new();
        let id = seeded_template(&store, 1800, 1200);
        let ids = SequentialIds::default();
        let (tx, rx) = mpsc::channel();
        let pipeline = BatchPipeline::new(&backend, &store, &InlineSink)
            .with_ids(&ids)
            .with_chunk_size(2)
            .with_events(tx);

        let outcome = pipeline.run_csv(csv.as_bytes(), &id, "P").unwrap();
        drop(pipeline);

        assert_eq!(outcome.count, 5);
        assert_eq!(outcome.entries, 5);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(ids.issued(), 3);

        let skipped: Vec<usize> = rx
            .iter()
            .filter_map(|e| match e {
                BatchEvent::RowSkipped { row, .. } => Some(row),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, [2, 4]);
    }

    #[test]
    fn events_bracket_the_batch() {
        let backend = MockBackend::with_dimensions(1800, 1200);
        let store = MemoryStore::new();
        let id = seeded_template(&store, 1800, 1200);
        let (tx, rx) = mpsc::channel();
        let pipeline = BatchPipeline::new(&backend, &store, &InlineSink).with_events(tx);
        pipeline
            .run(&rows("name,courses\nAnn,Go|Rust\n"), &id, "CERT")
            .unwrap();
        drop(pipeline);

        let events: Vec<BatchEvent> = rx.iter().collect();
        assert!(matches!(events.first(), Some(BatchEvent::Started { .. })));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, BatchEvent::Rendered { .. }))
                .count(),
            2
        );
        assert!(matches!(
            events.last(),
            Some(BatchEvent::Finished {
                count: 2,
                entries: 2,
                skipped: 0
            })
        ));
    }

    #[test]
    fn blank_prefix_falls_back_to_default() {
        let backend = MockBackend::with_dimensions(1800, 1200);
        let store = MemoryStore::new();
        let id = seeded_template(&store, 1800, 1200);
        let ids = SequentialIds::default();
        let pipeline = BatchPipeline::new(&backend, &store, &InlineSink).with_ids(&ids);
        let outcome = pipeline
            .run(&rows("name,courses\nAnn,Go\n"), &id, "  ")
            .unwrap();
        assert!(outcome.log_entries[0].identifier.starts_with("CERT-"));
    }

    // =========================================================================
    // Single request
    // =========================================================================

    fn request(id: &str, person: &str, courses: &[&str]) -> SingleRequest {
        SingleRequest {
            template_id: id.to_string(),
            person: person.to_string(),
            courses: courses.iter().map(|c| c.to_string()).collect(),
            prefix: "ACME".to_string(),
        }
    }

    #[test]
    fn single_request_renders_each_course() {
        let backend = MockBackend::with_dimensions(1800, 1200);
        let store = MemoryStore::new();
        let id = seeded_template(&store, 1800, 1200);
        let audit = MemoryAuditSink::new();
        let ids = SequentialIds::default();
        let pipeline = SingleRequestPipeline::new(&backend, &store)
            .with_ids(&ids)
            .with_audit_sink(&audit);

        let outcome = pipeline
            .run(&request(&id, " Ann Lee ", &["Go", "  ", "Rust"]))
            .unwrap();
        assert_eq!(outcome.identifier, "ACME-20260101-00000001");
        let names: Vec<&str> = outcome.files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            [
                "CERT-ACME-20260101-00000001-go-ann-lee.png",
                "CERT-ACME-20260101-00000001-rust-ann-lee.png",
            ]
        );
        assert_eq!(audit.entries().len(), 2);
        assert_eq!(audit.entries()[0].person, "Ann Lee");
    }

    #[test]
    fn single_request_validation() {
        let backend = MockBackend::with_dimensions(1800, 1200);
        let store = MemoryStore::new();
        let id = seeded_template(&store, 1800, 1200);
        let pipeline = SingleRequestPipeline::new(&backend, &store);

        for bad in [
            request(&id, "   ", &["Go"]),
            request(&id, "Ann", &[]),
            request(&id, "Ann", &[" ", ""]),
            request("", "Ann", &["Go"]),
        ] {
            let err = pipeline.run(&bad).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidRequest(_)), "{bad:?}");
            assert_eq!(err.status_class(), StatusClass::Client);
        }
        assert_eq!(backend.render_count(), 0);
    }

    #[test]
    fn single_request_failure_aborts() {
        let backend = MockBackend::with_dimensions(1800, 1200).failing_on("Rust");
        let store = MemoryStore::new();
        let id = seeded_template(&store, 1800, 1200);
        let audit = MemoryAuditSink::new();
        let pipeline = SingleRequestPipeline::new(&backend, &store).with_audit_sink(&audit);

        let err = pipeline
            .run(&request(&id, "Ann", &["Go", "Rust", "C"]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Render { .. }));
        assert_eq!(backend.render_count(), 2);
        assert!(audit.entries().is_empty());
    }

    #[test]
    fn store_errors_map_to_pipeline_errors() {
        assert!(matches!(
            PipelineError::from(StoreError::NotFound("x".into())),
            PipelineError::TemplateNotFound(_)
        ));
        assert!(matches!(
            PipelineError::from(StoreError::FieldsNotFound("x".into())),
            PipelineError::FieldsNotFound(_)
        ));
        let io = PipelineError::from(StoreError::Io(std::io::Error::other("disk")));
        assert_eq!(io.status_class(), StatusClass::Server);
    }
}
