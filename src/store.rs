//! Template storage.
//!
//! Templates are content-addressed: the id is `tpl_` followed by the first
//! 12 hex digits of the SHA-256 of the image bytes. The bytes never change
//! once stored; the field set attached to a template is replaced whole on
//! every save.
//!
//! The pipeline only sees the [`TemplateStore`] trait. Two backends:
//!
//! - [`MemoryStore`]: process-local map, used by tests and one-shot runs.
//! - [`DirStore`]: one directory per template.
//!
//! ```text
//! templates/
//! └── tpl_3f2a9c01b7de/
//!     ├── template.png          # or template.jpg
//!     ├── fields.json           # {"fields": [...]}
//!     └── logs/
//!         └── certificates.jsonl
//! ```

use crate::fields::{self, FieldBox, FieldSet};
use crate::imaging::TemplateMime;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

const ID_PREFIX: &str = "tpl_";
const HASH_PREFIX_LEN: usize = 12;
const FIELDS_FILENAME: &str = "fields.json";
const TEMPLATE_STEM: &str = "template";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Template not found: {0}")]
    NotFound(String),
    #[error("No fields saved for template {0}")]
    FieldsNotFound(String),
    #[error("Unsupported template format (expected PNG or JPEG)")]
    UnsupportedFormat,
    #[error("Field set is empty")]
    EmptyFields,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid fields JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A stored template image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateAsset {
    pub id: String,
    pub bytes: Vec<u8>,
    pub mime: TemplateMime,
}

impl TemplateAsset {
    /// Short content hash recorded in audit logs.
    pub fn version(&self) -> String {
        template_version(&self.bytes)
    }
}

/// First 12 hex digits of the SHA-256 of `bytes`.
pub fn template_version(bytes: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(bytes));
    digest[..HASH_PREFIX_LEN].to_string()
}

/// Content-derived template id.
pub fn template_id_for(bytes: &[u8]) -> String {
    format!("{ID_PREFIX}{}", template_version(bytes))
}

/// Ids are used as directory names, so only `[A-Za-z0-9_-]` is accepted.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Storage capability for templates and their field sets.
pub trait TemplateStore: Send + Sync {
    /// Store template bytes and return the id. Storing the same bytes again
    /// returns the same id and keeps any saved fields.
    fn put(&self, bytes: &[u8]) -> Result<String, StoreError>;

    fn get(&self, id: &str) -> Result<TemplateAsset, StoreError>;

    fn has(&self, id: &str) -> bool;

    /// Replace the field set. Duplicate roles collapse, last one wins.
    /// Returns the normalised set that was saved.
    fn save_fields(&self, id: &str, fields: Vec<FieldBox>) -> Result<Vec<FieldBox>, StoreError>;

    /// Saved field set; `FieldsNotFound` if none was saved or it is empty.
    fn fields(&self, id: &str) -> Result<Vec<FieldBox>, StoreError>;
}

/// Saved field set, or an empty list when none was saved yet. Any other
/// failure (unreadable file, malformed JSON) is still returned.
pub fn fields_or_empty(
    store: &dyn TemplateStore,
    id: &str,
) -> Result<Vec<FieldBox>, StoreError> {
    match store.fields(id) {
        Ok(fields) => Ok(fields),
        Err(StoreError::FieldsNotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Sniff and normalise an upload before storing it.
fn admit(bytes: &[u8]) -> Result<(String, TemplateMime), StoreError> {
    let mime = TemplateMime::sniff(bytes).ok_or(StoreError::UnsupportedFormat)?;
    Ok((template_id_for(bytes), mime))
}

fn admit_fields(fields: Vec<FieldBox>) -> Result<Vec<FieldBox>, StoreError> {
    let fields = fields::normalize(fields);
    if fields.is_empty() {
        return Err(StoreError::EmptyFields);
    }
    Ok(fields)
}

// ============================================================================
// In-memory
// ============================================================================

struct MemoryEntry {
    bytes: Vec<u8>,
    mime: TemplateMime,
    fields: Vec<FieldBox>,
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateStore for MemoryStore {
    fn put(&self, bytes: &[u8]) -> Result<String, StoreError> {
        let (id, mime) = admit(bytes)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(id.clone()).or_insert_with(|| MemoryEntry {
            bytes: bytes.to_vec(),
            mime,
            fields: Vec::new(),
        });
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<TemplateAsset, StoreError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(TemplateAsset {
            id: id.to_string(),
            bytes: entry.bytes.clone(),
            mime: entry.mime,
        })
    }

    fn has(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    fn save_fields(&self, id: &str, fields: Vec<FieldBox>) -> Result<Vec<FieldBox>, StoreError> {
        let fields = admit_fields(fields)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.fields = fields.clone();
        Ok(fields)
    }

    fn fields(&self, id: &str) -> Result<Vec<FieldBox>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if entry.fields.is_empty() {
            return Err(StoreError::FieldsNotFound(id.to_string()));
        }
        Ok(entry.fields.clone())
    }
}

// ============================================================================
// Directory
// ============================================================================

/// Write `bytes` to `path` through a sibling temp file and a rename, so
/// readers see either the old content or the new, never a partial file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{name}.tmp"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

/// Filesystem-backed store rooted at one directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn template_dir(&self, id: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_id(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(self.root.join(id))
    }

    fn template_file(&self, id: &str) -> Result<Option<(PathBuf, TemplateMime)>, StoreError> {
        let dir = self.template_dir(id)?;
        for mime in [TemplateMime::Png, TemplateMime::Jpeg] {
            let path = dir.join(format!("{TEMPLATE_STEM}.{}", mime.extension()));
            if path.is_file() {
                return Ok(Some((path, mime)));
            }
        }
        Ok(None)
    }

    /// Per-template audit log location.
    pub fn log_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .template_dir(id)?
            .join("logs")
            .join("certificates.jsonl"))
    }
}

impl TemplateStore for DirStore {
    fn put(&self, bytes: &[u8]) -> Result<String, StoreError> {
        let (id, mime) = admit(bytes)?;
        if self.template_file(&id)?.is_some() {
            tracing::debug!(%id, "template already stored");
            return Ok(id);
        }
        let dir = self.template_dir(&id)?;
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{TEMPLATE_STEM}.{}", mime.extension()));
        write_atomic(&path, bytes)?;
        tracing::info!(%id, %mime, bytes = bytes.len(), "stored template");
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<TemplateAsset, StoreError> {
        let (path, mime) = self
            .template_file(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(TemplateAsset {
            id: id.to_string(),
            bytes: fs::read(path)?,
            mime,
        })
    }

    fn has(&self, id: &str) -> bool {
        matches!(self.template_file(id), Ok(Some(_)))
    }

    fn save_fields(&self, id: &str, fields: Vec<FieldBox>) -> Result<Vec<FieldBox>, StoreError> {
        let fields = admit_fields(fields)?;
        if !self.has(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let set = FieldSet { fields };
        let json = serde_json::to_string_pretty(&set)?;
        write_atomic(&self.template_dir(id)?.join(FIELDS_FILENAME), json.as_bytes())?;
        tracing::info!(%id, fields = set.fields.len(), "saved fields");
        Ok(set.fields)
    }

    fn fields(&self, id: &str) -> Result<Vec<FieldBox>, StoreError> {
        let path = self.template_dir(id)?.join(FIELDS_FILENAME);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::FieldsNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let set = FieldSet::from_json(&json)?;
        if set.fields.is_empty() {
            return Err(StoreError::FieldsNotFound(id.to_string()));
        }
        Ok(fields::normalize(set.fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Align, FieldName};
    use crate::test_helpers::{jpeg_bytes, png_bytes};
    use tempfile::TempDir;

    fn field(name: FieldName, x: u32) -> FieldBox {
        FieldBox {
            name,
            x,
            y: 10,
            w: 200,
            h: 40,
            align: Align::Center,
        }
    }

    /// Runs the shared contract against any backend.
    fn exercise_contract(store: &dyn TemplateStore) {
        let png = png_bytes(40, 30);
        let id = store.put(&png).unwrap();
        assert!(id.starts_with("tpl_"));
        assert_eq!(id.len(), 4 + 12);
        assert!(store.has(&id));

        let asset = store.get(&id).unwrap();
        assert_eq!(asset.bytes, png);
        assert_eq!(asset.mime, TemplateMime::Png);
        assert_eq!(format!("tpl_{}", asset.version()), id);

        assert!(matches!(
            store.fields(&id),
            Err(StoreError::FieldsNotFound(_))
        ));

        let saved = store
            .save_fields(
                &id,
                vec![
                    field(FieldName::PersonName, 1),
                    field(FieldName::Course, 2),
                    field(FieldName::PersonName, 3),
                ],
            )
            .unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(store.fields(&id).unwrap(), saved);
        assert_eq!(saved[0].x, 3);

        // Same bytes again: same id, fields survive.
        assert_eq!(store.put(&png).unwrap(), id);
        assert_eq!(store.fields(&id).unwrap().len(), 2);

        // Replacing is whole-set.
        store
            .save_fields(&id, vec![field(FieldName::RecordId, 9)])
            .unwrap();
        let fields = store.fields(&id).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, FieldName::RecordId);

        assert!(matches!(
            store.save_fields(&id, vec![]),
            Err(StoreError::EmptyFields)
        ));
        assert!(matches!(
            store.get("tpl_000000000000"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.save_fields("tpl_000000000000", vec![field(FieldName::Course, 1)]),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.put(b"GIF89a not accepted"),
            Err(StoreError::UnsupportedFormat)
        ));

        let jpg = jpeg_bytes(20, 20);
        let jpg_id = store.put(&jpg).unwrap();
        assert_ne!(jpg_id, id);
        assert_eq!(store.get(&jpg_id).unwrap().mime, TemplateMime::Jpeg);
    }

    #[test]
    fn memory_store_contract() {
        exercise_contract(&MemoryStore::new());
    }

    #[test]
    fn dir_store_contract() {
        let tmp = TempDir::new().unwrap();
        exercise_contract(&DirStore::new(tmp.path()));
    }

    #[test]
    fn dir_store_layout() {
        let tmp = TempDir::new().unwrap();
        let store = DirStore::new(tmp.path());
        let id = store.put(&png_bytes(8, 8)).unwrap();
        store
            .save_fields(&id, vec![field(FieldName::Course, 5)])
            .unwrap();

        let dir = tmp.path().join(&id);
        assert!(dir.join("template.png").is_file());
        let json = fs::read_to_string(dir.join("fields.json")).unwrap();
        let set: FieldSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set.fields.len(), 1);
        assert_eq!(
            store.log_path(&id).unwrap(),
            dir.join("logs").join("certificates.jsonl")
        );

        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn dir_store_reads_bare_array_fields() {
        let tmp = TempDir::new().unwrap();
        let store = DirStore::new(tmp.path());
        let id = store.put(&png_bytes(8, 8)).unwrap();
        fs::write(
            tmp.path().join(&id).join("fields.json"),
            r#"[{"name": "fio", "x": 0, "y": 0, "w": 10, "h": 10}]"#,
        )
        .unwrap();
        let fields = store.fields(&id).unwrap();
        assert_eq!(fields[0].name, FieldName::PersonName);
    }

    #[test]
    fn dir_store_empty_fields_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = DirStore::new(tmp.path());
        let id = store.put(&png_bytes(8, 8)).unwrap();
        fs::write(tmp.path().join(&id).join("fields.json"), r#"{"fields": []}"#).unwrap();
        assert!(matches!(
            store.fields(&id),
            Err(StoreError::FieldsNotFound(_))
        ));
    }

    #[test]
    fn fields_or_empty_only_hides_missing_fields() {
        let tmp = TempDir::new().unwrap();
        let store = DirStore::new(tmp.path());
        let id = store.put(&png_bytes(8, 8)).unwrap();
        assert!(fields_or_empty(&store, &id).unwrap().is_empty());

        store
            .save_fields(&id, vec![field(FieldName::Course, 5)])
            .unwrap();
        assert_eq!(fields_or_empty(&store, &id).unwrap().len(), 1);

        fs::write(tmp.path().join(&id).join("fields.json"), "{not json").unwrap();
        assert!(matches!(
            fields_or_empty(&store, &id),
            Err(StoreError::Json(_))
        ));
    }

    #[test]
    fn dir_store_rejects_path_like_ids() {
        let tmp = TempDir::new().unwrap();
        let store = DirStore::new(tmp.path());
        assert!(matches!(store.get("../etc"), Err(StoreError::NotFound(_))));
        assert!(!store.has("a/b"));
    }

    #[test]
    fn version_is_hash_prefix() {
        let v = template_version(b"abc");
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223...
        assert_eq!(v, "ba7816bf8f01");
        assert_eq!(template_id_for(b"abc"), "tpl_ba7816bf8f01");
    }
}
