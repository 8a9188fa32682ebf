//! Application configuration.
//!
//! Handles loading and validating `config.toml`. Every key is optional;
//! missing keys take the stock defaults and a missing file means "all
//! defaults".
//!
//! ## Configuration Options
//!
//! ```toml
//! [render]
//! format = "png"                  # png | jpg
//! text_color = "#111111"
//! font_family = "Noto Sans, DejaVu Sans, Arial, sans-serif"
//! font_files = []                 # extra TTF/OTF files, loaded before system fonts
//! system_fonts = true
//! min_font_px = 10
//! jpeg_quality = 90
//!
//! [render.font_multipliers]
//! person_name = 1.0
//! course = 1.0
//! record_id = 0.75
//!
//! [batch]
//! prefix = "CERT"
//! max_workers = 4                 # omit for auto = CPU cores
//! chunk_size = 64
//!
//! [audit]
//! log_file = "logs/certificates.jsonl"   # "" disables the shared log
//! per_template_log = true
//!
//! [store]
//! root = "templates"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{FontMultipliers, OutputFormat, Quality, RenderSettings, TextColor};
use crate::naming;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest accepted font multiplier; a field's font never exceeds this many
/// base fonts.
pub const MAX_FONT_MULTIPLIER: f64 = 10.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// How certificates are drawn and encoded.
    pub render: RenderConfig,
    /// Batch identifiers and parallelism.
    pub batch: BatchConfig,
    /// Where audit lines go.
    pub audit: AuditConfig,
    /// Template store location.
    pub store: StoreConfig,
}

impl AppConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let render = &self.render;
        if render.min_font_px == 0 {
            return Err(ConfigError::Validation(
                "render.min_font_px must be at least 1".into(),
            ));
        }
        if !(1..=100).contains(&render.jpeg_quality) {
            return Err(ConfigError::Validation(
                "render.jpeg_quality must be 1-100".into(),
            ));
        }
        if TextColor::parse(&render.text_color).is_none() {
            return Err(ConfigError::Validation(format!(
                "render.text_color must be #rrggbb, got {:?}",
                render.text_color
            )));
        }
        let m = &render.font_multipliers;
        for (name, value) in [
            ("person_name", m.person_name),
            ("course", m.course),
            ("record_id", m.record_id),
        ] {
            if !value.is_finite() || value <= 0.0 || value > MAX_FONT_MULTIPLIER {
                return Err(ConfigError::Validation(format!(
                    "render.font_multipliers.{name} must be in (0, {MAX_FONT_MULTIPLIER}]"
                )));
            }
        }
        if self.batch.chunk_size == 0 {
            return Err(ConfigError::Validation(
                "batch.chunk_size must be at least 1".into(),
            ));
        }
        if naming::sanitize_prefix(&self.batch.prefix).is_none() {
            return Err(ConfigError::Validation(
                "batch.prefix must contain letters or digits".into(),
            ));
        }
        Ok(())
    }
}

/// Rendering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub format: OutputFormat,
    pub text_color: String,
    /// CSS-style family list handed to the text layer.
    pub font_family: String,
    pub font_files: Vec<PathBuf>,
    pub system_fonts: bool,
    pub min_font_px: u32,
    pub jpeg_quality: u32,
    pub font_multipliers: FontMultipliers,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let settings = RenderSettings::default();
        Self {
            format: settings.format,
            text_color: settings.color.to_string(),
            font_family: settings.font_family,
            font_files: Vec::new(),
            system_fonts: true,
            min_font_px: settings.min_font_px,
            jpeg_quality: Quality::default().value(),
            font_multipliers: settings.multipliers,
        }
    }
}

impl RenderConfig {
    /// Compositor settings. Call after [`AppConfig::validate`]; an unparsable
    /// color falls back to the default.
    pub fn settings(&self) -> RenderSettings {
        RenderSettings {
            format: self.format,
            color: TextColor::parse(&self.text_color).unwrap_or_default(),
            font_family: self.font_family.clone(),
            min_font_px: self.min_font_px,
            multipliers: self.font_multipliers,
        }
    }

    pub fn quality(&self) -> Quality {
        Quality::new(self.jpeg_quality)
    }
}

/// Batch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Identifier prefix: `{prefix}-{YYYYMMDD}-{hex}`.
    pub prefix: String,
    /// Maximum number of parallel render workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
    /// Rows per chunk when streaming CSV input.
    pub chunk_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            prefix: crate::pipeline::DEFAULT_PREFIX.to_string(),
            max_workers: None,
            chunk_size: crate::pipeline::DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &BatchConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_workers
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Audit log settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    /// Shared JSONL log. Empty disables it.
    pub log_file: String,
    /// Also append to `<store>/<template>/logs/certificates.jsonl`.
    pub per_template_log: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_file: "logs/certificates.jsonl".to_string(),
            per_template_log: true,
        }
    }
}

impl AuditConfig {
    pub fn log_path(&self) -> Option<PathBuf> {
        let trimmed = self.log_file.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

/// Template store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("templates"),
        }
    }
}

/// Parse and validate config text.
pub fn parse_config(text: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

/// Load config from a file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(AppConfig::default());
    }
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# certpress configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Rendering
# ---------------------------------------------------------------------------
[render]
# Output raster format: "png" or "jpg".
format = "png"

# Fill color for all text, as #rrggbb.
text_color = "#111111"

# Font family list for the text layer, first available face wins.
font_family = "Noto Sans, DejaVu Sans, Arial, sans-serif"

# Extra font files (TTF/OTF) loaded before the system fonts.
font_files = []

# Load fonts installed on this machine.
system_fonts = true

# Smallest font size the fitter may choose. Text that still overflows at this
# size is drawn anyway, spilling evenly above and below its box.
min_font_px = 10

# JPEG quality (1-100). Ignored for PNG.
jpeg_quality = 90

# Maximum font per field, as a multiple of the template's base font
# (one eighteenth of the template's shorter edge).
# Each multiplier must be greater than 0 and at most 10.
[render.font_multipliers]
person_name = 1.0
course = 1.0
record_id = 0.75

# ---------------------------------------------------------------------------
# Batch generation
# ---------------------------------------------------------------------------
[batch]
# Identifier prefix: PREFIX-YYYYMMDD-xxxxxxxx.
prefix = "CERT"

# Maximum parallel render workers. Omit to use all CPU cores.
# Values above the core count are clamped down.
# max_workers = 4

# Rows read per chunk when streaming large CSV files.
chunk_size = 64

# ---------------------------------------------------------------------------
# Audit log
# ---------------------------------------------------------------------------
[audit]
# JSONL file receiving one line per issued certificate. "" disables it.
log_file = "logs/certificates.jsonl"

# Also append to templates/<id>/logs/certificates.jsonl.
per_template_log = true

# ---------------------------------------------------------------------------
# Template store
# ---------------------------------------------------------------------------
[store]
# Directory holding one sub-directory per template.
root = "templates"
"##
}
