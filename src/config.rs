//! Configuration module.
//!
//! Handles loading, validating, and merging `chan-image.toml`. Stock defaults
//! are overridden by the user's file; every key is optional.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! save_root = "saved"            # Root of the saved-thread directory tree
//! # scratch_dir = "<tmp>/chan-image/cache"
//! log_level = "info"             # Overridden by RUST_LOG
//!
//! [reencode]
//! quality = 100                  # 1-100, JPEG only
//! reduce_percent = 0             # 0-100, shrink both sides by this much
//! reencode_type = "as_is"        # as_is | as_jpeg | as_png
//! fix_exif = false
//! remove_metadata = false
//! change_checksum = false
//!
//! [display]
//! max_width = 0                  # Decode hint for `load`; 0 = full size
//! max_height = 0
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse; override just the values you want:
//!
//! ```toml
//! [reencode]
//! change_checksum = true
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{ReencodeSettings, ReencodeType, SizeHint};
use crate::reencode::ReencodeFlags;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "chan-image.toml";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `chan-image.toml`.
///
/// All fields have sensible defaults. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root that owner subdirectories are resolved against.
    pub save_root: PathBuf,
    /// Where re-encode temp artifacts are created and swept.
    pub scratch_dir: PathBuf,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Re-encode defaults, overridable per invocation.
    pub reencode: ReencodeConfig,
    /// Decode hint for display loads.
    pub display: DisplayConfig,
}

/// Scratch directory used when none is configured.
pub fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("chan-image").join("cache")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            save_root: PathBuf::from("saved"),
            scratch_dir: default_scratch_dir(),
            log_level: "info".to_string(),
            reencode: ReencodeConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    ///
    /// Re-encode values are rejected here rather than clamped as
    /// [`ReencodeSettings`] would.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.reencode.quality) {
            return Err(ConfigError::Validation(
                "reencode.quality must be 1-100".into(),
            ));
        }
        if self.reencode.reduce_percent > 100 {
            return Err(ConfigError::Validation(
                "reencode.reduce_percent must be 0-100".into(),
            ));
        }
        if self.save_root.as_os_str().is_empty() {
            return Err(ConfigError::Validation("save_root must not be empty".into()));
        }
        if self.scratch_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "scratch_dir must not be empty".into(),
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "log_level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

/// Re-encode defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReencodeConfig {
    pub quality: u32,
    pub reduce_percent: u32,
    pub reencode_type: ReencodeType,
    pub fix_exif: bool,
    pub remove_metadata: bool,
    pub change_checksum: bool,
}

impl Default for ReencodeConfig {
    fn default() -> Self {
        Self {
            quality: 100,
            reduce_percent: 0,
            reencode_type: ReencodeType::AsIs,
            fix_exif: false,
            remove_metadata: false,
            change_checksum: false,
        }
    }
}

impl ReencodeConfig {
    pub fn settings(&self) -> ReencodeSettings {
        ReencodeSettings::new(self.quality, self.reduce_percent, self.reencode_type)
    }

    pub fn flags(&self) -> ReencodeFlags {
        ReencodeFlags::new(self.fix_exif, self.remove_metadata, self.change_checksum)
    }
}

/// Decode size hint for display loads. Zero on either axis means full size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    pub max_width: u32,
    pub max_height: u32,
}

impl DisplayConfig {
    pub fn hint(&self) -> SizeHint {
        SizeHint::new(self.max_width, self.max_height)
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// [`Config::default`] as a TOML table, the bottom layer every user file is
/// merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Deep-merge `overlay` onto `base`.
///
/// Tables merge per key and recurse; any other overlay value wins outright.
/// Base keys absent from the overlay survive.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Parse `path` into an untyped TOML value, or `None` when there is no such
/// file. Unparseable files are errors.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Apply `overlay` (if any) to `base` and turn the result into a validated
/// [`Config`].
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Config, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the configuration.
///
/// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] in the
/// working directory is used if present, stock defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let overlay = match path {
        Some(path) if !path.exists() => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
            });
        }
        Some(path) => load_raw_config(path)?,
        None => load_raw_config(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    resolve_config(stock_defaults_value()?, overlay)
}

/// The documented stock `chan-image.toml` printed by `gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# chan-image Configuration
# =========================
# Every key is optional and shows its default value.
# Read from ./chan-image.toml unless --config points elsewhere.
# Misspelled or unknown keys are rejected.

# Root of the saved-thread tree. Board and image subdirectories of each
# thread are resolved against it.
save_root = "saved"

# Scratch directory for re-encode temp files. Leftover temp files from
# interrupted runs are deleted from here automatically.
# Defaults to <system temp dir>/chan-image/cache.
# scratch_dir = "/tmp/chan-image/cache"

# Log level: trace, debug, info, warn, error, off.
# The RUST_LOG environment variable takes precedence.
log_level = "info"

# ---------------------------------------------------------------------------
# Re-encoding defaults (each can be overridden on the command line)
# ---------------------------------------------------------------------------
[reencode]
# JPEG quality (1 = worst, 100 = best). PNG output is lossless.
quality = 100

# Shrink width and height by this percentage (0 = keep size).
reduce_percent = 0

# Output format: "as_is" keeps the source format, or force "as_jpeg"/"as_png".
reencode_type = "as_is"

# Rotate JPEGs upright according to their EXIF orientation.
fix_exif = false

# Re-encode even when nothing else changes, dropping all metadata.
remove_metadata = false

# Perturb pixels so the encoded file hash changes.
change_checksum = false

# ---------------------------------------------------------------------------
# Display loading
# ---------------------------------------------------------------------------
[display]
# Images larger than this are downsampled on load. 0 = full size.
max_width = 0
max_height = 0
"##
}
