//! Exchange Channel - file-backed field exchange between the engines
//!
//! The flow engine writes an exchange ("com") file into its output
//! directory; the wave engine reads it internally. The runner relays flow
//! state to the wave engine by replacing whole fields in that file.
//!
//! # Rewrite Protocol
//!
//! ```text
//! replace_field(name, values):
//! 1. Load and decode the complete file
//! 2. Strip the `coordinates` attribute from every variable
//! 3. Overwrite the values of `name`, keeping its element type
//! 4. Encode in the classic format variant into a temporary sibling file
//! 5. Flush the sibling to disk, then rename it over the original
//! ```
//!
//! # Critical Invariants
//!
//! - **Isolation**: replacing field A never changes the values of field B
//! - **Metadata**: the only metadata change is removal of `coordinates`
//! - **Atomicity**: readers see either the old or the new file, never a
//!   partially written one

pub mod codec;
pub mod dataset;

pub use codec::{CodecError, DatasetCodec, JsonCodec, NetcdfCodec};
pub use dataset::{
    Attributes, Dataset, Dimension, Values, Variable, COORDINATES_ATTRIBUTE, LEGACY_FORMAT,
    OFFSET64_FORMAT,
};

use crate::models::{element_count, FieldArray};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Exchange channel errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChannelError {
    #[error("No exchange file matching '{pattern}' under {}", .search_root.display())]
    NotFound {
        search_root: PathBuf,
        pattern: String,
    },

    #[error("Invalid exchange file pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Failed to read exchange file {}: {reason}", .path.display())]
    ReadFailed { path: PathBuf, reason: String },

    #[error("Failed to rewrite exchange file {}: {reason}", .path.display())]
    WriteFailed { path: PathBuf, reason: String },

    #[error("Exchange file {} has no field '{field}'", .path.display())]
    FieldNotFound { path: PathBuf, field: String },

    #[error("Exchange field '{field}' holds {expected} values, got {actual}")]
    ShapeMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Exchange field '{field}' stores {data_type} values and cannot take a float field")]
    UnsupportedType { field: String, data_type: String },
}

/// Handle on the single exchange file
#[derive(Debug, Clone)]
pub struct ExchangeChannel {
    path: PathBuf,
    codec: Arc<dyn DatasetCodec>,
}

impl ExchangeChannel {
    /// Channel over a known file, NetCDF codec
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_codec(path, Arc::new(NetcdfCodec))
    }

    pub fn with_codec(path: impl Into<PathBuf>, codec: Arc<dyn DatasetCodec>) -> Self {
        Self {
            path: path.into(),
            codec,
        }
    }

    /// Write `dataset` as a new exchange file and return a channel on it
    pub fn create(
        path: impl Into<PathBuf>,
        dataset: &Dataset,
        codec: Arc<dyn DatasetCodec>,
    ) -> Result<Self, ChannelError> {
        let channel = Self::with_codec(path, codec);
        channel.store(dataset)?;
        Ok(channel)
    }

    /// Locate the exchange file under `search_root` using a glob `pattern`
    /// (e.g. `run*_com.nc`), NetCDF codec.
    ///
    /// Zero matches fail with `NotFound`. Several matches are ambiguous: a
    /// warning is logged and the lexicographically first path is used.
    pub fn discover(search_root: &Path, pattern: &str) -> Result<Self, ChannelError> {
        Self::discover_with_codec(search_root, pattern, Arc::new(NetcdfCodec))
    }

    pub fn discover_with_codec(
        search_root: &Path,
        pattern: &str,
        codec: Arc<dyn DatasetCodec>,
    ) -> Result<Self, ChannelError> {
        let root = glob::Pattern::escape(&search_root.to_string_lossy());
        let full = format!("{}/{}", root.trim_end_matches('/'), pattern);
        let entries = glob::glob(&full).map_err(|e| ChannelError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect();
        candidates.sort();

        let chosen = match candidates.len() {
            0 => {
                return Err(ChannelError::NotFound {
                    search_root: search_root.to_path_buf(),
                    pattern: pattern.to_string(),
                })
            }
            1 => candidates.swap_remove(0),
            _ => {
                warn!(
                    pattern,
                    candidates = ?candidates,
                    chosen = %candidates[0].display(),
                    "multiple exchange files match; using the first"
                );
                candidates.swap_remove(0)
            }
        };
        debug!(path = %chosen.display(), "exchange file discovered");
        Ok(Self::with_codec(chosen, codec))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode the whole file
    pub fn load(&self) -> Result<Dataset, ChannelError> {
        let read_failed = |reason: String| ChannelError::ReadFailed {
            path: self.path.clone(),
            reason,
        };
        let dataset = self.codec.read(&self.path).map_err(|e| read_failed(e.0))?;
        dataset.validate().map_err(read_failed)?;
        Ok(dataset)
    }

    /// Names of every field in the file
    pub fn field_names(&self) -> Result<BTreeSet<String>, ChannelError> {
        Ok(self.load()?.field_names())
    }

    pub fn contains(&self, name: &str) -> Result<bool, ChannelError> {
        Ok(self.load()?.variable(name).is_some())
    }

    /// Copy of one field; the file is not modified
    pub fn read_field(&self, name: &str) -> Result<FieldArray, ChannelError> {
        let dataset = self.load()?;
        match dataset.field(name) {
            Some(Ok(field)) => Ok(field),
            Some(Err(reason)) => Err(ChannelError::ReadFailed {
                path: self.path.clone(),
                reason,
            }),
            None => Err(ChannelError::FieldNotFound {
                path: self.path.clone(),
                field: name.to_string(),
            }),
        }
    }

    /// Replace one field's values, rewriting the whole file
    ///
    /// The element count must match the stored field; the stored
    /// dimensions are kept.
    pub fn replace_field(&self, name: &str, values: &FieldArray) -> Result<(), ChannelError> {
        let mut dataset = self.load().map_err(|e| match e {
            ChannelError::ReadFailed { path, reason } => ChannelError::WriteFailed { path, reason },
            other => other,
        })?;

        let stripped = dataset.strip_variable_attribute(COORDINATES_ATTRIBUTE);

        let shape = {
            let var = dataset
                .variable(name)
                .ok_or_else(|| ChannelError::FieldNotFound {
                    path: self.path.clone(),
                    field: name.to_string(),
                })?;
            dataset
                .shape_of(var)
                .map_err(|reason| ChannelError::WriteFailed {
                    path: self.path.clone(),
                    reason,
                })?
        };
        let expected = element_count(&shape);
        if expected != values.len() {
            return Err(ChannelError::ShapeMismatch {
                field: name.to_string(),
                expected,
                actual: values.len(),
            });
        }
        if let Some(var) = dataset.variable_mut(name) {
            var.values = var.values.with_replacement(values.values()).ok_or_else(|| {
                ChannelError::UnsupportedType {
                    field: name.to_string(),
                    data_type: var.values.type_name().to_string(),
                }
            })?;
        }

        debug!(
            path = %self.path.display(),
            field = name,
            stripped_coordinates = stripped,
            "replacing exchange field"
        );
        self.store(&dataset)
    }

    /// Encode in the classic variant and atomically replace the file
    fn store(&self, dataset: &Dataset) -> Result<(), ChannelError> {
        let write_failed = |reason: String| ChannelError::WriteFailed {
            path: self.path.clone(),
            reason,
        };
        let mut out = dataset.clone();
        out.format = LEGACY_FORMAT.to_string();
        write_atomic(&self.path, |tmp| {
            self.codec.write(tmp, &out).map_err(|e| e.0)
        })
        .map_err(write_failed)
    }
}

/// Let `fill` create a uniquely named sibling of `path`, flush it, then
/// rename it over `path`. The sibling is removed on any failure.
fn write_atomic<F>(path: &Path, fill: F) -> Result<(), String>
where
    F: FnOnce(&Path) -> Result<(), String>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "exchange".to_string());
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let result = fill(&tmp).and_then(|_| {
        sync_file(&tmp)
            .and_then(|_| fs::rename(&tmp, path))
            .map_err(|e| e.to_string())
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn sync_file(path: &Path) -> std::io::Result<()> {
    fs::OpenOptions::new().write(true).open(path)?.sync_all()
}
