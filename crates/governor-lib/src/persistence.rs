//! Saving and loading value tables
//!
//! A saved table carries a fingerprint of the layout it was trained under.
//! Loading under any other layout is refused; tables are never reshaped.

use crate::config::{ActionConfig, GovernorConfig, MetricBounds};
use crate::error::PersistenceError;
use crate::value_store::ValueTable;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const FORMAT_VERSION: u32 = 1;

type Result<T> = std::result::Result<T, PersistenceError>;

/// Everything that determines the meaning of a table cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableLayout {
    pub metrics: Vec<MetricBounds>,
    pub frequencies: Vec<u32>,
    pub frequency_in_state: bool,
    pub actions: ActionConfig,
    pub action_count: usize,
}

impl TableLayout {
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self {
            metrics: config.metrics.clone(),
            frequencies: config.frequencies.khz.clone(),
            frequency_in_state: config.frequencies.in_state,
            actions: config.actions.clone(),
            action_count: config.action_count(),
        }
    }

    pub fn dims(&self) -> Vec<usize> {
        let mut dims: Vec<usize> = self.metrics.iter().map(|m| m.buckets).collect();
        if self.frequency_in_state {
            dims.push(self.frequencies.len());
        }
        dims
    }

    /// Zero table shaped for this layout
    pub fn empty_table(&self) -> ValueTable {
        ValueTable::new(self.dims(), self.action_count)
    }

    /// SHA-256 of the canonical JSON encoding, hex encoded
    pub fn fingerprint(&self) -> String {
        // Struct fields serialize in declaration order, so this is canonical
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        compute_checksum(&canonical)
    }
}

fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// On-disk representation
#[derive(Debug, Serialize, Deserialize)]
struct TableBlob {
    format_version: u32,
    fingerprint: String,
    layout: TableLayout,
    dims: Vec<usize>,
    actions: usize,
    values: Vec<f64>,
    visits: Vec<u64>,
}

/// Serialize a table; identical tables give identical bytes
pub fn encode(table: &ValueTable, layout: &TableLayout) -> Result<Vec<u8>> {
    let blob = TableBlob {
        format_version: FORMAT_VERSION,
        fingerprint: layout.fingerprint(),
        layout: layout.clone(),
        dims: table.dims().to_vec(),
        actions: table.actions(),
        values: table.values().to_vec(),
        visits: table.visit_counts().to_vec(),
    };
    serde_json::to_vec(&blob).map_err(|e| PersistenceError::Corrupt(e.to_string()))
}

/// Parse a table saved under `layout`
pub fn decode(data: &[u8], layout: &TableLayout) -> Result<ValueTable> {
    let blob: TableBlob =
        serde_json::from_slice(data).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;

    if blob.format_version != FORMAT_VERSION {
        return Err(PersistenceError::Corrupt(format!(
            "unsupported format version {}",
            blob.format_version
        )));
    }

    let expected = layout.fingerprint();
    if blob.fingerprint != expected {
        return Err(PersistenceError::ShapeMismatch {
            expected,
            found: blob.fingerprint,
        });
    }
    if blob.layout.fingerprint() != blob.fingerprint {
        return Err(PersistenceError::Corrupt(
            "stored layout does not hash to the stored fingerprint".to_string(),
        ));
    }
    if blob.dims != layout.dims() || blob.actions != layout.action_count {
        return Err(PersistenceError::Corrupt(format!(
            "table shape {:?} x {} disagrees with its layout",
            blob.dims, blob.actions
        )));
    }

    ValueTable::from_parts(blob.dims, blob.actions, blob.values, blob.visits)
        .map_err(|e| PersistenceError::Corrupt(e.to_string()))
}

/// Table files in one directory, named after the control period
#[derive(Debug, Clone)]
pub struct TableStore {
    dir: PathBuf,
    period_ms: u64,
    layout: TableLayout,
}

impl TableStore {
    pub fn new(dir: impl Into<PathBuf>, period_ms: u64, layout: TableLayout) -> Self {
        Self {
            dir: dir.into(),
            period_ms,
            layout,
        }
    }

    pub fn from_config(config: &GovernorConfig) -> Self {
        Self::new(
            config.controller.table_dir.clone(),
            config.controller.period_ms,
            TableLayout::from_config(config),
        )
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("qtable_{}ms.json", self.period_ms))
    }

    /// Atomically write the table next to its final path and rename it into place
    pub fn save(&self, table: &ValueTable) -> Result<PathBuf> {
        let path = self.path();
        let data = encode(table, &self.layout)?;
        write_atomic(&path, &data)?;
        debug!(path = %path.display(), cells = table.cell_count(), "Table saved");
        Ok(path)
    }

    pub fn load(&self) -> Result<ValueTable> {
        let path = self.path();
        let data = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PersistenceError::NotFound {
                path: path.display().to_string(),
            },
            _ => io_err(&path, e),
        })?;
        let table = decode(&data, &self.layout)?;
        info!(
            path = %path.display(),
            visited_cells = table.visited_cells(),
            "Loaded saved table"
        );
        Ok(table)
    }
}

/// Write to a temp file, sync, then rename over `path`
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| io_err(&temp_path, e))?;
    file.write_all(data).map_err(|e| io_err(&temp_path, e))?;
    file.sync_all().map_err(|e| io_err(&temp_path, e))?;

    fs::rename(&temp_path, path).map_err(|e| io_err(path, e))
}

fn io_err(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}
