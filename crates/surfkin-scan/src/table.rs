use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use surfkin_core::errors::{ErrorInfo, KinError};
use surfkin_core::provenance::RunProvenance;
use surfkin_core::serde::{read_json, write_json};
use surfkin_params::{GridIndex, Value};

use crate::factory::InnerOutcome;

/// Default file name of a persisted scan table.
pub const SCAN_TABLE_FILE: &str = "scan_table.json";
/// Default file name of the flattened CSV export.
pub const SCAN_TABLE_CSV: &str = "scan_table.csv";

/// Per-point terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// The inner job finished normally.
    Complete,
    /// The inner job could not be built, failed, or ended in failure.
    Failed,
}

/// One grid point of the scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEntry {
    /// Generator index.
    pub index: GridIndex,
    /// Parameter values of the point overlay.
    pub parameters: BTreeMap<String, Value>,
    /// Terminal status.
    pub status: EntryStatus,
    /// Error that failed the point.
    #[serde(default)]
    pub error: Option<KinError>,
    /// Inner job result; kept for failed jobs that produced partial output.
    #[serde(default)]
    pub outcome: Option<InnerOutcome>,
}

impl ScanEntry {
    /// Mean turnover frequency of `species`, when estimated.
    pub fn tof_mean(&self, species: &str) -> Option<f64> {
        self.outcome
            .as_ref()
            .and_then(|outcome| outcome.tof.get(species))
            .map(|estimate| estimate.mean)
    }
}

/// Results of a parameter scan keyed by generator index.
///
/// `shape` and the index variant of each entry let consumers rebuild the
/// grid: flat indices for zip scans, tuples for mesh grids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResultTable {
    /// Combination strategy label (`zip` or `mesh-grid`).
    pub kind: String,
    /// Extent of each index dimension.
    pub shape: Vec<usize>,
    /// Parameter names in declaration order.
    pub parameter_names: Vec<String>,
    /// Entries ordered by index.
    pub entries: Vec<ScanEntry>,
    /// Generation metadata.
    pub provenance: RunProvenance,
}

impl ScanResultTable {
    /// Entry at `index`.
    pub fn get(&self, index: &GridIndex) -> Option<&ScanEntry> {
        self.entries
            .binary_search_by(|entry| entry.index.cmp(index))
            .ok()
            .map(|pos| &self.entries[pos])
    }

    /// Number of complete entries.
    pub fn complete_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.status == EntryStatus::Complete)
            .count()
    }

    /// Failed entries.
    pub fn failures(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.status == EntryStatus::Failed)
    }

    /// Mean turnover frequency of `species` over the grid, flattened in
    /// row-major order. Points without an estimate are `None`.
    pub fn tof_grid(&self, species: &str) -> Vec<Option<f64>> {
        let size = self.shape.iter().product::<usize>();
        let mut grid = vec![None; size];
        for entry in &self.entries {
            if let Some(offset) = entry.index.row_major_offset(&self.shape) {
                grid[offset] = entry.tof_mean(species);
            }
        }
        grid
    }

    /// Persists the table as canonical JSON.
    pub fn store(&self, path: &Path) -> Result<(), KinError> {
        write_json(path, self)
    }

    /// Loads a table written by [`ScanResultTable::store`].
    pub fn load(path: &Path) -> Result<Self, KinError> {
        read_json(path)
    }

    /// Writes one row per entry: index, parameters, status, summary, then
    /// mean and half-width per species, then the error message.
    pub fn write_csv(&self, path: &Path) -> Result<(), KinError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| KinError::io("scan-csv-mkdir", parent, err))?;
        }
        let file = File::create(path).map_err(|err| KinError::io("scan-csv-create", path, err))?;
        let mut writer = WriterBuilder::new().from_writer(BufWriter::new(file));

        let species: BTreeSet<&str> = self
            .entries
            .iter()
            .filter_map(|entry| entry.outcome.as_ref())
            .flat_map(|outcome| outcome.tof.keys().map(String::as_str))
            .collect();

        let mut header = vec!["index".to_string()];
        header.extend(self.parameter_names.iter().cloned());
        header.push("status".into());
        header.push("summary".into());
        for name in &species {
            header.push(format!("tof_{name}"));
            header.push(format!("tof_{name}_half_width"));
        }
        header.push("error".into());
        writer
            .write_record(&header)
            .map_err(|err| wrap_csv("scan-csv-header", err))?;

        for entry in &self.entries {
            let mut row = vec![entry.index.to_string()];
            for name in &self.parameter_names {
                row.push(
                    entry
                        .parameters
                        .get(name)
                        .map(|value| value.to_string())
                        .unwrap_or_default(),
                );
            }
            row.push(
                match entry.status {
                    EntryStatus::Complete => "complete",
                    EntryStatus::Failed => "failed",
                }
                .to_string(),
            );
            row.push(
                entry
                    .outcome
                    .as_ref()
                    .map(|outcome| outcome.summary().to_string())
                    .unwrap_or_default(),
            );
            for name in &species {
                match entry.outcome.as_ref().and_then(|outcome| outcome.tof.get(*name)) {
                    Some(estimate) => {
                        row.push(estimate.mean.to_string());
                        row.push(estimate.half_width.to_string());
                    }
                    None => {
                        row.push(String::new());
                        row.push(String::new());
                    }
                }
            }
            row.push(
                entry
                    .error
                    .as_ref()
                    .map(|err| err.to_string())
                    .unwrap_or_default(),
            );
            writer
                .write_record(&row)
                .map_err(|err| wrap_csv("scan-csv-row", err))?;
        }
        writer
            .flush()
            .map_err(|err| wrap_csv("scan-csv-flush", err.into()))
    }
}

fn wrap_csv(code: &str, err: csv::Error) -> KinError {
    KinError::Serde(ErrorInfo::new(code, err.to_string()))
}
