use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use surfkin_core::errors::KinError;
use surfkin_core::provenance::RunProvenance;
use surfkin_core::serde::{read_json, write_json};
use surfkin_engine::{ArenaIndex, RunArena};
use surfkin_params::Value;

use crate::scaling::ScalingReport;
use crate::tof::TofEstimate;

/// Default file name of a persisted steady-state report.
pub const STEADY_STATE_REPORT_FILE: &str = "steady_state_report.json";

/// Terminal state of a steady-state search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SteadyStateStatus {
    /// Every tracked species met the convergence rule.
    Converged,
    /// The iteration overlays ran out first.
    Exhausted,
    /// A replica group produced no successful run.
    Failed,
    /// The caller asked to stop between iterations.
    Cancelled,
}

/// One completed iteration. Records are never modified after they are
/// appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Zero-based iteration number.
    pub iteration_index: usize,
    /// Parameter values of the iteration overlay.
    pub overlay_parameters: BTreeMap<String, Value>,
    /// Estimate per tracked species.
    pub tof_estimates: BTreeMap<String, TofEstimate>,
    /// Whether each species met the threshold in this iteration alone.
    pub threshold_met: BTreeMap<String, bool>,
    /// Every tracked species converged under the configured policy.
    pub converged: bool,
    /// Arena entries of the replica runs.
    pub runs: Vec<ArenaIndex>,
    /// Number of failed replicas.
    pub failed_replicas: usize,
    /// At least one replica failed.
    pub degraded: bool,
}

/// Everything a steady-state search produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteadyStateReport {
    /// Terminal state.
    pub status: SteadyStateStatus,
    /// Iterations in execution order.
    pub history: Vec<IterationRecord>,
    /// Every run, including calibration and failed replicas.
    pub arena: RunArena,
    /// Scaling outcome when the calibration ran.
    #[serde(default)]
    pub scaling: Option<ScalingReport>,
    /// Cause of a `Failed` status.
    #[serde(default)]
    pub error: Option<KinError>,
    /// Inputs hash, seed and timestamp.
    pub provenance: RunProvenance,
}

impl SteadyStateReport {
    /// True when the search converged.
    pub fn is_converged(&self) -> bool {
        self.status == SteadyStateStatus::Converged
    }

    /// Estimates of the last iteration, if any ran.
    pub fn final_estimates(&self) -> Option<&BTreeMap<String, TofEstimate>> {
        self.history.last().map(|record| &record.tof_estimates)
    }

    /// Writes the report as canonical JSON.
    pub fn store(&self, path: &Path) -> Result<(), KinError> {
        write_json(path, self)
    }

    /// Reads a report written by [`SteadyStateReport::store`].
    pub fn load(path: &Path) -> Result<Self, KinError> {
        read_json(path)
    }
}
