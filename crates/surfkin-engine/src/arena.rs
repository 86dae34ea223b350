use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use surfkin_core::errors::KinError;

use crate::output::RunResult;

/// Identifier assigned by a job runner at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run_{:05}", self.0)
    }
}

/// Lifecycle state of a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RunState {
    /// Submitted, not yet started.
    Pending = 0,
    /// Engine executing.
    Running = 1,
    /// Outputs parsed successfully.
    Completed = 2,
    /// Engine or parsing failed.
    Failed = 3,
}

impl RunState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RunState::Pending,
            1 => RunState::Running,
            2 => RunState::Completed,
            _ => RunState::Failed,
        }
    }

    /// True for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

/// Terminal record of a simulation run, persisted as `run.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Runner-assigned identifier.
    pub id: RunId,
    /// Caller label, also the workdir parent.
    pub label: String,
    /// Seed the engine ran with.
    pub seed: u64,
    /// Working directory holding inputs and outputs.
    pub workdir: PathBuf,
    /// Lifecycle state.
    pub state: RunState,
    /// Parsed outputs for completed runs.
    #[serde(default)]
    pub result: Option<RunResult>,
    /// Failure cause for failed runs.
    #[serde(default)]
    pub error: Option<KinError>,
}

impl RunRecord {
    /// Record of a failed run.
    pub fn failed(id: RunId, label: String, seed: u64, workdir: PathBuf, error: KinError) -> Self {
        Self {
            id,
            label,
            seed,
            workdir,
            state: RunState::Failed,
            result: None,
            error: Some(error),
        }
    }

    /// Result of a completed run.
    pub fn completed_result(&self) -> Option<&RunResult> {
        match self.state {
            RunState::Completed => self.result.as_ref(),
            _ => None,
        }
    }
}

/// Position of a record within a [`RunArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArenaIndex(pub usize);

/// Append-only store of run records.
///
/// Iteration records and replica groups refer to runs by [`ArenaIndex`]
/// instead of holding them, so history stays cheap to clone and serialize.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunArena {
    records: Vec<RunRecord>,
}

impl RunArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and returns its index.
    pub fn push(&mut self, record: RunRecord) -> ArenaIndex {
        self.records.push(record);
        ArenaIndex(self.records.len() - 1)
    }

    /// Record at `index`.
    pub fn get(&self, index: ArenaIndex) -> Option<&RunRecord> {
        self.records.get(index.0)
    }

    /// All records in insertion order.
    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no run has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
