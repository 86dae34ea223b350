#![deny(missing_docs)]
#![doc = "Run settings, engine input rendering, output parsing and bounded job execution for surfkin."]

/// Run records and the arena that stores them.
pub mod arena;
/// Engine abstraction and the subprocess-backed engine.
pub mod engine;
/// Engine input bundle rendering.
pub mod input;
/// Surface model abstraction.
pub mod model;
/// Engine output parsers.
pub mod output;
/// Job runner abstraction and the local bounded runner.
pub mod runner;
/// Validated simulation settings and overlay application.
pub mod settings;

pub use arena::{ArenaIndex, RunArena, RunId, RunRecord, RunState};
pub use engine::{ProcessEngine, RunRequest, SimulationEngine, RESTART_FILE};
pub use input::{render_simulation_input, write_input_bundle};
pub use model::{GasSpecies, PrefactorScaling, StaticModel, SurfaceModel, SurfaceSpecies};
pub use output::{
    parse_general, parse_procstat, parse_specnum, read_run_outputs, ProcessStatistics,
    ProcstatSnapshot, RunResult, SpeciesNumbers, TerminationReason,
};
pub use runner::{JobRunner, LocalJobRunner, RunHandle, RunnerConfig, RUN_RECORD_FILE};
pub use settings::{load_settings, Cadence, SamplingSettings, SimulationSettings, Termination};
