#![deny(missing_docs)]
#![doc = "Parameter scans running plain engine runs or steady-state searches at every grid point."]

/// Inner jobs and the factories that build them.
pub mod factory;
/// Scan orchestration over a rayon pool.
pub mod orchestrator;
/// Resolved grid points.
pub mod point;
/// Scan result table with JSON and CSV export.
pub mod table;

pub use factory::{
    InnerJob, InnerJobFactory, InnerOutcome, OutcomeDetail, PlainJobFactory,
    SteadyStateJobFactory,
};
pub use orchestrator::{ParameterScan, ScanOptions};
pub use point::{point_label, ScanPoint};
pub use table::{EntryStatus, ScanEntry, ScanResultTable, SCAN_TABLE_CSV, SCAN_TABLE_FILE};
