#![deny(missing_docs)]
#![doc = "Replica groups, batch-means turnover frequencies and the steady-state controller for surfkin."]

/// Steady-state controller and its configuration.
pub mod controller;
/// Replica groups and the runner that submits them.
pub mod replica;
/// Persisted steady-state reports.
pub mod report;
/// Partial-equilibrium prefactor scaling.
pub mod scaling;
/// Turnover-frequency estimation.
pub mod tof;

pub use controller::{
    ControllerState, ConvergencePolicy, SteadyStateConfig, SteadyStateController, Threshold,
};
pub use replica::{ReplicaGroup, ReplicaMember, ReplicaRunner};
pub use report::{IterationRecord, SteadyStateReport, SteadyStateStatus, STEADY_STATE_REPORT_FILE};
pub use scaling::{compute_scaling, ScalingConfig, ScalingReport};
pub use tof::{
    batch_rates, estimate_tof, normal_quantile, student_t_quantile, TofConfig, TofEstimate,
};
