use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use surfkin_core::errors::{ErrorInfo, KinError};
use surfkin_engine::{
    JobRunner, RunRecord, RunRequest, RunState, SimulationSettings, SurfaceModel,
};
use surfkin_params::ParameterSet;
use surfkin_steady::{
    estimate_tof, SteadyStateConfig, SteadyStateController, SteadyStateReport, SteadyStateStatus,
    TofConfig, TofEstimate,
};
use tracing::debug;

use crate::point::ScanPoint;

/// Work executed for a single scan point.
pub trait InnerJob {
    /// Runs to a terminal state. An `Err` means nothing usable was
    /// produced; failures that still carry partial results are reported
    /// through [`InnerOutcome::failure`].
    fn run(self: Box<Self>) -> Result<InnerOutcome, KinError>;
}

/// Builds the inner job of each scan point.
pub trait InnerJobFactory: Send + Sync {
    /// Reference settings every point overlay is layered on.
    fn reference(&self) -> &SimulationSettings;

    /// Job for `point`; fails when the layered settings are invalid.
    fn create(&self, point: &ScanPoint) -> Result<Box<dyn InnerJob>, KinError>;
}

/// Raw product of an inner job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeDetail {
    /// Single engine run.
    Run(RunRecord),
    /// Complete steady-state search.
    SteadyState(Box<SteadyStateReport>),
}

/// Result of one inner job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerOutcome {
    /// Turnover frequency per tracked species; empty when the job failed
    /// before producing an estimate.
    pub tof: BTreeMap<String, TofEstimate>,
    /// Run record or steady-state report.
    pub detail: OutcomeDetail,
}

impl InnerOutcome {
    /// Error that ended the job, if it did not finish normally.
    pub fn failure(&self) -> Option<&KinError> {
        match &self.detail {
            OutcomeDetail::Run(record) if record.state == RunState::Failed => {
                record.error.as_ref()
            }
            OutcomeDetail::SteadyState(report) if report.status == SteadyStateStatus::Failed => {
                report.error.as_ref()
            }
            _ => None,
        }
    }

    /// Short terminal-state label for tables.
    pub fn summary(&self) -> &'static str {
        match &self.detail {
            OutcomeDetail::Run(record) => match record.state {
                RunState::Completed => "completed",
                RunState::Failed => "failed",
                RunState::Pending | RunState::Running => "incomplete",
            },
            OutcomeDetail::SteadyState(report) => match report.status {
                SteadyStateStatus::Converged => "converged",
                SteadyStateStatus::Exhausted => "exhausted",
                SteadyStateStatus::Failed => "failed",
                SteadyStateStatus::Cancelled => "cancelled",
            },
        }
    }
}

fn resolve_species(
    model: &dyn SurfaceModel,
    requested: Vec<String>,
) -> Result<Vec<String>, KinError> {
    let gas: Vec<String> = model.gas_species().into_iter().map(|g| g.name).collect();
    if requested.is_empty() {
        return Ok(gas);
    }
    if let Some(unknown) = requested.iter().find(|s| !gas.contains(s)) {
        return Err(KinError::Config(
            ErrorInfo::new("tracked-species-unknown", "tracked species is not a gas species")
                .with_context("species", unknown.clone()),
        ));
    }
    Ok(requested)
}

/// Runs one engine run per point and estimates its turnover frequencies.
pub struct PlainJobFactory {
    runner: Arc<dyn JobRunner>,
    model: Arc<dyn SurfaceModel>,
    reference: SimulationSettings,
    tof: TofConfig,
    species: Vec<String>,
}

impl PlainJobFactory {
    /// Validates the reference settings and estimator config. An empty
    /// `species` list tracks every gas species of the model.
    pub fn new(
        runner: Arc<dyn JobRunner>,
        model: Arc<dyn SurfaceModel>,
        reference: SimulationSettings,
        tof: TofConfig,
        species: Vec<String>,
    ) -> Result<Self, KinError> {
        reference.validate()?;
        tof.validate()?;
        let species = resolve_species(model.as_ref(), species)?;
        Ok(Self {
            runner,
            model,
            reference,
            tof,
            species,
        })
    }
}

impl InnerJobFactory for PlainJobFactory {
    fn reference(&self) -> &SimulationSettings {
        &self.reference
    }

    fn create(&self, point: &ScanPoint) -> Result<Box<dyn InnerJob>, KinError> {
        let settings = self.reference.with_overlay(&point.overlay)?;
        Ok(Box::new(PlainJob {
            runner: Arc::clone(&self.runner),
            request: RunRequest::new(point.label.clone(), settings, Arc::clone(&self.model)),
            tof: self.tof.clone(),
            species: self.species.clone(),
        }))
    }
}

struct PlainJob {
    runner: Arc<dyn JobRunner>,
    request: RunRequest,
    tof: TofConfig,
    species: Vec<String>,
}

impl InnerJob for PlainJob {
    fn run(self: Box<Self>) -> Result<InnerOutcome, KinError> {
        let PlainJob {
            runner,
            request,
            tof,
            species,
        } = *self;
        debug!(label = %request.label, "submitting scan run");
        let handle = runner.submit(request)?;
        let record = runner.wait(handle);
        let mut estimates = BTreeMap::new();
        if runner.is_ok(&record) {
            if let Some(result) = record.completed_result() {
                for name in &species {
                    estimates.insert(name.clone(), estimate_tof(&[result], name, &tof, false));
                }
            }
        }
        Ok(InnerOutcome {
            tof: estimates,
            detail: OutcomeDetail::Run(record),
        })
    }
}

/// Runs a full steady-state search per point.
pub struct SteadyStateJobFactory {
    runner: Arc<dyn JobRunner>,
    model: Arc<dyn SurfaceModel>,
    reference: SimulationSettings,
    config: SteadyStateConfig,
    iterations: ParameterSet,
}

impl SteadyStateJobFactory {
    /// `iterations` is layered on each point's settings, so per-point
    /// overrides and iteration overrides may target different fields.
    pub fn new(
        runner: Arc<dyn JobRunner>,
        model: Arc<dyn SurfaceModel>,
        reference: SimulationSettings,
        config: SteadyStateConfig,
        iterations: ParameterSet,
    ) -> Result<Self, KinError> {
        reference.validate()?;
        config.validate()?;
        Ok(Self {
            runner,
            model,
            reference,
            config,
            iterations,
        })
    }
}

impl InnerJobFactory for SteadyStateJobFactory {
    fn reference(&self) -> &SimulationSettings {
        &self.reference
    }

    fn create(&self, point: &ScanPoint) -> Result<Box<dyn InnerJob>, KinError> {
        let settings = self.reference.with_overlay(&point.overlay)?;
        let mut config = self.config.clone();
        config.label = format!("{}/{}", point.label, config.label);
        let controller = SteadyStateController::new(
            config,
            settings,
            &self.iterations,
            Arc::clone(&self.runner),
            Arc::clone(&self.model),
        )?;
        Ok(Box::new(SteadyStateJob { controller }))
    }
}

struct SteadyStateJob {
    controller: SteadyStateController,
}

impl InnerJob for SteadyStateJob {
    fn run(self: Box<Self>) -> Result<InnerOutcome, KinError> {
        let mut controller = self.controller;
        let report = controller.run()?;
        let tof = report.final_estimates().cloned().unwrap_or_default();
        Ok(InnerOutcome {
            tof,
            detail: OutcomeDetail::SteadyState(Box::new(report)),
        })
    }
}
