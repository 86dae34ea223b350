use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use surfkin_core::errors::{ErrorInfo, KinError};
use surfkin_core::hash::stable_hash_string;
use surfkin_core::provenance::RunProvenance;
use surfkin_core::rng::derive_substream_seed;
use surfkin_engine::{JobRunner, PrefactorScaling, RunArena, SimulationSettings, SurfaceModel};
use surfkin_params::{Overlay, ParameterSet};
use tracing::{info, warn};

use crate::replica::{ReplicaGroup, ReplicaRunner};
use crate::report::{IterationRecord, SteadyStateReport, SteadyStateStatus};
use crate::scaling::{compute_scaling, ScalingConfig, ScalingReport};
use crate::tof::{estimate_tof, TofConfig, TofEstimate};

const CALIBRATION_SUBSTREAM: u64 = 0xCA1B;

/// Half-width bound a species must reach.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Threshold {
    /// Half-width at most this value.
    Absolute(f64),
    /// Half-width at most this fraction of the mean's magnitude.
    Relative(f64),
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold::Relative(0.05)
    }
}

impl Threshold {
    /// True when `estimate` satisfies the bound. Estimates without enough
    /// data never do.
    pub fn is_met(&self, estimate: &TofEstimate) -> bool {
        if estimate.insufficient_data || !estimate.half_width.is_finite() {
            return false;
        }
        match *self {
            Threshold::Absolute(bound) => estimate.half_width <= bound,
            Threshold::Relative(fraction) => {
                estimate.mean != 0.0 && estimate.half_width <= fraction * estimate.mean.abs()
            }
        }
    }

    fn validate(&self) -> Result<(), KinError> {
        let value = match *self {
            Threshold::Absolute(v) | Threshold::Relative(v) => v,
        };
        if value.is_finite() && value > 0.0 {
            Ok(())
        } else {
            Err(KinError::Config(
                ErrorInfo::new("threshold-invalid", "convergence threshold must be positive")
                    .with_context("threshold", value.to_string()),
            ))
        }
    }
}

/// How many consecutive iterations a species must meet the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConvergencePolicy {
    /// The current iteration alone decides.
    #[default]
    SinglePass,
    /// The current and the preceding iteration must both meet it.
    Consecutive,
}

/// Steady-state search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteadyStateConfig {
    /// Replicas per iteration.
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    /// Estimator settings.
    #[serde(default)]
    pub tof: TofConfig,
    /// Convergence bound.
    #[serde(default)]
    pub threshold: Threshold,
    /// Convergence rule.
    #[serde(default)]
    pub policy: ConvergencePolicy,
    /// Gas species whose turnover must converge; all gas species when empty.
    #[serde(default)]
    pub tracked_species: Vec<String>,
    /// Continue each replica from its previous iteration's run.
    #[serde(default)]
    pub restart: bool,
    /// Stiffness scaling pass.
    #[serde(default)]
    pub scaling: ScalingConfig,
    /// Workdir label prefix.
    #[serde(default = "default_label")]
    pub label: String,
}

fn default_replicas() -> usize {
    1
}

fn default_label() -> String {
    "steady".to_string()
}

impl Default for SteadyStateConfig {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            tof: TofConfig::default(),
            threshold: Threshold::default(),
            policy: ConvergencePolicy::default(),
            tracked_species: Vec::new(),
            restart: false,
            scaling: ScalingConfig::default(),
            label: default_label(),
        }
    }
}

impl SteadyStateConfig {
    /// Validates every nested section.
    pub fn validate(&self) -> Result<(), KinError> {
        if self.replicas == 0 {
            return Err(KinError::config("replicas-zero", "at least one replica is required"));
        }
        self.tof.validate()?;
        self.threshold.validate()?;
        self.scaling.validate()
    }
}

/// Lifecycle of a [`SteadyStateController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    /// Constructed, not yet run.
    Initializing,
    /// Inside the iteration loop.
    Iterating,
    /// Terminal: converged.
    Converged,
    /// Terminal: overlays exhausted.
    Exhausted,
    /// Terminal: a replica group failed entirely.
    Failed,
    /// Terminal: cancelled between iterations.
    Cancelled,
}

impl From<SteadyStateStatus> for ControllerState {
    fn from(status: SteadyStateStatus) -> Self {
        match status {
            SteadyStateStatus::Converged => ControllerState::Converged,
            SteadyStateStatus::Exhausted => ControllerState::Exhausted,
            SteadyStateStatus::Failed => ControllerState::Failed,
            SteadyStateStatus::Cancelled => ControllerState::Cancelled,
        }
    }
}

#[derive(Serialize)]
struct InputFingerprint<'a> {
    config: &'a SteadyStateConfig,
    base: &'a SimulationSettings,
    iterations: &'a [Overlay],
}

/// Iterates replica groups over an increasing sequence of overlays until
/// the turnover frequencies of the tracked species converge.
pub struct SteadyStateController {
    config: SteadyStateConfig,
    base: SimulationSettings,
    iterations: Vec<Overlay>,
    tracked: Vec<String>,
    replicas: ReplicaRunner,
    cancel: Option<Arc<AtomicBool>>,
    state: ControllerState,
}

impl SteadyStateController {
    /// Validates the inputs and resolves the iteration overlays.
    ///
    /// `iterations` is evaluated once here; every overlay is applied to
    /// `base` and validated up front so the loop cannot fail on
    /// configuration.
    pub fn new(
        config: SteadyStateConfig,
        base: SimulationSettings,
        iterations: &ParameterSet,
        runner: Arc<dyn JobRunner>,
        model: Arc<dyn SurfaceModel>,
    ) -> Result<Self, KinError> {
        config.validate()?;
        base.validate()?;
        let iterations: Vec<Overlay> = iterations
            .generate()?
            .into_iter()
            .map(|(_, overlay)| overlay)
            .collect();
        for overlay in &iterations {
            base.with_overlay(overlay)?;
        }
        if config.scaling.enabled {
            base.with_overlay(&config.scaling.calibration)?;
        }

        let gas: Vec<String> = model.gas_species().into_iter().map(|g| g.name).collect();
        let tracked = if config.tracked_species.is_empty() {
            gas
        } else {
            if let Some(unknown) = config.tracked_species.iter().find(|s| !gas.contains(s)) {
                return Err(KinError::Config(
                    ErrorInfo::new("tracked-species-unknown", "tracked species is not a gas species")
                        .with_context("species", unknown.clone()),
                ));
            }
            config.tracked_species.clone()
        };
        if tracked.is_empty() {
            return Err(KinError::config(
                "tracked-species-empty",
                "model has no gas species to track",
            ));
        }

        let replicas = ReplicaRunner::new(runner, model, config.replicas);
        Ok(Self {
            config,
            base,
            iterations,
            tracked,
            replicas,
            cancel: None,
            state: ControllerState::Initializing,
        })
    }

    /// Stops the search at the next iteration boundary once `flag` is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Species whose convergence is required.
    pub fn tracked_species(&self) -> &[String] {
        &self.tracked
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Acquire))
    }

    /// Runs the search to a terminal state and returns everything it
    /// produced. Replica failures end the search as `Failed` instead of
    /// being returned as errors.
    pub fn run(&mut self) -> Result<SteadyStateReport, KinError> {
        let input_hash = stable_hash_string(&InputFingerprint {
            config: &self.config,
            base: &self.base,
            iterations: &self.iterations,
        })?;
        let provenance = RunProvenance::stamp(
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            input_hash,
            self.base.random_seed,
        );
        let mut arena = RunArena::new();
        let mut history = Vec::new();

        let mut scaling = None;
        let (status, error) = match self.prepare_scaling(&mut arena) {
            Ok(report) => {
                let multipliers = report
                    .as_ref()
                    .map(|report| report.multipliers.clone())
                    .unwrap_or_default();
                scaling = report;
                self.state = ControllerState::Iterating;
                self.iterate(&multipliers, &mut arena, &mut history)?
            }
            Err(err) => {
                warn!(error = %err, "scaling calibration failed");
                (SteadyStateStatus::Failed, Some(err))
            }
        };

        self.state = status.into();
        Ok(SteadyStateReport {
            status,
            history,
            arena,
            scaling,
            error,
            provenance,
        })
    }

    fn prepare_scaling(&self, arena: &mut RunArena) -> Result<Option<ScalingReport>, KinError> {
        if self.config.scaling.enabled {
            self.calibrate(arena).map(Some)
        } else {
            Ok(None)
        }
    }

    fn iterate(
        &self,
        multipliers: &PrefactorScaling,
        arena: &mut RunArena,
        history: &mut Vec<IterationRecord>,
    ) -> Result<(SteadyStateStatus, Option<KinError>), KinError> {
        let mut previous_group: Option<ReplicaGroup> = None;
        for (index, overlay) in self.iterations.iter().enumerate() {
            if self.cancelled() {
                info!(iteration = index, "steady-state search cancelled");
                return Ok((SteadyStateStatus::Cancelled, None));
            }
            let settings = self.base.with_overlay(overlay)?;
            let label = format!("{}/iter_{index:03}", self.config.label);
            let continue_from = previous_group.as_ref().filter(|_| self.config.restart);
            let group = match self
                .replicas
                .run(&label, &settings, multipliers, continue_from, arena)
            {
                Ok(group) => group,
                Err(err) => {
                    warn!(iteration = index, error = %err, "replica group failed");
                    return Ok((SteadyStateStatus::Failed, Some(err)));
                }
            };

            let degraded = group.degraded();
            let results = group.successful_results(arena);
            let mut tof_estimates = BTreeMap::new();
            let mut threshold_met = BTreeMap::new();
            for species in &self.tracked {
                let estimate = estimate_tof(&results, species, &self.config.tof, degraded);
                threshold_met.insert(species.clone(), self.config.threshold.is_met(&estimate));
                tof_estimates.insert(species.clone(), estimate);
            }
            let converged = self.tracked.iter().all(|species| {
                let now = threshold_met.get(species).copied().unwrap_or(false);
                match self.config.policy {
                    ConvergencePolicy::SinglePass => now,
                    ConvergencePolicy::Consecutive => {
                        now && history
                            .last()
                            .and_then(|prev| prev.threshold_met.get(species).copied())
                            .unwrap_or(false)
                    }
                }
            });

            info!(
                iteration = index,
                converged,
                degraded,
                failed = group.failed_count(),
                "steady-state iteration complete"
            );
            for (species, estimate) in &tof_estimates {
                info!(
                    iteration = index,
                    species = species.as_str(),
                    tof = estimate.mean,
                    half_width = estimate.half_width,
                    batches = estimate.n_batches_used,
                    "turnover frequency"
                );
            }

            history.push(IterationRecord {
                iteration_index: index,
                overlay_parameters: overlay.parameters(),
                tof_estimates,
                threshold_met,
                converged,
                runs: group.runs(),
                failed_replicas: group.failed_count(),
                degraded,
            });
            if converged {
                return Ok((SteadyStateStatus::Converged, None));
            }
            previous_group = Some(group);
        }
        info!(
            iterations = history.len(),
            "iteration overlays exhausted before convergence"
        );
        Ok((SteadyStateStatus::Exhausted, None))
    }

    fn calibrate(&self, arena: &mut RunArena) -> Result<ScalingReport, KinError> {
        let mut settings = self.base.with_overlay(&self.config.scaling.calibration)?;
        settings.random_seed = derive_substream_seed(self.base.random_seed, CALIBRATION_SUBSTREAM);
        let calibration = ReplicaRunner::new(
            Arc::clone(self.replicas.job_runner()),
            Arc::clone(self.replicas.model()),
            1,
        );
        let label = format!("{}/calibration", self.config.label);
        let group = calibration.run(&label, &settings, &PrefactorScaling::new(), None, arena)?;
        let run = group.members.first().map(|member| member.run);
        let stats = group
            .successful_results(arena)
            .first()
            .and_then(|result| result.process_statistics.clone())
            .ok_or_else(|| {
                KinError::Engine(
                    ErrorInfo::new(
                        "calibration-no-procstat",
                        "calibration run produced no process statistics",
                    )
                    .with_hint("enable process_statistics sampling in the calibration overlay"),
                )
            })?;
        let steps = self.replicas.model().reversible_steps();
        let mut report = compute_scaling(&stats, &steps, &self.config.scaling);
        report.calibration_run = run;
        Ok(report)
    }
}
