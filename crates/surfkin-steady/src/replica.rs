use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use surfkin_core::errors::{ErrorInfo, KinError};
use surfkin_core::rng::replica_seed;
use surfkin_engine::{
    ArenaIndex, JobRunner, PrefactorScaling, RunArena, RunId, RunRecord, RunRequest, RunResult,
    RunState, SimulationSettings, SurfaceModel,
};
use tracing::{debug, warn};

/// One replica slot of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaMember {
    /// Slot number, stable across iterations.
    pub slot: usize,
    /// Seed the replica ran with.
    pub seed: u64,
    /// Arena entry of the run.
    pub run: ArenaIndex,
    /// True when the run completed with parsed outputs.
    pub succeeded: bool,
}

/// Replicas of one configuration run with distinct seeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaGroup {
    /// Seed replica offsets were added to.
    pub base_seed: u64,
    /// Members in slot order.
    pub members: Vec<ReplicaMember>,
}

impl ReplicaGroup {
    /// True when any member failed.
    pub fn degraded(&self) -> bool {
        self.members.iter().any(|member| !member.succeeded)
    }

    /// Number of failed members.
    pub fn failed_count(&self) -> usize {
        self.members.iter().filter(|member| !member.succeeded).count()
    }

    /// Arena indices of every member run.
    pub fn runs(&self) -> Vec<ArenaIndex> {
        self.members.iter().map(|member| member.run).collect()
    }

    /// Results of the successful members.
    pub fn successful_results<'a>(&self, arena: &'a RunArena) -> Vec<&'a RunResult> {
        self.members
            .iter()
            .filter(|member| member.succeeded)
            .filter_map(|member| arena.get(member.run))
            .filter_map(|record| record.completed_result())
            .collect()
    }
}

/// Submits replica groups to a job runner and waits for all members.
#[derive(Clone)]
pub struct ReplicaRunner {
    runner: Arc<dyn JobRunner>,
    model: Arc<dyn SurfaceModel>,
    replicas: usize,
}

impl ReplicaRunner {
    /// Runner for groups of `replicas` members; at least one.
    pub fn new(runner: Arc<dyn JobRunner>, model: Arc<dyn SurfaceModel>, replicas: usize) -> Self {
        Self {
            runner,
            model,
            replicas: replicas.max(1),
        }
    }

    /// Group size.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Surface model handed to every run.
    pub fn model(&self) -> &Arc<dyn SurfaceModel> {
        &self.model
    }

    /// Job runner the replicas are submitted to.
    pub fn job_runner(&self) -> &Arc<dyn JobRunner> {
        &self.runner
    }

    /// Runs one group at `settings` and records every member in `arena`.
    ///
    /// Replica `i` runs with `replica_seed(settings.random_seed, i)`. When
    /// `continue_from` is given, each member restarts from the completed run
    /// in the same slot of that group. Failed members are kept in the group;
    /// only a group without any success is an error.
    pub fn run(
        &self,
        label: &str,
        settings: &SimulationSettings,
        scaling: &PrefactorScaling,
        continue_from: Option<&ReplicaGroup>,
        arena: &mut RunArena,
    ) -> Result<ReplicaGroup, KinError> {
        let base_seed = settings.random_seed;
        let mut pending = Vec::with_capacity(self.replicas);
        for slot in 0..self.replicas {
            let mut replica_settings = settings.clone();
            replica_settings.random_seed = replica_seed(base_seed, slot);
            let mut request = RunRequest::new(
                format!("{label}/replica_{slot:02}"),
                replica_settings,
                Arc::clone(&self.model),
            );
            request.scaling = scaling.clone();
            request.restart_from = continue_from.and_then(|group| restart_dir(group, slot, arena));
            let seed = request.settings.random_seed;
            debug!(label, slot, seed, restart = request.restart_from.is_some(), "submitting replica");
            pending.push((slot, seed, self.runner.submit(request)));
        }

        let mut members = Vec::with_capacity(pending.len());
        let mut errors = Vec::new();
        for (slot, seed, submitted) in pending {
            let record = match submitted {
                Ok(handle) => self.runner.wait(handle),
                // Never reached the runner, so it has no id or workdir.
                Err(err) => RunRecord::failed(
                    RunId(u64::MAX),
                    format!("{label}/replica_{slot:02}"),
                    seed,
                    PathBuf::new(),
                    err,
                ),
            };
            let succeeded = self.runner.is_ok(&record);
            if !succeeded {
                let error = record.error.clone().unwrap_or_else(|| {
                    KinError::Engine(ErrorInfo::new("run-failed", "run ended without a result"))
                });
                warn!(label, slot, seed, error = %error, "replica failed");
                errors.push(error);
            }
            let run = arena.push(record);
            members.push(ReplicaMember {
                slot,
                seed,
                run,
                succeeded,
            });
        }

        let group = ReplicaGroup { base_seed, members };
        if group.members.iter().any(|member| member.succeeded) {
            return Ok(group);
        }
        if let Some(unavailable) = errors.iter().find(|err| err.is_engine_unavailable()) {
            return Err(unavailable.clone());
        }
        let mut info = ErrorInfo::new("replicas-all-failed", "no replica in the group succeeded")
            .with_context("label", label)
            .with_context("replicas", self.replicas.to_string());
        if let Some(first) = errors.first() {
            info = info.with_context("first_error", first.to_string());
        }
        Err(KinError::ReplicaFailure(info))
    }
}

fn restart_dir(group: &ReplicaGroup, slot: usize, arena: &RunArena) -> Option<PathBuf> {
    let member = group.members.iter().find(|member| member.slot == slot)?;
    let record = arena.get(member.run)?;
    (record.state == RunState::Completed).then(|| record.workdir.clone())
}
