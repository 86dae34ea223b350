#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;
use surfkin_core::errors::KinError;
use surfkin_core::RngHandle;
use surfkin_engine::{
    GasSpecies, JobRunner, ProcessStatistics, ProcstatSnapshot, RunHandle, RunId, RunRecord,
    RunRequest, RunResult, RunState, SimulationSettings, SpeciesNumbers, StaticModel,
    SurfaceSpecies, TerminationReason,
};
use surfkin_params::{ParameterSet, Strategy};
use surfkin_steady::{SteadyStateConfig, SteadyStateController};

pub type FailureRule = Box<dyn Fn(&RunRequest) -> Option<KinError> + Send + Sync>;

/// Job runner that fabricates species-number series with a known rate and
/// seed-determined noise whose batch spread shrinks as `max_time` grows.
pub struct SyntheticRunner {
    pub rate: f64,
    pub noise: f64,
    pub samples: usize,
    fail: Option<FailureRule>,
    next_id: AtomicU64,
    submitted: Mutex<Vec<RunRequest>>,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl SyntheticRunner {
    pub fn new() -> Self {
        Self {
            rate: 50.0,
            noise: 20.0,
            samples: 201,
            fail: None,
            next_id: AtomicU64::new(0),
            submitted: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    pub fn failing(mut self, rule: FailureRule) -> Self {
        self.fail = Some(rule);
        self
    }

    pub fn cancelling_after(mut self, submissions: usize, flag: Arc<AtomicBool>) -> Self {
        self.cancel_after = Some((submissions, flag));
        self
    }

    pub fn submitted(&self) -> Vec<RunRequest> {
        self.submitted.lock().unwrap().clone()
    }

    fn synthesize(&self, request: &RunRequest) -> RunResult {
        let horizon = request.settings.termination.max_time.unwrap_or(1.0);
        let mut rng = RngHandle::from_seed(request.settings.random_seed ^ horizon.to_bits());
        let mut numbers = SpeciesNumbers::default();
        let (mut co, mut o2, mut co2) = (Vec::new(), Vec::new(), Vec::new());
        for k in 0..self.samples {
            let t = horizon * k as f64 / (self.samples - 1) as f64;
            let jitter = if k == 0 {
                0.0
            } else {
                self.noise * rng.gen_range(-1.0..1.0)
            };
            numbers.time.push(t);
            numbers.nevents.push((3.0 * self.rate * t) as u64);
            co2.push(self.rate * t + jitter);
            co.push(-self.rate * t - jitter);
            o2.push(-0.5 * self.rate * t - 0.5 * jitter);
        }
        numbers.columns.insert("CO".into(), co);
        numbers.columns.insert("O2".into(), o2);
        numbers.columns.insert("CO2".into(), co2);

        let steps = ["CO_ads_fwd", "CO_ads_rev", "O2_ads_fwd", "O2_ads_rev", "CO_ox"];
        let stats = ProcessStatistics {
            steps: steps.iter().map(|s| s.to_string()).collect(),
            snapshots: vec![ProcstatSnapshot {
                configuration: 1,
                nevents: 10_445,
                time: horizon,
                waiting_times: vec![0.0; steps.len()],
                occurrences: vec![5_000, 4_950, 400, 50, 45],
            }],
        };
        RunResult {
            species_numbers: numbers,
            process_statistics: Some(stats),
            wall_time: Some(0.01),
            termination: TerminationReason::MaxTime,
        }
    }
}

impl JobRunner for SyntheticRunner {
    fn submit(&self, request: RunRequest) -> Result<RunHandle, KinError> {
        let id = RunId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let workdir = PathBuf::from("synthetic").join(&request.label).join(id.to_string());
        let seed = request.settings.random_seed;
        let record = match self.fail.as_ref().and_then(|rule| rule(&request)) {
            Some(error) => RunRecord::failed(id, request.label.clone(), seed, workdir, error),
            None => RunRecord {
                id,
                label: request.label.clone(),
                seed,
                workdir,
                state: RunState::Completed,
                result: Some(self.synthesize(&request)),
                error: None,
            },
        };
        let count = {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(request);
            submitted.len()
        };
        if let Some((after, flag)) = &self.cancel_after {
            if count >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(RunHandle::ready(record))
    }

    fn wait(&self, handle: RunHandle) -> RunRecord {
        handle.join().expect("synthetic handles are always ready")
    }
}

pub fn model() -> Arc<StaticModel> {
    let gas = |name: &str, weight: f64| GasSpecies {
        name: name.into(),
        energy: 0.0,
        molecular_weight: weight,
    };
    Arc::new(StaticModel {
        gas: vec![gas("CO", 28.0), gas("O2", 32.0), gas("CO2", 44.0)],
        surface: vec![
            SurfaceSpecies {
                name: "CO*".into(),
                denticity: 1,
            },
            SurfaceSpecies {
                name: "O*".into(),
                denticity: 1,
            },
        ],
        lattice: "lattice default_choice\n  hexagonal_periodic 1.0 8 8\nend_lattice\n".into(),
        energetics: "energetics\nend_energetics\n".into(),
        mechanism: "mechanism\n\
reversible_step CO_ads\n  pre_expon 1.0e+07\nend_reversible_step\n\
reversible_step O2_ads\n  pre_expon 2.0e+07\nend_reversible_step\n\
step CO_ox\n  pre_expon 1.0e+13\nend_step\n\
end_mechanism\n"
            .into(),
    })
}

pub fn base_settings() -> SimulationSettings {
    let mut settings = SimulationSettings::new(500.0, 1.0);
    settings.random_seed = 4242;
    settings.molar_fractions.insert("CO".into(), 0.4);
    settings.molar_fractions.insert("O2".into(), 0.6);
    settings.termination.max_time = Some(1.0);
    settings
}

pub fn horizons(times: &[f64]) -> ParameterSet {
    let mut set = ParameterSet::new(Strategy::Zip);
    set.add_literal("t_max", "max_time", times.to_vec()).unwrap();
    set
}

pub fn doubling(count: usize) -> Vec<f64> {
    (0..count).map(|k| 2f64.powi(k as i32)).collect()
}

pub fn co2_config(replicas: usize) -> SteadyStateConfig {
    SteadyStateConfig {
        replicas,
        tracked_species: vec!["CO2".into()],
        ..SteadyStateConfig::default()
    }
}

pub fn controller(
    config: SteadyStateConfig,
    runner: Arc<SyntheticRunner>,
    times: &[f64],
) -> SteadyStateController {
    SteadyStateController::new(config, base_settings(), &horizons(times), runner, model()).unwrap()
}
