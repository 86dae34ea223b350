#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use surfkin_core::errors::KinError;
use surfkin_engine::{
    GasSpecies, JobRunner, RunHandle, RunId, RunRecord, RunRequest, RunResult, RunState,
    SimulationSettings, SpeciesNumbers, StaticModel, TerminationReason,
};

pub type FailureRule = Box<dyn Fn(&RunRequest) -> Option<KinError> + Send + Sync>;

/// Job runner producing a noiseless CO2 series whose rate is
/// `temperature / 10 * pressure`.
pub struct GridRunner {
    fail: Option<FailureRule>,
    next_id: AtomicU64,
    labels: Mutex<Vec<String>>,
}

impl GridRunner {
    pub fn new() -> Self {
        Self {
            fail: None,
            next_id: AtomicU64::new(0),
            labels: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, rule: FailureRule) -> Self {
        self.fail = Some(rule);
        self
    }

    pub fn labels(&self) -> Vec<String> {
        let mut labels = self.labels.lock().unwrap().clone();
        labels.sort();
        labels
    }
}

pub fn rate_of(settings: &SimulationSettings) -> f64 {
    settings.temperature / 10.0 * settings.pressure
}

fn synthesize(settings: &SimulationSettings) -> RunResult {
    let horizon = settings.termination.max_time.unwrap_or(1.0);
    let rate = rate_of(settings);
    let mut numbers = SpeciesNumbers::default();
    let mut co2 = Vec::new();
    for k in 0..101u32 {
        let t = horizon * f64::from(k) / 100.0;
        numbers.time.push(t);
        numbers.nevents.push(u64::from(k) * 10);
        co2.push(rate * t);
    }
    numbers.columns.insert("CO".into(), co2.iter().map(|v| -v).collect());
    numbers.columns.insert("CO2".into(), co2);
    RunResult {
        species_numbers: numbers,
        process_statistics: None,
        wall_time: Some(0.0),
        termination: TerminationReason::MaxTime,
    }
}

impl JobRunner for GridRunner {
    fn submit(&self, request: RunRequest) -> Result<RunHandle, KinError> {
        let id = RunId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let workdir = PathBuf::from("grid").join(&request.label).join(id.to_string());
        let seed = request.settings.random_seed;
        self.labels.lock().unwrap().push(request.label.clone());
        let record = match self.fail.as_ref().and_then(|rule| rule(&request)) {
            Some(error) => RunRecord::failed(id, request.label.clone(), seed, workdir, error),
            None => RunRecord {
                id,
                label: request.label.clone(),
                seed,
                workdir,
                state: RunState::Completed,
                result: Some(synthesize(&request.settings)),
                error: None,
            },
        };
        Ok(RunHandle::ready(record))
    }

    fn wait(&self, handle: RunHandle) -> RunRecord {
        handle.join().expect("grid handles are always ready")
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
        surface: Vec::new(),
        lattice: "lattice default_choice\nend_lattice\n".into(),
        energetics: "energetics\nend_energetics\n".into(),
        mechanism: "mechanism\nend_mechanism\n".into(),
    })
}

pub fn reference() -> SimulationSettings {
    let mut settings = SimulationSettings::new(500.0, 1.0);
    settings.random_seed = 77;
    settings.molar_fractions.insert("CO".into(), 0.5);
    settings.molar_fractions.insert("O2".into(), 0.5);
    settings.termination.max_time = Some(2.0);
    settings
}
