use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use surfkin_core::errors::{ErrorInfo, KinError};
use surfkin_params::{Overlay, Value};

/// Engine-facing configuration of a single simulation run.
///
/// Every field the engine reads is explicit here; overlays address fields by
/// name through [`SimulationSettings::apply_overlay`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Seed handed to the engine.
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    /// Temperature in kelvin.
    pub temperature: f64,
    /// Total gas pressure in bar.
    pub pressure: f64,
    /// Gas-phase molar fraction per gas species.
    #[serde(default)]
    pub molar_fractions: BTreeMap<String, f64>,
    /// Output sampling cadences.
    #[serde(default)]
    pub sampling: SamplingSettings,
    /// Stopping criteria.
    #[serde(default)]
    pub termination: Termination,
}

fn default_random_seed() -> u64 {
    953_129
}

/// Sampling cadence for each engine output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingSettings {
    /// Lattice snapshots.
    #[serde(default = "default_snapshots")]
    pub snapshots: Cadence,
    /// Per-step occurrence statistics.
    #[serde(default = "default_process_statistics")]
    pub process_statistics: Cadence,
    /// Species number time series, the input of the TOF estimator.
    #[serde(default = "default_species_numbers")]
    pub species_numbers: Cadence,
}

fn default_snapshots() -> Cadence {
    Cadence::Off
}

fn default_process_statistics() -> Cadence {
    Cadence::Time { interval: 1.0e-3 }
}

fn default_species_numbers() -> Cadence {
    Cadence::Time { interval: 1.0e-3 }
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            snapshots: default_snapshots(),
            process_statistics: default_process_statistics(),
            species_numbers: default_species_numbers(),
        }
    }
}

/// When an output stream is written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Cadence {
    /// Stream disabled.
    Off,
    /// Every `interval` units of simulated time.
    Time {
        /// Simulated-time interval.
        interval: f64,
    },
    /// Every `interval` events.
    Event {
        /// Event count interval.
        interval: u64,
    },
    /// Logarithmically spaced in time.
    Logtime {
        /// First sampling time.
        start: f64,
        /// Ratio between successive sampling times.
        ratio: f64,
    },
}

impl Cadence {
    /// Parses the engine syntax: `off`, `on time 0.1`, `on event 100`,
    /// `on logtime 1e-6 1.5`. The leading `on` may be omitted.
    pub fn parse(text: &str) -> Result<Self, KinError> {
        let invalid = || {
            KinError::Config(
                ErrorInfo::new("cadence-invalid", "cadence must be off or on <mode> <value>")
                    .with_context("value", text)
                    .with_hint("use one of: off, on time <dt>, on event <n>, on logtime <t0> <ratio>"),
            )
        };
        let mut tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.first() == Some(&"on") {
            tokens.remove(0);
        }
        match tokens.as_slice() {
            ["off"] => Ok(Cadence::Off),
            ["time", dt] => dt
                .parse()
                .map(|interval| Cadence::Time { interval })
                .map_err(|_| invalid()),
            ["event", n] => n
                .parse()
                .map(|interval| Cadence::Event { interval })
                .map_err(|_| invalid()),
            ["logtime", start, ratio] => match (start.parse(), ratio.parse()) {
                (Ok(start), Ok(ratio)) => Ok(Cadence::Logtime { start, ratio }),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }

    fn validate(&self, stream: &str) -> Result<(), KinError> {
        let ok = match *self {
            Cadence::Off => true,
            Cadence::Time { interval } => interval.is_finite() && interval > 0.0,
            Cadence::Event { interval } => interval > 0,
            Cadence::Logtime { start, ratio } => {
                start.is_finite() && start > 0.0 && ratio.is_finite() && ratio > 1.0
            }
        };
        if ok {
            Ok(())
        } else {
            Err(KinError::Config(
                ErrorInfo::new("cadence-out-of-range", "sampling cadence must be positive")
                    .with_context("stream", stream)
                    .with_context("cadence", self.to_string()),
            ))
        }
    }

    fn with_interval(self, stream: &str, value: &Value) -> Result<Self, KinError> {
        let bad = || {
            KinError::Config(
                ErrorInfo::new("overlay-type", "interval override does not fit the cadence")
                    .with_context("field", format!("{stream}.interval"))
                    .with_context("value", value.to_string()),
            )
        };
        match self {
            Cadence::Time { .. } => value
                .as_f64()
                .map(|interval| Cadence::Time { interval })
                .ok_or_else(bad),
            Cadence::Event { .. } => value
                .as_i64()
                .and_then(|v| u64::try_from(v).ok())
                .map(|interval| Cadence::Event { interval })
                .ok_or_else(bad),
            Cadence::Logtime { ratio, .. } => value
                .as_f64()
                .map(|start| Cadence::Logtime { start, ratio })
                .ok_or_else(bad),
            Cadence::Off => Err(bad()),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Off => write!(f, "off"),
            Cadence::Time { interval } => write!(f, "on time {interval:e}"),
            Cadence::Event { interval } => write!(f, "on event {interval}"),
            Cadence::Logtime { start, ratio } => write!(f, "on logtime {start:e} {ratio}"),
        }
    }
}

/// Stopping criteria; whichever is reached first ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Termination {
    /// Simulated-time limit.
    #[serde(default)]
    pub max_time: Option<f64>,
    /// Event limit; unset means unbounded.
    #[serde(default)]
    pub max_steps: Option<u64>,
    /// Wall-clock limit in seconds forwarded to the engine.
    #[serde(default)]
    pub wall_time: Option<u64>,
}

impl SimulationSettings {
    /// Settings with the given conditions and default sampling.
    pub fn new(temperature: f64, pressure: f64) -> Self {
        Self {
            random_seed: default_random_seed(),
            temperature,
            pressure,
            molar_fractions: BTreeMap::new(),
            sampling: SamplingSettings::default(),
            termination: Termination::default(),
        }
    }

    /// Checks physical ranges and that the run has a stopping criterion.
    pub fn validate(&self) -> Result<(), KinError> {
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(out_of_range("temperature", self.temperature));
        }
        if !(self.pressure.is_finite() && self.pressure >= 0.0) {
            return Err(out_of_range("pressure", self.pressure));
        }
        let mut total = 0.0;
        for (species, fraction) in &self.molar_fractions {
            if !(fraction.is_finite() && (0.0..=1.0).contains(fraction)) {
                return Err(out_of_range(&format!("molar_fraction.{species}"), *fraction));
            }
            total += fraction;
        }
        if total > 1.0 + 1e-9 {
            return Err(KinError::Config(
                ErrorInfo::new("molar-fraction-sum", "molar fractions sum to more than one")
                    .with_context("sum", total.to_string()),
            ));
        }
        self.sampling.snapshots.validate("snapshots")?;
        self.sampling
            .process_statistics
            .validate("process_statistics")?;
        self.sampling.species_numbers.validate("species_numbers")?;
        let term = &self.termination;
        if let Some(max_time) = term.max_time {
            if !(max_time.is_finite() && max_time > 0.0) {
                return Err(out_of_range("max_time", max_time));
            }
        }
        if term.max_time.is_none() && term.max_steps.is_none() && term.wall_time.is_none() {
            return Err(KinError::Config(
                ErrorInfo::new("termination-missing", "run has no stopping criterion")
                    .with_hint("set max_time, max_steps or wall_time"),
            ));
        }
        Ok(())
    }

    /// Writes one overlay value into the named field.
    pub fn apply_field(&mut self, field: &str, value: &Value) -> Result<(), KinError> {
        match field {
            "random_seed" => self.random_seed = as_u64(field, value)?,
            "temperature" => self.temperature = as_f64(field, value)?,
            "pressure" => self.pressure = as_f64(field, value)?,
            "max_time" => self.termination.max_time = Some(as_f64(field, value)?),
            "max_steps" => self.termination.max_steps = Some(as_u64(field, value)?),
            "wall_time" => self.termination.wall_time = Some(as_u64(field, value)?),
            "snapshots" => self.sampling.snapshots = as_cadence(field, value)?,
            "process_statistics" => self.sampling.process_statistics = as_cadence(field, value)?,
            "species_numbers" => self.sampling.species_numbers = as_cadence(field, value)?,
            "snapshots.interval" => {
                self.sampling.snapshots = self.sampling.snapshots.with_interval("snapshots", value)?
            }
            "process_statistics.interval" => {
                self.sampling.process_statistics = self
                    .sampling
                    .process_statistics
                    .with_interval("process_statistics", value)?
            }
            "species_numbers.interval" => {
                self.sampling.species_numbers = self
                    .sampling
                    .species_numbers
                    .with_interval("species_numbers", value)?
            }
            other => match other.strip_prefix("molar_fraction.") {
                Some(species) if !species.is_empty() => {
                    let fraction = as_f64(field, value)?;
                    self.molar_fractions.insert(species.to_string(), fraction);
                }
                _ => {
                    return Err(KinError::Config(
                        ErrorInfo::new("overlay-unknown-field", "overlay targets an unknown field")
                            .with_context("field", field),
                    ))
                }
            },
        }
        Ok(())
    }

    /// Copy of these settings with every overlay entry applied in order,
    /// validated afterwards.
    pub fn with_overlay(&self, overlay: &Overlay) -> Result<Self, KinError> {
        let mut settings = self.clone();
        settings.apply_overlay(overlay)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Applies every overlay entry in order without validating.
    pub fn apply_overlay(&mut self, overlay: &Overlay) -> Result<(), KinError> {
        for entry in overlay.entries() {
            self.apply_field(&entry.field, &entry.value).map_err(|err| match err {
                KinError::Config(info) => {
                    KinError::Config(info.with_context("parameter", entry.parameter.clone()))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

/// Loads and validates settings from a YAML file.
pub fn load_settings(path: &Path) -> Result<SimulationSettings, KinError> {
    let bytes = std::fs::read(path).map_err(|err| KinError::io("settings_read", path, err))?;
    let settings: SimulationSettings = surfkin_core::serde::from_yaml_slice(&bytes)?;
    settings.validate()?;
    Ok(settings)
}

fn out_of_range(field: &str, value: f64) -> KinError {
    KinError::Config(
        ErrorInfo::new("settings-out-of-range", "setting outside its valid range")
            .with_context("field", field)
            .with_context("value", value.to_string()),
    )
}

fn type_error(field: &str, value: &Value, expected: &str) -> KinError {
    KinError::Config(
        ErrorInfo::new("overlay-type", format!("field expects {expected}"))
            .with_context("field", field)
            .with_context("value", value.to_string()),
    )
}

fn as_f64(field: &str, value: &Value) -> Result<f64, KinError> {
    value.as_f64().ok_or_else(|| type_error(field, value, "a number"))
}

fn as_u64(field: &str, value: &Value) -> Result<u64, KinError> {
    value
        .as_i64()
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| type_error(field, value, "a non-negative integer"))
}

fn as_cadence(field: &str, value: &Value) -> Result<Cadence, KinError> {
    let text = value
        .as_str()
        .ok_or_else(|| type_error(field, value, "a cadence string"))?;
    Cadence::parse(text)
}
