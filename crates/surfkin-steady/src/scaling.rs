use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use surfkin_core::errors::{ErrorInfo, KinError};
use surfkin_engine::{ArenaIndex, PrefactorScaling, ProcessStatistics};
use surfkin_params::Overlay;
use tracing::{info, warn};

/// Automatic stiffness scaling performed once before the iteration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingConfig {
    /// Run the calibration and scale prefactors.
    #[serde(default)]
    pub enabled: bool,
    /// Overrides applied to the base settings for the calibration run,
    /// typically a short `max_steps` budget.
    #[serde(default)]
    pub calibration: Overlay,
    /// Half-width of the band around 0.5 in which a step's partial
    /// equilibrium index counts as equilibrated.
    #[serde(default = "default_pei_threshold")]
    pub pei_threshold: f64,
    /// Largest factor a step is slowed down by.
    #[serde(default = "default_upper_bound")]
    pub upper_bound: f64,
    /// Steps with fewer forward plus reverse events are left alone.
    #[serde(default)]
    pub min_events: u64,
}

fn default_pei_threshold() -> f64 {
    0.1
}

fn default_upper_bound() -> f64 {
    100.0
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            calibration: Overlay::default(),
            pei_threshold: default_pei_threshold(),
            upper_bound: default_upper_bound(),
            min_events: 0,
        }
    }
}

impl ScalingConfig {
    /// Checks the band and bound.
    pub fn validate(&self) -> Result<(), KinError> {
        if !(self.pei_threshold >= 0.0 && self.pei_threshold <= 0.5) {
            return Err(KinError::Config(
                ErrorInfo::new("scaling-config", "pei_threshold must lie in [0, 0.5]")
                    .with_context("pei_threshold", self.pei_threshold.to_string()),
            ));
        }
        if !(self.upper_bound.is_finite() && self.upper_bound >= 1.0) {
            return Err(KinError::Config(
                ErrorInfo::new("scaling-config", "upper_bound must be at least 1")
                    .with_context("upper_bound", self.upper_bound.to_string()),
            ));
        }
        Ok(())
    }
}

/// Outcome of the calibration pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScalingReport {
    /// Arena entry of the calibration run.
    #[serde(default)]
    pub calibration_run: Option<ArenaIndex>,
    /// Partial equilibrium index `fwd / (fwd + rev)` per reversible step.
    pub pei: BTreeMap<String, f64>,
    /// Combined forward and reverse events per reversible step.
    pub events: BTreeMap<String, u64>,
    /// Factor each scaled step was slowed down by.
    pub factors: BTreeMap<String, f64>,
    /// Prefactor multipliers (`1 / factor`) applied to later runs.
    pub multipliers: PrefactorScaling,
}

/// Derives prefactor multipliers from calibration statistics.
///
/// A reversible step is in partial equilibrium when its index lies within
/// `pei_threshold` of 0.5. Each such step is slowed by the ratio of its event
/// count to that of the slowest step not in equilibrium, floored at one and
/// capped at `upper_bound`. Irreversible steps count as not equilibrated.
pub fn compute_scaling(
    stats: &ProcessStatistics,
    reversible_steps: &[String],
    config: &ScalingConfig,
) -> ScalingReport {
    let occurrences = stats.final_occurrences();
    let mut report = ScalingReport::default();
    let mut equilibrated = Vec::new();
    let mut slowest: Option<u64> = None;
    let mut note_slow = |events: u64| {
        if events > 0 {
            slowest = Some(slowest.map_or(events, |s| s.min(events)));
        }
    };

    for step in reversible_steps {
        let fwd = occurrences.get(&format!("{step}_fwd")).copied().unwrap_or(0);
        let rev = occurrences.get(&format!("{step}_rev")).copied().unwrap_or(0);
        let total = fwd + rev;
        report.events.insert(step.clone(), total);
        if total == 0 {
            continue;
        }
        let pei = fwd as f64 / total as f64;
        report.pei.insert(step.clone(), pei);
        if (pei - 0.5).abs() <= config.pei_threshold && total >= config.min_events {
            equilibrated.push((step.clone(), total));
        } else {
            note_slow(total);
        }
    }
    for (name, count) in &occurrences {
        let paired = reversible_steps
            .iter()
            .any(|step| name == &format!("{step}_fwd") || name == &format!("{step}_rev"));
        if !paired {
            note_slow(*count);
        }
    }

    let Some(slowest) = slowest else {
        if !equilibrated.is_empty() {
            warn!(
                steps = equilibrated.len(),
                "every active step is equilibrated; leaving prefactors unscaled"
            );
        }
        return report;
    };
    for (step, total) in equilibrated {
        let factor = (total as f64 / slowest as f64).clamp(1.0, config.upper_bound);
        if factor > 1.0 {
            report.factors.insert(step.clone(), factor);
            report.multipliers.insert(step, 1.0 / factor);
        }
    }
    info!(
        scaled = report.multipliers.len(),
        slowest_events = slowest,
        "prefactor scaling computed"
    );
    report
}
