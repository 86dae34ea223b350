use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use surfkin_core::errors::{ErrorInfo, KinError};
use surfkin_core::hash::stable_hash_string;
use surfkin_core::provenance::RunProvenance;
use surfkin_engine::SimulationSettings;
use surfkin_params::{GridIndex, Overlay, ParameterSet};
use tracing::{info, warn};

use crate::factory::InnerJobFactory;
use crate::point::ScanPoint;
use crate::table::{EntryStatus, ScanEntry, ScanResultTable};

/// Options governing scan execution.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Number of grid points whose inner jobs run at once.
    pub concurrency: usize,
    /// Workdir label prefix of every point.
    pub label: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            label: "scan".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ScanFingerprint<'a> {
    kind: &'a str,
    label: &'a str,
    reference: &'a SimulationSettings,
    points: &'a [(GridIndex, Overlay)],
}

/// Runs an inner job at every point of a parameter grid.
pub struct ParameterScan {
    set: ParameterSet,
    factory: Arc<dyn InnerJobFactory>,
    options: ScanOptions,
}

impl ParameterScan {
    /// Scan over the points generated from `set`.
    pub fn new(set: ParameterSet, factory: Arc<dyn InnerJobFactory>, options: ScanOptions) -> Self {
        Self {
            set,
            factory,
            options,
        }
    }

    /// Options in effect.
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Runs every point and returns the full table.
    ///
    /// Only generation errors are returned; a point whose job cannot be
    /// built or fails is recorded as a failed entry and its siblings keep
    /// running.
    pub fn run(&self) -> Result<ScanResultTable, KinError> {
        let points = self.set.generate()?;
        let kind = self.set.strategy_label();
        let input_hash = stable_hash_string(&ScanFingerprint {
            kind,
            label: &self.options.label,
            reference: self.factory.reference(),
            points: &points,
        })?;
        let provenance = RunProvenance::stamp(
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            input_hash,
            self.factory.reference().random_seed,
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.concurrency.max(1))
            .thread_name(|idx| format!("surfkin-scan-{idx}"))
            .build()
            .map_err(|err| KinError::Engine(ErrorInfo::new("thread_pool", err.to_string())))?;
        info!(
            kind,
            points = points.len(),
            workers = self.options.concurrency.max(1),
            "parameter scan started"
        );

        let mut entries: Vec<ScanEntry> = pool.install(|| {
            points
                .par_iter()
                .map(|(index, overlay)| {
                    let point = ScanPoint::new(&self.options.label, index.clone(), overlay.clone());
                    self.run_point(point)
                })
                .collect()
        });
        entries.sort_by(|a, b| a.index.cmp(&b.index));

        let table = ScanResultTable {
            kind: kind.to_string(),
            shape: self.set.shape(),
            parameter_names: self.set.parameters().iter().map(|p| p.name.clone()).collect(),
            entries,
            provenance,
        };
        info!(
            complete = table.complete_count(),
            failed = table.failures().count(),
            "parameter scan finished"
        );
        Ok(table)
    }

    fn run_point(&self, point: ScanPoint) -> ScanEntry {
        let parameters = point.overlay.parameters();
        let result = self.factory.create(&point).and_then(|job| job.run());
        let (status, error, outcome) = match result {
            Ok(outcome) => match outcome.failure().cloned() {
                Some(err) => (EntryStatus::Failed, Some(err), Some(outcome)),
                None => (EntryStatus::Complete, None, Some(outcome)),
            },
            Err(err) => (EntryStatus::Failed, Some(err), None),
        };
        match &error {
            Some(err) => warn!(point = %point.index, error = %err, "scan point failed"),
            None => info!(
                point = %point.index,
                summary = outcome.as_ref().map_or("", |o| o.summary()),
                "scan point complete"
            ),
        }
        ScanEntry {
            index: point.index,
            parameters,
            status,
            error,
            outcome,
        }
    }
}
