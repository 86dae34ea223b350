mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use common::{co2_config, controller, doubling, SyntheticRunner};
use surfkin_core::errors::{ErrorInfo, KinError};
use surfkin_core::rng::replica_seed;
use surfkin_engine::RunRequest;
use surfkin_params::Overlay;
use surfkin_steady::{
    estimate_tof, ControllerState, ConvergencePolicy, SteadyStateReport, SteadyStateStatus,
    Threshold,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn converges_at_the_first_iteration_meeting_the_threshold() {
    init_tracing();
    let runner = Arc::new(SyntheticRunner::new());
    let config = co2_config(2);
    let mut ctl = controller(config.clone(), Arc::clone(&runner), &doubling(12));
    assert_eq!(ctl.state(), ControllerState::Initializing);
    let report = ctl.run().unwrap();
    assert_eq!(report.status, SteadyStateStatus::Converged);
    assert_eq!(ctl.state(), ControllerState::Converged);
    assert!(report.history.len() > 1, "noise must prevent early convergence");

    for (index, record) in report.history.iter().enumerate() {
        assert_eq!(record.iteration_index, index);
        let results: Vec<_> = record
            .runs
            .iter()
            .filter_map(|run| report.arena.get(*run))
            .filter_map(|run| run.completed_result())
            .collect();
        assert_eq!(results.len(), 2);
        let expected = estimate_tof(&results, "CO2", &config.tof, false);
        assert_eq!(record.tof_estimates["CO2"], expected);
        let meets = Threshold::Relative(0.05).is_met(&expected);
        assert_eq!(record.converged, meets);
        assert_eq!(record.converged, index + 1 == report.history.len());
    }
    let last = &report.final_estimates().unwrap()["CO2"];
    assert!((last.mean - 50.0).abs() < 5.0);
}

#[test]
fn identical_inputs_reproduce_identical_history() {
    let first = controller(co2_config(3), Arc::new(SyntheticRunner::new()), &doubling(12))
        .run()
        .unwrap();
    let second = controller(co2_config(3), Arc::new(SyntheticRunner::new()), &doubling(12))
        .run()
        .unwrap();
    assert_eq!(first.history, second.history);
    assert_eq!(first.provenance.input_hash, second.provenance.input_hash);
}

#[test]
fn replica_seeds_follow_the_stride() {
    let runner = Arc::new(SyntheticRunner::new());
    controller(co2_config(3), Arc::clone(&runner), &[1.0])
        .run()
        .unwrap();
    let seeds: Vec<u64> = runner
        .submitted()
        .iter()
        .map(|request| request.settings.random_seed)
        .collect();
    assert_eq!(
        seeds,
        vec![replica_seed(4242, 0), replica_seed(4242, 1), replica_seed(4242, 2)]
    );
}

#[test]
fn exhausted_when_overlays_run_out() {
    let config = surfkin_steady::SteadyStateConfig {
        threshold: Threshold::Absolute(1e-12),
        ..co2_config(1)
    };
    let mut ctl = controller(config, Arc::new(SyntheticRunner::new()), &doubling(4));
    let report = ctl.run().unwrap();
    assert_eq!(report.status, SteadyStateStatus::Exhausted);
    assert_eq!(report.history.len(), 4);
    assert!(report.history.iter().all(|record| !record.converged));
    assert!(report.error.is_none());
}

#[test]
fn history_prefix_is_unchanged_by_later_iterations() {
    let config = surfkin_steady::SteadyStateConfig {
        threshold: Threshold::Absolute(1e-12),
        ..co2_config(2)
    };
    let short = controller(config.clone(), Arc::new(SyntheticRunner::new()), &doubling(3))
        .run()
        .unwrap();
    let long = controller(config, Arc::new(SyntheticRunner::new()), &doubling(4))
        .run()
        .unwrap();
    assert_eq!(short.history.len(), 3);
    assert_eq!(long.history.len(), 4);
    assert_eq!(short.history[..], long.history[..3]);
}

#[test]
fn empty_iteration_sequence_is_exhausted_immediately() {
    let report = controller(co2_config(1), Arc::new(SyntheticRunner::new()), &[])
        .run()
        .unwrap();
    assert_eq!(report.status, SteadyStateStatus::Exhausted);
    assert!(report.history.is_empty());
    assert!(report.arena.is_empty());
}

#[test]
fn consecutive_policy_needs_two_passing_iterations() {
    let single = controller(co2_config(2), Arc::new(SyntheticRunner::new()), &doubling(14))
        .run()
        .unwrap();
    let config = surfkin_steady::SteadyStateConfig {
        policy: ConvergencePolicy::Consecutive,
        ..co2_config(2)
    };
    let double = controller(config, Arc::new(SyntheticRunner::new()), &doubling(14))
        .run()
        .unwrap();
    assert_eq!(single.status, SteadyStateStatus::Converged);
    assert_eq!(double.status, SteadyStateStatus::Converged);
    assert!(double.history.len() > single.history.len());

    let n = double.history.len();
    assert!(double.history[n - 1].threshold_met["CO2"]);
    assert!(double.history[n - 2].threshold_met["CO2"]);
    for window in double.history[..n - 1].windows(2) {
        assert!(!(window[0].threshold_met["CO2"] && window[1].threshold_met["CO2"]));
    }
}

#[test]
fn a_failed_replica_degrades_but_does_not_abort() {
    let failing_seed = replica_seed(4242, 2);
    let runner = SyntheticRunner::new().failing(Box::new(move |request: &RunRequest| {
        (request.settings.random_seed == failing_seed)
            .then(|| KinError::Engine(ErrorInfo::new("engine-exit", "segfault")))
    }));
    let config = surfkin_steady::SteadyStateConfig {
        threshold: Threshold::Absolute(1e-12),
        ..co2_config(4)
    };
    let report = controller(config.clone(), Arc::new(runner), &doubling(3))
        .run()
        .unwrap();
    assert_eq!(report.status, SteadyStateStatus::Exhausted);
    for record in &report.history {
        assert!(record.degraded);
        assert_eq!(record.failed_replicas, 1);
        assert_eq!(record.runs.len(), 4);
        let estimate = &record.tof_estimates["CO2"];
        assert!(estimate.degraded);
        assert_eq!(
            estimate.n_batches_used,
            3 * (config.tof.nbatch - config.tof.ignore_nbatch)
        );
    }
}

#[test]
fn zero_successful_replicas_fail_the_search() {
    let runner = SyntheticRunner::new().failing(Box::new(|request: &RunRequest| {
        let horizon = request.settings.termination.max_time.unwrap_or(0.0);
        (horizon >= 4.0).then(|| KinError::Engine(ErrorInfo::new("engine-exit", "crash")))
    }));
    let config = surfkin_steady::SteadyStateConfig {
        threshold: Threshold::Absolute(1e-12),
        ..co2_config(2)
    };
    let mut ctl = controller(config, Arc::new(runner), &doubling(6));
    let report = ctl.run().unwrap();
    assert_eq!(report.status, SteadyStateStatus::Failed);
    assert_eq!(ctl.state(), ControllerState::Failed);
    assert_eq!(report.history.len(), 2);
    assert!(matches!(report.error, Some(KinError::ReplicaFailure(_))));
    assert_eq!(report.arena.len(), 6, "failed runs stay in the arena");
}

#[test]
fn engine_unavailable_is_surfaced_as_such() {
    let runner = SyntheticRunner::new().failing(Box::new(|_: &RunRequest| {
        Some(KinError::EngineUnavailable(ErrorInfo::new(
            "engine-unavailable",
            "no such file",
        )))
    }));
    let report = controller(co2_config(2), Arc::new(runner), &doubling(3))
        .run()
        .unwrap();
    assert_eq!(report.status, SteadyStateStatus::Failed);
    assert!(report.error.unwrap().is_engine_unavailable());
}

#[test]
fn restart_chains_each_slot_to_its_previous_run() {
    let runner = Arc::new(SyntheticRunner::new());
    let config = surfkin_steady::SteadyStateConfig {
        restart: true,
        threshold: Threshold::Absolute(1e-12),
        ..co2_config(2)
    };
    let report = controller(config, Arc::clone(&runner), &doubling(3))
        .run()
        .unwrap();
    let submitted = runner.submitted();
    assert_eq!(submitted.len(), 6);
    assert!(submitted[..2].iter().all(|r| r.restart_from.is_none()));
    for iteration in 1..3 {
        for slot in 0..2 {
            let previous = report.history[iteration - 1].runs[slot];
            let expected = &report.arena.get(previous).unwrap().workdir;
            assert_eq!(
                submitted[iteration * 2 + slot].restart_from.as_ref(),
                Some(expected)
            );
        }
    }
}

#[test]
fn cancellation_stops_at_the_next_iteration_boundary() {
    let flag = Arc::new(AtomicBool::new(false));
    let runner = SyntheticRunner::new().cancelling_after(2, Arc::clone(&flag));
    let config = surfkin_steady::SteadyStateConfig {
        threshold: Threshold::Absolute(1e-12),
        ..co2_config(2)
    };
    let mut ctl = controller(config, Arc::new(runner), &doubling(5)).with_cancellation(flag);
    let report = ctl.run().unwrap();
    assert_eq!(report.status, SteadyStateStatus::Cancelled);
    assert_eq!(ctl.state(), ControllerState::Cancelled);
    assert_eq!(report.history.len(), 1, "the running iteration completes");
}

#[test]
fn scaling_calibrates_once_and_feeds_every_run() {
    let runner = Arc::new(SyntheticRunner::new());
    let mut config = co2_config(2);
    config.threshold = Threshold::Absolute(1e-12);
    config.scaling.enabled = true;
    config.scaling.calibration = Overlay::from_fields([("max_steps", 1_000_i64)]);
    let report = controller(config, Arc::clone(&runner), &doubling(2))
        .run()
        .unwrap();

    let scaling = report.scaling.as_ref().expect("scaling report");
    assert_eq!(scaling.calibration_run, Some(surfkin_engine::ArenaIndex(0)));
    assert!((scaling.multipliers["CO_ads"] - 0.01).abs() < 1e-12);
    assert!(!scaling.multipliers.contains_key("O2_ads"));

    let submitted = runner.submitted();
    assert_eq!(submitted.len(), 1 + 2 * 2);
    assert!(submitted[0].label.ends_with("calibration/replica_00"));
    assert_eq!(submitted[0].settings.termination.max_steps, Some(1_000));
    assert!(submitted[0].scaling.is_empty());
    assert!(submitted[1..]
        .iter()
        .all(|request| request.scaling == scaling.multipliers));
}

#[test]
fn tracked_species_default_to_every_gas_species() {
    let ctl = controller(
        surfkin_steady::SteadyStateConfig::default(),
        Arc::new(SyntheticRunner::new()),
        &[1.0],
    );
    assert_eq!(ctl.tracked_species(), &["CO", "O2", "CO2"]);
}

#[test]
fn unknown_tracked_species_is_a_config_error() {
    let config = surfkin_steady::SteadyStateConfig {
        tracked_species: vec!["N2".into()],
        ..Default::default()
    };
    let err = surfkin_steady::SteadyStateController::new(
        config,
        common::base_settings(),
        &common::horizons(&[1.0]),
        Arc::new(SyntheticRunner::new()),
        common::model(),
    )
    .err()
    .expect("unknown species rejected");
    assert_eq!(err.info().code, "tracked-species-unknown");
}

#[test]
fn report_round_trips_through_json() {
    let mut config = co2_config(1);
    config.tof.nbatch = 1;
    config.tof.ignore_nbatch = 0;
    let report = controller(config, Arc::new(SyntheticRunner::new()), &doubling(3))
        .run()
        .unwrap();
    assert_eq!(report.status, SteadyStateStatus::Exhausted);
    let estimate = &report.history[0].tof_estimates["CO2"];
    assert!(estimate.insufficient_data);
    assert!(estimate.half_width.is_infinite());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(surfkin_steady::STEADY_STATE_REPORT_FILE);
    report.store(&path).unwrap();
    let loaded = SteadyStateReport::load(&path).unwrap();
    assert_eq!(loaded, report);
    assert_eq!(loaded.history.len(), 3);
}
