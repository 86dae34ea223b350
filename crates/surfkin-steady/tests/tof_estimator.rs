use surfkin_engine::{RunResult, SpeciesNumbers, TerminationReason};
use surfkin_steady::{estimate_tof, Threshold, TofConfig, TofEstimate};

fn run_with(times: &[f64], counts: &[f64]) -> RunResult {
    let mut numbers = SpeciesNumbers::default();
    numbers.time = times.to_vec();
    numbers.nevents = (0..times.len() as u64).collect();
    numbers.columns.insert("CO2".into(), counts.to_vec());
    RunResult {
        species_numbers: numbers,
        process_statistics: None,
        wall_time: None,
        termination: TerminationReason::MaxTime,
    }
}

fn linear(rate: f64, samples: usize) -> RunResult {
    let times: Vec<f64> = (0..samples).map(|k| k as f64 * 0.1).collect();
    let counts: Vec<f64> = times.iter().map(|t| rate * t).collect();
    run_with(&times, &counts)
}

#[test]
fn constant_rate_gives_zero_width_interval() {
    let config = TofConfig::default();
    let runs = [linear(12.0, 401), linear(12.0, 401)];
    let refs: Vec<&RunResult> = runs.iter().collect();
    let estimate = estimate_tof(&refs, "CO2", &config, false);
    assert_eq!(estimate.n_batches_used, 2 * 19);
    assert!((estimate.mean - 12.0).abs() < 1e-9);
    assert!(estimate.half_width.abs() < 1e-9);
    assert!(!estimate.insufficient_data);
    assert!(Threshold::Absolute(1e-6).is_met(&estimate));
}

#[test]
fn batches_from_all_replicas_are_pooled() {
    let config = TofConfig {
        nbatch: 2,
        ignore_nbatch: 0,
        active_sites: 2.0,
        ..TofConfig::default()
    };
    let fast = run_with(&[0.0, 1.0, 2.0], &[0.0, 10.0, 20.0]);
    let slow = run_with(&[0.0, 1.0, 2.0], &[0.0, 2.0, 4.0]);
    let estimate = estimate_tof(&[&fast, &slow], "CO2", &config, true);
    assert_eq!(estimate.n_batches_used, 4);
    // Rates per site: 5, 5, 1, 1.
    assert!((estimate.mean - 3.0).abs() < 1e-12);
    assert!(estimate.half_width > 0.0);
    assert!(estimate.degraded);
}

#[test]
fn too_few_batches_are_flagged_not_raised() {
    let config = TofConfig::default();
    let short = run_with(&[0.0], &[0.0]);
    let estimate = estimate_tof(&[&short], "CO2", &config, false);
    assert!(estimate.insufficient_data);
    assert_eq!(estimate.n_batches_used, 0);
    assert!(estimate.half_width.is_infinite());
    assert!(!Threshold::Relative(0.5).is_met(&estimate));

    let missing = estimate_tof(&[&linear(1.0, 50)], "O2", &config, false);
    assert!(missing.insufficient_data);
}

#[test]
fn infinite_half_width_survives_json() {
    let estimate = TofEstimate {
        mean: 0.0,
        half_width: f64::INFINITY,
        confidence: 0.96,
        n_batches_used: 1,
        insufficient_data: true,
        degraded: false,
    };
    let json = serde_json::to_string(&estimate).unwrap();
    assert!(json.contains("\"half_width\":null"));
    let back: TofEstimate = serde_json::from_str(&json).unwrap();
    assert_eq!(back, estimate);
}
