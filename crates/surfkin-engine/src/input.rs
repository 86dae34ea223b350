use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use surfkin_core::errors::{ErrorInfo, KinError};

use crate::model::{PrefactorScaling, SurfaceModel};
use crate::settings::SimulationSettings;

/// Simulation control file name.
pub const SIMULATION_INPUT: &str = "simulation_input.dat";
/// Lattice file name.
pub const LATTICE_INPUT: &str = "lattice_input.dat";
/// Energetics file name.
pub const ENERGETICS_INPUT: &str = "energetics_input.dat";
/// Mechanism file name.
pub const MECHANISM_INPUT: &str = "mechanism_input.dat";

fn line(out: &mut String, key: &str, value: impl std::fmt::Display) {
    // Writing into a String cannot fail.
    let _ = writeln!(out, "{key:<28}{value}");
}

fn join<T: ToString>(values: impl IntoIterator<Item = T>) -> String {
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("  ")
}

/// Renders `simulation_input.dat` for the given settings and model.
///
/// Gas species without an explicit molar fraction are written as zero.
pub fn render_simulation_input(
    settings: &SimulationSettings,
    model: &dyn SurfaceModel,
) -> Result<String, KinError> {
    let gas = model.gas_species();
    let surface = model.surface_species();
    for species in settings.molar_fractions.keys() {
        if !gas.iter().any(|g| &g.name == species) {
            return Err(KinError::Config(
                ErrorInfo::new("molar-fraction-species", "molar fraction for unknown gas species")
                    .with_context("species", species.clone()),
            ));
        }
    }

    let mut out = String::new();
    line(&mut out, "random_seed", settings.random_seed);
    line(&mut out, "temperature", settings.temperature);
    line(&mut out, "pressure", settings.pressure);
    out.push('\n');
    line(&mut out, "n_gas_species", gas.len());
    line(&mut out, "gas_specs_names", join(gas.iter().map(|g| &g.name)));
    line(&mut out, "gas_energies", join(gas.iter().map(|g| g.energy)));
    line(
        &mut out,
        "gas_molec_weights",
        join(gas.iter().map(|g| g.molecular_weight)),
    );
    line(
        &mut out,
        "gas_molar_fracs",
        join(
            gas.iter()
                .map(|g| settings.molar_fractions.get(&g.name).copied().unwrap_or(0.0)),
        ),
    );
    out.push('\n');
    line(&mut out, "n_surf_species", surface.len());
    line(&mut out, "surf_specs_names", join(surface.iter().map(|s| &s.name)));
    line(&mut out, "surf_specs_dent", join(surface.iter().map(|s| s.denticity)));
    out.push('\n');
    line(&mut out, "snapshots", settings.sampling.snapshots);
    line(
        &mut out,
        "process_statistics",
        settings.sampling.process_statistics,
    );
    line(&mut out, "species_numbers", settings.sampling.species_numbers);
    line(&mut out, "event_report", "off");
    let term = &settings.termination;
    match term.max_steps {
        Some(steps) => line(&mut out, "max_steps", steps),
        None => line(&mut out, "max_steps", "infinity"),
    }
    if let Some(max_time) = term.max_time {
        line(&mut out, "max_time", max_time);
    }
    if let Some(wall_time) = term.wall_time {
        line(&mut out, "wall_time", wall_time);
    }
    out.push('\n');
    out.push_str("finish\n");
    Ok(out)
}

/// Writes the four engine input files into `dir`.
pub fn write_input_bundle(
    dir: &Path,
    settings: &SimulationSettings,
    model: &dyn SurfaceModel,
    scaling: &PrefactorScaling,
) -> Result<(), KinError> {
    fs::create_dir_all(dir).map_err(|err| KinError::io("workdir_create", dir, err))?;
    let files = [
        (SIMULATION_INPUT, render_simulation_input(settings, model)?),
        (LATTICE_INPUT, model.render_lattice()),
        (ENERGETICS_INPUT, model.render_energetics()),
        (MECHANISM_INPUT, model.render_mechanism(scaling)),
    ];
    for (name, contents) in files {
        let path = dir.join(name);
        fs::write(&path, contents).map_err(|err| KinError::io("input_write", &path, err))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GasSpecies, StaticModel, SurfaceSpecies};
    use crate::settings::Cadence;

    fn model() -> StaticModel {
        StaticModel {
            gas: vec![
                GasSpecies {
                    name: "CO".into(),
                    energy: 0.0,
                    molecular_weight: 28.0,
                },
                GasSpecies {
                    name: "O2".into(),
                    energy: 0.0,
                    molecular_weight: 32.0,
                },
            ],
            surface: vec![SurfaceSpecies {
                name: "CO*".into(),
                denticity: 1,
            }],
            lattice: "lattice".into(),
            energetics: "energetics".into(),
            mechanism: "mechanism".into(),
        }
    }

    #[test]
    fn renders_cadences_and_termination() {
        let mut settings = SimulationSettings::new(500.0, 1.0);
        settings.molar_fractions.insert("CO".into(), 0.45);
        settings.sampling.species_numbers = Cadence::Logtime {
            start: 1e-6,
            ratio: 1.5,
        };
        settings.termination.max_time = Some(25.0);
        let text = render_simulation_input(&settings, &model()).unwrap();
        assert!(text.contains("gas_specs_names             CO  O2\n"));
        assert!(text.contains("gas_molar_fracs             0.45  0\n"));
        assert!(text.contains("species_numbers             on logtime 1e-6 1.5\n"));
        assert!(text.contains("snapshots                   off\n"));
        assert!(text.contains("max_steps                   infinity\n"));
        assert!(text.contains("max_time                    25\n"));
        assert!(!text.contains("wall_time"));
        assert!(text.trim_end().ends_with("finish"));
    }

    #[test]
    fn unknown_fraction_species_is_rejected() {
        let mut settings = SimulationSettings::new(500.0, 1.0);
        settings.molar_fractions.insert("N2".into(), 0.1);
        let err = render_simulation_input(&settings, &model()).unwrap_err();
        assert_eq!(err.info().code, "molar-fraction-species");
    }
}
