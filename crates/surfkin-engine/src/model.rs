use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Multiplier applied to each named step's pre-exponential factor.
///
/// Steps absent from the map keep their original prefactor.
pub type PrefactorScaling = BTreeMap<String, f64>;

/// Gas-phase species known to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasSpecies {
    /// Species name as it appears in engine outputs.
    pub name: String,
    /// Gas-phase formation energy in eV.
    pub energy: f64,
    /// Molecular weight in amu.
    pub molecular_weight: f64,
}

/// Adsorbed species known to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSpecies {
    /// Species name, conventionally suffixed with `*`.
    pub name: String,
    /// Number of sites the species occupies.
    pub denticity: u32,
}

/// Chemical model of the catalytic surface.
///
/// Implementations render the lattice, energetics and mechanism inputs the
/// engine reads. The mechanism rendering receives the prefactor scaling so
/// that partial-equilibrium steps can be slowed down without touching the
/// rest of the model.
pub trait SurfaceModel: Send + Sync {
    /// Gas species in engine order.
    fn gas_species(&self) -> Vec<GasSpecies>;
    /// Surface species in engine order.
    fn surface_species(&self) -> Vec<SurfaceSpecies>;
    /// Names of reversible elementary steps. The engine reports them in
    /// process statistics as `<name>_fwd` and `<name>_rev`.
    fn reversible_steps(&self) -> Vec<String>;
    /// Lattice input text.
    fn render_lattice(&self) -> String;
    /// Cluster energetics input text.
    fn render_energetics(&self) -> String;
    /// Mechanism input text with `scaling` applied to the step prefactors.
    fn render_mechanism(&self, scaling: &PrefactorScaling) -> String;
}

/// Model backed by pre-rendered input text.
///
/// Scaling is applied to the mechanism by rewriting the `pre_expon` line of
/// each scaled step block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticModel {
    /// Gas species.
    pub gas: Vec<GasSpecies>,
    /// Surface species.
    pub surface: Vec<SurfaceSpecies>,
    /// Lattice input text.
    pub lattice: String,
    /// Energetics input text.
    pub energetics: String,
    /// Mechanism input text.
    pub mechanism: String,
}

impl SurfaceModel for StaticModel {
    fn gas_species(&self) -> Vec<GasSpecies> {
        self.gas.clone()
    }

    fn surface_species(&self) -> Vec<SurfaceSpecies> {
        self.surface.clone()
    }

    fn reversible_steps(&self) -> Vec<String> {
        self.mechanism
            .lines()
            .filter_map(|line| {
                let mut tokens = line.split_whitespace();
                match (tokens.next(), tokens.next()) {
                    (Some("reversible_step"), Some(name)) => Some(name.to_string()),
                    _ => None,
                }
            })
            .collect()
    }

    fn render_lattice(&self) -> String {
        self.lattice.clone()
    }

    fn render_energetics(&self) -> String {
        self.energetics.clone()
    }

    fn render_mechanism(&self, scaling: &PrefactorScaling) -> String {
        if scaling.is_empty() {
            return self.mechanism.clone();
        }
        let mut current: Option<&str> = None;
        let mut out = String::with_capacity(self.mechanism.len());
        for line in self.mechanism.lines() {
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("reversible_step") | Some("step") => current = tokens.next(),
                Some("end_reversible_step") | Some("end_step") => current = None,
                Some("pre_expon") => {
                    let factor = current.and_then(|step| scaling.get(step));
                    let value = tokens.next().and_then(|v| v.parse::<f64>().ok());
                    if let (Some(factor), Some(value)) = (factor, value) {
                        let indent = &line[..line.len() - line.trim_start().len()];
                        out.push_str(&format!("{indent}pre_expon  {:.6e}\n", value * factor));
                        continue;
                    }
                }
                _ => {}
            }
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}
