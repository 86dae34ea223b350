#![deny(missing_docs)]
#![doc = "Parameter sets and overlay generation (positional zip and mesh grid) for surfkin experiments."]

/// Combination strategies and grid indices.
pub mod generator;
/// Parameters, parameter sets and overlays.
pub mod parameter;
/// YAML plan loading for literal parameter sets.
pub mod plan;
/// Parameter values and bindings seen by derived parameters.
pub mod value;

pub use generator::{EnumeratedPoint, Enumeration, GridIndex, MeshGrid, Strategy, Zip};
pub use parameter::{
    DerivedFn, Overlay, OverlayEntry, Parameter, ParameterSet, ParameterValues,
};
pub use plan::{load_parameter_plan, LiteralSpec, ParameterPlan};
pub use value::{Bindings, Value};
