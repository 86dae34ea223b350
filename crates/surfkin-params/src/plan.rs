use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use surfkin_core::errors::KinError;
use surfkin_core::serde::{from_yaml_slice, to_yaml_string};

use crate::generator::Strategy;
use crate::parameter::ParameterSet;
use crate::value::Value;

/// Literal parameter as written in a YAML plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteralSpec {
    /// Parameter name.
    pub name: String,
    /// Target configuration field.
    pub field: String,
    /// Values enumerated by the generator.
    pub values: Vec<Value>,
}

/// Serializable description of a literal-only parameter set.
///
/// Derived parameters are code and are appended after loading with
/// [`ParameterSet::add_derived`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterPlan {
    /// Combination strategy.
    #[serde(default)]
    pub strategy: Strategy,
    /// Parameters in declaration order.
    pub parameters: Vec<LiteralSpec>,
}

impl ParameterPlan {
    /// Builds the runtime parameter set.
    pub fn to_parameter_set(&self) -> Result<ParameterSet, KinError> {
        let mut set = ParameterSet::new(self.strategy);
        for spec in &self.parameters {
            set.add_literal(spec.name.clone(), spec.field.clone(), spec.values.clone())?;
        }
        Ok(set)
    }

    /// Produces a YAML representation of the plan.
    pub fn to_yaml_string(&self) -> Result<String, KinError> {
        to_yaml_string(self)
    }
}

/// Loads a parameter plan from a YAML file.
pub fn load_parameter_plan<P: AsRef<Path>>(path: P) -> Result<ParameterPlan, KinError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|err| KinError::io("plan_read", path, err))?;
    from_yaml_slice(&bytes)
}
