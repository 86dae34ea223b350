use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use surfkin_core::errors::{ErrorInfo, KinError};

use crate::generator::{Enumeration, GridIndex, Strategy};
use crate::value::{Bindings, Value};

/// Function computing a derived parameter from the parameters bound before it.
pub type DerivedFn = Arc<dyn Fn(&Bindings) -> Result<Value, KinError> + Send + Sync>;

/// Source of a parameter's values.
#[derive(Clone)]
pub enum ParameterValues {
    /// Explicit sequence of values enumerated by the generator.
    Literal(Vec<Value>),
    /// Value computed per overlay from earlier parameters.
    Derived {
        /// Names the function reads, checked against declaration order.
        depends_on: Vec<String>,
        /// The function itself.
        function: DerivedFn,
    },
}

impl fmt::Debug for ParameterValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValues::Literal(values) => f.debug_tuple("Literal").field(values).finish(),
            ParameterValues::Derived { depends_on, .. } => f
                .debug_struct("Derived")
                .field("depends_on", depends_on)
                .finish_non_exhaustive(),
        }
    }
}

/// Named parameter mapped onto a configuration field.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Name used by derived parameters and reports.
    pub name: String,
    /// Configuration field the value is written to.
    pub target_field: String,
    /// Literal values or derivation.
    pub values: ParameterValues,
}

impl Parameter {
    /// True for literal parameters.
    pub fn is_literal(&self) -> bool {
        matches!(self.values, ParameterValues::Literal(_))
    }
}

/// One field override within an [`Overlay`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayEntry {
    /// Parameter name that produced the value.
    pub parameter: String,
    /// Target configuration field.
    pub field: String,
    /// Concrete value.
    pub value: Value,
}

/// Sparse, immutable set of field overrides for one generated point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Overlay {
    entries: Vec<OverlayEntry>,
}

impl Overlay {
    /// Builds an overlay from explicit entries.
    pub fn new(entries: Vec<OverlayEntry>) -> Self {
        Self { entries }
    }

    /// Builds an overlay whose parameter names equal the field names.
    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let entries = fields
            .into_iter()
            .map(|(field, value)| {
                let field = field.into();
                OverlayEntry {
                    parameter: field.clone(),
                    field,
                    value: value.into(),
                }
            })
            .collect();
        Self { entries }
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> &[OverlayEntry] {
        &self.entries
    }

    /// True when the overlay changes nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value written to `field`, the last entry winning.
    pub fn field(&self, field: &str) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.field == field)
            .map(|entry| &entry.value)
    }

    /// Value bound to the parameter named `name`.
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.parameter == name)
            .map(|entry| &entry.value)
    }

    /// Parameter name to value view used in reports.
    pub fn parameters(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .map(|entry| (entry.parameter.clone(), entry.value.clone()))
            .collect()
    }

    /// New overlay with `top` applied after `self`.
    pub fn layered(&self, top: &Overlay) -> Overlay {
        let mut entries = self.entries.clone();
        entries.extend(top.entries.iter().cloned());
        Overlay { entries }
    }
}

/// Ordered parameter collection plus the strategy that combines it.
///
/// Declaration order is both display order and dependency-resolution order.
#[derive(Clone)]
pub struct ParameterSet {
    parameters: Vec<Parameter>,
    enumeration: Arc<dyn Enumeration>,
}

impl fmt::Debug for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterSet")
            .field("strategy", &self.enumeration.label())
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self::new(Strategy::default())
    }
}

impl ParameterSet {
    /// Empty set using one of the built-in strategies.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            parameters: Vec::new(),
            enumeration: Arc::new(StrategyEnumeration(strategy)),
        }
    }

    /// Empty set using a caller-supplied enumeration.
    pub fn with_enumeration(enumeration: Arc<dyn Enumeration>) -> Self {
        Self {
            parameters: Vec::new(),
            enumeration,
        }
    }

    /// Switches to another built-in strategy, keeping the parameters.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.enumeration = Arc::new(StrategyEnumeration(strategy));
        self
    }

    /// Label of the combination strategy.
    pub fn strategy_label(&self) -> &'static str {
        self.enumeration.label()
    }

    /// Parameters in declaration order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Appends a parameter. Names must be unique and derived parameters may
    /// only declare dependencies on parameters already in the set.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        target_field: impl Into<String>,
        values: ParameterValues,
    ) -> Result<&mut Self, KinError> {
        let name = name.into();
        if self.parameters.iter().any(|param| param.name == name) {
            return Err(KinError::ParameterDependency(
                ErrorInfo::new("param-duplicate", "parameter declared twice")
                    .with_context("parameter", name),
            ));
        }
        if let ParameterValues::Derived { depends_on, .. } = &values {
            for dependency in depends_on {
                if !self.parameters.iter().any(|param| &param.name == dependency) {
                    return Err(KinError::ParameterDependency(
                        ErrorInfo::new(
                            "param-unbound",
                            "derived parameter depends on a parameter not declared before it",
                        )
                        .with_context("parameter", name)
                        .with_context("dependency", dependency.clone()),
                    ));
                }
            }
        }
        self.parameters.push(Parameter {
            name,
            target_field: target_field.into(),
            values,
        });
        Ok(self)
    }

    /// Appends a literal parameter.
    pub fn add_literal<I, V>(
        &mut self,
        name: impl Into<String>,
        target_field: impl Into<String>,
        values: I,
    ) -> Result<&mut Self, KinError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.add(name, target_field, ParameterValues::Literal(values))
    }

    /// Appends a derived parameter computed from earlier parameters.
    pub fn add_derived<F>(
        &mut self,
        name: impl Into<String>,
        target_field: impl Into<String>,
        depends_on: &[&str],
        function: F,
    ) -> Result<&mut Self, KinError>
    where
        F: Fn(&Bindings) -> Result<Value, KinError> + Send + Sync + 'static,
    {
        self.add(
            name,
            target_field,
            ParameterValues::Derived {
                depends_on: depends_on.iter().map(|dep| dep.to_string()).collect(),
                function: Arc::new(function),
            },
        )
    }

    fn literal_lengths(&self) -> Vec<usize> {
        self.parameters
            .iter()
            .filter_map(|param| match &param.values {
                ParameterValues::Literal(values) => Some(values.len()),
                ParameterValues::Derived { .. } => None,
            })
            .collect()
    }

    /// Shape of the generated index space.
    pub fn shape(&self) -> Vec<usize> {
        self.enumeration.shape(&self.literal_lengths())
    }

    /// Expands the set into indexed overlays.
    ///
    /// Literal values come from the enumeration; derived parameters are then
    /// evaluated in declaration order, each seeing only the parameters bound
    /// before it. Calling this twice on an unchanged set yields identical
    /// output.
    pub fn generate(&self) -> Result<Vec<(GridIndex, Overlay)>, KinError> {
        let points = self.enumeration.enumerate(&self.literal_lengths())?;
        let names: Vec<String> = self.parameters.iter().map(|p| p.name.clone()).collect();
        let mut overlays = Vec::with_capacity(points.len());
        for point in points {
            let mut bindings = Bindings::new(names.clone());
            let mut literal_slot = 0usize;
            for param in &self.parameters {
                let value = match &param.values {
                    ParameterValues::Literal(values) => {
                        let position = point.positions.get(literal_slot).copied().ok_or_else(|| {
                            KinError::ParameterDependency(
                                ErrorInfo::new(
                                    "param-enumeration-shape",
                                    "enumeration returned fewer positions than literal parameters",
                                )
                                .with_context("parameter", param.name.clone()),
                            )
                        })?;
                        literal_slot += 1;
                        values.get(position).cloned().ok_or_else(|| {
                            KinError::ParameterDependency(
                                ErrorInfo::new(
                                    "param-enumeration-range",
                                    "enumeration position exceeds the parameter's values",
                                )
                                .with_context("parameter", param.name.clone())
                                .with_context("position", position.to_string()),
                            )
                        })?
                    }
                    ParameterValues::Derived { function, .. } => {
                        function(&bindings).map_err(|err| match err {
                            KinError::ParameterDependency(info) => KinError::ParameterDependency(
                                info.with_context("derived", param.name.clone()),
                            ),
                            other => other,
                        })?
                    }
                };
                bindings.bind(&param.name, value);
            }
            let entries = self
                .parameters
                .iter()
                .zip(bindings.into_entries())
                .map(|(param, (_, value))| OverlayEntry {
                    parameter: param.name.clone(),
                    field: param.target_field.clone(),
                    value,
                })
                .collect();
            overlays.push((point.index, Overlay::new(entries)));
        }
        Ok(overlays)
    }
}

struct StrategyEnumeration(Strategy);

impl Enumeration for StrategyEnumeration {
    fn label(&self) -> &'static str {
        self.0.enumeration().label()
    }

    fn enumerate(
        &self,
        lengths: &[usize],
    ) -> Result<Vec<crate::generator::EnumeratedPoint>, KinError> {
        self.0.enumeration().enumerate(lengths)
    }

    fn shape(&self, lengths: &[usize]) -> Vec<usize> {
        self.0.enumeration().shape(lengths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let mut set = ParameterSet::default();
        set.add_literal("T", "temperature", [500.0, 600.0]).unwrap();
        let err = set.add_literal("T", "pressure", [1.0, 2.0]).unwrap_err();
        assert_eq!(err.info().code, "param-duplicate");
    }

    #[test]
    fn declared_dependency_must_precede() {
        let mut set = ParameterSet::default();
        let err = set
            .add_derived("x_O2", "molar_fraction.O2", &["x_CO"], |b| {
                Ok(Value::Scalar(1.0 - b.scalar("x_CO")?))
            })
            .unwrap_err();
        assert!(matches!(err, KinError::ParameterDependency(_)));
    }

    #[test]
    fn undeclared_forward_reference_fails_at_generation() {
        let mut set = ParameterSet::default();
        set.add_derived("x_O2", "molar_fraction.O2", &[], |b| {
            Ok(Value::Scalar(1.0 - b.scalar("x_CO")?))
        })
        .unwrap();
        set.add_literal("x_CO", "molar_fraction.CO", [0.1, 0.2])
            .unwrap();
        let err = set.generate().unwrap_err();
        assert_eq!(err.info().code, "param-forward-reference");
        assert_eq!(err.info().context.get("derived").map(String::as_str), Some("x_O2"));
    }

    #[test]
    fn switching_strategy_keeps_parameters() {
        let mut set = ParameterSet::default();
        set.add_literal("T", "temperature", [500.0, 600.0]).unwrap();
        set.add_literal("p", "pressure", [1.0, 2.0, 4.0]).unwrap();
        assert!(set.generate().is_err());
        let set = set.with_strategy(Strategy::MeshGrid);
        assert_eq!(set.strategy_label(), "mesh-grid");
        assert_eq!(set.shape(), vec![2, 3]);
        assert_eq!(set.generate().unwrap().len(), 6);
    }

    #[test]
    fn layered_overlay_prefers_top() {
        let base = Overlay::from_fields([("temperature", 500.0), ("pressure", 1.0)]);
        let top = Overlay::from_fields([("temperature", 650.0)]);
        let merged = base.layered(&top);
        assert_eq!(merged.field("temperature"), Some(&Value::Scalar(650.0)));
        assert_eq!(merged.field("pressure"), Some(&Value::Scalar(1.0)));
    }
}
