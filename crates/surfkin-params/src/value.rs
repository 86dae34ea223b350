use std::fmt;

use serde::{Deserialize, Serialize};
use surfkin_core::errors::{ErrorInfo, KinError};

/// Concrete value bound to a parameter or configuration field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer value (seeds, step budgets).
    Integer(i64),
    /// Floating point value (temperatures, molar fractions, times).
    Scalar(f64),
    /// Free-form text (cadence modes, labels).
    Text(String),
    /// Vector of floats.
    Vector(Vec<f64>),
}

impl Value {
    /// Numeric view of the value, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view; floats are accepted only when they are whole numbers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Scalar(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Text view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{v}"),
            Value::Scalar(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Vector(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(" "))
            }
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Scalar(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::Vector(value)
    }
}

/// Parameters already bound for one overlay, in declaration order.
///
/// A derived parameter only ever sees the parameters declared before it.
/// Names declared after it are remembered so that a lookup can tell a
/// forward reference apart from a name that does not exist at all.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    entries: Vec<(String, Value)>,
    declared_later: Vec<String>,
}

impl Bindings {
    pub(crate) fn new(declared_later: Vec<String>) -> Self {
        Self {
            entries: Vec::new(),
            declared_later,
        }
    }

    pub(crate) fn bind(&mut self, name: &str, value: Value) {
        self.declared_later.retain(|later| later != name);
        self.entries.push((name.to_string(), value));
    }

    /// Looks up a bound parameter by name.
    pub fn get(&self, name: &str) -> Result<&Value, KinError> {
        if let Some((_, value)) = self.entries.iter().find(|(bound, _)| bound == name) {
            return Ok(value);
        }
        let info = if self.declared_later.iter().any(|later| later == name) {
            ErrorInfo::new(
                "param-forward-reference",
                "derived parameter references a parameter declared after it",
            )
            .with_hint("declare the referenced parameter first")
        } else {
            ErrorInfo::new("param-unbound", "derived parameter references an unknown parameter")
        };
        Err(KinError::ParameterDependency(
            info.with_context("parameter", name),
        ))
    }

    /// Looks up a bound parameter and requires a numeric value.
    pub fn scalar(&self, name: &str) -> Result<f64, KinError> {
        let value = self.get(name)?;
        value.as_f64().ok_or_else(|| {
            KinError::ParameterDependency(
                ErrorInfo::new("param-not-numeric", "parameter value is not numeric")
                    .with_context("parameter", name)
                    .with_context("value", value.to_string()),
            )
        })
    }

    /// Iterates bound `(name, value)` pairs in binding order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub(crate) fn into_entries(self) -> Vec<(String, Value)> {
        self.entries
    }
}
