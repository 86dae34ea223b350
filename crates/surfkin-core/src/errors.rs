//! Structured error types shared across surfkin crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`KinError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (parameter names, paths, run ids).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

/// Canonical error type for surfkin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum KinError {
    /// A derived parameter references an unbound or later-declared parameter,
    /// or the parameter set itself is inconsistent.
    #[error("parameter dependency error: {0}")]
    ParameterDependency(ErrorInfo),
    /// The simulation engine executable cannot be located or launched.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(ErrorInfo),
    /// The engine ran but did not produce a usable result.
    #[error("engine error: {0}")]
    Engine(ErrorInfo),
    /// Every replica in a group failed.
    #[error("replica failure: {0}")]
    ReplicaFailure(ErrorInfo),
    /// Invalid configuration or overlay target.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Filesystem errors.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl KinError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            KinError::ParameterDependency(info)
            | KinError::EngineUnavailable(info)
            | KinError::Engine(info)
            | KinError::ReplicaFailure(info)
            | KinError::Config(info)
            | KinError::Io(info)
            | KinError::Serde(info) => info,
        }
    }

    /// True when the error signals a missing or unlaunchable engine rather
    /// than a model or algorithm problem.
    pub fn is_engine_unavailable(&self) -> bool {
        matches!(self, KinError::EngineUnavailable(_))
    }

    /// Wraps a filesystem error with the offending path.
    pub fn io(code: &str, path: impl AsRef<std::path::Path>, err: impl ToString) -> Self {
        KinError::Io(
            ErrorInfo::new(code, err.to_string())
                .with_context("path", path.as_ref().display().to_string()),
        )
    }

    /// Shorthand for a configuration error.
    pub fn config(code: &str, message: impl Into<String>) -> Self {
        KinError::Config(ErrorInfo::new(code, message))
    }
}
