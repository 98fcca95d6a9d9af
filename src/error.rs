//! Error types shared by the engine, the catalog and the request contract.
//!
//! User-correctable input problems are plain data ([`FieldError`]) and are
//! always reported, never raised. Developer faults in a formula table are
//! [`ConfigurationError`]s and surface when the table is loaded.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A per-variable input problem (missing value, non-numeric text, out of range).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub variable: String,
    pub message: String,
}

impl FieldError {
    pub fn new(variable: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.variable, self.message)
    }
}

/// A formula table that cannot be trusted to evaluate correctly.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// One or more structural problems in a single model definition
    #[error("model '{model}' is misconfigured: {}", .problems.join("; "))]
    InvalidSpec { model: String, problems: Vec<String> },

    /// Two models (possibly from different catalog files) share an id
    #[error("duplicate model id '{0}'")]
    DuplicateModel(String),

    /// A staged pair referencing unknown models or an impossible gate
    #[error("staged model '{staged}': {problem}")]
    InvalidStaged { staged: String, problem: String },

    /// No threshold rule matched; exhaustiveness should rule this out at load time
    #[error("no threshold rule matches value {value}")]
    NoMatchingRule { value: f64 },
}
