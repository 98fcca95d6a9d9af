use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Equal,
}

impl Comparator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::LessThan => "<",
            Comparator::LessEqual => "<=",
            Comparator::GreaterThan => ">",
            Comparator::GreaterEqual => ">=",
            Comparator::Equal => "=",
        }
    }

    /// Whether the boundary value itself satisfies the comparison
    pub fn is_inclusive(&self) -> bool {
        matches!(
            self,
            Comparator::LessEqual | Comparator::GreaterEqual | Comparator::Equal
        )
    }
}

/// A single comparison against a fixed cutoff, written as `"<30"`, `">= 0.5"`
/// or `"=2"`. A bare number means equality.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    pub op: Comparator,
    pub cutoff: f64,
}

impl Condition {
    pub fn new(op: Comparator, cutoff: f64) -> Self {
        Self { op, cutoff }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (op, rest) = if let Some(val) = s.strip_prefix(">=").or_else(|| s.strip_prefix('≥')) {
            (Comparator::GreaterEqual, val)
        } else if let Some(val) = s.strip_prefix("<=").or_else(|| s.strip_prefix('≤')) {
            (Comparator::LessEqual, val)
        } else if let Some(val) = s.strip_prefix('>') {
            (Comparator::GreaterThan, val)
        } else if let Some(val) = s.strip_prefix('<') {
            (Comparator::LessThan, val)
        } else if let Some(val) = s.strip_prefix("==").or_else(|| s.strip_prefix('=')) {
            (Comparator::Equal, val)
        } else {
            (Comparator::Equal, s)
        };

        let rest = rest.trim();
        if rest.is_empty() {
            bail!("missing cutoff in condition '{}'", s);
        }
        let cutoff: f64 = rest.parse()?;
        if !cutoff.is_finite() {
            bail!("cutoff must be finite: {}", s);
        }
        Ok(Condition { op, cutoff })
    }

    pub fn matches(&self, value: f64) -> bool {
        match self.op {
            Comparator::LessThan => value < self.cutoff,
            Comparator::LessEqual => value <= self.cutoff,
            Comparator::GreaterThan => value > self.cutoff,
            Comparator::GreaterEqual => value >= self.cutoff,
            Comparator::Equal => value == self.cutoff,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.symbol(), self.cutoff)
    }
}

impl TryFrom<String> for Condition {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Condition::parse(&value).map_err(|e| format!("invalid condition '{}': {}", value, e))
    }
}

impl From<Condition> for String {
    fn from(value: Condition) -> Self {
        value.to_string()
    }
}
