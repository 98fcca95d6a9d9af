use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::rules::Condition;

/// One clinical model: its input slots, weights, link function and
/// classification bands.
///
/// Example YAML:
/// ```yaml
/// id: macrosomia
/// title: Fetal macrosomia after ART and GDM
/// variables:
///   - { name: ast, label: "AST, U/L", kind: continuous, min: 0, max: 1000, default: 25 }
///   - name: support
///     label: Luteal support duration
///     kind: ordinal
///     codes:
///       - { code: 0, label: "up to 12 weeks" }
///       - { code: 1, label: "over 12 weeks" }
/// coefficients:
///   ast: 0.168
///   support: 13.215
/// intercept: -10.050
/// thresholds:
///   - { when: "> 0", label: high macrosomia risk, severity: high }
///   - { when: "<= 0", label: no macrosomia risk, severity: low }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FormulaSpec {
    pub id: String,

    pub title: String,

    /// Where the coefficients come from; distinct documented variants of the
    /// same nominal model carry distinct ids and say so here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Symbol used for the score in the published formula (D, M, WI, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,

    pub variables: Vec<VariableSpec>,

    /// Engineered terms computed before the weighted sum, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derived: Vec<DerivedFeature>,

    /// Term name (variable or derived feature) to weight
    pub coefficients: IndexMap<String, f64>,

    #[serde(default)]
    pub intercept: f64,

    #[serde(default)]
    pub link: Link,

    /// Evaluated in order, first match wins. Logistic models are classified
    /// on the probability, identity models on the raw score.
    pub thresholds: Vec<ThresholdRule>,
}

impl FormulaSpec {
    pub fn variable(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn score_symbol(&self) -> &str {
        self.symbol.as_deref().unwrap_or("z")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VariableSpec {
    pub name: String,

    /// Question shown to the user; falls back to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    pub kind: VariableKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Enumerated codes for `ordinal` variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<OrdinalCode>,

    /// Suggested value for prompts; never applied implicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl VariableSpec {
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Declared value range. Binary is `[0, 1]`, ordinal spans its codes.
    pub fn bounds(&self) -> (f64, f64) {
        match self.kind {
            VariableKind::Binary => (0.0, 1.0),
            VariableKind::Ordinal => {
                let lo = self.codes.iter().map(|c| c.code as f64).fold(f64::INFINITY, f64::min);
                let hi = self.codes.iter().map(|c| c.code as f64).fold(f64::NEG_INFINITY, f64::max);
                (lo, hi)
            }
            VariableKind::Continuous | VariableKind::Count => (
                self.min.unwrap_or(f64::NEG_INFINITY),
                self.max.unwrap_or(f64::INFINITY),
            ),
        }
    }

    pub fn code(&self, code: i64) -> Option<&OrdinalCode> {
        self.codes.iter().find(|c| c.code == code)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    /// Real-valued measurement
    Continuous,
    /// Whole number (scores, parity, counts)
    Count,
    /// Yes/no, coded 1/0
    Binary,
    /// Categorical answer with an ordinal code
    Ordinal,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OrdinalCode {
    pub code: i64,
    pub label: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    #[default]
    Identity,
    Logistic,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ThresholdRule {
    pub when: Condition,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Moderate,
    High,
}

/// A term computed from variables or earlier derived features.
///
/// Arity by operator: `difference` takes exactly two inputs (first minus
/// second), `min`/`max` two or more, `indicator` one input plus `rule`,
/// `bmi` two inputs (weight in kg, height in cm).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DerivedFeature {
    pub name: String,
    pub op: DerivedOp,
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<Condition>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DerivedOp {
    Difference,
    Min,
    Max,
    Indicator,
    Bmi,
}

impl DerivedOp {
    pub fn name(&self) -> &'static str {
        match self {
            DerivedOp::Difference => "difference",
            DerivedOp::Min => "min",
            DerivedOp::Max => "max",
            DerivedOp::Indicator => "indicator",
            DerivedOp::Bmi => "bmi",
        }
    }
}
