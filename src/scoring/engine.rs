use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::input::{EvaluationInput, ValidatedInput};
use super::rules::Condition;
use super::spec::{DerivedOp, FormulaSpec, Link, Severity, ThresholdRule};
use super::validation::validate;
use crate::error::{ConfigurationError, FieldError};

/// Largest f64 strictly below 1.0
const BELOW_ONE: f64 = 1.0 - f64::EPSILON / 2.0;

/// One term of the weighted sum, for explaining a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub variable: String,
    pub weight: f64,
    pub value: f64,
    pub product: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub model_id: String,
    /// Raw weighted sum `z`
    pub score: f64,
    /// `1 / (1 + e^-z)` for logistic models
    pub probability: Option<f64>,
    pub label: String,
    pub severity: Option<Severity>,
    /// Condition of the band that matched
    pub matched: Condition,
    pub intercept: f64,
    pub contributions: Vec<Contribution>,
}

impl EvaluationResult {
    /// The value the thresholds were compared against
    pub fn classified_value(&self) -> f64 {
        self.probability.unwrap_or(self.score)
    }
}

/// Why an assessment produced no result
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Invalid(Vec<FieldError>),
    Misconfigured(ConfigurationError),
}

/// Logistic link, numerically stable and kept strictly inside (0, 1) for
/// finite input.
pub fn logistic(z: f64) -> f64 {
    let p = if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    };
    p.clamp(f64::MIN_POSITIVE, BELOW_ONE)
}

/// First rule whose condition holds for `value`.
pub fn classify(value: f64, thresholds: &[ThresholdRule]) -> Result<&ThresholdRule, ConfigurationError> {
    thresholds
        .iter()
        .find(|rule| rule.when.matches(value))
        .ok_or(ConfigurationError::NoMatchingRule { value })
}

/// Values of every variable and derived feature, in declaration order.
fn term_values(spec: &FormulaSpec, input: &ValidatedInput) -> IndexMap<String, f64> {
    let mut terms: IndexMap<String, f64> = input.iter().map(|(k, v)| (k.to_string(), v)).collect();

    for feature in &spec.derived {
        let args: Vec<f64> = feature
            .inputs
            .iter()
            .map(|name| terms.get(name).copied().unwrap_or(f64::NAN))
            .collect();
        let value = match feature.op {
            DerivedOp::Difference => match args.as_slice() {
                [a, b] => a - b,
                _ => f64::NAN,
            },
            DerivedOp::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            DerivedOp::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            DerivedOp::Indicator => match (args.first(), &feature.rule) {
                (Some(v), Some(rule)) => {
                    if rule.matches(*v) {
                        1.0
                    } else {
                        0.0
                    }
                }
                _ => f64::NAN,
            },
            DerivedOp::Bmi => match args.as_slice() {
                [weight, height] => {
                    let meters = height / 100.0;
                    weight / (meters * meters)
                }
                _ => f64::NAN,
            },
        };
        terms.insert(feature.name.clone(), value);
    }
    terms
}

/// Per-term breakdown of the weighted sum, in coefficient order.
/// The products plus the intercept add up to the score.
pub fn contributions(spec: &FormulaSpec, input: &ValidatedInput) -> Vec<Contribution> {
    let terms = term_values(spec, input);
    spec.coefficients
        .iter()
        .map(|(name, weight)| {
            let value = terms.get(name).copied().unwrap_or(f64::NAN);
            Contribution {
                variable: name.clone(),
                weight: *weight,
                value,
                product: weight * value,
            }
        })
        .collect()
}

/// Evaluate a validated input. The only failure is a threshold table that
/// does not cover the computed value, which load-time checks rule out.
pub fn evaluate(spec: &FormulaSpec, input: &ValidatedInput) -> Result<EvaluationResult, ConfigurationError> {
    let contributions = contributions(spec, input);
    let score = contributions.iter().map(|c| c.product).sum::<f64>() + spec.intercept;

    let probability = match spec.link {
        Link::Identity => None,
        Link::Logistic => Some(logistic(score)),
    };

    let rule = classify(probability.unwrap_or(score), &spec.thresholds)?;

    tracing::debug!(
        model = %spec.id,
        score,
        probability = ?probability,
        label = %rule.label,
        "evaluated"
    );

    Ok(EvaluationResult {
        model_id: spec.id.clone(),
        score,
        probability,
        label: rule.label.clone(),
        severity: rule.severity,
        matched: rule.when,
        intercept: spec.intercept,
        contributions,
    })
}

/// Validate then evaluate, the single call front ends make.
pub fn assess(spec: &FormulaSpec, input: &EvaluationInput) -> Result<EvaluationResult, Rejection> {
    let validated = validate(spec, input).map_err(Rejection::Invalid)?;
    evaluate(spec, &validated).map_err(Rejection::Misconfigured)
}
