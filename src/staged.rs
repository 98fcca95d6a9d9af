//! Two-stage models composed from two independent evaluations.
//!
//! The engine knows nothing about stages. Stage 2 receives stage 1's result
//! as an explicit argument and is only evaluated when that result carries the
//! gate label.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, FieldError};
use crate::scoring::{assess, EvaluationInput, EvaluationResult, FormulaSpec, Rejection};

/// A declared pair: `second` runs only when `first` is classified as `gate`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StagedModel {
    pub id: String,
    pub title: String,
    pub first: String,
    pub gate: String,
    pub second: String,
}

impl StagedModel {
    /// Whether stage 1's result opens the gate to stage 2
    pub fn admits(&self, first: &EvaluationResult) -> bool {
        first.model_id == self.first && first.label == self.gate
    }

    /// Check the pair against the models it names
    pub fn check(&self, first: Option<&FormulaSpec>, second: Option<&FormulaSpec>) -> Result<(), ConfigurationError> {
        let problem = |problem: String| ConfigurationError::InvalidStaged {
            staged: self.id.clone(),
            problem,
        };
        let first = first.ok_or_else(|| problem(format!("unknown first stage '{}'", self.first)))?;
        if second.is_none() {
            return Err(problem(format!("unknown second stage '{}'", self.second)));
        }
        if self.first == self.second {
            return Err(problem("first and second stage are the same model".to_string()));
        }
        if !first.thresholds.iter().any(|r| r.label == self.gate) {
            return Err(problem(format!(
                "gate '{}' is not a label of '{}'",
                self.gate, self.first
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SecondStage {
    /// Stage 1 did not open the gate
    Skipped,
    /// Gate open, but no stage 2 input was supplied
    Pending,
    Evaluated(EvaluationResult),
    Invalid(Vec<FieldError>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedOutcome {
    pub first: EvaluationResult,
    pub second: SecondStage,
}

/// Evaluate stage 2 behind an explicit stage 1 result.
pub fn continue_with(
    staged: &StagedModel,
    first: &EvaluationResult,
    second_spec: &FormulaSpec,
    second_input: Option<&EvaluationInput>,
) -> Result<SecondStage, ConfigurationError> {
    if !staged.admits(first) {
        tracing::debug!(staged = %staged.id, label = %first.label, "gate closed");
        return Ok(SecondStage::Skipped);
    }
    let Some(input) = second_input else {
        return Ok(SecondStage::Pending);
    };
    match assess(second_spec, input) {
        Ok(result) => Ok(SecondStage::Evaluated(result)),
        Err(Rejection::Invalid(errors)) => Ok(SecondStage::Invalid(errors)),
        Err(Rejection::Misconfigured(e)) => Err(e),
    }
}

/// Run both stages. Stage 1 must succeed; stage 2 follows the gate.
pub fn run(
    staged: &StagedModel,
    first_spec: &FormulaSpec,
    second_spec: &FormulaSpec,
    first_input: &EvaluationInput,
    second_input: Option<&EvaluationInput>,
) -> Result<StagedOutcome, Rejection> {
    let first = assess(first_spec, first_input)?;
    let second = continue_with(staged, &first, second_spec, second_input).map_err(Rejection::Misconfigured)?;
    Ok(StagedOutcome { first, second })
}
