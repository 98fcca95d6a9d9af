//! JSON request/response contract, independent of any front end.
//!
//! ```json
//! { "model_id": "macrosomia", "values": { "ast": 25, "hdl": "1,2", ... } }
//! ```

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::FieldError;
use crate::scoring::{assess, Contribution, EvaluationInput, EvaluationResult, Rejection};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub model_id: String,
    #[serde(default)]
    pub values: EvaluationInput,
    /// Include the per-term breakdown in the response
    #[serde(default)]
    pub explain: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvaluationResponse {
    Success(ScoreReport),
    Failure { errors: Vec<FieldError> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contributions: Option<Vec<Contribution>>,
}

impl ScoreReport {
    pub fn from_result(result: &EvaluationResult, explain: bool) -> Self {
        Self {
            score: result.score,
            probability: result.probability,
            label: result.label.clone(),
            contributions: explain.then(|| result.contributions.clone()),
        }
    }
}

impl EvaluationResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, EvaluationResponse::Success(_))
    }
}

/// Answer one request. Configuration faults cannot occur on a loaded
/// catalog; should one slip through it is reported against `model_id`.
pub fn respond(catalog: &Catalog, request: &EvaluationRequest) -> EvaluationResponse {
    let Some(spec) = catalog.get(&request.model_id) else {
        return EvaluationResponse::Failure {
            errors: vec![FieldError::new(
                "model_id",
                format!("unknown model '{}'", request.model_id),
            )],
        };
    };

    match assess(spec, &request.values) {
        Ok(result) => EvaluationResponse::Success(ScoreReport::from_result(&result, request.explain)),
        Err(Rejection::Invalid(errors)) => EvaluationResponse::Failure { errors },
        Err(Rejection::Misconfigured(e)) => {
            tracing::error!(model = %spec.id, error = %e, "model misconfigured");
            EvaluationResponse::Failure {
                errors: vec![FieldError::new("model_id", e.to_string())],
            }
        }
    }
}
