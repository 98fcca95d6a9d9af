pub mod coverage;
pub mod engine;
pub mod input;
pub mod rules;
pub mod spec;
pub mod validation;

pub use engine::{assess, classify, contributions, evaluate, logistic, Contribution, EvaluationResult, Rejection};
pub use input::{EvaluationInput, InputValue, ValidatedInput};
pub use rules::{Comparator, Condition};
pub use spec::*;
pub use validation::{validate, validate_spec};
