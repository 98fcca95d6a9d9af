use indexmap::IndexMap;
use std::collections::HashSet;

use super::coverage::{classified_range, find_gap};
use super::engine::contributions;
use super::input::{coerce_value, EvaluationInput, ValidatedInput};
use super::rules::Comparator;
use super::spec::{DerivedOp, FormulaSpec, Link, VariableKind, VariableSpec};
use crate::error::FieldError;

/// Validate user input against a model.
/// Returns all field errors at once (not just the first).
pub fn validate(spec: &FormulaSpec, input: &EvaluationInput) -> Result<ValidatedInput, Vec<FieldError>> {
    let mut values = IndexMap::with_capacity(spec.variables.len());
    let mut errors = Vec::new();

    for var in &spec.variables {
        match input.get(&var.name) {
            None => errors.push(FieldError::new(&var.name, "value is missing")),
            Some(raw) => match coerce_value(var, raw) {
                Ok(value) => {
                    values.insert(var.name.clone(), value);
                }
                Err(message) => errors.push(FieldError::new(&var.name, message)),
            },
        }
    }

    for name in input.names() {
        if spec.variable(name).is_none() {
            tracing::warn!(model = %spec.id, variable = name, "ignoring unknown input");
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    let validated = ValidatedInput::from_values(values);
    check_finite_score(spec, &validated)?;
    Ok(validated)
}

fn score_of(spec: &FormulaSpec, input: &ValidatedInput) -> f64 {
    contributions(spec, input).iter().map(|c| c.product).sum::<f64>() + spec.intercept
}

/// Values inside an open range can still overflow the weighted sum. Blames
/// the open-range variables that overflow it on their own, or every nonzero
/// open-range variable when only their combination does.
fn check_finite_score(spec: &FormulaSpec, input: &ValidatedInput) -> Result<(), Vec<FieldError>> {
    if score_of(spec, input).is_finite() {
        return Ok(());
    }

    let open: Vec<&VariableSpec> = spec
        .variables
        .iter()
        .filter(|v| {
            let (lo, hi) = v.bounds();
            !lo.is_finite() || !hi.is_finite()
        })
        .collect();

    // Score with every other open-range variable at its value nearest zero
    let alone = |kept: &VariableSpec| {
        let values = input
            .iter()
            .map(|(name, value)| match open.iter().find(|v| v.name == name && v.name != kept.name) {
                Some(other) => {
                    let (lo, hi) = other.bounds();
                    (name.to_string(), 0.0f64.max(lo).min(hi))
                }
                None => (name.to_string(), value),
            })
            .collect();
        score_of(spec, &ValidatedInput::from_values(values))
    };

    let mut blamed: Vec<&VariableSpec> = open.iter().copied().filter(|v| !alone(*v).is_finite()).collect();
    if blamed.is_empty() {
        blamed = open
            .iter()
            .copied()
            .filter(|v| input.get(&v.name).is_some_and(|x| x != 0.0))
            .collect();
    }
    if blamed.is_empty() {
        blamed = spec.variables.iter().collect();
    }

    tracing::debug!(model = %spec.id, blamed = blamed.len(), "weighted sum is not finite");
    Err(blamed
        .into_iter()
        .map(|v| {
            let value = input.get(&v.name).unwrap_or(f64::NAN);
            FieldError::new(&v.name, format!("value {:e} is too large to evaluate", value))
        })
        .collect())
}

/// Validate a model definition at load time.
/// Returns all problems at once (not just the first).
pub fn validate_spec(spec: &FormulaSpec) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if spec.id.trim().is_empty() {
        errors.push("id: must not be empty".to_string());
    }

    // Variables
    let mut names: HashSet<&str> = HashSet::new();
    for (i, var) in spec.variables.iter().enumerate() {
        let at = format!("variables[{}] '{}'", i, var.name);
        if var.name.trim().is_empty() {
            errors.push(format!("variables[{}]: name must not be empty", i));
        }
        if !names.insert(var.name.as_str()) {
            errors.push(format!("{}: duplicate name", at));
        }
        for (field, bound) in [("min", var.min), ("max", var.max), ("default", var.default)] {
            if let Some(v) = bound {
                if !v.is_finite() {
                    errors.push(format!("{}.{}: must be finite", at, field));
                }
            }
        }

        match var.kind {
            VariableKind::Binary => {
                if var.min.is_some() || var.max.is_some() || !var.codes.is_empty() {
                    errors.push(format!("{}: binary variables take no range or codes", at));
                }
            }
            VariableKind::Ordinal => {
                if var.codes.is_empty() {
                    errors.push(format!("{}: ordinal variables need at least one code", at));
                }
                if var.min.is_some() || var.max.is_some() {
                    errors.push(format!("{}: ordinal variables are bounded by their codes", at));
                }
                let mut seen = HashSet::new();
                for code in &var.codes {
                    if !seen.insert(code.code) {
                        errors.push(format!("{}: duplicate code {}", at, code.code));
                    }
                }
            }
            VariableKind::Continuous | VariableKind::Count => {
                if !var.codes.is_empty() {
                    errors.push(format!("{}: codes are only valid for ordinal variables", at));
                }
                if let (Some(min), Some(max)) = (var.min, var.max) {
                    if min > max {
                        errors.push(format!("{}: min {} is greater than max {}", at, min, max));
                    }
                }
            }
        }

        if let Some(default) = var.default {
            if default.is_finite() {
                if let Err(e) = coerce_value(var, &default.into()) {
                    errors.push(format!("{}.default: {}", at, e));
                }
            }
        }
    }

    // Derived features may only use names declared before them
    let mut known: HashSet<&str> = names.clone();
    let mut consumed: HashSet<&str> = HashSet::new();
    for (i, feature) in spec.derived.iter().enumerate() {
        let at = format!("derived[{}] '{}'", i, feature.name);
        for input in &feature.inputs {
            if !known.contains(input.as_str()) {
                errors.push(format!("{}: input '{}' is not declared before it", at, input));
            }
            consumed.insert(input.as_str());
        }
        let arity_ok = match feature.op {
            DerivedOp::Difference | DerivedOp::Bmi => feature.inputs.len() == 2,
            DerivedOp::Min | DerivedOp::Max => feature.inputs.len() >= 2,
            DerivedOp::Indicator => feature.inputs.len() == 1,
        };
        if !arity_ok {
            errors.push(format!(
                "{}: wrong number of inputs ({}) for {:?}",
                at,
                feature.inputs.len(),
                feature.op
            ));
        }
        match (feature.op, &feature.rule) {
            (DerivedOp::Indicator, None) => errors.push(format!("{}: indicator needs a rule", at)),
            (DerivedOp::Indicator, Some(_)) | (_, None) => {}
            (_, Some(_)) => errors.push(format!("{}: only indicators take a rule", at)),
        }
        if !known.insert(feature.name.as_str()) {
            errors.push(format!("{}: name already in use", at));
        }
    }

    // Coefficients
    if spec.coefficients.is_empty() {
        errors.push("coefficients: at least one term is required".to_string());
    }
    for (name, weight) in &spec.coefficients {
        if !known.contains(name.as_str()) {
            errors.push(format!(
                "coefficients.{}: no variable or derived feature by that name",
                name
            ));
        }
        if !weight.is_finite() {
            errors.push(format!("coefficients.{}: must be finite", name));
        }
        consumed.insert(name.as_str());
    }
    if !spec.intercept.is_finite() {
        errors.push("intercept: must be finite".to_string());
    }
    for var in &spec.variables {
        if !consumed.contains(var.name.as_str()) {
            errors.push(format!(
                "variables '{}': has no coefficient and feeds no derived feature",
                var.name
            ));
        }
    }

    // Thresholds
    if spec.thresholds.is_empty() {
        errors.push("thresholds: at least one rule is required".to_string());
    }
    for (i, rule) in spec.thresholds.iter().enumerate() {
        if rule.when.op == Comparator::Equal {
            errors.push(format!(
                "thresholds[{}]: use <, <=, > or >= (got '{}')",
                i, rule.when
            ));
        }
        if rule.label.trim().is_empty() {
            errors.push(format!("thresholds[{}]: label must not be empty", i));
        }
        if spec.link == Link::Logistic && !(0.0..=1.0).contains(&rule.when.cutoff) {
            errors.push(format!(
                "thresholds[{}]: probability cutoff {} is outside 0 … 1",
                i, rule.when.cutoff
            ));
        }
    }

    // Exhaustiveness only makes sense on an otherwise sound spec
    if errors.is_empty() {
        if let Some(range) = classified_range(spec) {
            let conditions: Vec<_> = spec.thresholds.iter().map(|r| r.when).collect();
            if let Some(gap) = find_gap(&conditions, range) {
                errors.push(format!(
                    "thresholds: no rule matches {} (reachable range {} … {})",
                    gap, range.lo, range.hi
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
id: urethra
title: Bulking gel
variables:
  - { name: urethra_length, kind: continuous, min: 2.0, max: 4.2 }
  - { name: max_flow, kind: continuous, min: 16, max: 41 }
  - { name: col1a1_gg, kind: binary }
coefficients:
  urethra_length: 1.390
  max_flow: -0.3216
  col1a1_gg: -0.7385
intercept: 6.184
thresholds:
  - { when: "> 0", label: not recommended }
  - { when: "<= 0", label: recommended }
"#;

    fn spec(yaml: &str) -> FormulaSpec {
        serde_saphyr::from_str(yaml).unwrap()
    }

    #[test]
    fn test_valid_spec() {
        assert!(validate_spec(&spec(VALID)).is_ok());
    }

    #[test]
    fn test_out_of_range_input_reported() {
        let s = spec(VALID);
        let input = EvaluationInput::new()
            .with("urethra_length", 1.0)
            .with("max_flow", 20.0)
            .with("col1a1_gg", "no");
        let errors = validate(&s, &input).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].variable, "urethra_length");
        assert!(errors[0].message.contains("outside"));
    }

    #[test]
    fn test_collects_all_input_errors() {
        let s = spec(VALID);
        let input = EvaluationInput::new().with("urethra_length", "x").with("col1a1_gg", "perhaps");
        let errors = validate(&s, &input).unwrap_err();
        let vars: Vec<_> = errors.iter().map(|e| e.variable.as_str()).collect();
        assert_eq!(vars, vec!["urethra_length", "max_flow", "col1a1_gg"]);
        assert_eq!(errors[1].message, "value is missing");
    }

    #[test]
    fn test_unknown_inputs_ignored() {
        let s = spec(VALID);
        let input = EvaluationInput::new()
            .with("urethra_length", "3,0")
            .with("max_flow", 20.0)
            .with("col1a1_gg", true)
            .with("comment", "first visit");
        let validated = validate(&s, &input).unwrap();
        assert_eq!(validated.get("urethra_length"), Some(3.0));
        assert_eq!(validated.get("comment"), None);
    }

    #[test]
    fn test_unknown_coefficient_key() {
        let yaml = VALID.replace("col1a1_gg: -0.7385", "col1a1_gg: -0.7385\n  esr_gg: 0.4");
        let errors = validate_spec(&spec(&yaml)).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("coefficients.esr_gg")));
    }

    #[test]
    fn test_unused_variable() {
        let yaml = VALID.replace(
            "  - { name: col1a1_gg, kind: binary }",
            "  - { name: col1a1_gg, kind: binary }\n  - { name: esr_gg, kind: binary }",
        );
        let errors = validate_spec(&spec(&yaml)).unwrap_err();
        assert!(errors[0].contains("esr_gg"));
    }

    #[test]
    fn test_gap_in_thresholds() {
        let yaml = VALID.replace("\"<= 0\"", "\"< 0\"");
        let errors = validate_spec(&spec(&yaml)).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no rule matches 0"));
    }

    #[test]
    fn test_gap_outside_reachable_range_is_fine() {
        // Score is always within 6.184 + [2.78, 5.838] + [-13.19, -5.15] + [-0.74, 0]
        let yaml = VALID.replace("\"<= 0\"", "\"< -20\"");
        let errors = validate_spec(&spec(&yaml)).unwrap_err();
        assert!(errors[0].contains("no rule matches"));

        let yaml = VALID.replace("\"> 0\"", "\"> -100\"").replace("\"<= 0\"", "\"<= -100\"");
        assert!(validate_spec(&spec(&yaml)).is_ok());
    }

    #[test]
    fn test_equality_threshold_rejected() {
        let yaml = VALID.replace("\"<= 0\"", "\"= 0\"");
        let errors = validate_spec(&spec(&yaml)).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("use <, <=, > or >=")));
    }

    #[test]
    fn test_range_and_default_problems() {
        let yaml = VALID.replace(
            "{ name: max_flow, kind: continuous, min: 16, max: 41 }",
            "{ name: max_flow, kind: continuous, min: 41, max: 16, default: 50 }",
        );
        let errors = validate_spec(&spec(&yaml)).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("min 41 is greater than max 16")));
        assert!(errors.iter().any(|e| e.contains("default")));
    }

    #[test]
    fn test_binary_with_range_rejected() {
        let yaml = VALID.replace("{ name: col1a1_gg, kind: binary }", "{ name: col1a1_gg, kind: binary, max: 1 }");
        let errors = validate_spec(&spec(&yaml)).unwrap_err();
        assert!(errors[0].contains("binary"));
    }

    #[test]
    fn test_derived_must_be_declared_in_order() {
        let yaml = r#"
id: d
title: D
variables:
  - { name: a, kind: continuous, min: 0, max: 1 }
  - { name: b, kind: continuous, min: 0, max: 1 }
derived:
  - { name: flag, op: indicator, inputs: [delta], rule: "> 0" }
  - { name: delta, op: difference, inputs: [a, b] }
  - { name: lowest, op: min, inputs: [a] }
coefficients:
  flag: 1
  lowest: 1
thresholds:
  - { when: ">= 0", label: any }
"#;
        let errors = validate_spec(&spec(yaml)).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("'delta' is not declared before it")));
        assert!(errors.iter().any(|e| e.contains("wrong number of inputs (1) for Min")));
    }

    #[test]
    fn test_logistic_cutoff_outside_unit_interval() {
        let yaml = VALID
            .replace("intercept: 6.184", "intercept: 6.184\nlink: logistic")
            .replace("\"> 0\"", "\"> 1.5\"");
        let errors = validate_spec(&spec(&yaml)).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("probability cutoff 1.5")));
    }

    const OPEN: &str = r#"
id: open
title: Open ranges
variables:
  - { name: a, kind: continuous, min: 0 }
  - { name: b, kind: continuous }
  - { name: flag, kind: binary }
coefficients:
  a: 1
  b: 1
  flag: 1
thresholds:
  - { when: "> 0", label: high }
  - { when: "<= 0", label: low }
"#;

    #[test]
    fn test_overflowing_sum_blames_combined_open_variables() {
        let s = spec(OPEN);
        // each term alone is finite, their sum is not
        let input = EvaluationInput::new()
            .with("a", 1e308)
            .with("b", 1e308)
            .with("flag", true);
        let errors = validate(&s, &input).unwrap_err();
        let names: Vec<&str> = errors.iter().map(|e| e.variable.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(errors[0].message, "value 1e308 is too large to evaluate");
    }

    #[test]
    fn test_large_finite_sum_is_accepted() {
        let s = spec(OPEN);
        let input = EvaluationInput::new().with("a", 1e308).with("b", -1e308).with("flag", 0i64);
        assert!(validate(&s, &input).is_ok());
    }
}
