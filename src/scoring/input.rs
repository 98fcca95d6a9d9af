use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::spec::{FormulaSpec, VariableKind, VariableSpec};

/// A raw value as submitted by a form, a CLI flag or a JSON request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputValue::Bool(b) => write!(f, "{}", b),
            InputValue::Number(n) => write!(f, "{}", n),
            InputValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for InputValue {
    fn from(value: f64) -> Self {
        InputValue::Number(value)
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        InputValue::Number(value as f64)
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        InputValue::Bool(value)
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        InputValue::Text(value.to_string())
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        InputValue::Text(value)
    }
}

/// Named raw values for one submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationInput {
    values: BTreeMap<String, InputValue>,
}

impl EvaluationInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<InputValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&InputValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse `name=value` pairs as given on the command line
    pub fn from_assignments<S: AsRef<str>>(pairs: &[S]) -> Result<Self, String> {
        let mut input = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected name=value, got '{}'", pair))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(format!("missing variable name in '{}'", pair));
            }
            input.insert(name, value.trim());
        }
        Ok(input)
    }

    /// Fill variables that were not supplied with their advertised default.
    /// Only applied on request.
    pub fn with_defaults(mut self, spec: &FormulaSpec) -> Self {
        for var in &spec.variables {
            if let (false, Some(default)) = (self.contains(&var.name), var.default) {
                self.insert(var.name.clone(), default);
            }
        }
        self
    }
}

impl<K: Into<String>, V: Into<InputValue>> FromIterator<(K, V)> for EvaluationInput {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut input = Self::new();
        for (k, v) in iter {
            input.insert(k, v);
        }
        input
    }
}

/// Input that passed validation: exactly one finite value per declared
/// variable, in declaration order, with a finite weighted sum. Only
/// [`super::validate`] builds one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInput {
    values: IndexMap<String, f64>,
}

impl ValidatedInput {
    pub(crate) fn from_values(values: IndexMap<String, f64>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

const TRUE_WORDS: &[&str] = &["1", "yes", "y", "true", "да", "истина"];
const FALSE_WORDS: &[&str] = &["0", "no", "n", "false", "нет", "ложь"];

/// Parse numeric text, accepting `,` as the decimal separator.
pub fn parse_number(text: &str) -> Option<f64> {
    let normalized = text.trim().replace(',', ".");
    if normalized.is_empty() {
        return None;
    }
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn format_bound(value: f64) -> String {
    if value.is_finite() {
        format!("{}", value)
    } else if value > 0.0 {
        "∞".to_string()
    } else {
        "-∞".to_string()
    }
}

/// Coerce and range-check one value against its declaration.
/// The error string is user-facing.
pub fn coerce_value(var: &VariableSpec, raw: &InputValue) -> Result<f64, String> {
    let value = match var.kind {
        VariableKind::Binary => coerce_binary(raw)?,
        VariableKind::Ordinal => coerce_ordinal(var, raw)?,
        VariableKind::Continuous | VariableKind::Count => {
            let value = coerce_number(raw)?;
            if var.kind == VariableKind::Count && value.fract() != 0.0 {
                return Err(format!("expected a whole number, got {}", value));
            }
            value
        }
    };

    if matches!(var.kind, VariableKind::Continuous | VariableKind::Count) {
        let (lo, hi) = var.bounds();
        if value < lo || value > hi {
            return Err(format!(
                "value {} is outside the allowed range {} … {}",
                value,
                format_bound(lo),
                format_bound(hi)
            ));
        }
    }
    Ok(value)
}

fn coerce_number(raw: &InputValue) -> Result<f64, String> {
    match raw {
        InputValue::Number(n) if n.is_finite() => Ok(*n),
        InputValue::Number(n) => Err(format!("{} is not a finite number", n)),
        InputValue::Bool(_) => Err("expected a number, got a yes/no answer".to_string()),
        InputValue::Text(s) if s.trim().is_empty() => Err("value is missing".to_string()),
        InputValue::Text(s) => {
            parse_number(s).ok_or_else(|| format!("'{}' is not a number", s.trim()))
        }
    }
}

fn coerce_binary(raw: &InputValue) -> Result<f64, String> {
    match raw {
        InputValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        InputValue::Number(n) if *n == 0.0 || *n == 1.0 => Ok(*n),
        InputValue::Number(n) => Err(format!("expected 0 or 1, got {}", n)),
        InputValue::Text(s) => {
            let word = s.trim().to_lowercase();
            if word.is_empty() {
                Err("value is missing".to_string())
            } else if TRUE_WORDS.contains(&word.as_str()) {
                Ok(1.0)
            } else if FALSE_WORDS.contains(&word.as_str()) {
                Ok(0.0)
            } else {
                Err(format!("expected yes or no, got '{}'", s.trim()))
            }
        }
    }
}

fn coerce_ordinal(var: &VariableSpec, raw: &InputValue) -> Result<f64, String> {
    let allowed = || {
        var.codes
            .iter()
            .map(|c| format!("{} ({})", c.code, c.label))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let code = match raw {
        InputValue::Number(n) => Some(*n),
        InputValue::Bool(_) => None,
        InputValue::Text(s) if s.trim().is_empty() => return Err("value is missing".to_string()),
        InputValue::Text(s) => parse_number(s).or_else(|| {
            var.codes
                .iter()
                .find(|c| c.label.to_lowercase() == s.trim().to_lowercase())
                .map(|c| c.code as f64)
        }),
    };

    match code {
        Some(n) if n.fract() == 0.0 && var.code(n as i64).is_some() => Ok(n),
        _ => Err(format!("'{}' is not one of: {}", raw, allowed())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::spec::OrdinalCode;

    fn continuous(min: Option<f64>, max: Option<f64>) -> VariableSpec {
        VariableSpec {
            name: "urethra_length".to_string(),
            label: None,
            kind: VariableKind::Continuous,
            min,
            max,
            codes: vec![],
            default: None,
            unit: Some("cm".to_string()),
        }
    }

    fn genotype() -> VariableSpec {
        VariableSpec {
            name: "genotype".to_string(),
            label: None,
            kind: VariableKind::Ordinal,
            min: None,
            max: None,
            codes: vec![
                OrdinalCode { code: 0, label: "C/C".to_string() },
                OrdinalCode { code: 1, label: "C/G".to_string() },
                OrdinalCode { code: 2, label: "G/G".to_string() },
            ],
            default: None,
            unit: None,
        }
    }

    fn kind(kind: VariableKind) -> VariableSpec {
        VariableSpec { kind, ..continuous(Some(0.0), Some(10.0)) }
    }

    #[test]
    fn test_parse_number_comma_and_dot() {
        assert_eq!(parse_number("2,5"), Some(2.5));
        assert_eq!(parse_number(" 2.5 "), Some(2.5));
        assert_eq!(parse_number("-0,39"), Some(-0.39));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
    }

    #[test]
    fn test_continuous_in_range() {
        let var = continuous(Some(2.0), Some(4.2));
        assert_eq!(coerce_value(&var, &"3,1".into()), Ok(3.1));
        assert_eq!(coerce_value(&var, &InputValue::Number(4.2)), Ok(4.2));
    }

    #[test]
    fn test_continuous_out_of_range() {
        let var = continuous(Some(2.0), Some(4.2));
        let err = coerce_value(&var, &InputValue::Number(1.0)).unwrap_err();
        assert!(err.contains("outside"));
        assert!(err.contains("2 … 4.2"));
    }

    #[test]
    fn test_continuous_non_numeric() {
        let var = continuous(None, None);
        let err = coerce_value(&var, &"twelve".into()).unwrap_err();
        assert!(err.contains("not a number"));
        assert_eq!(coerce_value(&var, &"".into()).unwrap_err(), "value is missing");
    }

    #[test]
    fn test_open_range_accepts_anything_finite() {
        let var = continuous(None, None);
        assert_eq!(coerce_value(&var, &InputValue::Number(-1e6)), Ok(-1e6));
    }

    #[test]
    fn test_count_requires_whole_number() {
        let var = kind(VariableKind::Count);
        assert_eq!(coerce_value(&var, &"7".into()), Ok(7.0));
        assert!(coerce_value(&var, &"7.5".into()).is_err());
    }

    #[test]
    fn test_binary_words() {
        let var = kind(VariableKind::Binary);
        assert_eq!(coerce_value(&var, &"Yes".into()), Ok(1.0));
        assert_eq!(coerce_value(&var, &"да".into()), Ok(1.0));
        assert_eq!(coerce_value(&var, &"НЕТ".into()), Ok(0.0));
        assert_eq!(coerce_value(&var, &true.into()), Ok(1.0));
        assert_eq!(coerce_value(&var, &InputValue::Number(0.0)), Ok(0.0));
        assert!(coerce_value(&var, &InputValue::Number(2.0)).is_err());
        assert!(coerce_value(&var, &"maybe".into()).is_err());
    }

    #[test]
    fn test_ordinal_by_code_or_label() {
        let var = genotype();
        assert_eq!(coerce_value(&var, &"2".into()), Ok(2.0));
        assert_eq!(coerce_value(&var, &InputValue::Number(1.0)), Ok(1.0));
        assert_eq!(coerce_value(&var, &"c/g".into()), Ok(1.0));
        let err = coerce_value(&var, &"3".into()).unwrap_err();
        assert!(err.contains("0 (C/C)"));
        assert!(coerce_value(&var, &InputValue::Number(0.5)).is_err());
    }

    #[test]
    fn test_assignments_parse() {
        let input = EvaluationInput::from_assignments(&["ast=25", " hdl = 1,2 "]).unwrap();
        assert_eq!(input.get("ast"), Some(&InputValue::Text("25".to_string())));
        assert_eq!(input.get("hdl"), Some(&InputValue::Text("1,2".to_string())));
        assert!(EvaluationInput::from_assignments(&["ast"]).is_err());
        assert!(EvaluationInput::from_assignments(&["=5"]).is_err());
    }

    #[test]
    fn test_untagged_json_values() {
        let input: EvaluationInput =
            serde_json::from_str(r#"{"a": 1.5, "b": "2,5", "c": true}"#).unwrap();
        assert_eq!(input.get("a"), Some(&InputValue::Number(1.5)));
        assert_eq!(input.get("b"), Some(&InputValue::Text("2,5".to_string())));
        assert_eq!(input.get("c"), Some(&InputValue::Bool(true)));
    }

    #[test]
    fn test_with_defaults_fills_only_missing() {
        let mut with_default = continuous(Some(2.0), Some(4.2));
        with_default.default = Some(3.0);
        let mut other = continuous(None, None);
        other.name = "max_flow_rate".to_string();
        let spec = FormulaSpec {
            id: "demo".to_string(),
            title: "Demo".to_string(),
            source: None,
            symbol: None,
            variables: vec![with_default, other, genotype()],
            derived: vec![],
            coefficients: IndexMap::new(),
            intercept: 0.0,
            link: Default::default(),
            thresholds: vec![],
        };

        let filled = EvaluationInput::new().with_defaults(&spec);
        assert_eq!(filled.get("urethra_length"), Some(&InputValue::Number(3.0)));
        assert!(!filled.contains("max_flow_rate"));

        let kept = EvaluationInput::new().with("urethra_length", "2,5").with_defaults(&spec);
        assert_eq!(kept.get("urethra_length"), Some(&InputValue::Text("2,5".to_string())));
    }
}
