//! The formula table: built-in models plus optional user catalog files.
//!
//! Every model and staged pair is validated when the catalog is built, so a
//! `Catalog` that exists only holds specs that evaluate without surprises.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::ConfigurationError;
use crate::scoring::{validate_spec, FormulaSpec};
use crate::staged::StagedModel;

const BUILTIN: &str = include_str!("builtin.yaml");

/// Contents of one catalog file.
///
/// Example YAML:
/// ```yaml
/// models:
///   - id: my-model
///     title: ...
/// staged:
///   - { id: pair, title: ..., first: a, gate: high risk, second: b }
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    #[serde(default)]
    pub models: Vec<FormulaSpec>,
    #[serde(default)]
    pub staged: Vec<StagedModel>,
}

impl CatalogFile {
    pub fn parse(yaml: &str) -> Result<Self> {
        let file: CatalogFile = serde_saphyr::from_str(yaml).context("invalid catalog YAML")?;
        Ok(file)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file at {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse catalog {}", path.display()))
    }
}

/// Every configuration problem found while building a catalog
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{} configuration error(s):{}", .0.len(), bullet_list(.0))]
pub struct CatalogErrors(pub Vec<ConfigurationError>);

fn bullet_list(errors: &[ConfigurationError]) -> String {
    errors.iter().map(|e| format!("\n  - {}", e)).collect()
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    models: IndexMap<String, FormulaSpec>,
    staged: IndexMap<String, StagedModel>,
}

impl Catalog {
    /// The embedded model table only
    pub fn builtin() -> Result<Self> {
        Self::load(&[])
    }

    /// Embedded table followed by `extra` catalog files, in order
    pub fn load(extra: &[PathBuf]) -> Result<Self> {
        let mut files = vec![CatalogFile::parse(BUILTIN).context("Built-in catalog is unreadable")?];
        for path in extra {
            files.push(CatalogFile::read(path)?);
        }
        let catalog = Self::build(files)?;
        tracing::debug!(
            models = catalog.models.len(),
            staged = catalog.staged.len(),
            extra_files = extra.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// Validate and index parsed files; fails with every problem found.
    pub fn build(files: Vec<CatalogFile>) -> std::result::Result<Self, CatalogErrors> {
        let mut catalog = Catalog::default();
        let mut errors = Vec::new();
        let mut staged = Vec::new();
        let mut rejected = HashSet::new();

        for file in files {
            for spec in file.models {
                if let Err(problems) = validate_spec(&spec) {
                    rejected.insert(spec.id.clone());
                    errors.push(ConfigurationError::InvalidSpec {
                        model: spec.id.clone(),
                        problems,
                    });
                    continue;
                }
                if catalog.models.contains_key(&spec.id) {
                    errors.push(ConfigurationError::DuplicateModel(spec.id.clone()));
                    continue;
                }
                catalog.models.insert(spec.id.clone(), spec);
            }
            staged.extend(file.staged);
        }

        // Pairs may reference models from any file
        for pair in staged {
            // The model's own error already explains why it is missing
            if let Some(stage) = [&pair.first, &pair.second].into_iter().find(|id| rejected.contains(*id)) {
                errors.push(ConfigurationError::InvalidStaged {
                    staged: pair.id.clone(),
                    problem: format!("stage '{}' is invalid", stage),
                });
                continue;
            }
            if let Err(e) = pair.check(catalog.models.get(&pair.first), catalog.models.get(&pair.second)) {
                errors.push(e);
                continue;
            }
            if catalog.staged.contains_key(&pair.id) || catalog.models.contains_key(&pair.id) {
                errors.push(ConfigurationError::InvalidStaged {
                    staged: pair.id.clone(),
                    problem: "id already in use".to_string(),
                });
                continue;
            }
            catalog.staged.insert(pair.id.clone(), pair);
        }

        if errors.is_empty() {
            Ok(catalog)
        } else {
            Err(CatalogErrors(errors))
        }
    }

    pub fn get(&self, id: &str) -> Option<&FormulaSpec> {
        self.models.get(id)
    }

    pub fn staged(&self, id: &str) -> Option<&StagedModel> {
        self.staged.get(id)
    }

    pub fn models(&self) -> impl Iterator<Item = &FormulaSpec> {
        self.models.values()
    }

    pub fn staged_models(&self) -> impl Iterator<Item = &StagedModel> {
        self.staged.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Ids close to `id`, for "did you mean" hints
    pub fn suggest(&self, id: &str) -> Vec<&str> {
        let needle = id.to_lowercase();
        self.models
            .keys()
            .chain(self.staged.keys())
            .filter(|k| k.contains(&needle) || needle.contains(k.as_str()))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{assess, validate, EvaluationInput, Rejection};
    use std::io::Write;

    fn builtin() -> Catalog {
        Catalog::builtin().unwrap()
    }

    fn evaluate_model(id: &str, input: EvaluationInput) -> crate::scoring::EvaluationResult {
        let catalog = builtin();
        assess(catalog.get(id).unwrap(), &input).unwrap()
    }

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = builtin();
        assert_eq!(catalog.len(), 20);
        assert_eq!(catalog.staged_models().count(), 2);
        assert!(catalog.get("macrosomia").is_some());
        assert!(catalog.staged("sfgr").is_some());
    }

    #[test]
    fn test_macrosomia_no_risk() {
        let result = evaluate_model(
            "macrosomia",
            EvaluationInput::new()
                .with("ast", 25.0)
                .with("hdl", 1.2)
                .with("pparg_genotype", 0i64)
                .with("luteal_support", 0i64),
        );
        assert!((result.score - -10.5828).abs() < 1e-9);
        assert_eq!(result.label, "no macrosomia risk");
    }

    #[test]
    fn test_macrosomia_high_risk() {
        let result = evaluate_model(
            "macrosomia",
            EvaluationInput::new()
                .with("ast", 200.0)
                .with("hdl", 0.8)
                .with("pparg_genotype", 2i64)
                .with("luteal_support", 1i64),
        );
        assert!((result.score - 39.4438).abs() < 1e-9);
        assert_eq!(result.label, "high macrosomia risk");
    }

    #[test]
    fn test_preeclampsia_art_high_risk() {
        let result = evaluate_model(
            "preeclampsia-art",
            EvaluationInput::new()
                .with("art_program", "frozen embryo transfer")
                .with("bmi", "24,0")
                .with("cardiovascular_disease", "no")
                .with("apob_genotype", 1i64),
        );
        assert!((result.score - 1.645).abs() < 1e-9);
        assert_eq!(result.label, "high risk");
    }

    #[test]
    fn test_incontinence_urethra_length_out_of_range() {
        let catalog = builtin();
        let spec = catalog.get("incontinence-bulking").unwrap();
        let input = EvaluationInput::new()
            .with("urethra_length", 1.0)
            .with("max_flow_rate", 25.0)
            .with("col1a1_gg", "нет");
        match assess(spec, &input) {
            Err(Rejection::Invalid(errors)) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].variable, "urethra_length");
            }
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_medneo_point_bands() {
        let catalog = builtin();
        let spec = catalog.get("medneo").unwrap();
        let points = |codes: [i64; 7]| {
            let names = ["respiratory", "fio2", "cns", "hemodynamics", "temperature", "base_excess", "lactate"];
            let input: EvaluationInput = names.iter().zip(codes).map(|(n, c)| (*n, c)).collect();
            assess(spec, &input).unwrap()
        };
        assert_eq!(points([1, 1, 0, 0, 0, 0, 0]).label, "moderate severity, favorable prognosis");
        let severe = points([2, 2, 1, 1, 2, 0, 0]);
        assert_eq!(severe.score, 8.0);
        assert_eq!(severe.label, "severe condition, favorable prognosis");
        assert_eq!(
            points([2, 2, 2, 1, 0, 1, 1]).label,
            "extremely severe condition, unfavorable prognosis"
        );
    }

    #[test]
    fn test_sfgr_neonatal_borderline() {
        // 19.5 - 2.2*8.5 - 0.81 = -0.01
        let catalog = builtin();
        let spec = catalog.get("sfgr-neonatal-mortality").unwrap();
        let base = EvaluationInput::new()
            .with("co_twin_demise", true)
            .with("prom", false)
            .with("acute_placental_insufficiency", false)
            .with("intervillositis", false);
        let low = assess(spec, &base.clone().with("apgar_1min", 8.5)).unwrap();
        assert_eq!(low.label, "low risk");
        let high = assess(spec, &base.clone().with("apgar_1min", 2.0)).unwrap();
        assert_eq!(high.label, "high risk");
    }

    #[test]
    fn test_ttts_logistic_cutoff() {
        let result = evaluate_model(
            "ttts-neonatal-mortality",
            EvaluationInput::new()
                .with("maternal_malperfusion", true)
                .with("apgar_10min", 7i64)
                .with("chloride", 100.0)
                .with("lactate", 2.0),
        );
        // DI = 2.679 - 9.093 + 21.8 + 1.072 - 19.669 = -3.211
        assert!((result.score - -3.211).abs() < 1e-9);
        let p = result.probability.unwrap();
        assert!(p > 0.0 && p < 0.4);
        assert_eq!(result.label, "low risk");
    }

    #[test]
    fn test_placenta_accreta_derived_terms() {
        let catalog = builtin();
        let spec = catalog.get("placenta-accreta").unwrap();
        let input = EvaluationInput::new()
            .with("age", 35i64)
            .with("height", 165.0)
            .with("weight", 80.0)
            .with("births", 1i64)
            .with("threatened_miscarriage", false)
            .with("placenta_previa", true)
            .with("uterine_scars", 2i64)
            .with("placenta_location", "anterior wall")
            .with("cervix_length", 30.0);
        let validated = validate(spec, &input).unwrap();
        let result = crate::scoring::evaluate(spec, &validated).unwrap();
        // overweight 0.161, previa -2.158, cervix -3.18, anterior 2.163,
        // scar 4.064, two scars 2.092, age -21.595, intercept 24.423
        let expected = 0.161 - 2.158 - 3.18 + 2.163 + 4.064 + 2.092 - 21.595 + 24.423;
        assert!((result.score - expected).abs() < 1e-9);
        assert_eq!(result.label, "unfavorable prognosis (high risk)");
        let two_scars = result.contributions.iter().find(|c| c.variable == "two_scars").unwrap();
        assert_eq!(two_scars.value, 1.0);
    }

    #[test]
    fn test_extra_catalog_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
models:
  - id: custom
    title: Custom
    variables:
      - {{ name: x, kind: continuous, min: 0, max: 1 }}
    coefficients:
      x: 2
    thresholds:
      - {{ when: "> 1", label: high }}
      - {{ when: "<= 1", label: low }}
"#
        )
        .unwrap();
        let catalog = Catalog::load(&[file.path().to_path_buf()]).unwrap();
        assert_eq!(catalog.len(), 21);
        assert!(catalog.get("custom").is_some());
    }

    #[test]
    fn test_duplicate_model_rejected() {
        let builtin_file = CatalogFile::parse(BUILTIN).unwrap();
        let again = CatalogFile {
            models: vec![builtin_file.models[0].clone()],
            staged: vec![],
        };
        let errors = Catalog::build(vec![builtin_file, again]).unwrap_err();
        assert_eq!(errors.0, vec![ConfigurationError::DuplicateModel("macrosomia".to_string())]);
    }

    #[test]
    fn test_misconfigured_model_fails_fast() {
        let mut file = CatalogFile::parse(BUILTIN).unwrap();
        file.models[0].coefficients.insert("ghost".to_string(), 1.0);
        file.models[1].thresholds.pop();
        let errors = Catalog::build(vec![file]).unwrap_err();
        assert_eq!(errors.0.len(), 2);
        assert!(errors.to_string().starts_with("2 configuration error(s)"));
    }

    #[test]
    fn test_staged_with_unknown_model_rejected() {
        let mut file = CatalogFile::parse(BUILTIN).unwrap();
        file.staged[0].second = "nowhere".to_string();
        let errors = Catalog::build(vec![file]).unwrap_err();
        assert!(matches!(errors.0[0], ConfigurationError::InvalidStaged { .. }));
    }

    #[test]
    fn test_staged_pair_names_invalid_stage() {
        let mut file = CatalogFile::parse(BUILTIN).unwrap();
        let first = file.models.iter_mut().find(|m| m.id == "uropathy-prognosis").unwrap();
        first.thresholds.clear();
        let errors = Catalog::build(vec![file]).unwrap_err();
        assert_eq!(errors.0.len(), 2);
        assert!(matches!(&errors.0[0], ConfigurationError::InvalidSpec { model, .. } if model == "uropathy-prognosis"));
        assert_eq!(
            errors.0[1],
            ConfigurationError::InvalidStaged {
                staged: "uropathy".to_string(),
                problem: "stage 'uropathy-prognosis' is invalid".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_extra_file() {
        let err = Catalog::load(&[PathBuf::from("/nonexistent/catalog.yaml")]).unwrap_err();
        assert!(err.to_string().contains("Failed to read catalog file"));
    }

    #[test]
    fn test_suggest() {
        let catalog = builtin();
        let hints = catalog.suggest("preeclampsia");
        assert!(hints.contains(&"preeclampsia-art"));
        assert!(hints.contains(&"superimposed-preeclampsia"));
    }
}
