use std::io::IsTerminal;
use owo_colors::OwoColorize;
use terminal_size::{Width, terminal_size};

use crate::catalog::Catalog;
use crate::config::ColorChoice;
use crate::error::FieldError;
use crate::scoring::{EvaluationResult, FormulaSpec, Link, Severity, VariableKind, VariableSpec};
use crate::staged::{SecondStage, StagedModel, StagedOutcome};

/// Resolve the configured color choice; `auto` means stdout is a TTY
pub fn should_use_colors(choice: ColorChoice) -> bool {
    match choice {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal(),
    }
}

/// Get terminal width, defaulting to None for pipes (unlimited)
fn get_terminal_width() -> Option<usize> {
    terminal_size().map(|(Width(w), _)| w as usize)
}

/// Truncate title to fit available width, accounting for Unicode
fn truncate_title(title: &str, max_width: usize) -> String {
    let chars: Vec<char> = title.chars().collect();
    if chars.len() <= max_width {
        title.to_string()
    } else if max_width > 3 {
        format!("{}...", chars[..max_width - 3].iter().collect::<String>())
    } else {
        chars[..max_width].iter().collect()
    }
}

fn fit_title(title: &str, fixed_width: usize, term_width: Option<usize>) -> String {
    match term_width {
        Some(width) if width > fixed_width + 10 => truncate_title(title, width - fixed_width),
        // Very narrow terminal
        Some(_) => truncate_title(title, 20),
        None => title.to_string(),
    }
}

/// Format a number with `precision` decimals, dropping trailing zeros
pub fn format_number(value: f64, precision: usize) -> String {
    let formatted = format!("{:.*}", precision, value);
    let trimmed = if formatted.contains('.') {
        formatted.trim_end_matches('0').trim_end_matches('.')
    } else {
        formatted.as_str()
    };
    match trimmed {
        "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

/// One line per model, then the staged pairs. Titles are cut to the
/// terminal width.
pub fn format_model_list(catalog: &Catalog, use_colors: bool) -> String {
    if catalog.is_empty() {
        return "No models loaded.".to_string();
    }

    let term_width = get_terminal_width();
    let id_width = catalog
        .models()
        .map(|m| m.id.chars().count())
        .chain(catalog.staged_models().map(|s| s.id.chars().count()))
        .max()
        .unwrap_or(0);
    let separator = "  ";
    let fixed_width = id_width + separator.len();

    let mut lines: Vec<String> = catalog
        .models()
        .map(|spec| {
            let id = format!("{:<width$}", spec.id, width = id_width);
            let title = fit_title(&spec.title, fixed_width, term_width);
            if use_colors {
                format!("{}{}{}", id.cyan(), separator, title)
            } else {
                format!("{}{}{}", id, separator, title)
            }
        })
        .collect();

    let staged: Vec<&StagedModel> = catalog.staged_models().collect();
    if !staged.is_empty() {
        lines.push(String::new());
        lines.push(if use_colors {
            "Two-stage models:".bold().to_string()
        } else {
            "Two-stage models:".to_string()
        });
        for pair in staged {
            let id = format!("{:<width$}", pair.id, width = id_width);
            let title = fit_title(&pair.title, fixed_width, term_width);
            let id = if use_colors { id.cyan().to_string() } else { id };
            lines.push(format!("{}{}{}", id, separator, title));
        }
    }

    lines.join("\n")
}

fn format_term(weight: f64, name: &str, first: bool) -> String {
    let magnitude = format_number(weight.abs(), 6);
    match (first, weight < 0.0) {
        (true, false) => format!("{}·{}", magnitude, name),
        (true, true) => format!("-{}·{}", magnitude, name),
        (false, false) => format!(" + {}·{}", magnitude, name),
        (false, true) => format!(" - {}·{}", magnitude, name),
    }
}

/// The weighted sum as a formula, e.g. `M = 0.168·ast - 3.944·hdl - 10.05`
pub fn format_formula(spec: &FormulaSpec) -> String {
    let mut sum = String::new();
    for (i, (name, weight)) in spec.coefficients.iter().enumerate() {
        sum.push_str(&format_term(*weight, name, i == 0));
    }
    if spec.intercept != 0.0 {
        let magnitude = format_number(spec.intercept.abs(), 6);
        let sign = if spec.intercept < 0.0 { '-' } else { '+' };
        sum.push_str(&format!(" {} {}", sign, magnitude));
    }

    let symbol = spec.score_symbol();
    match spec.link {
        Link::Identity => format!("{} = {}", symbol, sum),
        Link::Logistic => format!("p = 1 / (1 + e^-{}), {} = {}", symbol, symbol, sum),
    }
}

fn format_range(var: &VariableSpec) -> Option<String> {
    match (var.min, var.max) {
        (Some(lo), Some(hi)) => Some(format!("{} … {}", lo, hi)),
        (Some(lo), None) => Some(format!("≥ {}", lo)),
        (None, Some(hi)) => Some(format!("≤ {}", hi)),
        (None, None) => None,
    }
}

fn format_variable(var: &VariableSpec) -> String {
    let mut line = format!("  {} - {}", var.name, var.display_label());
    let kind = match var.kind {
        VariableKind::Continuous => "number",
        VariableKind::Count => "whole number",
        VariableKind::Binary => "yes/no",
        VariableKind::Ordinal => "choice",
    };
    line.push_str(&format!(" [{}", kind));
    if let Some(range) = format_range(var) {
        line.push_str(&format!(", {}", range));
    }
    if let Some(unit) = &var.unit {
        line.push_str(&format!(", {}", unit));
    }
    if let Some(default) = var.default {
        line.push_str(&format!(", default {}", default));
    }
    line.push(']');
    for code in &var.codes {
        line.push_str(&format!("\n      {} = {}", code.code, code.label));
    }
    line
}

fn paint_label(label: &str, severity: Option<Severity>, use_colors: bool) -> String {
    if !use_colors {
        return label.to_string();
    }
    match severity {
        Some(Severity::High) => label.red().bold().to_string(),
        Some(Severity::Moderate) => label.yellow().bold().to_string(),
        Some(Severity::Low) => label.green().bold().to_string(),
        None => label.bold().to_string(),
    }
}

/// Multi-line description of one model: formula, variables and bands
pub fn format_model_detail(spec: &FormulaSpec, use_colors: bool) -> String {
    let mut out = Vec::new();
    if use_colors {
        out.push(format!("{} ({})", spec.title.bold(), spec.id.cyan()));
    } else {
        out.push(format!("{} ({})", spec.title, spec.id));
    }
    if let Some(source) = &spec.source {
        out.push(format!("  Source: {}", source));
    }
    out.push(format!("  Formula: {}", format_formula(spec)));

    if !spec.derived.is_empty() {
        out.push("Derived terms:".to_string());
        for feature in &spec.derived {
            let mut line = format!("  {} = {}({})", feature.name, feature.op.name(), feature.inputs.join(", "));
            if let Some(rule) = &feature.rule {
                line.push_str(&format!(" {}", rule));
            }
            out.push(line);
        }
    }

    out.push("Variables:".to_string());
    out.extend(spec.variables.iter().map(format_variable));

    let compared = match spec.link {
        Link::Identity => spec.score_symbol(),
        Link::Logistic => "p",
    };
    out.push("Classification:".to_string());
    for rule in &spec.thresholds {
        out.push(format!(
            "  {} {} → {}",
            compared,
            rule.when,
            paint_label(&rule.label, rule.severity, use_colors)
        ));
    }

    out.join("\n")
}

/// Per-term breakdown: name, weight, value, product, then the intercept
pub fn format_contributions(result: &EvaluationResult, precision: usize) -> String {
    let name_width = result
        .contributions
        .iter()
        .map(|c| c.variable.chars().count())
        .max()
        .unwrap_or(0)
        .max("intercept".len());

    let mut lines: Vec<String> = result
        .contributions
        .iter()
        .map(|c| {
            format!(
                "  {:<nw$}  {:>12} × {:<10} = {:>12}",
                c.variable,
                format_number(c.weight, 6),
                format_number(c.value, precision),
                format_number(c.product, precision),
                nw = name_width
            )
        })
        .collect();
    lines.push(format!(
        "  {:<nw$}  {:>12}   {:<10}   {:>12}",
        "intercept",
        "",
        "",
        format_number(result.intercept, precision),
        nw = name_width
    ));
    lines.join("\n")
}

const MAX_CLASSIFIED_DIGITS: usize = 17;

/// The classified value with enough decimals that it never prints as its
/// band's cutoff unless it equals it
pub fn format_classified(result: &EvaluationResult, precision: usize) -> String {
    let value = result.classified_value();
    let cutoff = result.matched.cutoff;
    let mut digits = precision;
    while value != cutoff
        && digits < MAX_CLASSIFIED_DIGITS
        && format_number(value, digits) == format_number(cutoff, digits)
    {
        digits += 1;
    }
    format_number(value, digits)
}

/// Human-readable result
pub fn format_result(result: &EvaluationResult, symbol: &str, precision: usize, explain: bool, use_colors: bool) -> String {
    let (score, compared) = match result.probability {
        Some(_) => (format_number(result.score, precision), "p"),
        None => (format_classified(result, precision), symbol),
    };
    let mut out = vec![format!("{} = {}", symbol, score)];
    if result.probability.is_some() {
        out.push(format!("p = {}", format_classified(result, precision)));
    }
    let label = paint_label(&result.label, result.severity, use_colors);
    out.push(format!("Result: {} ({} {})", label, compared, result.matched));
    if explain {
        out.push("Contributions:".to_string());
        out.push(format_contributions(result, precision));
    }
    out.join("\n")
}

/// Tab-separated values for scripting
/// Columns: model, score, probability (empty for linear models), label
pub fn format_tsv(result: &EvaluationResult, precision: usize) -> String {
    let (score, probability) = match result.probability {
        Some(_) => (format_number(result.score, precision), format_classified(result, precision)),
        None => (format_classified(result, precision), String::new()),
    };
    format!(
        "{}\t{}\t{}\t{}",
        result.model_id,
        score,
        probability,
        result.label
    )
}

/// One line per rejected field
pub fn format_field_errors(errors: &[FieldError], use_colors: bool) -> String {
    errors
        .iter()
        .map(|e| {
            if use_colors {
                format!("  {}: {}", e.variable.yellow(), e.message)
            } else {
                format!("  {}: {}", e.variable, e.message)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Both stages of a two-stage model
pub fn format_staged_outcome(
    staged: &StagedModel,
    outcome: &StagedOutcome,
    symbols: (&str, &str),
    precision: usize,
    explain: bool,
    use_colors: bool,
) -> String {
    let mut out = vec![
        format!("Stage 1 ({}):", staged.first),
        format_result(&outcome.first, symbols.0, precision, explain, use_colors),
    ];
    out.push(format!("Stage 2 ({}):", staged.second));
    match &outcome.second {
        SecondStage::Skipped => out.push(format!(
            "Not applicable: stage 1 result is not \"{}\"",
            staged.gate
        )),
        SecondStage::Pending => out.push("Stage 1 allows stage 2; supply its values with --second".to_string()),
        SecondStage::Evaluated(result) => {
            out.push(format_result(result, symbols.1, precision, explain, use_colors));
        }
        SecondStage::Invalid(errors) => {
            out.push("Invalid input:".to_string());
            out.push(format_field_errors(errors, use_colors));
        }
    }
    out.join("\n")
}
