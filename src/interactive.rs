//! Question-by-question entry of a model's variables.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};

use crate::scoring::input::coerce_value;
use crate::scoring::{EvaluationInput, FormulaSpec, InputValue, VariableKind, VariableSpec};

/// Reads answers from `input`, writes questions to `output`.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Prompt user with a message and return their trimmed input.
    fn prompt(&mut self, message: &str) -> Result<String> {
        write!(self.output, "{}", message).context("Failed to write prompt")?;
        self.output.flush().context("Failed to flush stdout")?;
        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("Failed to read input")?;
        if read == 0 {
            anyhow::bail!("Input ended before all values were entered");
        }
        Ok(line.trim().to_string())
    }

    /// Prompt user with a message and a default value. Returns default if input is empty.
    fn prompt_with_default(&mut self, message: &str, default: &str) -> Result<String> {
        let input = self.prompt(&format!("{} [{}]: ", message, default))?;
        if input.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(input)
        }
    }

    fn question(var: &VariableSpec) -> String {
        let mut question = var.display_label().to_string();
        if let Some(unit) = &var.unit {
            question.push_str(&format!(", {}", unit));
        }
        match var.kind {
            VariableKind::Binary => question.push_str(" (yes/no)"),
            VariableKind::Ordinal => question.push_str(" (code or answer)"),
            VariableKind::Continuous | VariableKind::Count => match (var.min, var.max) {
                (Some(lo), Some(hi)) => question.push_str(&format!(" ({} … {})", lo, hi)),
                (Some(lo), None) => question.push_str(&format!(" (≥ {})", lo)),
                (None, Some(hi)) => question.push_str(&format!(" (≤ {})", hi)),
                (None, None) => {}
            },
        }
        question
    }

    /// Ask for one variable until the answer is acceptable.
    pub fn ask_variable(&mut self, var: &VariableSpec) -> Result<InputValue> {
        if var.kind == VariableKind::Ordinal {
            for code in &var.codes {
                writeln!(self.output, "  {} - {}", code.code, code.label).context("Failed to write prompt")?;
            }
        }

        let question = Self::question(var);
        loop {
            let answer = match var.default {
                Some(default) => self.prompt_with_default(&question, &default.to_string())?,
                None => self.prompt(&format!("{}: ", question))?,
            };
            let value = InputValue::Text(answer);
            match coerce_value(var, &value) {
                Ok(_) => return Ok(value),
                Err(message) => {
                    writeln!(self.output, "  {}", message).context("Failed to write prompt")?;
                }
            }
        }
    }

    /// Ask for every variable of `spec`, in declaration order.
    pub fn ask_spec(&mut self, spec: &FormulaSpec) -> Result<EvaluationInput> {
        writeln!(self.output, "{}", spec.title).context("Failed to write prompt")?;
        let mut values = EvaluationInput::new();
        for var in &spec.variables {
            let value = self.ask_variable(var)?;
            values.insert(var.name.clone(), value);
        }
        Ok(values)
    }
}

/// Prompt on the terminal for every variable of `spec`
pub fn ask(spec: &FormulaSpec) -> Result<EvaluationInput> {
    let stdin = std::io::stdin();
    let mut prompter = Prompter::new(stdin.lock(), std::io::stdout());
    prompter.ask_spec(spec)
}
