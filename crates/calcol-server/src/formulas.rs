//! Formula files: one `column = formula` definition per line
//!
//! ```text
//! # Order totals
//! subtotal = price * quantity
//! total = subtotal * (1 + taxRate)   // comments after the formula are fine
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Only the first `=`
//! separates the column from the formula, so `flag = a == b` works.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

#[derive(Debug, Clone, PartialEq)]
pub struct FormulaSpec {
    pub column: String,
    pub formula: String,
}

impl FormulaSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parts = spec.splitn(2, '=');
        let column = parts
            .next()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("Formula is missing a column name"))?;
        let formula = parts
            .next()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("Column '{column}' is missing a formula"))?;
        Ok(FormulaSpec {
            column: column.to_string(),
            formula: formula.to_string(),
        })
    }
}

pub fn parse_formulas(text: &str) -> Result<Vec<FormulaSpec>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| FormulaSpec::parse(line).with_context(|| format!("line {}", i + 1)))
        .collect()
}

pub fn read_formulas(path: &Path) -> Result<Vec<FormulaSpec>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Reading formulas from {}", path.display()))?;
    parse_formulas(&text).with_context(|| format!("Parsing {}", path.display()))
}
