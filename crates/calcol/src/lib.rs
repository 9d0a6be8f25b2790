//! Calcol - calculated columns over tabular data
//!
//! Formulas such as `price * quantity * (1 + taxRate)` are parsed into an
//! expression tree, evaluated per row (or once per dataset for grouped and
//! ranked columns), and kept up to date by a manager that tracks which
//! calculated columns read which others.
//!
//! ## Quick Start
//!
//! ```ignore
//! use calcol::{CalculationManager, Dataset, Row};
//!
//! let dataset = Dataset::new(vec![
//!     Row::new(1).with_field("value", 100.0),
//!     Row::new(2).with_field("value", 5.0),
//! ]);
//! let mut manager = CalculationManager::new(dataset);
//!
//! manager.add_formula("Double", "doubleValue", "value * 2")?;
//! manager.add_formula("Reference", "referenceValue", "doubleValue + 100")?;
//!
//! // { "doubleValue": {1: 200, 2: 10}, "referenceValue": {1: 300, 2: 110} }
//! let columns = manager.virtual_columns();
//! ```
//!
//! ## Standalone Usage
//!
//! For one-off formulas without a manager:
//!
//! ```ignore
//! use calcol::{run, Fields, Value};
//!
//! let mut row = Fields::new();
//! row.insert("price".into(), Value::from(12.5));
//! let total = run("price * 2", &row)?;
//! ```
//!
//! ## Formula Syntax
//!
//! - Arithmetic `+ - * / ^`, comparison `== != < <= > >=`, logic `&& || !`
//! - `cond ? a : b`, function calls `max(a, b)`, `// comments`
//! - Bare identifiers read row fields and other calculated columns

mod ast;
mod dataset;
mod eval;
mod functions;
mod graph;
mod manager;
mod parse;
mod pretty;
mod value;

use thiserror::Error;

// ============ Primary Public API ============

pub use ast::{CalculationDefinition, CalculationId, CalculationPatch};
pub use dataset::{Dataset, Fields, Row, RowId, RowSource};
pub use manager::{CalculationManager, ColumnValues, ExecutionReport, ManagerError, RowFailure};
pub use value::Value;

/// Parse and evaluate a one-off formula against a single row
pub fn run(formula: &str, row: &Fields) -> Result<Value, CalcolError> {
    let expr = parse::parse(formula)?;
    let value = eval::eval_scalar(&expr, &EvalContext::new(row, &[]))?;
    Ok(value)
}

// ============ Errors ============

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalcolError {
    #[error("Parse error: {0}")]
    Parse(#[from] parse::ParseError),
    #[error("Eval error: {0}")]
    Eval(#[from] eval::EvalError),
    #[error("Calculation error: {0}")]
    Manager(#[from] manager::ManagerError),
}

pub use eval::EvalError;
pub use graph::Cycle;
pub use parse::ParseError;

// ============ Expressions and Evaluation ============

pub use ast::{Aggregation, BinOp, ExprId, ExprKind, Expression, Literal, UnaryOp};
pub use eval::{EvalContext, Evaluation, eval_scalar, evaluate, group_key};
pub use functions::{Function, FunctionHandler, FunctionRegistry};
pub use parse::parse;

// ============ Advanced ============

/// Lower-level pieces (for custom managers or introspection)
pub mod advanced {
    pub use crate::graph::DependencyGraph;
    pub use crate::pretty::pretty;
}
