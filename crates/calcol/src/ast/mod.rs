//! AST types for calculated-column formulas
//!
//! Split into:
//! - `expr`: the `Expression` tree the parser produces and the evaluator consumes
//! - `definition`: a named calculation bound to an output column

mod definition;
mod expr;

pub use definition::{CalculationDefinition, CalculationId, CalculationPatch};
pub use expr::{ExprId, ExprKind, Expression};

// Shared leaf types used by the expression tree

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    /// Bare identifier. Evaluating it reads the named row variable, it is
    /// never treated as the text of the name.
    Ident(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Pow,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical
    And,
    Or,
}

impl BinOp {
    /// Binding power, loosest first. Ternary sits below all of these at 1.
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 2,
            BinOp::And => 3,
            BinOp::Eq | BinOp::Ne => 4,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 5,
            BinOp::Add | BinOp::Sub => 6,
            BinOp::Mul | BinOp::Div => 7,
            BinOp::Pow => 8,
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Pow
        )
    }

    pub fn is_right_associative(self) -> bool {
        matches!(self, BinOp::Pow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

/// Aggregation applied to each partition of a `Group` expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Average,
    Min,
    Max,
    Count,
    CountUnique,
}

impl Aggregation {
    /// Whether the aggregation reads a value field (count only needs rows)
    pub fn needs_field(self) -> bool {
        !matches!(self, Aggregation::Count)
    }
}

impl std::str::FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Aggregation::Sum),
            "average" | "avg" | "mean" => Ok(Aggregation::Average),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "count" => Ok(Aggregation::Count),
            "countunique" | "count_unique" => Ok(Aggregation::CountUnique),
            other => Err(format!("unknown aggregation: {other}")),
        }
    }
}
