//! Evaluator for formula expressions
//!
//! Scalar forms evaluate against one row's variables. `Group` and `Rank` read
//! every row in the context and produce one result for the whole dataset.
//! User-formula failures are always returned as `EvalError`, never panics.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use thiserror::Error;

use crate::ast::{Aggregation, BinOp, ExprKind, Expression, Literal, UnaryOp};
use crate::dataset::{Fields, Row, RowId};
use crate::functions::{BUILTINS, FunctionRegistry, describe};
use crate::value::Value;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Division by zero")]
    DivisionByZero,

    #[error("Invalid operand for '{op}': {value}")]
    InvalidOperand { op: String, value: String },

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Not implemented: {algorithm}")]
    NotImplemented { algorithm: String },

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Argument error in {function}(): {message}")]
    ArgError { function: String, message: String },
}

type Result<T> = std::result::Result<T, EvalError>;

/// Inputs visible to one evaluation
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Current row's fields, including already-published calculated columns
    pub variables: &'a Fields,
    /// Every row of the dataset, for `Group` and `Rank`
    pub rows: &'a [Row],
    pub functions: &'a FunctionRegistry,
}

impl<'a> EvalContext<'a> {
    pub fn new(variables: &'a Fields, rows: &'a [Row]) -> Self {
        Self {
            variables,
            rows,
            functions: &BUILTINS,
        }
    }

    pub fn with_functions(mut self, functions: &'a FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// Same rows and functions, different current row
    pub fn for_row(self, variables: &'a Fields) -> Self {
        Self { variables, ..self }
    }
}

/// Result of evaluating an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Per-row forms
    Scalar(Value),
    /// `Group`: aggregate per group key, in first-seen key order
    ByGroup(IndexMap<String, Value>),
    /// `Rank`: rank per row id
    ByRow(BTreeMap<RowId, Value>),
}

impl Evaluation {
    pub fn into_scalar(self) -> Option<Value> {
        match self {
            Evaluation::Scalar(v) => Some(v),
            _ => None,
        }
    }
}

/// Evaluate an expression in the given context
pub fn evaluate(expr: &Expression, ctx: &EvalContext<'_>) -> Result<Evaluation> {
    match expr.kind() {
        ExprKind::Group {
            group_by,
            aggregation,
            field,
        } => eval_group(ctx.rows, group_by, *aggregation, field.as_deref()).map(Evaluation::ByGroup),
        ExprKind::Rank {
            rank_by,
            normalize,
            cumulative,
        } => Ok(Evaluation::ByRow(eval_rank(
            ctx.rows,
            rank_by,
            *normalize,
            *cumulative,
        ))),
        _ => eval_scalar(expr, ctx).map(Evaluation::Scalar),
    }
}

/// Evaluate an expression that must produce a single value
pub fn eval_scalar(expr: &Expression, ctx: &EvalContext<'_>) -> Result<Value> {
    match expr.kind() {
        ExprKind::Literal(lit) => eval_literal(lit, ctx),
        ExprKind::Basic { op, left, right } => {
            let l = eval_scalar(left, ctx)?;
            let r = eval_scalar(right, ctx)?;
            eval_binary(*op, l, r)
        }
        ExprKind::Unary { op, operand } => {
            let v = eval_scalar(operand, ctx)?;
            eval_unary(*op, v)
        }
        ExprKind::Ternary {
            condition,
            true_branch,
            false_branch,
        } => {
            if eval_scalar(condition, ctx)?.is_truthy() {
                eval_scalar(true_branch, ctx)
            } else {
                eval_scalar(false_branch, ctx)
            }
        }
        ExprKind::FunctionCall { name, args } => eval_call(name, args, ctx),
        ExprKind::Group { .. } | ExprKind::Rank { .. } => Err(EvalError::InvalidOperand {
            op: "scalar".to_string(),
            value: format!("whole-dataset expression {}", expr),
        }),
        ExprKind::Advanced { algorithm, .. } => Err(EvalError::NotImplemented {
            algorithm: algorithm.clone(),
        }),
    }
}

/// `Literal::Ident` is a variable read; every other literal is a constant
fn eval_literal(lit: &Literal, ctx: &EvalContext<'_>) -> Result<Value> {
    match lit {
        Literal::Ident(name) => ctx
            .variables
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
        Literal::Number(n) => Ok(Value::Number(*n)),
        Literal::String(s) => Ok(Value::String(s.clone())),
        Literal::Bool(b) => Ok(Value::Bool(*b)),
        Literal::Null => Ok(Value::Null),
    }
}

fn eval_binary(op: BinOp, l: Value, r: Value) -> Result<Value> {
    let b = match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Pow => {
            return eval_arithmetic(op, &l, &r);
        }
        BinOp::Eq => l == r,
        BinOp::Ne => l != r,
        BinOp::Lt => l.partial_compare(&r) == Some(Ordering::Less),
        BinOp::Le => matches!(l.partial_compare(&r), Some(Ordering::Less | Ordering::Equal)),
        BinOp::Gt => l.partial_compare(&r) == Some(Ordering::Greater),
        BinOp::Ge => matches!(
            l.partial_compare(&r),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        BinOp::And => l.is_truthy() && r.is_truthy(),
        BinOp::Or => l.is_truthy() || r.is_truthy(),
    };
    Ok(Value::Bool(b))
}

fn eval_arithmetic(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    let a = number_operand(op, l)?;
    let b = number_operand(op, r)?;
    let n = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div if b == 0.0 => return Err(EvalError::DivisionByZero),
        BinOp::Div => a / b,
        _ => a.powf(b),
    };
    // Overflow and NaN are failures, never published as numbers
    if !n.is_finite() {
        return Err(EvalError::InvalidOperand {
            op: op.to_string(),
            value: format!("{a} {op} {b} has no finite result"),
        });
    }
    Ok(Value::Number(n))
}

fn number_operand(op: impl ToString, v: &Value) -> Result<f64> {
    v.to_number().ok_or_else(|| EvalError::InvalidOperand {
        op: op.to_string(),
        value: describe(v),
    })
}

fn eval_unary(op: UnaryOp, v: Value) -> Result<Value> {
    match op {
        UnaryOp::Neg => Ok(Value::Number(-number_operand(op, &v)?)),
        UnaryOp::Plus => Ok(Value::Number(number_operand(op, &v)?)),
        UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
    }
}

fn eval_call(name: &str, args: &[Expression], ctx: &EvalContext<'_>) -> Result<Value> {
    let function = ctx
        .functions
        .get(name)
        .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;

    let mut values = args
        .iter()
        .map(|arg| eval_scalar(arg, ctx))
        .collect::<Result<Vec<_>>>()?;

    if function.takes_date() {
        if let Some(first) = values.first_mut() {
            // A quoted column name still names the column
            let named = match first {
                Value::String(s) if is_identifier(s) => ctx.variables.get(s.as_str()).cloned(),
                _ => None,
            };
            if let Some(v) = named {
                *first = v;
            }
            let date = first
                .to_date()
                .ok_or_else(|| EvalError::InvalidDate(first.to_string()))?;
            *first = Value::Date(date);
        }
    }

    function.call(&values)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// ============ Whole-dataset forms ============

/// Key of the group a row falls in: the `group_by` values joined with `|`.
/// Missing fields count as null.
pub fn group_key(fields: &Fields, group_by: &[String]) -> String {
    group_by
        .iter()
        .map(|name| fields.get(name).unwrap_or(&Value::Null).to_string())
        .collect::<Vec<_>>()
        .join("|")
}

fn eval_group(
    rows: &[Row],
    group_by: &[String],
    aggregation: Aggregation,
    field: Option<&str>,
) -> Result<IndexMap<String, Value>> {
    let field = match (aggregation.needs_field(), field) {
        (true, None) => {
            return Err(EvalError::ArgError {
                function: aggregation.to_string(),
                message: "aggregation needs a value field".to_string(),
            });
        }
        (_, field) => field,
    };

    let mut partitions: IndexMap<String, Vec<&Row>> = IndexMap::new();
    for row in rows {
        partitions
            .entry(group_key(&row.fields, group_by))
            .or_default()
            .push(row);
    }

    partitions
        .into_iter()
        .map(|(key, members)| {
            let values: Vec<&Value> = match field {
                Some(f) => members
                    .iter()
                    .filter_map(|row| row.get(f))
                    .filter(|v| !v.is_null())
                    .collect(),
                None => Vec::new(),
            };
            let value = aggregate(aggregation, members.len(), &values)?;
            Ok((key, value))
        })
        .collect()
}

fn aggregate(aggregation: Aggregation, row_count: usize, values: &[&Value]) -> Result<Value> {
    let numbers = || -> Result<Vec<f64>> {
        values
            .iter()
            .map(|v| number_operand(aggregation, v))
            .collect()
    };

    Ok(match aggregation {
        Aggregation::Count => Value::Number(row_count as f64),
        Aggregation::CountUnique => {
            let distinct: HashSet<String> = values
                .iter()
                .map(|v| format!("{}:{}", v.type_name(), v))
                .collect();
            Value::Number(distinct.len() as f64)
        }
        Aggregation::Sum => Value::Number(numbers()?.iter().sum()),
        Aggregation::Average => {
            let ns = numbers()?;
            if ns.is_empty() {
                Value::Null
            } else {
                Value::Number(ns.iter().sum::<f64>() / ns.len() as f64)
            }
        }
        Aggregation::Min => numbers()?
            .into_iter()
            .reduce(f64::min)
            .map_or(Value::Null, Value::Number),
        Aggregation::Max => numbers()?
            .into_iter()
            .reduce(f64::max)
            .map_or(Value::Null, Value::Number),
    })
}

fn eval_rank(
    rows: &[Row],
    rank_by: &[String],
    normalize: bool,
    cumulative: bool,
) -> BTreeMap<RowId, Value> {
    let mut sorted: Vec<&Row> = rows.iter().collect();
    // Stable: ties keep dataset order
    sorted.sort_by(|a, b| {
        rank_by
            .iter()
            .map(|field| {
                let av = a.get(field).unwrap_or(&Value::Null);
                let bv = b.get(field).unwrap_or(&Value::Null);
                av.sort_cmp(bv)
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    });

    let n = sorted.len() as f64;
    let mut running = 0.0;
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let mut rank = (i + 1) as f64;
            if normalize {
                rank /= n;
            }
            if cumulative {
                running += rank;
                rank = running;
            }
            (row.id, Value::Number(rank))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn eval_src(src: &str, vars: &Fields) -> Result<Value> {
        let expr = parse(src).unwrap();
        eval_scalar(&expr, &EvalContext::new(vars, &[]))
    }

    fn sales_rows() -> Vec<Row> {
        [
            (1, "east", 10.0),
            (2, "west", 5.0),
            (3, "east", 30.0),
            (4, "west", 5.0),
            (5, "north", 7.0),
        ]
        .into_iter()
        .map(|(id, region, sales)| {
            Row::new(id)
                .with_field("region", region)
                .with_field("sales", sales)
        })
        .collect()
    }

    #[test]
    fn arithmetic_precedence() {
        let vars = Fields::new();
        assert_eq!(eval_src("2 + 3 * 4", &vars).unwrap(), Value::Number(14.0));
        assert_eq!(eval_src("(2 + 3) * 4", &vars).unwrap(), Value::Number(20.0));
        assert_eq!(eval_src("2 ^ 3", &vars).unwrap(), Value::Number(8.0));
        assert_eq!(eval_src("2 ^ 3 ^ 2", &vars).unwrap(), Value::Number(512.0));
        assert_eq!(eval_src("10 - 4 - 3", &vars).unwrap(), Value::Number(3.0));
        assert_eq!(eval_src("-2 ^ 2", &vars).unwrap(), Value::Number(4.0));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let vars = Fields::new();
        assert_eq!(eval_src("5 / 0", &vars), Err(EvalError::DivisionByZero));
        assert_eq!(eval_src("5 / 2", &vars).unwrap(), Value::Number(2.5));
    }

    #[test]
    fn non_finite_results_are_errors() {
        let vars = Fields::new();
        for src in ["(0 - 1) ^ 0.5", "0 ^ -1", "1e308 * 10", "-1e308 - 1e308"] {
            assert!(
                matches!(eval_src(src, &vars), Err(EvalError::InvalidOperand { .. })),
                "{src}"
            );
        }
        assert_eq!(eval_src("4 ^ 0.5", &vars).unwrap(), Value::Number(2.0));
    }

    #[test]
    fn arithmetic_rejects_non_numbers() {
        let vars = fields(&[("name", Value::from("abc")), ("empty", Value::Null)]);
        assert!(matches!(
            eval_src("name * 2", &vars),
            Err(EvalError::InvalidOperand { .. })
        ));
        assert!(matches!(
            eval_src("empty + 1", &vars),
            Err(EvalError::InvalidOperand { .. })
        ));
        assert_eq!(eval_src("'4' * 2", &vars).unwrap(), Value::Number(8.0));
    }

    #[test]
    fn comparisons_do_not_coerce() {
        let vars = fields(&[("x", Value::from(5.0)), ("s", Value::from("5"))]);
        assert_eq!(eval_src("x == 5", &vars).unwrap(), Value::Bool(true));
        assert_eq!(eval_src("s == 5", &vars).unwrap(), Value::Bool(false));
        assert_eq!(eval_src("s < 6", &vars).unwrap(), Value::Bool(false));
        assert_eq!(eval_src("'a' < 'b'", &vars).unwrap(), Value::Bool(true));
        assert_eq!(eval_src("x >= 5 && x != 6", &vars).unwrap(), Value::Bool(true));
        assert_eq!(eval_src("!x || null", &vars).unwrap(), Value::Bool(false));
    }

    #[test]
    fn identifiers_read_row_variables() {
        let vars = fields(&[("price", Value::from(10.0)), ("quantity", Value::from(3.0))]);
        assert_eq!(
            eval_src("price * quantity", &vars).unwrap(),
            Value::Number(30.0)
        );
        assert_eq!(
            eval_src("price * taxRate", &vars),
            Err(EvalError::UndefinedVariable("taxRate".to_string()))
        );
        // A quoted name is text, not a read
        assert_eq!(eval_src("'price'", &vars).unwrap(), Value::from("price"));
    }

    #[test]
    fn ternary_only_evaluates_selected_branch() {
        let vars = fields(&[("x", Value::from(0.0))]);
        assert_eq!(eval_src("x == 0 ? 1 : 1 / x", &vars).unwrap(), Value::Number(1.0));
        assert_eq!(eval_src("x ? missing : 'no'", &vars).unwrap(), Value::from("no"));
    }

    #[test]
    fn unary_operators() {
        let vars = fields(&[("x", Value::from(2.0))]);
        assert_eq!(eval_src("-x", &vars).unwrap(), Value::Number(-2.0));
        assert_eq!(eval_src("+x", &vars).unwrap(), Value::Number(2.0));
        assert_eq!(eval_src("!x", &vars).unwrap(), Value::Bool(false));
        assert!(matches!(
            eval_src("-'abc'", &vars),
            Err(EvalError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn function_calls() {
        let vars = fields(&[("a", Value::from(3.0)), ("b", Value::from(9.0))]);
        assert_eq!(eval_src("MAX(a, b, 4)", &vars).unwrap(), Value::Number(9.0));
        assert_eq!(eval_src("avg(a, b)", &vars).unwrap(), Value::Number(6.0));
        assert_eq!(
            eval_src("nope(a)", &vars),
            Err(EvalError::UnknownFunction("nope".to_string()))
        );
        assert_eq!(
            eval_src("pca(a, b)", &vars),
            Err(EvalError::NotImplemented {
                algorithm: "pca".to_string()
            })
        );
    }

    #[test]
    fn date_functions_coerce_first_argument() {
        let vars = fields(&[
            ("orderDate", Value::from("2024-03-09")),
            ("bad", Value::from("not a date")),
        ]);
        assert_eq!(
            eval_src("formatDate(orderDate, 'dd/MM/yyyy')", &vars).unwrap(),
            Value::from("09/03/2024")
        );
        assert_eq!(
            eval_src("extractDateComponent('orderDate', 'month')", &vars).unwrap(),
            Value::Number(3.0)
        );
        assert_eq!(
            eval_src("extractDateComponent('2023-12-31', 'year')", &vars).unwrap(),
            Value::Number(2023.0)
        );
        assert_eq!(
            eval_src("formatDate(bad)", &vars),
            Err(EvalError::InvalidDate("not a date".to_string()))
        );
    }

    #[test]
    fn custom_registry() {
        let mut registry = FunctionRegistry::new();
        registry.register("clamp01", |args: &[Value]| {
            let n = args.first().and_then(Value::to_number).unwrap_or(0.0);
            Ok(Value::Number(n.clamp(0.0, 1.0)))
        });
        let vars = fields(&[("x", Value::from(4.0))]);
        let expr = parse("clamp01(x)").unwrap();
        let ctx = EvalContext::new(&vars, &[]).with_functions(&registry);
        assert_eq!(eval_scalar(&expr, &ctx).unwrap(), Value::Number(1.0));
    }

    #[test]
    fn group_aggregates_by_key() {
        let rows = sales_rows();
        let vars = Fields::new();
        let ctx = EvalContext::new(&vars, &rows);

        let sum = Expression::group(["region"], Aggregation::Sum, Some("sales"));
        let Evaluation::ByGroup(groups) = evaluate(&sum, &ctx).unwrap() else {
            panic!("Expected grouped result");
        };
        let keys: Vec<&str> = groups.keys().map(String::as_str).collect();
        assert_eq!(keys, ["east", "west", "north"]);
        assert_eq!(groups["east"], Value::Number(40.0));
        assert_eq!(groups["west"], Value::Number(10.0));

        let unique = Expression::group(["region"], Aggregation::CountUnique, Some("sales"));
        let Evaluation::ByGroup(groups) = evaluate(&unique, &ctx).unwrap() else {
            panic!("Expected grouped result");
        };
        assert_eq!(groups["west"], Value::Number(1.0));

        let count = Expression::group(["region"], Aggregation::Count, None);
        let Evaluation::ByGroup(groups) = evaluate(&count, &ctx).unwrap() else {
            panic!("Expected grouped result");
        };
        assert_eq!(groups["east"], Value::Number(2.0));

        let missing_field = Expression::group(["region"], Aggregation::Sum, None);
        assert!(matches!(
            evaluate(&missing_field, &ctx),
            Err(EvalError::ArgError { .. })
        ));
    }

    #[test]
    fn rank_orders_rows() {
        let rows = sales_rows();
        let vars = Fields::new();
        let ctx = EvalContext::new(&vars, &rows);

        let rank = Expression::rank(["sales"], false, false);
        let Evaluation::ByRow(ranks) = evaluate(&rank, &ctx).unwrap() else {
            panic!("Expected per-row result");
        };
        // 5.0 (row 2), 5.0 (row 4), 7.0, 10.0, 30.0
        assert_eq!(ranks[&2], Value::Number(1.0));
        assert_eq!(ranks[&4], Value::Number(2.0));
        assert_eq!(ranks[&5], Value::Number(3.0));
        assert_eq!(ranks[&3], Value::Number(5.0));

        let normalized = Expression::rank(["sales"], true, false);
        let Evaluation::ByRow(ranks) = evaluate(&normalized, &ctx).unwrap() else {
            panic!("Expected per-row result");
        };
        assert_eq!(ranks[&3], Value::Number(1.0));
        assert_eq!(ranks[&2], Value::Number(0.2));

        let cumulative = Expression::rank(["sales"], false, true);
        let Evaluation::ByRow(ranks) = evaluate(&cumulative, &ctx).unwrap() else {
            panic!("Expected per-row result");
        };
        assert_eq!(ranks[&4], Value::Number(3.0));
        assert_eq!(ranks[&3], Value::Number(15.0));
    }

    #[test]
    fn whole_dataset_forms_are_not_scalars() {
        let rows = sales_rows();
        let vars = Fields::new();
        let ctx = EvalContext::new(&vars, &rows);
        let rank = Expression::rank(["sales"], false, false);
        assert!(matches!(
            eval_scalar(&rank, &ctx),
            Err(EvalError::InvalidOperand { .. })
        ));

        let advanced = Expression::advanced("tsne", ["a", "b"], BTreeMap::new());
        assert_eq!(
            evaluate(&advanced, &ctx),
            Err(EvalError::NotImplemented {
                algorithm: "tsne".to_string()
            })
        );
    }
}
