//! Pretty printing for formulas
//!
//! `Display` renders an expression as formula text with the fewest parentheses
//! that keep the parse identical. `Expression::pretty` additionally breaks long
//! argument lists and ternaries across lines.

use std::fmt::{self, Display, Write};

use crate::ast::{Aggregation, BinOp, ExprKind, Expression, Literal, UnaryOp};

const TERNARY_PRECEDENCE: u8 = 1;
const UNARY_PRECEDENCE: u8 = 9;
const PRIMARY_PRECEDENCE: u8 = 10;

// ============ Display (single-line) ============

impl Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "\"{}\"", escape_string(s)),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Null => write!(f, "null"),
            Literal::Ident(name) => write!(f, "{}", name),
        }
    }
}

impl Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        write!(f, "{}", s)
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
        };
        write!(f, "{}", s)
    }
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Aggregation::Sum => "sum",
            Aggregation::Average => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Count => "count",
            Aggregation::CountUnique => "countunique",
        };
        write!(f, "{}", s)
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::Literal(lit) => write!(f, "{}", lit),
            ExprKind::Basic { op, left, right } => {
                let p = op.precedence();
                let (left_parens, right_parens) = if op.is_right_associative() {
                    (precedence(left) <= p, precedence(right) < p)
                } else {
                    (precedence(left) < p, precedence(right) <= p)
                };
                write_child(f, left, left_parens)?;
                write!(f, " {} ", op)?;
                write_child(f, right, right_parens)
            }
            ExprKind::Unary { op, operand } => {
                write!(f, "{}", op)?;
                write_child(f, operand, precedence(operand) < UNARY_PRECEDENCE)
            }
            ExprKind::Ternary {
                condition,
                true_branch,
                false_branch,
            } => {
                write_child(f, condition, precedence(condition) <= TERNARY_PRECEDENCE)?;
                write!(f, " ? {} : {}", true_branch, false_branch)
            }
            ExprKind::FunctionCall { name, args } => {
                write!(f, "{}(", name)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::Group {
                group_by,
                aggregation,
                field,
            } => {
                write!(f, "group(by: {}, {}", group_by.join(", "), aggregation)?;
                if let Some(field) = field {
                    write!(f, " of {}", field)?;
                }
                write!(f, ")")
            }
            ExprKind::Rank {
                rank_by,
                normalize,
                cumulative,
            } => {
                write!(f, "rank(by: {}", rank_by.join(", "))?;
                if *normalize {
                    write!(f, ", normalized")?;
                }
                if *cumulative {
                    write!(f, ", cumulative")?;
                }
                write!(f, ")")
            }
            ExprKind::Advanced {
                algorithm,
                inputs,
                params,
            } => {
                write!(f, "{}(inputs: {}", algorithm, inputs.join(", "))?;
                for (k, v) in params {
                    write!(f, ", {}: {}", k, v)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Binding power of the node as printed
fn precedence(expr: &Expression) -> u8 {
    match expr.kind() {
        ExprKind::Ternary { .. } => TERNARY_PRECEDENCE,
        ExprKind::Basic { op, .. } => op.precedence(),
        ExprKind::Unary { .. } => UNARY_PRECEDENCE,
        // Printed with a leading `-`
        ExprKind::Literal(Literal::Number(n)) if n.is_sign_negative() => UNARY_PRECEDENCE,
        _ => PRIMARY_PRECEDENCE,
    }
}

fn write_child(f: &mut fmt::Formatter<'_>, child: &Expression, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({})", child)
    } else {
        write!(f, "{}", child)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, args: &[Expression]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    Ok(())
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out
}

// ============ Line breaking ============

const INDENT: &str = "    ";

/// Pretty print an expression, breaking lines that exceed `width`
///
/// Function calls put one argument per line; ternaries put each branch on
/// its own line. Output always parses back to the same expression.
pub fn pretty(expr: &Expression, width: usize) -> String {
    let mut out = String::new();
    write_pretty(&mut out, expr, width, 0);
    out
}

fn write_pretty(out: &mut String, expr: &Expression, width: usize, depth: usize) {
    let one_line = expr.to_string();
    let available = width.saturating_sub(depth * INDENT.len());
    if one_line.len() <= available {
        out.push_str(&one_line);
        return;
    }

    match expr.kind() {
        ExprKind::FunctionCall { name, args } if !args.is_empty() => {
            let inner = INDENT.repeat(depth + 1);
            let _ = write!(out, "{}(", name);
            for (i, arg) in args.iter().enumerate() {
                out.push('\n');
                out.push_str(&inner);
                write_pretty(out, arg, width, depth + 1);
                if i + 1 < args.len() {
                    out.push(',');
                }
            }
            out.push('\n');
            out.push_str(&INDENT.repeat(depth));
            out.push(')');
        }
        ExprKind::Ternary {
            condition,
            true_branch,
            false_branch,
        } => {
            let inner = INDENT.repeat(depth + 1);
            if precedence(condition) <= TERNARY_PRECEDENCE {
                let _ = write!(out, "({})", condition);
            } else {
                out.push_str(&condition.to_string());
            }
            let _ = write!(out, "\n{}? ", inner);
            write_pretty(out, true_branch, width, depth + 1);
            let _ = write!(out, "\n{}: ", inner);
            write_pretty(out, false_branch, width, depth + 1);
        }
        _ => out.push_str(&one_line),
    }
}

impl Expression {
    /// Pretty print with line breaking at the given width
    pub fn pretty(&self, width: usize) -> String {
        pretty(self, width)
    }
}
