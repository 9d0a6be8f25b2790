//! Parser for calculated-column formulas
//!
//! Produces an `Expression` tree whose nodes already carry their dependency
//! sets. Bare identifiers become `Literal::Ident` reads; an identifier directly
//! followed by `(` is a function call and is not a dependency.

use winnow::ascii::{digit1, multispace1, till_line_ending};
use winnow::combinator::{alt, cut_err, fail, not, opt, preceded, repeat, separated, terminated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::stream::{Stateful, Stream};
use winnow::token::{one_of, take_while};

use crate::ast::{BinOp, Expression, UnaryOp};

type PResult<T> = winnow::ModalResult<T>;

/// Parser recursion allowed per formula. Parentheses, call arguments,
/// ternary branches, prefix operators and `^` operands each take a level.
const MAX_NESTING: usize = 48;

/// Tallest tree a left-associative operator chain may build
const MAX_HEIGHT: usize = 256;

#[derive(Debug, Clone, Default)]
struct Nesting {
    depth: usize,
    exceeded: bool,
}

type Input<'i> = Stateful<&'i str, Nesting>;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, column {}, offset {})",
            self.message, self.line, self.column, self.offset
        )
    }
}

impl std::error::Error for ParseError {}

/// Parse a formula from a string
pub fn parse(input: &str) -> Result<Expression, ParseError> {
    let mut stream = Input {
        input,
        state: Nesting::default(),
    };
    if ws.parse_next(&mut stream).is_ok() && stream.input.is_empty() {
        return Err(build_parse_error("empty formula".to_string(), input, input.len()));
    }

    let mut stream = Input {
        input,
        state: Nesting::default(),
    };
    match terminated(expr, ws).parse_next(&mut stream) {
        Ok(parsed) => {
            if stream.input.is_empty() {
                Ok(parsed)
            } else {
                let offset = trailing_input_offset(input, stream.input);
                Err(build_parse_error(
                    "unexpected trailing input".to_string(),
                    input,
                    offset,
                ))
            }
        }
        Err(ErrMode::Backtrack(e) | ErrMode::Cut(e)) => {
            let offset = input.len().saturating_sub(stream.input.len());
            let message = if stream.state.exceeded {
                "formula nested too deeply".to_string()
            } else {
                describe_error(&e)
            };
            Err(build_parse_error(message, input, offset))
        }
        Err(ErrMode::Incomplete(_)) => Err(build_parse_error(
            "unexpected end of input".to_string(),
            input,
            input.len(),
        )),
    }
}

fn describe_error(e: &ContextError) -> String {
    let mut label = None;
    let mut expected = Vec::new();
    for ctx in e.context() {
        match ctx {
            StrContext::Label(l) => label = label.or(Some(*l)),
            StrContext::Expected(v) => expected.push(v.to_string()),
            _ => {}
        }
    }

    match (label, expected.is_empty()) {
        (Some(label), false) => format!("invalid {label}: expected {}", expected.join(" or ")),
        (Some(label), true) => format!("invalid {label}"),
        (None, false) => format!("expected {}", expected.join(" or ")),
        (None, true) => "unexpected input".to_string(),
    }
}

fn build_parse_error(message: String, input: &str, offset: usize) -> ParseError {
    let (line, column) = offset_to_line_column(input, offset);
    ParseError {
        message,
        offset,
        line,
        column,
    }
}

fn offset_to_line_column(input: &str, offset: usize) -> (usize, usize) {
    let bounded = offset.min(input.len());
    let mut line = 1usize;
    let mut column = 1usize;

    for ch in input[..bounded].chars() {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }

    (line, column)
}

fn trailing_input_offset(input: &str, trailing: &str) -> usize {
    input.len().saturating_sub(trailing.len())
}

fn expected_char(c: char) -> StrContext {
    StrContext::Expected(StrContextValue::CharLiteral(c))
}

// ============ Top-level expression (handles precedence) ============

fn expr(input: &mut Input<'_>) -> PResult<Expression> {
    nested(ternary_expr).parse_next(input)
}

/// Run `parser` one nesting level deeper, failing once `MAX_NESTING` is hit
fn nested<'i, O, P>(mut parser: P) -> impl Parser<Input<'i>, O, ErrMode<ContextError>>
where
    P: Parser<Input<'i>, O, ErrMode<ContextError>>,
{
    move |input: &mut Input<'i>| {
        if input.state.depth >= MAX_NESTING {
            return Err(too_deep(input));
        }
        input.state.depth += 1;
        let result = parser.parse_next(input);
        input.state.depth -= 1;
        result
    }
}

fn too_deep(input: &mut Input<'_>) -> ErrMode<ContextError> {
    input.state.exceeded = true;
    ErrMode::Cut(ContextError::new())
}

fn ternary_expr(input: &mut Input<'_>) -> PResult<Expression> {
    let condition = or_expr.parse_next(input)?;
    let branches = opt(preceded(
        (ws, '?'),
        cut_err((
            expr.context(StrContext::Label("ternary"))
                .context(StrContext::Expected(StrContextValue::Description("expression"))),
            preceded((ws, ':'.context(expected_char(':'))), expr),
        )),
    ))
    .parse_next(input)?;

    Ok(match branches {
        Some((t, f)) => Expression::ternary(condition, t, f),
        None => condition,
    })
}

fn or_expr(input: &mut Input<'_>) -> PResult<Expression> {
    let first = and_expr.parse_next(input)?;
    let rest: Vec<(BinOp, Expression)> = repeat(
        0..,
        preceded((ws, "||"), rhs(and_expr)).map(|r| (BinOp::Or, r)),
    )
    .parse_next(input)?;
    fold_left(input, first, rest)
}

fn and_expr(input: &mut Input<'_>) -> PResult<Expression> {
    let first = eq_expr.parse_next(input)?;
    let rest: Vec<(BinOp, Expression)> = repeat(
        0..,
        preceded((ws, "&&"), rhs(eq_expr)).map(|r| (BinOp::And, r)),
    )
    .parse_next(input)?;
    fold_left(input, first, rest)
}

fn eq_expr(input: &mut Input<'_>) -> PResult<Expression> {
    let first = rel_expr.parse_next(input)?;
    let rest: Vec<(BinOp, Expression)> =
        repeat(0.., (preceded(ws, eq_op), rhs(rel_expr))).parse_next(input)?;
    fold_left(input, first, rest)
}

fn eq_op(input: &mut Input<'_>) -> PResult<BinOp> {
    alt(("==".value(BinOp::Eq), "!=".value(BinOp::Ne))).parse_next(input)
}

fn rel_expr(input: &mut Input<'_>) -> PResult<Expression> {
    let first = add_expr.parse_next(input)?;
    let rest: Vec<(BinOp, Expression)> =
        repeat(0.., (preceded(ws, rel_op), rhs(add_expr))).parse_next(input)?;
    fold_left(input, first, rest)
}

fn rel_op(input: &mut Input<'_>) -> PResult<BinOp> {
    alt((
        "<=".value(BinOp::Le),
        ">=".value(BinOp::Ge),
        "<".value(BinOp::Lt),
        ">".value(BinOp::Gt),
    ))
    .parse_next(input)
}

fn add_expr(input: &mut Input<'_>) -> PResult<Expression> {
    let first = mul_expr.parse_next(input)?;
    let rest: Vec<(BinOp, Expression)> =
        repeat(0.., (preceded(ws, add_op), rhs(mul_expr))).parse_next(input)?;
    fold_left(input, first, rest)
}

fn add_op(input: &mut Input<'_>) -> PResult<BinOp> {
    alt(('+'.value(BinOp::Add), '-'.value(BinOp::Sub))).parse_next(input)
}

fn mul_expr(input: &mut Input<'_>) -> PResult<Expression> {
    let first = pow_expr.parse_next(input)?;
    let rest: Vec<(BinOp, Expression)> =
        repeat(0.., (preceded(ws, mul_op), rhs(pow_expr))).parse_next(input)?;
    fold_left(input, first, rest)
}

fn mul_op(input: &mut Input<'_>) -> PResult<BinOp> {
    // `//` starts a comment, never a division
    alt((
        '*'.value(BinOp::Mul),
        terminated('/', not('/')).value(BinOp::Div),
    ))
    .parse_next(input)
}

/// `^` is right-associative: `2 ^ 3 ^ 2` is `2 ^ (3 ^ 2)`
fn pow_expr(input: &mut Input<'_>) -> PResult<Expression> {
    let base = unary_expr.parse_next(input)?;
    let exponent = opt(preceded((ws, '^'), rhs(nested(pow_expr)))).parse_next(input)?;
    Ok(match exponent {
        Some(exp) => Expression::basic(BinOp::Pow, base, exp),
        None => base,
    })
}

fn unary_expr(input: &mut Input<'_>) -> PResult<Expression> {
    let op = opt(preceded(
        ws,
        alt((
            '-'.value(UnaryOp::Neg),
            '+'.value(UnaryOp::Plus),
            terminated('!', not('=')).value(UnaryOp::Not),
        )),
    ))
    .parse_next(input)?;

    match op {
        Some(op) => {
            let operand = rhs(nested(unary_expr)).parse_next(input)?;
            Ok(Expression::unary(op, operand))
        }
        None => primary.parse_next(input),
    }
}

/// Right-hand operand: once an operator is consumed a missing operand is a
/// hard error
fn rhs<'a, P>(parser: P) -> impl Parser<Input<'a>, Expression, ErrMode<ContextError>>
where
    P: Parser<Input<'a>, Expression, ErrMode<ContextError>>,
{
    cut_err(
        parser
            .context(StrContext::Label("operand"))
            .context(StrContext::Expected(StrContextValue::Description(
                "expression",
            ))),
    )
}

fn fold_left(
    input: &mut Input<'_>,
    first: Expression,
    rest: Vec<(BinOp, Expression)>,
) -> PResult<Expression> {
    let tallest = rest
        .iter()
        .map(|(_, r)| r.height())
        .fold(first.height(), usize::max);
    if tallest + rest.len() > MAX_HEIGHT {
        return Err(too_deep(input));
    }
    Ok(rest
        .into_iter()
        .fold(first, |l, (op, r)| Expression::basic(op, l, r)))
}

// ============ Primary expressions ============

fn primary(input: &mut Input<'_>) -> PResult<Expression> {
    preceded(
        ws,
        alt((
            paren_expr,
            number_lit.map(Expression::number),
            string_lit.map(Expression::string),
            word,
        )),
    )
    .parse_next(input)
}

fn paren_expr(input: &mut Input<'_>) -> PResult<Expression> {
    preceded(
        '(',
        cut_err(terminated(
            expr.context(StrContext::Label("parenthesized expression"))
                .context(StrContext::Expected(StrContextValue::Description(
                    "expression",
                ))),
            (ws, ')'.context(expected_char(')'))),
        )),
    )
    .parse_next(input)
}

/// Keyword, identifier, or function call
fn word(input: &mut Input<'_>) -> PResult<Expression> {
    let name = ident_str.parse_next(input)?;

    if let Some(args) = opt(preceded(ws, call_args)).parse_next(input)? {
        return Ok(Expression::call(name, args));
    }

    Ok(match name.to_ascii_lowercase().as_str() {
        "true" => Expression::bool(true),
        "false" => Expression::bool(false),
        "null" => Expression::null(),
        _ => Expression::ident(name),
    })
}

fn call_args(input: &mut Input<'_>) -> PResult<Vec<Expression>> {
    preceded(
        '(',
        cut_err(terminated(
            opt(separated(1.., expr, (ws, ',')))
                .map(|args: Option<Vec<Expression>>| args.unwrap_or_default()),
            (ws, ')'.context(expected_char(')'))),
        ))
        .context(StrContext::Label("argument list")),
    )
    .parse_next(input)
}

// ============ Identifiers ============

fn ident_str(input: &mut Input<'_>) -> PResult<String> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_' || c == '$'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '$'),
    )
        .take()
        .map(str::to_string)
        .parse_next(input)
}

// ============ Literals ============

fn number_lit(input: &mut Input<'_>) -> PResult<f64> {
    let exponent = (one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1);
    let text = alt((
        (digit1, opt(('.', digit1)), opt(exponent)).take(),
        ('.', digit1, opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1))).take(),
    ))
    .parse_next(input)?;

    match text.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => cut_err(
            fail::<_, f64, _>
                .context(StrContext::Label("number literal"))
                .context(StrContext::Expected(StrContextValue::Description(
                    "finite number",
                ))),
        )
        .parse_next(input),
    }
}

fn string_lit(input: &mut Input<'_>) -> PResult<String> {
    alt((quoted('"'), quoted('\''))).parse_next(input)
}

fn quoted<'a>(quote: char) -> impl FnMut(&mut Input<'a>) -> PResult<String> {
    move |input: &mut Input<'a>| {
        preceded(
            quote,
            cut_err(terminated(string_contents(quote), quote))
                .context(StrContext::Label("string literal"))
                .context(StrContext::Expected(StrContextValue::Description(
                    "closing quote",
                ))),
        )
        .parse_next(input)
    }
}

fn string_contents<'a>(quote: char) -> impl FnMut(&mut Input<'a>) -> PResult<String> {
    move |input: &mut Input<'a>| {
        let mut result = String::new();
        loop {
            let mut chars = input.input.chars();
            let Some(c) = chars.next() else {
                return Err(ErrMode::Backtrack(ContextError::new()));
            };
            if c == quote {
                break;
            } else if c == '\\' {
                let Some(escaped) = chars.next() else {
                    return Err(ErrMode::Backtrack(ContextError::new()));
                };
                let unescaped = match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    // Quotes, backslash and unknown escapes pass through
                    other => other,
                };
                result.push(unescaped);
                input.next_slice(c.len_utf8() + escaped.len_utf8());
            } else {
                result.push(c);
                input.next_slice(c.len_utf8());
            }
        }
        Ok(result)
    }
}

// ============ Whitespace and comments ============

fn ws(input: &mut Input<'_>) -> PResult<()> {
    repeat(
        0..,
        alt((multispace1.void(), ("//", till_line_ending).void())),
    )
    .parse_next(input)
}

// ============ Sanity Tests ============
// Most testing is done via integration tests in tests/integration.rs

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExprKind;

    fn deps(src: &str) -> Vec<String> {
        parse(src).unwrap().dependencies().iter().cloned().collect()
    }

    #[test]
    fn parse_literals() {
        assert_eq!(parse("123").unwrap(), Expression::number(123.0));
        assert_eq!(parse("3.14").unwrap(), Expression::number(3.14));
        assert_eq!(parse("1e3").unwrap(), Expression::number(1000.0));
        assert_eq!(parse(".5").unwrap(), Expression::number(0.5));
        assert_eq!(parse("TRUE").unwrap(), Expression::bool(true));
        assert_eq!(parse("null").unwrap(), Expression::null());
        assert_eq!(parse(r#""hello""#).unwrap(), Expression::string("hello"));
        assert_eq!(parse("'it\\'s'").unwrap(), Expression::string("it's"));
    }

    #[test]
    fn parse_operator_precedence() {
        // a * b + c parses as (a * b) + c
        let result = parse("a * b + c").unwrap();
        if let ExprKind::Basic { op: BinOp::Add, left, .. } = result.kind() {
            assert!(matches!(left.kind(), ExprKind::Basic { op: BinOp::Mul, .. }));
        } else {
            panic!("Expected Add at top level");
        }

        // a && b || c parses as (a && b) || c
        let result = parse("a && b || c").unwrap();
        assert!(matches!(result.kind(), ExprKind::Basic { op: BinOp::Or, .. }));

        // a < b == c < d parses as (a < b) == (c < d)
        let result = parse("a < b == c < d").unwrap();
        assert!(matches!(result.kind(), ExprKind::Basic { op: BinOp::Eq, .. }));
    }

    #[test]
    fn parse_power_is_right_associative() {
        let expected = Expression::basic(
            BinOp::Pow,
            Expression::number(2.0),
            Expression::basic(BinOp::Pow, Expression::number(3.0), Expression::number(2.0)),
        );
        assert_eq!(parse("2 ^ 3 ^ 2").unwrap(), expected);
    }

    #[test]
    fn parse_unary_binds_tighter_than_power() {
        let expected = Expression::basic(
            BinOp::Pow,
            Expression::unary(UnaryOp::Neg, Expression::number(2.0)),
            Expression::number(2.0),
        );
        assert_eq!(parse("-2 ^ 2").unwrap(), expected);
        assert!(matches!(
            parse("!a").unwrap().kind(),
            ExprKind::Unary { op: UnaryOp::Not, .. }
        ));
    }

    #[test]
    fn parse_nested_ternary() {
        let result = parse("a ? b : c ? d : e").unwrap();
        let ExprKind::Ternary { false_branch, .. } = result.kind() else {
            panic!("Expected ternary");
        };
        assert!(matches!(false_branch.kind(), ExprKind::Ternary { .. }));
    }

    #[test]
    fn parse_calls_are_not_dependencies() {
        let result = parse("MAX(a, b * 2)").unwrap();
        assert!(matches!(result.kind(), ExprKind::FunctionCall { name, args } if name == "MAX" && args.len() == 2));
        assert_eq!(deps("MAX(a, b * 2)"), ["a", "b"]);
        assert_eq!(deps("now()"), Vec::<String>::new());
    }

    #[test]
    fn parse_string_contents_are_not_dependencies() {
        assert_eq!(deps(r#"kind == "kind""#), ["kind"]);
    }

    #[test]
    fn parse_comments_and_newlines() {
        let src = "price // unit price\n  * quantity // count\n";
        assert_eq!(deps(src), ["price", "quantity"]);
        assert!(matches!(
            parse("a / b").unwrap().kind(),
            ExprKind::Basic { op: BinOp::Div, .. }
        ));
    }

    #[test]
    fn parse_errors() {
        let err = parse("(1 + 2").unwrap_err();
        assert_eq!(err.offset, 6);
        assert!(err.message.contains(')'), "{}", err.message);

        assert!(parse("1 +").is_err());
        assert!(parse("f(1,)").is_err());
        assert!(parse("f(1 2)").is_err());
        assert!(parse("'abc").is_err());
        assert!(parse("a ? b").is_err());

        let err = parse("a b").unwrap_err();
        assert_eq!(err.message, "unexpected trailing input");
        assert_eq!(err.offset, 2);

        let err = parse("  // nothing here").unwrap_err();
        assert_eq!(err.message, "empty formula");

        let err = parse("x + 1e999").unwrap_err();
        assert!(err.message.contains("finite number"), "{}", err.message);
        assert_eq!(parse("1e308").unwrap(), Expression::number(1e308));
    }

    #[test]
    fn parse_rejects_deep_nesting() {
        let depth = 10_000;
        let src = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        let err = parse(&src).unwrap_err();
        assert_eq!(err.message, "formula nested too deeply");

        let src = format!("{}x", "-".repeat(depth));
        assert_eq!(parse(&src).unwrap_err().message, "formula nested too deeply");

        let src = vec!["2"; depth].join(" ^ ");
        assert_eq!(parse(&src).unwrap_err().message, "formula nested too deeply");

        let src = format!("{}1{}", "f(".repeat(depth), ")".repeat(depth));
        assert_eq!(parse(&src).unwrap_err().message, "formula nested too deeply");

        let src = vec!["x"; depth].join(" + ");
        assert_eq!(parse(&src).unwrap_err().message, "formula nested too deeply");
    }

    #[test]
    fn parse_accepts_reasonable_nesting() {
        let src = format!("{}x{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(parse(&src).unwrap(), Expression::ident("x"));

        let src = vec!["x"; 200].join(" + ");
        assert_eq!(parse(&src).unwrap().height(), 200);
    }

    #[test]
    fn parse_error_reports_line_and_column() {
        let err = parse("a +\n  (b").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 5);
    }
}
