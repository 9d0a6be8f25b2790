//! Function library
//!
//! Names are matched case-insensitively. Reserved names are known analytics
//! functions that exist as extension points only; calling one fails with
//! `NotImplemented` instead of `UnknownFunction`.

use std::collections::HashMap;
use std::fmt::{self, Write};
use std::sync::Arc;

use chrono::{Datelike, NaiveDateTime, Timelike};
use once_cell::sync::Lazy;

use crate::eval::EvalError;
use crate::value::Value;

type Result<T> = std::result::Result<T, EvalError>;

/// Native implementation of a function over its evaluated arguments
pub type FunctionHandler = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync + 'static>;

/// Names kept open for analytics that have no implementation yet
const RESERVED: &[&str] = &[
    "pca",
    "tsne",
    "umap",
    "regression",
    "linearregression",
    "median",
    "stddev",
    "variance",
    "concat",
    "upper",
    "lower",
];

pub(crate) static BUILTINS: Lazy<FunctionRegistry> = Lazy::new(FunctionRegistry::new);

#[derive(Clone)]
enum Implementation {
    Native(FunctionHandler),
    Reserved,
}

#[derive(Clone)]
pub struct Function {
    name: String,
    /// First argument is coerced to a date before the call
    takes_date: bool,
    implementation: Implementation,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn takes_date(&self) -> bool {
        self.takes_date
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        match &self.implementation {
            Implementation::Native(handler) => handler(args),
            Implementation::Reserved => Err(EvalError::NotImplemented {
                algorithm: self.name.clone(),
            }),
        }
    }
}

/// Registry of callable functions
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Function>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

impl FunctionRegistry {
    /// Registry with the built-in library and reserved names
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtins();
        for name in RESERVED {
            registry.reserve(*name);
        }
        registry
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a custom function, replacing any existing one with the same name
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(name.into(), false, Implementation::Native(Arc::new(handler)));
    }

    /// Register a function whose first argument is coerced to a date
    pub fn register_date_function<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(name.into(), true, Implementation::Native(Arc::new(handler)));
    }

    /// Reserve a name that resolves but fails with `NotImplemented`
    pub fn reserve(&mut self, name: impl Into<String>) {
        self.insert(name.into(), false, Implementation::Reserved);
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn insert(&mut self, name: String, takes_date: bool, implementation: Implementation) {
        let key = name.to_ascii_lowercase();
        self.functions.insert(
            key.clone(),
            Function {
                name: key,
                takes_date,
                implementation,
            },
        );
    }

    fn register_builtins(&mut self) {
        self.register("sum", |args| {
            let values = numeric_args("sum", args)?;
            Ok(Value::Number(values.iter().sum()))
        });
        self.register("avg", average);
        self.register("average", average);
        self.register("min", |args| {
            let values = numeric_args("min", args)?;
            Ok(values.into_iter().reduce(f64::min).map_or(Value::Null, Value::Number))
        });
        self.register("max", |args| {
            let values = numeric_args("max", args)?;
            Ok(values.into_iter().reduce(f64::max).map_or(Value::Null, Value::Number))
        });
        self.register("count", |args| {
            let n = args.iter().filter(|v| !v.is_null()).count();
            Ok(Value::Number(n as f64))
        });
        self.register_date_function("formatdate", format_date);
        self.register_date_function("extractdatecomponent", extract_date_component);
    }
}

// ============ Aggregates ============

/// Non-null arguments as numbers; a value that does not coerce is an error
fn numeric_args(function: &str, args: &[Value]) -> Result<Vec<f64>> {
    args.iter()
        .filter(|v| !v.is_null())
        .map(|v| {
            v.to_number().ok_or_else(|| EvalError::InvalidOperand {
                op: format!("{function}()"),
                value: describe(v),
            })
        })
        .collect()
}

fn average(args: &[Value]) -> Result<Value> {
    let values = numeric_args("avg", args)?;
    if values.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::Number(values.iter().sum::<f64>() / values.len() as f64))
}

pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{} \"{}\"", value.type_name(), s),
        other => format!("{} {}", other.type_name(), other),
    }
}

// ============ Dates ============

fn date_arg(function: &str, args: &[Value]) -> Result<NaiveDateTime> {
    match args.first() {
        Some(Value::Date(dt)) => Ok(*dt),
        Some(other) => Err(EvalError::InvalidDate(other.to_string())),
        None => Err(EvalError::ArgError {
            function: function.to_string(),
            message: "expected a date argument".to_string(),
        }),
    }
}

fn string_arg<'a>(function: &str, args: &'a [Value], idx: usize) -> Result<Option<&'a str>> {
    match args.get(idx) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(EvalError::ArgError {
            function: function.to_string(),
            message: format!("argument {} must be a string, got {}", idx + 1, other.type_name()),
        }),
    }
}

/// `formatdate(date, pattern)`; pattern defaults to `yyyy-MM-dd`
fn format_date(args: &[Value]) -> Result<Value> {
    let dt = date_arg("formatdate", args)?;
    let pattern = string_arg("formatdate", args, 1)?.unwrap_or("yyyy-MM-dd");
    let strftime = translate_pattern(pattern);

    let mut out = String::new();
    write!(out, "{}", dt.format(&strftime)).map_err(|_| EvalError::ArgError {
        function: "formatdate".to_string(),
        message: format!("invalid date pattern: {pattern}"),
    })?;
    Ok(Value::String(out))
}

/// Translate a `yyyy-MM-dd HH:mm:ss` style pattern into strftime
fn translate_pattern(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        // 'quoted' text is copied verbatim
        if c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }

        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }

        let spec = match (c, run) {
            ('y' | 'Y', 1 | 2) => Some("%y"),
            ('y' | 'Y', _) => Some("%Y"),
            ('M', 1) => Some("%-m"),
            ('M', 2) => Some("%m"),
            ('M', 3) => Some("%b"),
            ('M', _) => Some("%B"),
            ('d' | 'D', 1) => Some("%-d"),
            ('d' | 'D', 2) => Some("%d"),
            ('E', 1..=3) => Some("%a"),
            ('E', _) => Some("%A"),
            ('H', 1) => Some("%-H"),
            ('H', _) => Some("%H"),
            ('h', 1) => Some("%-I"),
            ('h', _) => Some("%I"),
            ('m', 1) => Some("%-M"),
            ('m', _) => Some("%M"),
            ('s', 1) => Some("%-S"),
            ('s', _) => Some("%S"),
            ('a' | 'A', _) => Some("%p"),
            _ => None,
        };

        match spec {
            Some(spec) => out.push_str(spec),
            None => (0..run).for_each(|_| push_literal(&mut out, c)),
        }
        i += run;
    }

    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

/// `extractdatecomponent(date, component)`
fn extract_date_component(args: &[Value]) -> Result<Value> {
    let dt = date_arg("extractdatecomponent", args)?;
    let component = string_arg("extractdatecomponent", args, 1)?.ok_or_else(|| {
        EvalError::ArgError {
            function: "extractdatecomponent".to_string(),
            message: "expected a component name".to_string(),
        }
    })?;

    let n = match component.to_ascii_lowercase().as_str() {
        "year" => dt.year() as f64,
        "quarter" => (dt.month0() / 3 + 1) as f64,
        "month" => dt.month() as f64,
        "week" => dt.iso_week().week() as f64,
        "day" | "date" => dt.day() as f64,
        // 0 = Sunday
        "dayofweek" | "weekday" => dt.weekday().num_days_from_sunday() as f64,
        "dayofyear" => dt.ordinal() as f64,
        "hour" => dt.hour() as f64,
        "minute" => dt.minute() as f64,
        "second" => dt.second() as f64,
        other => {
            return Err(EvalError::ArgError {
                function: "extractdatecomponent".to_string(),
                message: format!("unknown date component: {other}"),
            });
        }
    };
    Ok(Value::Number(n))
}
