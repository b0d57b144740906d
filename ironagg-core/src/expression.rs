// src/expression.rs
//! Expression evaluator
//!
//! A descriptor is compiled once into an [`Expr`] tree and then evaluated
//! against each document. Compilation never fails on unknown operator tags:
//! such mappings are literals. It fails only when `$fn` names a function the
//! registry does not know.

use crate::datetime::{diff_unit, Moment, DEFAULT_FORMAT};
use crate::error::{EngineError, Result};
use crate::functions::{Callable, Context, FunctionRegistry};
use crate::template::{format_named, format_positional};
use crate::value::Value;
use crate::value_utils::{compare_values, resolve_path};
use std::cmp::Ordering;

/// Every tag that compiles to an operator node
pub const OPERATOR_TAGS: &[&str] = &[
    "$fn",
    "$literal",
    "$add",
    "$subtract",
    "$multiply",
    "$divide",
    "$mod",
    "$eq",
    "$ne",
    "$gt",
    "$gte",
    "$lt",
    "$lte",
    "$and",
    "$or",
    "$not",
    "$substr",
    "$toLower",
    "$toUpper",
    "$size",
    "$dayOfMonth",
    "$dayOfWeek",
    "$dayOfYear",
    "$hour",
    "$minute",
    "$second",
    "$millisecond",
    "$month",
    "$week",
    "$year",
    "$valueOf",
    "$parse",
    "$diff",
    "$format",
];

pub fn is_operator_tag(tag: &str) -> bool {
    OPERATOR_TAGS.contains(&tag)
}

/// Binary comparison shared by expressions and query conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn from_tag(tag: &str) -> Option<CompareOp> {
        match tag {
            "$eq" => Some(CompareOp::Eq),
            "$ne" => Some(CompareOp::Ne),
            "$gt" => Some(CompareOp::Gt),
            "$gte" => Some(CompareOp::Gte),
            "$lt" => Some(CompareOp::Lt),
            "$lte" => Some(CompareOp::Lte),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Ne => "$ne",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
        }
    }

    /// Incomparable pairs satisfy only `$ne`
    pub fn apply(&self, left: &Value, right: &Value) -> bool {
        match self {
            CompareOp::Eq => left.strict_equals(right),
            CompareOp::Ne => !left.strict_equals(right),
            CompareOp::Gt => compare_values(left, right) == Some(Ordering::Greater),
            CompareOp::Gte => matches!(
                compare_values(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            CompareOp::Lt => compare_values(left, right) == Some(Ordering::Less),
            CompareOp::Lte => matches!(
                compare_values(left, right),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

/// Calendar component extracted by the date getter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    DayOfMonth,
    DayOfWeek,
    DayOfYear,
    Hour,
    Minute,
    Second,
    Millisecond,
    Month,
    Week,
    Year,
}

impl DatePart {
    pub fn from_tag(tag: &str) -> Option<DatePart> {
        match tag {
            "$dayOfMonth" => Some(DatePart::DayOfMonth),
            "$dayOfWeek" => Some(DatePart::DayOfWeek),
            "$dayOfYear" => Some(DatePart::DayOfYear),
            "$hour" => Some(DatePart::Hour),
            "$minute" => Some(DatePart::Minute),
            "$second" => Some(DatePart::Second),
            "$millisecond" => Some(DatePart::Millisecond),
            "$month" => Some(DatePart::Month),
            "$week" => Some(DatePart::Week),
            "$year" => Some(DatePart::Year),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            DatePart::DayOfMonth => "$dayOfMonth",
            DatePart::DayOfWeek => "$dayOfWeek",
            DatePart::DayOfYear => "$dayOfYear",
            DatePart::Hour => "$hour",
            DatePart::Minute => "$minute",
            DatePart::Second => "$second",
            DatePart::Millisecond => "$millisecond",
            DatePart::Month => "$month",
            DatePart::Week => "$week",
            DatePart::Year => "$year",
        }
    }

    pub fn extract(&self, moment: &Moment) -> f64 {
        match self {
            DatePart::DayOfMonth => moment.day_of_month(),
            DatePart::DayOfWeek => moment.day_of_week(),
            DatePart::DayOfYear => moment.day_of_year(),
            DatePart::Hour => moment.hour(),
            DatePart::Minute => moment.minute(),
            DatePart::Second => moment.second(),
            DatePart::Millisecond => moment.millisecond(),
            DatePart::Month => moment.month(),
            DatePart::Week => moment.week(),
            DatePart::Year => moment.year(),
        }
    }
}

/// Compiled expression tree
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    /// `$` or `$a.b`
    Field(String),
    Function(Callable),

    Add(Vec<Expr>),
    Subtract(Box<Expr>, Box<Expr>),
    Multiply(Vec<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),

    Compare(CompareOp, Box<Expr>, Box<Expr>),

    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),

    Substr {
        string: Box<Expr>,
        start: Box<Expr>,
        length: Option<Box<Expr>>,
    },
    ToLower(Box<Expr>),
    ToUpper(Box<Expr>),

    Size(Box<Expr>),

    DatePart(DatePart, Box<Expr>),
    ValueOf(Box<Expr>),
    Parse(Box<Expr>),
    Diff {
        from: Box<Expr>,
        to: Box<Expr>,
        unit: Option<Box<Expr>>,
    },
    /// `listed` records whether the operand was an array
    Format { args: Vec<Expr>, listed: bool },
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    /// Field reference; a leading `$` is added when missing
    pub fn field(path: &str) -> Expr {
        if path.starts_with('$') {
            Expr::Field(path.to_string())
        } else {
            Expr::Field(format!("${}", path))
        }
    }

    pub fn function<F>(func: F) -> Expr
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Expr::Function(Callable::new(func))
    }

    /// Compile a descriptor
    pub fn compile(descriptor: &Value, registry: &FunctionRegistry) -> Result<Expr> {
        match descriptor {
            Value::String(s) if s.starts_with('$') => Ok(Expr::Field(s.clone())),
            Value::Object(map) if map.len() == 1 => {
                let compiled = match map.first() {
                    Some((tag, operand)) => Self::compile_operator(tag, operand, registry)?,
                    None => None,
                };
                Ok(compiled.unwrap_or_else(|| Expr::Literal(descriptor.clone())))
            }
            _ => Ok(Expr::Literal(descriptor.clone())),
        }
    }

    /// `Ok(None)` when `tag` is not an operator
    fn compile_operator(
        tag: &str,
        operand: &Value,
        registry: &FunctionRegistry,
    ) -> Result<Option<Expr>> {
        let unary = |operand: &Value| -> Result<Box<Expr>> {
            Ok(Box::new(Expr::compile(operand, registry)?))
        };

        if let Some(op) = CompareOp::from_tag(tag) {
            let [left, right] = compile_pair(operand, registry)?;
            return Ok(Some(Expr::Compare(op, left, right)));
        }
        if let Some(part) = DatePart::from_tag(tag) {
            return Ok(Some(Expr::DatePart(part, unary(operand)?)));
        }

        let expr = match tag {
            "$fn" => match operand {
                Value::String(name) => Expr::Function(registry.resolve(name)?),
                other => {
                    return Err(EngineError::UnknownFunction(other.to_json().to_string()));
                }
            },
            "$literal" => Expr::Literal(operand.clone()),

            "$add" => Expr::Add(compile_list(operand, registry)?),
            "$multiply" => Expr::Multiply(compile_list(operand, registry)?),
            "$subtract" => {
                let [a, b] = compile_pair(operand, registry)?;
                Expr::Subtract(a, b)
            }
            "$divide" => {
                let [a, b] = compile_pair(operand, registry)?;
                Expr::Divide(a, b)
            }
            "$mod" => {
                let [a, b] = compile_pair(operand, registry)?;
                Expr::Mod(a, b)
            }

            "$and" => Expr::And(compile_list(operand, registry)?),
            "$or" => Expr::Or(compile_list(operand, registry)?),
            "$not" => Expr::Not(unary(operand)?),

            "$substr" => {
                let mut args = compile_list(operand, registry)?.into_iter();
                Expr::Substr {
                    string: Box::new(args.next().unwrap_or(Expr::Literal(Value::Undefined))),
                    start: Box::new(args.next().unwrap_or(Expr::Literal(Value::Undefined))),
                    length: args.next().map(Box::new),
                }
            }
            "$toLower" => Expr::ToLower(unary(operand)?),
            "$toUpper" => Expr::ToUpper(unary(operand)?),

            "$size" => Expr::Size(unary(operand)?),

            "$valueOf" => Expr::ValueOf(unary(operand)?),
            "$parse" => Expr::Parse(unary(operand)?),
            "$diff" => {
                let mut args = compile_list(operand, registry)?.into_iter();
                Expr::Diff {
                    from: Box::new(args.next().unwrap_or(Expr::Literal(Value::Undefined))),
                    to: Box::new(args.next().unwrap_or(Expr::Literal(Value::Undefined))),
                    unit: args.next().map(Box::new),
                }
            }
            "$format" => Expr::Format {
                args: compile_list(operand, registry)?,
                listed: matches!(operand, Value::Array(_)),
            },

            _ => return Ok(None),
        };
        Ok(Some(expr))
    }

    /// Evaluate against one document (or group array, for `$fn`)
    pub fn evaluate(&self, doc: &Value, ctx: &Context) -> Result<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Field(path) => Ok(resolve_path(doc, path)),
            Expr::Function(func) => Ok(func.call(doc)),

            Expr::Add(args) => self.eval_add(args, doc, ctx),
            Expr::Subtract(a, b) => {
                let left = a.evaluate(doc, ctx)?;
                let right = b.evaluate(doc, ctx)?;
                match (&left, &right) {
                    (Value::Date(d1), Value::Date(d2)) => {
                        Ok(Value::Number(d1.value_of() - d2.value_of()))
                    }
                    (Value::Date(d), offset) => {
                        Ok(Value::Date(d.add_millis(-to_number(offset, "$subtract")?)))
                    }
                    _ => Ok(Value::Number(
                        to_number(&left, "$subtract")? - to_number(&right, "$subtract")?,
                    )),
                }
            }
            Expr::Multiply(args) => {
                let mut product = 1.0;
                for arg in args {
                    product *= to_number(&arg.evaluate(doc, ctx)?, "$multiply")?;
                }
                Ok(Value::Number(product))
            }
            Expr::Divide(a, b) => self.eval_binary_numeric(a, b, doc, ctx, "$divide", |x, y| x / y),
            Expr::Mod(a, b) => self.eval_binary_numeric(a, b, doc, ctx, "$mod", |x, y| x % y),

            Expr::Compare(op, a, b) => {
                let left = a.evaluate(doc, ctx)?;
                let right = b.evaluate(doc, ctx)?;
                Ok(Value::Bool(op.apply(&left, &right)))
            }

            Expr::And(args) => {
                for arg in args {
                    if !arg.evaluate(doc, ctx)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Or(args) => {
                for arg in args {
                    if arg.evaluate(doc, ctx)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Not(arg) => Ok(Value::Bool(!arg.evaluate(doc, ctx)?.is_truthy())),

            Expr::Substr {
                string,
                start,
                length,
            } => {
                let text = expect_string(string.evaluate(doc, ctx)?, "$substr")?;
                let start = to_number(&start.evaluate(doc, ctx)?, "$substr")?;
                let length = match length {
                    Some(expr) => match expr.evaluate(doc, ctx)? {
                        Value::Undefined => None,
                        other => Some(to_number(&other, "$substr")?),
                    },
                    None => None,
                };
                Ok(Value::String(substr(&text, start, length)))
            }
            Expr::ToLower(arg) => {
                let text = expect_string(arg.evaluate(doc, ctx)?, "$toLower")?;
                Ok(Value::String(text.to_lowercase()))
            }
            Expr::ToUpper(arg) => {
                let text = expect_string(arg.evaluate(doc, ctx)?, "$toUpper")?;
                Ok(Value::String(text.to_uppercase()))
            }

            Expr::Size(arg) => match arg.evaluate(doc, ctx)? {
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::String(s) => Ok(Value::from(s.chars().count())),
                other => Err(type_error("$size", "an array", &other)),
            },

            Expr::DatePart(part, arg) => match arg.evaluate(doc, ctx)? {
                Value::Date(moment) => Ok(Value::Number(part.extract(&moment))),
                other => Err(type_error(part.tag(), "a date", &other)),
            },
            Expr::ValueOf(arg) => match arg.evaluate(doc, ctx)? {
                Value::Date(moment) => Ok(Value::Number(moment.value_of())),
                value @ (Value::Number(_) | Value::String(_) | Value::Bool(_)) => Ok(value),
                other => Err(type_error("$valueOf", "a date or primitive", &other)),
            },
            Expr::Parse(arg) => Ok(Value::Date(ctx.parse_date(&arg.evaluate(doc, ctx)?))),
            Expr::Diff { from, to, unit } => {
                let from = match from.evaluate(doc, ctx)? {
                    Value::Date(moment) => moment,
                    other => return Err(type_error("$diff", "a date", &other)),
                };
                let to = match to.evaluate(doc, ctx)? {
                    Value::Date(moment) => moment,
                    other => ctx.parse_date(&other),
                };
                let unit = match unit {
                    Some(expr) => diff_unit(Some(&expr.evaluate(doc, ctx)?))?,
                    None => diff_unit(None)?,
                };
                // second operand minus first
                Ok(Value::Number(-from.diff(&to, unit) + 0.0))
            }
            Expr::Format { args, listed } => self.eval_format(args, *listed, doc, ctx),
        }
    }

    fn eval_add(&self, args: &[Expr], doc: &Value, ctx: &Context) -> Result<Value> {
        let mut total = 0.0;
        let mut date: Option<Moment> = None;
        for arg in args {
            match arg.evaluate(doc, ctx)? {
                Value::Date(moment) => {
                    if date.is_some() {
                        return Err(EngineError::TypeError("$add cannot add two dates".to_string()));
                    }
                    date = Some(moment);
                }
                other => total += to_number(&other, "$add")?,
            }
        }
        Ok(match date {
            Some(moment) => Value::Date(moment.add_millis(total)),
            None => Value::Number(total),
        })
    }

    fn eval_binary_numeric(
        &self,
        a: &Expr,
        b: &Expr,
        doc: &Value,
        ctx: &Context,
        tag: &str,
        op: fn(f64, f64) -> f64,
    ) -> Result<Value> {
        let left = to_number(&a.evaluate(doc, ctx)?, tag)?;
        let right = to_number(&b.evaluate(doc, ctx)?, tag)?;
        Ok(Value::Number(op(left, right)))
    }

    fn eval_format(&self, args: &[Expr], listed: bool, doc: &Value, ctx: &Context) -> Result<Value> {
        let values = args
            .iter()
            .map(|arg| arg.evaluate(doc, ctx))
            .collect::<Result<Vec<Value>>>()?;

        let text = match (values.first(), listed) {
            (Some(Value::String(template)), false) => format_named(template, doc)?,
            (Some(Value::Date(moment)), false) => moment.format(DEFAULT_FORMAT),
            (Some(Value::String(template)), true) if values.len() == 1 => {
                format_named(template, doc)?
            }
            (Some(Value::String(template)), true) => format_positional(template, &values[1..])?,
            (Some(Value::Date(moment)), true) => match values.get(1) {
                None | Some(Value::Undefined) | Some(Value::Null) => moment.format(DEFAULT_FORMAT),
                Some(Value::String(pattern)) => moment.format(pattern),
                Some(other) => return Err(type_error("$format", "a pattern string", other)),
            },
            (Some(other), _) => return Err(type_error("$format", "a template or a date", other)),
            (None, _) => {
                return Err(EngineError::TypeError(
                    "$format requires at least one operand".to_string(),
                ))
            }
        };
        Ok(Value::String(text))
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

fn compile_list(operand: &Value, registry: &FunctionRegistry) -> Result<Vec<Expr>> {
    match operand {
        Value::Array(items) => items
            .iter()
            .map(|item| Expr::compile(item, registry))
            .collect(),
        other => Ok(vec![Expr::compile(other, registry)?]),
    }
}

fn compile_pair(operand: &Value, registry: &FunctionRegistry) -> Result<[Box<Expr>; 2]> {
    let mut args = compile_list(operand, registry)?.into_iter();
    let first = args.next().unwrap_or(Expr::Literal(Value::Undefined));
    let second = args.next().unwrap_or(Expr::Literal(Value::Undefined));
    Ok([Box::new(first), Box::new(second)])
}

fn type_error(tag: &str, expected: &str, found: &Value) -> EngineError {
    EngineError::TypeError(format!(
        "{} expects {}, got {}",
        tag,
        expected,
        found.type_name()
    ))
}

fn expect_string(value: Value, tag: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(type_error(tag, "a string", &other)),
    }
}

/// Numeric coercion for arithmetic
fn to_number(value: &Value, tag: &str) -> Result<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        Value::Undefined => Ok(f64::NAN),
        Value::Date(moment) => Ok(moment.value_of()),
        other => Err(type_error(tag, "a number", other)),
    }
}

fn to_integer(n: f64) -> f64 {
    if n.is_nan() {
        0.0
    } else {
        n.trunc()
    }
}

/// Character-based `substr(start, length)`
fn substr(text: &str, start: f64, length: Option<f64>) -> String {
    let size = text.chars().count() as f64;
    let mut start = to_integer(start);
    if start < 0.0 {
        start = (size + start).max(0.0);
    }
    let start = start.min(size);
    let count = match length {
        Some(n) => to_integer(n).clamp(0.0, size - start),
        None => size - start,
    };
    text.chars()
        .skip(start as usize)
        .take(count as usize)
        .collect()
}
