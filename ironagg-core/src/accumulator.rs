// src/accumulator.rs
//! `$group` accumulators
//!
//! Each accumulator folds the items of one group into a single value by
//! evaluating its expression against every item.

use crate::error::{EngineError, Result};
use crate::expression::Expr;
use crate::functions::{Callable, Context, FunctionRegistry};
use crate::value::Value;
use crate::value_utils::canonical_key;
use ahash::AHashSet;

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(Expr),
    Avg(Expr),
    First(Expr),
    Last(Expr),
    Max(Expr),
    Min(Expr),
    Any(Expr),
    AddToSet(Expr),
    /// Called once with the whole group as an array
    Function(Callable),
}

impl Accumulator {
    /// Compile `{ "$tag": expression }`
    pub fn compile(spec: &Value, registry: &FunctionRegistry) -> Result<Accumulator> {
        let entry = match spec {
            Value::Object(map) if map.len() == 1 => map.first(),
            _ => None,
        };
        let Some((tag, operand)) = entry else {
            return Err(EngineError::AggregationError(format!(
                "Accumulator must be a single-key mapping, got {}",
                spec.to_json()
            )));
        };

        if tag == "$fn" {
            return match operand {
                Value::String(name) => Ok(Accumulator::Function(registry.resolve(name)?)),
                other => Err(EngineError::UnknownFunction(other.to_json().to_string())),
            };
        }

        let expr = Expr::compile(operand, registry)?;
        let acc = match tag.as_str() {
            "$sum" => Accumulator::Sum(expr),
            "$avg" => Accumulator::Avg(expr),
            "$first" => Accumulator::First(expr),
            "$last" => Accumulator::Last(expr),
            "$max" => Accumulator::Max(expr),
            "$min" => Accumulator::Min(expr),
            "$any" => Accumulator::Any(expr),
            "$addToSet" => Accumulator::AddToSet(expr),
            _ => return Err(EngineError::UnknownAccumulator(tag.clone())),
        };
        Ok(acc)
    }

    pub fn function<F>(func: F) -> Accumulator
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Accumulator::Function(Callable::new(func))
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Accumulator::Sum(_) => "$sum",
            Accumulator::Avg(_) => "$avg",
            Accumulator::First(_) => "$first",
            Accumulator::Last(_) => "$last",
            Accumulator::Max(_) => "$max",
            Accumulator::Min(_) => "$min",
            Accumulator::Any(_) => "$any",
            Accumulator::AddToSet(_) => "$addToSet",
            Accumulator::Function(_) => "$fn",
        }
    }

    /// Fold the items of one group
    pub fn accumulate(&self, items: &[Value], ctx: &Context) -> Result<Value> {
        match self {
            Accumulator::Sum(expr) => {
                let mut sum = 0.0;
                for item in items {
                    // Falsy numbers (0, NaN) contribute nothing
                    if let Value::Number(n) = expr.evaluate(item, ctx)? {
                        if !n.is_nan() {
                            sum += n;
                        }
                    }
                }
                Ok(Value::Number(sum))
            }
            Accumulator::Avg(expr) => {
                let mut sum = 0.0;
                let mut count = 0usize;
                for item in items {
                    if let Value::Number(n) = expr.evaluate(item, ctx)? {
                        sum += n;
                        count += 1;
                    }
                }
                Ok(Value::Number(sum / count as f64))
            }
            Accumulator::First(expr) => match items.first() {
                Some(item) => expr.evaluate(item, ctx),
                None => Ok(Value::Undefined),
            },
            Accumulator::Last(expr) => match items.last() {
                Some(item) => expr.evaluate(item, ctx),
                None => Ok(Value::Undefined),
            },
            Accumulator::Max(expr) => extreme(expr, items, ctx, |candidate, best| candidate > best),
            Accumulator::Min(expr) => extreme(expr, items, ctx, |candidate, best| candidate < best),
            Accumulator::Any(expr) => {
                for item in items {
                    if expr.evaluate(item, ctx)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Accumulator::AddToSet(expr) => {
                let mut seen = AHashSet::new();
                let mut set = Vec::new();
                for item in items {
                    let value = expr.evaluate(item, ctx)?;
                    // NaN-bearing values equal nothing, themselves included
                    if !value.strict_equals(&value) || seen.insert(canonical_key(&value)) {
                        set.push(value);
                    }
                }
                Ok(Value::Array(set))
            }
            Accumulator::Function(func) => Ok(func.call(&Value::Array(items.to_vec()))),
        }
    }
}

/// Ranking used by `$max` and `$min`
fn rank(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => *n,
        Value::Date(moment) => moment.value_of(),
        _ => 0.0,
    };
    if n.is_nan() {
        0.0
    } else {
        n
    }
}

/// Value of the first item whose rank beats every other
fn extreme(
    expr: &Expr,
    items: &[Value],
    ctx: &Context,
    beats: fn(f64, f64) -> bool,
) -> Result<Value> {
    let mut best: Option<(f64, Value)> = None;
    for item in items {
        let value = expr.evaluate(item, ctx)?;
        let score = rank(&value);
        if best.as_ref().map_or(true, |(best_score, _)| beats(score, *best_score)) {
            best = Some((score, value));
        }
    }
    Ok(best.map(|(_, value)| value).unwrap_or(Value::Undefined))
}
