// src/functions.rs
//! Caller-supplied callables
//!
//! A JSON descriptor cannot carry a closure, so `$fn` operands in descriptors
//! name a function registered in a [`FunctionRegistry`]. The registry is
//! consulted once, at compile time. [`Context`] holds what evaluation needs
//! from the caller: currently the date parser behind `$parse` and `$diff`.

use crate::datetime::Moment;
use crate::error::{EngineError, Result};
use crate::value::Value;
use ahash::AHashMap;
use std::fmt;
use std::sync::Arc;

type FnImpl = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
type DateParser = Arc<dyn Fn(&Value) -> Moment + Send + Sync>;

/// Opaque callable invoked by `$fn`
///
/// The engine makes no purity assumption: a callable may close over external
/// state.
#[derive(Clone)]
pub struct Callable {
    name: Option<String>,
    func: FnImpl,
}

impl Callable {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Callable {
            name: None,
            func: Arc::new(func),
        }
    }

    fn named(name: &str, func: FnImpl) -> Self {
        Callable {
            name: Some(name.to_string()),
            func,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn call(&self, arg: &Value) -> Value {
        (self.func)(arg)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "Callable({})", name),
            None => f.write_str("Callable(<closure>)"),
        }
    }
}

/// Name -> callable table used to resolve `$fn` in descriptors
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: AHashMap<String, FnImpl>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    pub fn register<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.insert(name, func);
        self
    }

    /// Register (or replace) a function
    pub fn insert<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(func));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Look up a function by name
    pub fn resolve(&self, name: &str) -> Result<Callable> {
        self.functions
            .get(name)
            .map(|func| Callable::named(name, Arc::clone(func)))
            .ok_or_else(|| EngineError::UnknownFunction(name.to_string()))
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

/// Evaluation context
#[derive(Clone, Default)]
pub struct Context {
    date_parser: Option<DateParser>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default `$parse` backend
    pub fn with_date_parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(&Value) -> Moment + Send + Sync + 'static,
    {
        self.date_parser = Some(Arc::new(parser));
        self
    }

    pub fn parse_date(&self, value: &Value) -> Moment {
        match &self.date_parser {
            Some(parser) => parser(value),
            None => Moment::parse(value),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("custom_date_parser", &self.date_parser.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let registry = FunctionRegistry::new()
            .register("double", |v| Value::from(v.as_f64().unwrap_or(0.0) * 2.0));
        assert!(registry.contains("double"));
        assert_eq!(registry.len(), 1);

        let double = registry.resolve("double").unwrap();
        assert_eq!(double.name(), Some("double"));
        assert_eq!(double.call(&Value::from(21)), Value::from(42));
    }

    #[test]
    fn test_resolve_unknown() {
        let err = FunctionRegistry::new().resolve("nope").unwrap_err();
        assert!(matches!(err, EngineError::UnknownFunction(name) if name == "nope"));
    }

    #[test]
    fn test_context_default_parser() {
        let ctx = Context::new();
        assert!(ctx.parse_date(&Value::from("2000-01-01")).is_valid());
        assert!(!ctx.parse_date(&Value::from("not a date")).is_valid());
    }

    #[test]
    fn test_context_custom_parser() {
        let ctx = Context::new().with_date_parser(|v| match v.as_str() {
            Some("epoch") => Moment::from_millis(0.0),
            _ => Moment::invalid(),
        });
        assert_eq!(ctx.parse_date(&Value::from("epoch")).value_of(), 0.0);
        assert!(!ctx.parse_date(&Value::from("2000-01-01")).is_valid());
    }
}
