// src/query/operators.rs
//! Query condition operators
//!
//! Each condition operator (`$eq`, `$gt`, `$in`, `$regex`...) is a separate
//! type implementing [`OperatorMatcher`]. Compiled queries look operators up
//! by tag in [`OPERATOR_REGISTRY`].
//!
//! ```text
//! OperatorMatcher trait
//!     ↓
//! ┌────────────────────┬──────────────┬──────────┐
//! │ Comparison         │ Membership   │ Pattern  │
//! │ ($eq, $gt, ...)    │ ($in, $nin)  │ ($regex) │
//! └────────────────────┴──────────────┴──────────┘
//! ```

use crate::error::{EngineError, Result};
use crate::expression::CompareOp;
use crate::value::Value;
use ahash::AHashMap;
use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::num::NonZeroUsize;

// ============================================================================
// REGEX SUPPORT
// ============================================================================

const REGEX_CACHE_SIZE: usize = 100;

lazy_static! {
    /// Compiled patterns, keyed by the flag-prefixed pattern string
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> = Mutex::new(LruCache::new(
        NonZeroUsize::new(REGEX_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN)
    ));
}

/// Fold `$options` flags into the pattern as an inline group
///
/// Only `i`, `m`, `s` and `x` are honored; other characters are dropped.
pub fn build_regex_pattern(pattern: &str, options: &str) -> String {
    let flags: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();

    if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", flags, pattern)
    }
}

/// Get or compile a regex pattern with caching
pub fn get_or_compile_regex(pattern: &str) -> Result<Regex> {
    if let Some(regex) = REGEX_CACHE.lock().get(pattern) {
        return Ok(regex.clone());
    }

    let regex = Regex::new(pattern).map_err(|e| {
        EngineError::InvalidQuery(format!("Invalid regex pattern '{}': {}", pattern, e))
    })?;

    REGEX_CACHE.lock().put(pattern.to_string(), regex.clone());
    Ok(regex)
}

// ============================================================================
// TRAIT DEFINITION
// ============================================================================

/// A condition operator
///
/// `doc_value` is the value resolved at the condition's field path
/// (`Undefined` when missing); `operand` is the evaluated operand.
///
/// ```rust
/// use ironagg_core::query::operators::{GtOperator, OperatorMatcher};
/// use ironagg_core::value::Value;
///
/// assert!(GtOperator.matches(&Value::from(21), &Value::from(13)).unwrap());
/// ```
pub trait OperatorMatcher: Send + Sync {
    /// Operator tag, e.g. "$gt"
    fn name(&self) -> &'static str;

    fn matches(&self, doc_value: &Value, operand: &Value) -> Result<bool>;
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

macro_rules! comparison_operator {
    ($(#[$doc:meta])* $name:ident, $op:expr) => {
        $(#[$doc])*
        pub struct $name;

        impl OperatorMatcher for $name {
            fn name(&self) -> &'static str {
                $op.tag()
            }

            fn matches(&self, doc_value: &Value, operand: &Value) -> Result<bool> {
                Ok($op.apply(doc_value, operand))
            }
        }
    };
}

comparison_operator!(
    /// `{ field: { $eq: value } }`, strict equality
    EqOperator,
    CompareOp::Eq
);
comparison_operator!(
    /// `{ field: { $ne: value } }`, true for missing fields
    NeOperator,
    CompareOp::Ne
);
comparison_operator!(GtOperator, CompareOp::Gt);
comparison_operator!(GteOperator, CompareOp::Gte);
comparison_operator!(LtOperator, CompareOp::Lt);
comparison_operator!(LteOperator, CompareOp::Lte);

// ============================================================================
// MEMBERSHIP OPERATORS
// ============================================================================

fn contains(operand: &Value, doc_value: &Value) -> bool {
    operand
        .as_array()
        .map_or(false, |items| items.iter().any(|item| item.strict_equals(doc_value)))
}

/// `{ field: { $in: [v1, v2] } }`
///
/// A non-array operand contains nothing.
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn matches(&self, doc_value: &Value, operand: &Value) -> Result<bool> {
        Ok(contains(operand, doc_value))
    }
}

/// `{ field: { $nin: [v1, v2] } }`
pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn matches(&self, doc_value: &Value, operand: &Value) -> Result<bool> {
        Ok(!contains(operand, doc_value))
    }
}

// ============================================================================
// PATTERN OPERATOR
// ============================================================================

/// `{ field: { $regex: "pattern", $options: "i" } }`
///
/// The operand is the pattern with options already folded in (see
/// [`build_regex_pattern`]). Non-string values never match.
pub struct RegexOperator;

impl OperatorMatcher for RegexOperator {
    fn name(&self) -> &'static str {
        "$regex"
    }

    fn matches(&self, doc_value: &Value, operand: &Value) -> Result<bool> {
        let Value::String(text) = doc_value else {
            return Ok(false);
        };
        match operand {
            Value::String(pattern) => Ok(get_or_compile_regex(pattern)?.is_match(text)),
            other => Err(EngineError::InvalidQuery(format!(
                "$regex expects a pattern string, got {}",
                other.type_name()
            ))),
        }
    }
}

// ============================================================================
// OPERATOR REGISTRY
// ============================================================================

lazy_static! {
    /// Every condition operator, keyed by tag
    pub static ref OPERATOR_REGISTRY: AHashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let mut registry: AHashMap<&'static str, Box<dyn OperatorMatcher>> = AHashMap::new();

        registry.insert("$eq", Box::new(EqOperator));
        registry.insert("$ne", Box::new(NeOperator));
        registry.insert("$gt", Box::new(GtOperator));
        registry.insert("$gte", Box::new(GteOperator));
        registry.insert("$lt", Box::new(LtOperator));
        registry.insert("$lte", Box::new(LteOperator));

        registry.insert("$in", Box::new(InOperator));
        registry.insert("$nin", Box::new(NinOperator));

        registry.insert("$regex", Box::new(RegexOperator));

        registry
    };
}

/// Look up a condition operator
pub fn get_operator(tag: &str) -> Result<&'static dyn OperatorMatcher> {
    OPERATOR_REGISTRY
        .get(tag)
        .map(|op| &**op)
        .ok_or_else(|| EngineError::InvalidQuery(format!("Unknown query operator: {}", tag)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn test_operator_registry() {
        for tag in ["$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$regex"] {
            assert!(OPERATOR_REGISTRY.contains_key(tag), "missing {}", tag);
            assert_eq!(get_operator(tag).unwrap().name(), tag);
        }
        assert_eq!(OPERATOR_REGISTRY.len(), 9);
        assert!(matches!(
            get_operator("$exists"),
            Err(EngineError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_eq_ne_operators() {
        assert!(EqOperator.matches(&v(json!("Alice")), &v(json!("Alice"))).unwrap());
        assert!(!EqOperator.matches(&v(json!(1)), &v(json!("1"))).unwrap());
        assert!(NeOperator.matches(&Value::Undefined, &v(json!(1))).unwrap());
        assert!(!NeOperator.matches(&v(json!(1)), &v(json!(1.0))).unwrap());
    }

    #[test]
    fn test_ordering_operators() {
        assert!(GtOperator.matches(&v(json!(21)), &v(json!(13))).unwrap());
        assert!(!GtOperator.matches(&v(json!(13)), &v(json!(13))).unwrap());
        assert!(GteOperator.matches(&v(json!(13)), &v(json!(13))).unwrap());
        assert!(LtOperator.matches(&v(json!("a")), &v(json!("b"))).unwrap());
        assert!(LteOperator.matches(&v(json!(false)), &v(json!(true))).unwrap());
        // Missing fields and mixed kinds never satisfy an ordering
        assert!(!GtOperator.matches(&Value::Undefined, &v(json!(0))).unwrap());
        assert!(!LtOperator.matches(&v(json!("1")), &v(json!(2))).unwrap());
    }

    #[test]
    fn test_membership_operators() {
        let set = v(json!([1, 8, "x"]));
        assert!(InOperator.matches(&v(json!(8)), &set).unwrap());
        assert!(!InOperator.matches(&v(json!(2)), &set).unwrap());
        assert!(NinOperator.matches(&v(json!(2)), &set).unwrap());
        assert!(!NinOperator.matches(&v(json!("x")), &set).unwrap());
        // Non-array operand
        assert!(!InOperator.matches(&v(json!(1)), &v(json!(1))).unwrap());
        assert!(NinOperator.matches(&v(json!(1)), &v(json!(1))).unwrap());
    }

    #[test]
    fn test_regex_operator() {
        let pattern = v(json!(".* Simpson$"));
        assert!(RegexOperator.matches(&v(json!("Homer Simpson")), &pattern).unwrap());
        assert!(!RegexOperator.matches(&v(json!("Ned Flanders")), &pattern).unwrap());
        assert!(!RegexOperator.matches(&v(json!(42)), &pattern).unwrap());
        assert!(!RegexOperator.matches(&Value::Undefined, &pattern).unwrap());
    }

    #[test]
    fn test_regex_options() {
        let pattern = Value::from(build_regex_pattern("^homer", "ig"));
        assert_eq!(pattern, Value::from("(?i)^homer"));
        assert!(RegexOperator.matches(&v(json!("Homer Simpson")), &pattern).unwrap());
        assert_eq!(build_regex_pattern("abc", ""), "abc");
    }

    #[test]
    fn test_invalid_regex() {
        let err = get_or_compile_regex("(unclosed").unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuery(_)));
    }

    #[test]
    fn test_regex_cache_reuse() {
        let first = get_or_compile_regex("^cached-[0-9]+$").unwrap();
        let second = get_or_compile_regex("^cached-[0-9]+$").unwrap();
        assert_eq!(first.as_str(), second.as_str());
        assert!(second.is_match("cached-42"));
    }
}
