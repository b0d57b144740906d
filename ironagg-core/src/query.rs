// src/query.rs
//! Query predicates used by `$match`
//!
//! A query descriptor maps field paths to conditions and may carry the
//! logical combinators `$and`, `$or` and `$nor`. Descriptors are validated
//! when compiled: unknown condition operators, malformed combinators and bad
//! regex patterns are rejected before any document is seen.
//!
//! Two evaluation forms are offered. [`Query::matches`] tests one document.
//! [`Query::select`] works on a whole sequence with set semantics, which is
//! what fixes the output order of `$or` (first-seen across sub-queries).

pub mod operators;

use crate::error::{EngineError, Result};
use crate::expression::Expr;
use crate::functions::{Context, FunctionRegistry};
use crate::value::Value;
use crate::value_utils::resolve_path;
use ahash::AHashSet;
use operators::{build_regex_pattern, get_operator, get_or_compile_regex};

/// One `{ $op: operand }` entry of a mapping condition
#[derive(Debug, Clone)]
pub struct OperatorClause {
    tag: String,
    operand: Expr,
}

impl OperatorClause {
    /// Build a clause; fails for tags the operator registry does not know
    pub fn new(tag: &str, operand: Expr) -> Result<Self> {
        get_operator(tag)?;
        Ok(OperatorClause {
            tag: tag.to_string(),
            operand,
        })
    }

    /// `$regex` clause with `$options` flags
    pub fn regex(pattern: &str, options: &str) -> Result<Self> {
        let pattern = build_regex_pattern(pattern, options);
        get_or_compile_regex(&pattern)?;
        Ok(OperatorClause {
            tag: "$regex".to_string(),
            operand: Expr::Literal(Value::String(pattern)),
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn test(&self, doc_value: &Value, doc: &Value, ctx: &Context) -> Result<bool> {
        let operand = self.operand.evaluate(doc, ctx)?;
        get_operator(&self.tag)?.matches(doc_value, &operand)
    }
}

/// Condition attached to a field path
#[derive(Debug, Clone)]
pub enum Condition {
    /// Number, boolean, null or date literal
    Equals(Value),
    /// String condition, compared for equality after evaluation
    Expression(Expr),
    /// Every clause must hold
    Operators(Vec<OperatorClause>),
}

impl Condition {
    pub fn compile(descriptor: &Value, registry: &FunctionRegistry) -> Result<Condition> {
        match descriptor {
            Value::Number(_) | Value::Bool(_) | Value::Null | Value::Date(_) => {
                Ok(Condition::Equals(descriptor.clone()))
            }
            Value::String(_) => Ok(Condition::Expression(Expr::compile(descriptor, registry)?)),
            Value::Object(map) => {
                if map.contains_key("$options") && !map.contains_key("$regex") {
                    return Err(EngineError::InvalidQuery(
                        "$options is only valid alongside $regex".to_string(),
                    ));
                }

                let mut clauses = Vec::with_capacity(map.len());
                for (tag, operand) in map {
                    match tag.as_str() {
                        "$options" => {}
                        "$regex" => {
                            let options = match map.get("$options") {
                                None => "",
                                Some(Value::String(options)) => options.as_str(),
                                Some(other) => {
                                    return Err(EngineError::InvalidQuery(format!(
                                        "$options must be a string, got {}",
                                        other.type_name()
                                    )));
                                }
                            };
                            let Value::String(pattern) = operand else {
                                return Err(EngineError::InvalidQuery(format!(
                                    "$regex expects a pattern string, got {}",
                                    operand.type_name()
                                )));
                            };
                            clauses.push(OperatorClause::regex(pattern, options)?);
                        }
                        _ => clauses.push(OperatorClause::new(
                            tag,
                            Expr::compile(operand, registry)?,
                        )?),
                    }
                }
                Ok(Condition::Operators(clauses))
            }
            other => Err(EngineError::InvalidQuery(format!(
                "Unsupported condition: {}",
                other.to_json()
            ))),
        }
    }

    fn test(&self, doc_value: &Value, doc: &Value, ctx: &Context) -> Result<bool> {
        match self {
            Condition::Equals(expected) => Ok(doc_value.strict_equals(expected)),
            Condition::Expression(expr) => Ok(doc_value.strict_equals(&expr.evaluate(doc, ctx)?)),
            Condition::Operators(clauses) => {
                for clause in clauses {
                    if !clause.test(doc_value, doc, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Clause {
    Field { path: String, condition: Condition },
    And(Vec<Query>),
    Or(Vec<Query>),
    Nor(Vec<Query>),
}

/// Compiled query
///
/// An empty query matches everything.
#[derive(Debug, Clone, Default)]
pub struct Query {
    clauses: Vec<Clause>,
}

impl Query {
    /// Empty query
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a query descriptor
    ///
    /// A bare number or boolean matches whole documents by equality, and
    /// `null` is the empty query.
    pub fn compile(descriptor: &Value, registry: &FunctionRegistry) -> Result<Query> {
        match descriptor {
            Value::Null => Ok(Query::new()),
            Value::Number(_) | Value::Bool(_) => {
                Ok(Query::new().field("$", Condition::Equals(descriptor.clone())))
            }
            Value::Object(map) => {
                let mut query = Query::new();
                for (key, condition) in map {
                    let clause = match key.as_str() {
                        "$and" => Clause::And(compile_list(key, condition, registry)?),
                        "$or" => Clause::Or(compile_list(key, condition, registry)?),
                        "$nor" => Clause::Nor(compile_list(key, condition, registry)?),
                        _ => Clause::Field {
                            path: key.clone(),
                            condition: Condition::compile(condition, registry)?,
                        },
                    };
                    query.clauses.push(clause);
                }
                Ok(query)
            }
            other => Err(EngineError::InvalidQuery(format!(
                "Query must be a mapping, got {}",
                other.type_name()
            ))),
        }
    }

    /// Add a field condition
    pub fn field(mut self, path: &str, condition: Condition) -> Self {
        self.clauses.push(Clause::Field {
            path: path.to_string(),
            condition,
        });
        self
    }

    pub fn and(mut self, queries: Vec<Query>) -> Self {
        self.clauses.push(Clause::And(queries));
        self
    }

    pub fn or(mut self, queries: Vec<Query>) -> Self {
        self.clauses.push(Clause::Or(queries));
        self
    }

    pub fn nor(mut self, queries: Vec<Query>) -> Self {
        self.clauses.push(Clause::Nor(queries));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Test one document
    pub fn matches(&self, doc: &Value, ctx: &Context) -> Result<bool> {
        for clause in &self.clauses {
            let hit = match clause {
                Clause::Field { path, condition } => {
                    condition.test(&resolve_path(doc, path), doc, ctx)?
                }
                Clause::And(queries) => all_match(queries, doc, ctx)?,
                Clause::Or(queries) => any_match(queries, doc, ctx)?,
                Clause::Nor(queries) => !any_match(queries, doc, ctx)?,
            };
            if !hit {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Indexes of the matching documents
    pub fn select(&self, docs: &[Value], ctx: &Context) -> Result<Vec<usize>> {
        self.select_from(docs, (0..docs.len()).collect(), ctx)
    }

    fn select_from(
        &self,
        docs: &[Value],
        mut candidates: Vec<usize>,
        ctx: &Context,
    ) -> Result<Vec<usize>> {
        for clause in &self.clauses {
            candidates = match clause {
                Clause::Field { path, condition } => {
                    let mut kept = Vec::with_capacity(candidates.len());
                    for index in candidates {
                        let doc = &docs[index];
                        if condition.test(&resolve_path(doc, path), doc, ctx)? {
                            kept.push(index);
                        }
                    }
                    kept
                }
                Clause::And(queries) => {
                    for query in queries {
                        candidates = query.select_from(docs, candidates, ctx)?;
                    }
                    candidates
                }
                Clause::Or(queries) => {
                    let mut seen = AHashSet::with_capacity(candidates.len());
                    let mut found = Vec::new();
                    for query in queries {
                        for index in query.select_from(docs, candidates.clone(), ctx)? {
                            if seen.insert(index) {
                                found.push(index);
                            }
                        }
                    }
                    found
                }
                Clause::Nor(queries) => {
                    for query in queries {
                        let hits: AHashSet<usize> = query
                            .select_from(docs, candidates.clone(), ctx)?
                            .into_iter()
                            .collect();
                        candidates.retain(|index| !hits.contains(index));
                    }
                    candidates
                }
            };
        }
        Ok(candidates)
    }
}

fn compile_list(key: &str, descriptor: &Value, registry: &FunctionRegistry) -> Result<Vec<Query>> {
    match descriptor {
        Value::Array(items) => items
            .iter()
            .map(|item| Query::compile(item, registry))
            .collect(),
        other => Err(EngineError::InvalidQuery(format!(
            "{} expects an array of queries, got {}",
            key,
            other.type_name()
        ))),
    }
}

fn all_match(queries: &[Query], doc: &Value, ctx: &Context) -> Result<bool> {
    for query in queries {
        if !query.matches(doc, ctx)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_match(queries: &[Query], doc: &Value, ctx: &Context) -> Result<bool> {
    for query in queries {
        if query.matches(doc, ctx)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(descriptor: serde_json::Value) -> Result<Query> {
        Query::compile(&Value::from(descriptor), &FunctionRegistry::new())
    }

    fn docs(json: serde_json::Value) -> Vec<Value> {
        match Value::from(json) {
            Value::Array(items) => items,
            other => vec![other],
        }
    }

    fn select(query: serde_json::Value, data: &[Value]) -> Vec<usize> {
        compile(query).unwrap().select(data, &Context::new()).unwrap()
    }

    fn truth_table() -> Vec<Value> {
        docs(json!([
            {"a": 0, "b": 0, "notA": 1},
            {"a": 0, "b": 1, "notA": 1},
            {"a": 1, "b": 0, "notA": 0},
            {"a": 1, "b": 1, "notA": 0}
        ]))
    }

    #[test]
    fn test_scalar_documents() {
        let fib = docs(json!([0, 1, 1, 2, 3, 5, 8, 13, 21, 34]));
        assert_eq!(select(json!({"$": 1}), &fib), vec![1, 2]);
        assert_eq!(select(json!(1), &fib), vec![1, 2]);
        assert_eq!(select(json!({"$": {"$gt": 13}}), &fib), vec![8, 9]);
        assert_eq!(select(json!({"$": {"$lte": 1}}), &fib), vec![0, 1, 2]);
        assert_eq!(select(json!({"$": {"$in": [1, 8]}}), &fib), vec![1, 2, 6]);
        assert_eq!(select(json!({"$": {"$nin": [1, 8]}}), &fib), vec![0, 3, 4, 5, 7, 8, 9]);
        assert_eq!(select(json!({"$": {"$ne": 1}}), &fib).len(), 8);
    }

    #[test]
    fn test_field_conditions() {
        let people = docs(json!([
            {"name": "Maggie Simpson", "age": 2, "baby": true, "address": {"city": "Springfield"}},
            {"name": "Ned Flanders", "age": 35, "baby": false, "address": {"city": "Springfield"}},
            {"name": "Homer Simpson", "age": 38, "baby": false, "address": {"road": "Evergreen"}}
        ]));
        assert_eq!(select(json!({"baby": true}), &people), vec![0]);
        assert_eq!(select(json!({"address.city": "Springfield"}), &people), vec![0, 1]);
        assert_eq!(select(json!({"age": {"$gte": 10, "$lt": 38}}), &people), vec![1]);
        assert_eq!(select(json!({"name": {"$regex": ".* Simpson$"}}), &people), vec![0, 2]);
        assert_eq!(
            select(json!({"name": {"$regex": "^homer", "$options": "i"}}), &people),
            vec![2]
        );
        assert_eq!(select(json!({"missing.deep": {"$ne": 1}}), &people), vec![0, 1, 2]);
    }

    #[test]
    fn test_expression_conditions() {
        let table = truth_table();
        assert_eq!(select(json!({"a": "$b"}), &table), vec![0, 3]);
        assert_eq!(select(json!({"a": {"$gt": "$b"}}), &table), vec![2]);
        assert_eq!(select(json!({"a": {"$ne": "$b"}}), &table), vec![1, 2]);
        assert_eq!(select(json!({"a": {"$ne": "$notA"}}), &table), vec![0, 1, 2, 3]);
        assert!(select(json!({"a": {"$ne": "$a"}}), &table).is_empty());
    }

    #[test]
    fn test_logical_operators() {
        let table = truth_table();
        assert_eq!(select(json!({"$and": [{"a": {"$gt": 0}}, {"b": 1}]}), &table), vec![3]);
        assert_eq!(select(json!({"$or": [{"a": 1}, {"b": 1}]}), &table), vec![2, 3, 1]);
        assert_eq!(select(json!({"$nor": [{"a": 1}, {"b": 1}]}), &table), vec![0]);
    }

    #[test]
    fn test_or_keeps_duplicate_scalars_distinct() {
        let values = docs(json!([1, 1, 2]));
        assert_eq!(select(json!({"$or": [{"$": 1}, {"$": 2}]}), &values), vec![0, 1, 2]);
    }

    #[test]
    fn test_matches_agrees_with_select() {
        let table = truth_table();
        let query = compile(json!({"$or": [{"a": 1}, {"b": 1}], "notA": 0})).unwrap();
        let ctx = Context::new();
        let per_doc: Vec<usize> = (0..table.len())
            .filter(|&i| query.matches(&table[i], &ctx).unwrap())
            .collect();
        let mut selected = query.select(&table, &ctx).unwrap();
        selected.sort_unstable();
        assert_eq!(per_doc, selected);
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let table = truth_table();
        assert_eq!(select(json!({}), &table), vec![0, 1, 2, 3]);
        assert!(compile(json!(null)).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_queries() {
        let err = compile(json!({"a": {"$exists": true}})).unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuery(msg) if msg.contains("$exists")));
        assert!(matches!(compile(json!({"a": [1, 2]})), Err(EngineError::InvalidQuery(_))));
        assert!(matches!(compile(json!({"$or": {"a": 1}})), Err(EngineError::InvalidQuery(_))));
        assert!(matches!(compile(json!({"a": {"$options": "i"}})), Err(EngineError::InvalidQuery(_))));
        assert!(matches!(compile(json!({"a": {"$regex": "("}})), Err(EngineError::InvalidQuery(_))));
        assert!(matches!(compile(json!("text")), Err(EngineError::InvalidQuery(_))));
    }

    #[test]
    fn test_builder_query() {
        let table = truth_table();
        let query = Query::new()
            .field("a", Condition::Equals(Value::from(1)))
            .nor(vec![Query::new().field("b", Condition::Equals(Value::from(0)))]);
        assert_eq!(query.select(&table, &Context::new()).unwrap(), vec![3]);

        let gt = OperatorClause::new("$gt", Expr::field("b")).unwrap();
        let query = Query::new().field("a", Condition::Operators(vec![gt]));
        assert_eq!(query.select(&table, &Context::new()).unwrap(), vec![2]);
        assert!(OperatorClause::new("$near", Expr::literal(1)).is_err());
    }
}
