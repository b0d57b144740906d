// src/aggregation.rs
// Aggregation pipeline implementation

use crate::accumulator::Accumulator;
use crate::error::{EngineError, Result};
use crate::expression::{is_operator_tag, Expr};
use crate::functions::{Context, FunctionRegistry};
use crate::query::Query;
use crate::value::{Map, Value};
use crate::value_utils::{compare_for_sort, set_path};
use crate::{log_debug, log_trace, log_warn};
use ahash::AHashMap;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Parse a `$skip` / `$limit` count
fn parse_count(spec: &Value, stage: &str) -> Result<usize> {
    match spec {
        Value::Number(n) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
        other => Err(EngineError::AggregationError(format!(
            "{} must be a non-negative integer, got {}",
            stage,
            other.to_json()
        ))),
    }
}

/// Result of running a pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Sequence(Vec<Value>),
    /// Produced by `$objectify`
    Mapping(Map),
}

impl Output {
    pub fn len(&self) -> usize {
        match self {
            Output::Sequence(items) => items.len(),
            Output::Mapping(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Output::Sequence(items) => Some(items),
            Output::Mapping(_) => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Map> {
        match self {
            Output::Sequence(_) => None,
            Output::Mapping(map) => Some(map),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Output::Sequence(items) => Value::Array(items),
            Output::Mapping(map) => Value::Object(map),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Output::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Output::Mapping(map) => Value::Object(map.clone()).to_json(),
        }
    }
}

impl Serialize for Output {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

// ============================================================================
// STAGE OPTIONS
// ============================================================================

/// `$project` / `$map` options
#[derive(Debug, Clone)]
pub enum Projection {
    /// Each item becomes the value of the expression
    Expression(Expr),
    /// Each item becomes a new document built from output paths
    Fields(Vec<(String, Expr)>),
}

impl Projection {
    pub fn expression(expr: Expr) -> Self {
        Projection::Expression(expr)
    }

    /// Empty field projection; add outputs with `include` and `field`
    pub fn fields() -> Self {
        Projection::Fields(Vec::new())
    }

    /// Copy a (possibly dotted) field under the same name
    pub fn include(self, path: &str) -> Self {
        self.field(path, Expr::field(path))
    }

    pub fn field(self, path: &str, expr: Expr) -> Self {
        match self {
            Projection::Fields(mut fields) => {
                fields.push((path.to_string(), expr));
                Projection::Fields(fields)
            }
            Projection::Expression(_) => Projection::Fields(vec![(path.to_string(), expr)]),
        }
    }

    pub fn compile(spec: &Value, registry: &FunctionRegistry) -> Result<Self> {
        let Value::Object(map) = spec else {
            return Ok(Projection::Expression(Expr::compile(spec, registry)?));
        };
        if map.len() == 1 && map.keys().all(|key| is_operator_tag(key)) {
            return Ok(Projection::Expression(Expr::compile(spec, registry)?));
        }

        let mut fields = Vec::with_capacity(map.len());
        for (path, field_spec) in map {
            let expr = match field_spec {
                Value::Bool(true) => Expr::field(path),
                Value::Number(n) if *n == 1.0 => Expr::field(path),
                other => Expr::compile(other, registry)?,
            };
            fields.push((path.clone(), expr));
        }
        Ok(Projection::Fields(fields))
    }

    fn apply(&self, docs: Vec<Value>, ctx: &Context) -> Result<Vec<Value>> {
        docs.iter()
            .map(|doc| match self {
                Projection::Expression(expr) => expr.evaluate(doc, ctx),
                Projection::Fields(fields) => {
                    let mut result = Map::with_capacity(fields.len());
                    for (path, expr) in fields {
                        set_path(&mut result, path, expr.evaluate(doc, ctx)?);
                    }
                    Ok(Value::Object(result))
                }
            })
            .collect()
    }
}

/// `$group` options
#[derive(Debug, Clone)]
pub struct GroupSpec {
    id: Expr,
    accumulators: Vec<(String, Accumulator)>,
}

impl GroupSpec {
    pub fn new(id: Expr) -> Self {
        GroupSpec {
            id,
            accumulators: Vec::new(),
        }
    }

    pub fn accumulate(mut self, field: &str, accumulator: Accumulator) -> Self {
        self.accumulators.push((field.to_string(), accumulator));
        self
    }

    pub fn compile(spec: &Value, registry: &FunctionRegistry) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(EngineError::AggregationError(
                "$group must be an object".to_string(),
            ));
        };
        let Some(id_spec) = obj.get("_id") else {
            return Err(EngineError::AggregationError(
                "Group stage must have _id field".to_string(),
            ));
        };

        let mut group = GroupSpec::new(Expr::compile(id_spec, registry)?);
        for (field, acc_spec) in obj {
            if field == "_id" {
                continue;
            }
            group = group.accumulate(field, Accumulator::compile(acc_spec, registry)?);
        }
        Ok(group)
    }

    fn apply(&self, docs: Vec<Value>, ctx: &Context) -> Result<Vec<Value>> {
        // Step 1: Partition by stringified _id, first-seen order
        let mut index: AHashMap<String, usize> = AHashMap::new();
        let mut groups: Vec<(String, Vec<Value>)> = Vec::new();

        for doc in docs {
            let key = self.id.evaluate(&doc, ctx)?.to_display_string();
            match index.get(&key) {
                Some(&slot) => groups[slot].1.push(doc),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push((key, vec![doc]));
                }
            }
        }

        // Step 2: Compute accumulators for each group
        let mut results = Vec::with_capacity(groups.len());
        for (key, items) in groups {
            let mut result = Map::with_capacity(self.accumulators.len() + 1);
            result.insert("_id".to_string(), Value::String(key));
            for (field, accumulator) in &self.accumulators {
                result.insert(field.clone(), accumulator.accumulate(&items, ctx)?);
            }
            results.push(Value::Object(result));
        }
        Ok(results)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// `$sort` options: keys applied in order as tie-breakers
#[derive(Debug, Clone, Default)]
pub struct SortSpec {
    keys: Vec<(Expr, SortDirection)>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ascending(self, field: &str) -> Self {
        self.by(field, SortDirection::Ascending)
    }

    pub fn descending(self, field: &str) -> Self {
        self.by(field, SortDirection::Descending)
    }

    pub fn by(mut self, field: &str, direction: SortDirection) -> Self {
        self.keys.push((Expr::field(field), direction));
        self
    }

    pub fn compile(spec: &Value) -> Result<Self> {
        let Value::Object(obj) = spec else {
            return Err(EngineError::AggregationError(
                "$sort must be an object".to_string(),
            ));
        };

        let mut sort = SortSpec::new();
        for (field, direction) in obj {
            let direction = match direction.as_f64() {
                Some(n) if n == 1.0 => SortDirection::Ascending,
                Some(n) if n == -1.0 => SortDirection::Descending,
                _ => {
                    return Err(EngineError::AggregationError(format!(
                        "Sort direction for '{}' must be 1 or -1",
                        field
                    )))
                }
            };
            sort = sort.by(field, direction);
        }
        Ok(sort)
    }

    fn apply(&self, docs: Vec<Value>, ctx: &Context) -> Result<Vec<Value>> {
        let mut keyed = Vec::with_capacity(docs.len());
        for doc in docs {
            let keys = self
                .keys
                .iter()
                .map(|(expr, _)| expr.evaluate(&doc, ctx))
                .collect::<Result<Vec<Value>>>()?;
            keyed.push((keys, doc));
        }

        // Stable: equal keys keep their input order
        keyed.sort_by(|(a, _), (b, _)| {
            for ((val_a, val_b), (_, direction)) in a.iter().zip(b).zip(&self.keys) {
                let cmp = compare_for_sort(val_a, val_b);
                let cmp = match direction {
                    SortDirection::Ascending => cmp,
                    SortDirection::Descending => cmp.reverse(),
                };
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            Ordering::Equal
        });

        Ok(keyed.into_iter().map(|(_, doc)| doc).collect())
    }
}

/// `$objectify` options
#[derive(Debug, Clone)]
pub struct ObjectifySpec {
    key: Expr,
    value: Expr,
}

impl Default for ObjectifySpec {
    /// `_key: "$_id"`, `_value: "$"`
    fn default() -> Self {
        ObjectifySpec {
            key: Expr::field("$_id"),
            value: Expr::field("$"),
        }
    }
}

impl ObjectifySpec {
    pub fn new(key: Expr, value: Expr) -> Self {
        ObjectifySpec { key, value }
    }

    pub fn compile(spec: &Value, registry: &FunctionRegistry) -> Result<Self> {
        let mut objectify = ObjectifySpec::default();
        match spec {
            Value::Null | Value::Undefined => {}
            Value::Object(obj) => {
                for (option, expr) in obj {
                    match option.as_str() {
                        "_key" => objectify.key = Expr::compile(expr, registry)?,
                        "_value" => objectify.value = Expr::compile(expr, registry)?,
                        other => {
                            return Err(EngineError::AggregationError(format!(
                                "Unknown $objectify option: {}",
                                other
                            )))
                        }
                    }
                }
            }
            other => {
                return Err(EngineError::AggregationError(format!(
                    "$objectify options must be an object, got {}",
                    other.type_name()
                )))
            }
        }
        Ok(objectify)
    }

    fn apply(&self, docs: Vec<Value>, ctx: &Context) -> Result<Map> {
        let mut result = Map::with_capacity(docs.len());
        for doc in &docs {
            let key = self.key.evaluate(doc, ctx)?.to_display_string();
            let value = self.value.evaluate(doc, ctx)?;
            result.insert(key, value);
        }
        Ok(result)
    }
}

// ============================================================================
// STAGES
// ============================================================================

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Project(Projection),
    Match(Query),
    Group(GroupSpec),
    Sort(SortSpec),
    Skip(usize),
    Limit(usize),
    Objectify(ObjectifySpec),
}

impl Stage {
    /// Compile `{ "$tag": options }`
    pub fn compile(descriptor: &Value, registry: &FunctionRegistry) -> Result<Self> {
        let entry = match descriptor {
            Value::Object(obj) if obj.len() == 1 => obj.first(),
            _ => None,
        };
        let Some((tag, spec)) = entry else {
            return Err(EngineError::InvalidStage(descriptor.to_json().to_string()));
        };

        let stage = match tag.as_str() {
            "$project" | "$map" => Stage::Project(Projection::compile(spec, registry)?),
            "$match" | "$filter" | "$where" => Stage::Match(Query::compile(spec, registry)?),
            "$group" => Stage::Group(GroupSpec::compile(spec, registry)?),
            "$sort" | "$sortBy" | "$order" | "$orderBy" => Stage::Sort(SortSpec::compile(spec)?),
            "$skip" => Stage::Skip(parse_count(spec, "$skip")?),
            "$limit" => Stage::Limit(parse_count(spec, "$limit")?),
            "$objectify" => Stage::Objectify(ObjectifySpec::compile(spec, registry)?),
            _ => return Err(EngineError::UnknownStage(tag.clone())),
        };
        log_trace!("compiled stage {}", stage.tag());
        Ok(stage)
    }

    /// Canonical tag (aliases are not preserved)
    pub fn tag(&self) -> &'static str {
        match self {
            Stage::Project(_) => "$project",
            Stage::Match(_) => "$match",
            Stage::Group(_) => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Objectify(_) => "$objectify",
        }
    }

    /// Run this stage over a sequence
    fn apply(&self, docs: Vec<Value>, ctx: &Context) -> Result<Output> {
        let items = match self {
            Stage::Project(projection) => projection.apply(docs, ctx)?,
            Stage::Match(query) => {
                let selected = query.select(&docs, ctx)?;
                let mut slots: Vec<Option<Value>> = docs.into_iter().map(Some).collect();
                selected
                    .into_iter()
                    .filter_map(|index| slots[index].take())
                    .collect()
            }
            Stage::Group(group) => group.apply(docs, ctx)?,
            Stage::Sort(sort) => sort.apply(docs, ctx)?,
            Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
            Stage::Limit(n) => docs.into_iter().take(*n).collect(),
            Stage::Objectify(objectify) => return Ok(Output::Mapping(objectify.apply(docs, ctx)?)),
        };
        Ok(Output::Sequence(items))
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Aggregation pipeline
///
/// Compiled from a descriptor with [`Pipeline::compile`] or assembled with
/// the builder methods:
///
/// ```
/// use ironagg_core::{Accumulator, Expr, GroupSpec, Pipeline, SortSpec, Value};
///
/// let pipeline = Pipeline::new()
///     .group(GroupSpec::new(Expr::field("g")).accumulate("total", Accumulator::Sum(Expr::field("v"))))
///     .sort(SortSpec::new().descending("total"));
/// assert_eq!(pipeline.tags(), vec!["$group", "$sort"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Empty pipeline (identity)
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a pipeline descriptor (an array of stage descriptors)
    pub fn compile(descriptor: &Value, registry: &FunctionRegistry) -> Result<Self> {
        Self::compile_stages(descriptor, registry).map_err(|err| {
            log_warn!("pipeline rejected: {}", err);
            err
        })
    }

    fn compile_stages(descriptor: &Value, registry: &FunctionRegistry) -> Result<Self> {
        let Value::Array(stage_descriptors) = descriptor else {
            return Err(EngineError::AggregationError(
                "Pipeline must be an array".to_string(),
            ));
        };

        let mut pipeline = Pipeline::new();
        for stage_descriptor in stage_descriptors {
            let stage = Stage::compile(stage_descriptor, registry)?;
            if let Some(Stage::Objectify(_)) = pipeline.stages.last() {
                return Err(EngineError::StageAfterObjectify(stage.tag().to_string()));
            }
            pipeline.stages.push(stage);
        }
        Ok(pipeline)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn tags(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::tag).collect()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn project(self, projection: Projection) -> Self {
        self.stage(Stage::Project(projection))
    }

    pub fn match_query(self, query: Query) -> Self {
        self.stage(Stage::Match(query))
    }

    pub fn group(self, group: GroupSpec) -> Self {
        self.stage(Stage::Group(group))
    }

    pub fn sort(self, sort: SortSpec) -> Self {
        self.stage(Stage::Sort(sort))
    }

    pub fn skip(self, n: usize) -> Self {
        self.stage(Stage::Skip(n))
    }

    pub fn limit(self, n: usize) -> Self {
        self.stage(Stage::Limit(n))
    }

    pub fn objectify(self, objectify: ObjectifySpec) -> Self {
        self.stage(Stage::Objectify(objectify))
    }

    /// Execute pipeline on documents
    pub fn execute(&self, docs: Vec<Value>) -> Result<Output> {
        self.execute_with(docs, &Context::new())
    }

    pub fn execute_with(&self, docs: Vec<Value>, ctx: &Context) -> Result<Output> {
        let mut running = Output::Sequence(docs);
        for stage in &self.stages {
            let docs = match running {
                Output::Sequence(docs) => docs,
                Output::Mapping(_) => {
                    return Err(EngineError::StageAfterObjectify(stage.tag().to_string()))
                }
            };
            let input_len = docs.len();
            running = stage.apply(docs, ctx)?;
            log_debug!("{}: {} -> {} items", stage.tag(), input_len, running.len());
        }
        Ok(running)
    }
}

/// Run a pipeline descriptor over documents
pub fn aggregate(docs: Vec<Value>, pipeline: &Value) -> Result<Output> {
    aggregate_with(docs, pipeline, &FunctionRegistry::new())
}

/// Like [`aggregate`], resolving `$fn` names against `registry`
pub fn aggregate_with(
    docs: Vec<Value>,
    pipeline: &Value,
    registry: &FunctionRegistry,
) -> Result<Output> {
    Pipeline::compile(pipeline, registry)?.execute(docs)
}
