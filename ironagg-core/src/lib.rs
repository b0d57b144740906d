// ironagg-core/src/lib.rs
// In-memory aggregation pipelines over JSON-like documents

pub mod accumulator;
pub mod aggregation;
pub mod datetime;
pub mod error;
pub mod expression;
pub mod functions;
pub mod logging;
pub mod query;
pub mod template;
pub mod value;
pub mod value_utils;

// Public exports
pub use accumulator::Accumulator;
pub use aggregation::{
    aggregate, aggregate_with, GroupSpec, ObjectifySpec, Output, Pipeline, Projection,
    SortDirection, SortSpec, Stage,
};
pub use datetime::Moment;
pub use error::{EngineError, Result};
pub use expression::Expr;
pub use functions::{Callable, Context, FunctionRegistry};
pub use logging::{get_log_level, init_from_env, set_log_level, LogLevel};
pub use query::{Condition, OperatorClause, Query};
pub use value::{Document, Map, Value};
