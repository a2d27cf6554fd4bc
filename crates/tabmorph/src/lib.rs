mod context;
mod engine;
mod error;
mod eval;
mod model;
mod ops;
mod path;
mod predicate;
mod registry;
mod rule;
mod schema;
mod stream;
mod table;
mod validator;
mod value;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use context::EvalContext;
pub use engine::{
    Conversion, Converter, EngineConfig, Hooks, IncrementHook, RecordTrace, RowTrace, WarnHook,
};
pub use error::{ErrorCode, RuleError, TransformError, TransformErrorKind, ValidationResult};
pub use eval::{MAX_REF_DEPTH, RULE_ERROR_COUNTER, TraceNode};
pub use model::{
    CastType, ColumnSchema, ErrorMode, ExplodeJoinSpec, ExplodeSpec, JoinHow, Mapping, SchemaSpec,
};
pub use path::{PathError, PathExpr, get_path, parse_path};
pub use registry::{
    BuiltinOp, ChildEval, OperationFn, OperationRegistry, UdfFn, UdfRegistry, default_registry,
    default_udfs,
};
pub use rule::{Rule, cast_value};
pub use schema::{IssueKind, SchemaIssue, SchemaReport};
pub use stream::{StreamOptions, StreamSummary, stream_ndjson_to_csv};
pub use table::{Row, Table};
pub use validator::{
    DryRun, DryRunStage, ValidationReport, dry_run, validate_mapping, validate_with_warnings,
};

/// Parses a mapping written in YAML or JSON.
pub fn parse_mapping(text: &str) -> Result<Mapping, TransformError> {
    Ok(serde_yaml::from_str(text)?)
}

/// Parses a mapping written in strict JSON.
pub fn parse_mapping_json(text: &str) -> Result<Mapping, TransformError> {
    serde_json::from_str(text)
        .map_err(|err| TransformError::new(TransformErrorKind::InvalidMapping, err.to_string()))
}
