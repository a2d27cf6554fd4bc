//! Row generation and table conversion for a compiled mapping.

use std::collections::HashMap;
use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::info;

use crate::context::EvalContext;
use crate::error::{TransformError, TransformErrorKind};
use crate::eval::{Evaluator, TraceNode};
use crate::model::{ErrorMode, JoinHow, Mapping};
use crate::path::{PathExpr, parse_path};
use crate::registry::{OperationRegistry, UdfRegistry, default_registry, default_udfs};
use crate::rule::Rule;
use crate::schema::{self, SchemaReport};
use crate::table::{Row, Table};
use crate::validator::validate_mapping;

pub type IncrementHook = Arc<dyn Fn(&str, u64) + Send + Sync>;
pub type WarnHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional callbacks invoked from the rule error path only.
#[derive(Clone, Default)]
pub struct Hooks {
    increment: Option<IncrementHook>,
    warn: Option<WarnHook>,
}

impl Hooks {
    pub fn with_increment<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, u64) + Send + Sync + 'static,
    {
        self.increment = Some(Arc::new(hook));
        self
    }

    pub fn with_warn<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.warn = Some(Arc::new(hook));
        self
    }

    pub fn increment(&self, name: &str, by: u64) {
        if let Some(hook) = &self.increment {
            hook(name, by);
        }
    }

    pub fn warn(&self, message: &str) {
        if let Some(hook) = &self.warn {
            hook(message);
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("increment", &self.increment.is_some())
            .field("warn", &self.warn.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Error mode for rules without `on_error`.
    #[serde(default)]
    pub default_on_error: ErrorMode,
    /// Schema strictness when the mapping's schema does not set `strict`.
    #[serde(default)]
    pub strict_schema: bool,
    #[serde(skip)]
    pub hooks: Hooks,
}

impl EngineConfig {
    pub fn with_default_on_error(mut self, mode: ErrorMode) -> Self {
        self.default_on_error = mode;
        self
    }

    pub fn with_strict_schema(mut self, strict: bool) -> Self {
        self.strict_schema = strict;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
}

/// How rows are derived from one record.
#[derive(Debug)]
enum RowPlan {
    Single,
    Explode {
        path: PathExpr,
        emit_root_when_empty: bool,
    },
    Join {
        left: PathExpr,
        right: PathExpr,
        how: JoinHow,
    },
}

static NULL: JsonValue = JsonValue::Null;

/// The table produced by a conversion plus the schema report, if the
/// mapping declares a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub table: Table,
    pub schema_report: Option<SchemaReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordTrace {
    pub rows_emitted: usize,
    pub rows: Vec<RowTrace>,
}

#[derive(Debug, Clone)]
pub struct RowTrace {
    pub row: Row,
    pub columns: Vec<(String, TraceNode)>,
}

impl Serialize for RowTrace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Columns<'a>(&'a [(String, TraceNode)]);

        impl Serialize for Columns<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (name, node) in self.0 {
                    map.serialize_entry(name, node)?;
                }
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("row", &self.row)?;
        map.serialize_entry("columns", &Columns(&self.columns))?;
        map.end()
    }
}

/// A mapping compiled against a registry, ready to convert records.
#[derive(Debug)]
pub struct Converter {
    mapping: Mapping,
    columns: Vec<(String, Rule)>,
    definitions: HashMap<String, Rule>,
    plan: RowPlan,
    registry: OperationRegistry,
    udfs: UdfRegistry,
    config: EngineConfig,
}

impl Converter {
    pub fn new(mapping: Mapping) -> Result<Self, TransformError> {
        Self::with_parts(
            mapping,
            default_registry().clone(),
            default_udfs().clone(),
            EngineConfig::default(),
        )
    }

    pub fn with_config(mapping: Mapping, config: EngineConfig) -> Result<Self, TransformError> {
        Self::with_parts(
            mapping,
            default_registry().clone(),
            default_udfs().clone(),
            config,
        )
    }

    /// Validates a raw mapping value with [`validate_mapping`] before
    /// building the converter; every validation error is reported.
    pub fn from_value(value: &JsonValue, config: EngineConfig) -> Result<Self, TransformError> {
        let report = validate_mapping(value, default_registry());
        if let Err(errors) = report.into_result() {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(TransformError::mapping(format!(
                "invalid mapping: {}",
                messages.join("; ")
            )));
        }
        let mapping: Mapping = serde_json::from_value(value.clone())
            .map_err(|err| TransformError::mapping(err.to_string()))?;
        Self::with_config(mapping, config)
    }

    pub fn with_parts(
        mapping: Mapping,
        registry: OperationRegistry,
        udfs: UdfRegistry,
        config: EngineConfig,
    ) -> Result<Self, TransformError> {
        if mapping.columns.is_empty() {
            return Err(TransformError::mapping(
                "mapping must contain a non-empty 'columns' object",
            )
            .with_path("columns"));
        }
        if mapping.explode.is_some() && mapping.explode_join.is_some() {
            return Err(TransformError::mapping(
                "'explode' and 'explode_join' cannot be used together",
            ));
        }

        let plan = plan_for(&mapping)?;

        let mut columns = Vec::with_capacity(mapping.columns.len());
        for (name, raw) in &mapping.columns {
            if name.is_empty() {
                return Err(
                    TransformError::mapping("column names must be non-empty").with_path("columns")
                );
            }
            let location = format!("columns.{}", name);
            columns.push((name.clone(), Rule::compile_at(raw, &registry, &location)?));
        }

        let mut definitions = HashMap::with_capacity(mapping.definitions.len());
        for (name, raw) in &mapping.definitions {
            if name.is_empty() {
                return Err(TransformError::mapping("definition names must be non-empty")
                    .with_path("definitions"));
            }
            let location = format!("definitions.{}", name);
            definitions.insert(name.clone(), Rule::compile_at(raw, &registry, &location)?);
        }

        Ok(Self {
            mapping,
            columns,
            definitions,
            plan,
            registry,
            udfs,
            config,
        })
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator {
            registry: &self.registry,
            udfs: &self.udfs,
            config: &self.config,
        }
    }

    /// Calls `emit` once per output row of `record` with that row's context.
    fn for_each_row<F>(&self, record: &JsonValue, mut emit: F) -> Result<(), TransformError>
    where
        F: FnMut(&EvalContext<'_>) -> Result<(), TransformError>,
    {
        let base = EvalContext::new(record, &self.definitions);
        match &self.plan {
            RowPlan::Single => emit(&base),
            RowPlan::Explode {
                path,
                emit_root_when_empty,
            } => match base.get_from_root(path) {
                JsonValue::Array(items) if !items.is_empty() => {
                    for item in &items {
                        emit(&base.with_rel(item))?;
                    }
                    Ok(())
                }
                _ if *emit_root_when_empty => emit(&base),
                _ => Ok(()),
            },
            RowPlan::Join { left, right, how } => {
                let left = list_or_empty(base.get_from_root(left));
                let right = list_or_empty(base.get_from_root(right));
                for (l, r) in join_pairs(*how, &left, &right) {
                    let mut rel = JsonMap::new();
                    rel.insert("left".to_string(), l.clone());
                    rel.insert("right".to_string(), r.clone());
                    let rel = JsonValue::Object(rel);
                    emit(&base.with_rel(&rel))?;
                }
                Ok(())
            }
        }
    }

    fn eval_columns(&self, ctx: &EvalContext<'_>) -> Result<Row, TransformError> {
        let env = self.evaluator();
        let mut row = Row::new();
        for (name, rule) in &self.columns {
            let value = env.scope(name).eval_rule(rule, ctx)?;
            row.insert(name.clone(), value);
        }
        Ok(row)
    }

    pub fn rows_for_record(&self, record: &JsonValue) -> Result<Vec<Row>, TransformError> {
        let mut rows = Vec::new();
        self.for_each_row(record, |ctx| {
            rows.push(self.eval_columns(ctx)?);
            Ok(())
        })?;
        Ok(rows)
    }

    /// Converts rows without the schema check.
    pub(crate) fn table_for<'r, I>(&self, records: I) -> Result<Table, TransformError>
    where
        I: IntoIterator<Item = &'r JsonValue>,
    {
        let mut tables = Vec::new();
        for record in records {
            tables.push(Table::from_rows(
                self.column_names(),
                self.rows_for_record(record)?,
            ));
        }
        if tables.is_empty() {
            return Ok(Table::new(self.column_names()));
        }
        Ok(Table::concat(tables))
    }

    pub fn convert_record(&self, record: &JsonValue) -> Result<Conversion, TransformError> {
        self.convert_batch(std::iter::once(record))
    }

    pub fn convert_batch<'r, I>(&self, records: I) -> Result<Conversion, TransformError>
    where
        I: IntoIterator<Item = &'r JsonValue>,
    {
        let table = self.table_for(records)?;
        let schema_report = self.check_schema(&table)?;
        Ok(Conversion {
            table,
            schema_report,
        })
    }

    /// Objects convert as one record, arrays as a batch.
    pub fn convert(&self, data: &JsonValue) -> Result<Conversion, TransformError> {
        match data {
            JsonValue::Object(_) => self.convert_record(data),
            JsonValue::Array(records) => self.convert_batch(records),
            _ => Err(TransformError::new(
                TransformErrorKind::InvalidInput,
                "input must be a JSON object or an array of objects",
            )),
        }
    }

    pub(crate) fn check_schema(
        &self,
        table: &Table,
    ) -> Result<Option<SchemaReport>, TransformError> {
        let Some(spec) = &self.mapping.schema else {
            return Ok(None);
        };
        let report = schema::check(table, spec);
        if report.is_clean() {
            return Ok(Some(report));
        }
        if spec.strict.unwrap_or(self.config.strict_schema) {
            let detail = serde_json::to_string(&report)?;
            return Err(TransformError::new(
                TransformErrorKind::SchemaViolation,
                format!("output schema validation failed: {}", detail),
            )
            .with_path("schema"));
        }
        info!(?report, "schema check reported issues");
        Ok(Some(report))
    }

    /// Converts one record while recording every rule evaluation.
    pub fn trace(&self, record: &JsonValue) -> Result<RecordTrace, TransformError> {
        let env = self.evaluator();
        let mut rows = Vec::new();
        self.for_each_row(record, |ctx| {
            let mut row = Row::new();
            let mut columns = Vec::with_capacity(self.columns.len());
            for (name, rule) in &self.columns {
                let mut scope = env.tracing_scope(name);
                let value = scope.eval_rule(rule, ctx)?;
                if let Some(node) = scope.into_trace() {
                    columns.push((name.clone(), node));
                }
                row.insert(name.clone(), value);
            }
            rows.push(RowTrace { row, columns });
            Ok(())
        })?;
        Ok(RecordTrace {
            rows_emitted: rows.len(),
            rows,
        })
    }
}

fn plan_for(mapping: &Mapping) -> Result<RowPlan, TransformError> {
    let compile = |path: &str, at: &str| {
        if path.is_empty() {
            return Err(TransformError::mapping("path must be a non-empty string").with_path(at));
        }
        parse_path(path).map_err(|err| {
            TransformError::new(TransformErrorKind::InvalidPath, err.to_string()).with_path(at)
        })
    };

    if let Some(join) = &mapping.explode_join {
        return Ok(RowPlan::Join {
            left: compile(&join.left, "explode_join.left")?,
            right: compile(&join.right, "explode_join.right")?,
            how: join.how,
        });
    }
    if let Some(explode) = &mapping.explode {
        return Ok(RowPlan::Explode {
            path: compile(&explode.path, "explode.path")?,
            emit_root_when_empty: explode.emit_root_when_empty,
        });
    }
    Ok(RowPlan::Single)
}

fn list_or_empty(value: JsonValue) -> Vec<JsonValue> {
    match value {
        JsonValue::Array(items) => items,
        _ => Vec::new(),
    }
}

/// `(left, right)` pairs in emission order for a join.
fn join_pairs<'a>(
    how: JoinHow,
    left: &'a [JsonValue],
    right: &'a [JsonValue],
) -> Vec<(&'a JsonValue, &'a JsonValue)> {
    let cartesian = || {
        left.iter()
            .flat_map(|l| right.iter().map(move |r| (l, r)))
            .collect::<Vec<_>>()
    };
    let left_only = || left.iter().map(|l| (l, &NULL)).collect::<Vec<_>>();
    let right_only = || right.iter().map(|r| (&NULL, r)).collect::<Vec<_>>();

    match (how, left.is_empty(), right.is_empty()) {
        (_, false, false) if how != JoinHow::Right => cartesian(),
        (JoinHow::Right, false, false) => right
            .iter()
            .flat_map(|r| left.iter().map(move |l| (l, r)))
            .collect(),
        (JoinHow::Left | JoinHow::Outer, false, true) => left_only(),
        (JoinHow::Right | JoinHow::Outer, true, false) => right_only(),
        (JoinHow::Outer, true, true) => vec![(&NULL, &NULL)],
        _ => Vec::new(),
    }
}
