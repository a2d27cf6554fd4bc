//! Typed rule tree compiled from the raw JSON rules of a mapping.
//!
//! A JSON object is a rule node whose operation is picked by the registry's
//! head-key precedence; anything else (including arrays) is a literal.
//! Shapes that can only fail at evaluation time compile to
//! [`Op::Malformed`], which raises a recoverable evaluation error so the
//! rule's `on_error` mode decides the outcome.

use std::sync::Arc;

use regex::Regex;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{TransformError, TransformErrorKind};
use crate::model::{CastType, ErrorMode};
use crate::path::{PathExpr, parse_path};
use crate::registry::{BuiltinOp, Handler, OperationFn, OperationRegistry};
use crate::value::{is_truthy, to_float, to_text};

pub(crate) const TAIL_KEYS: [&str; 3] = ["default", "cast", "on_error"];

#[derive(Debug, Clone)]
pub enum Rule {
    Literal(JsonValue),
    Node(Box<RuleNode>),
}

#[derive(Debug, Clone)]
pub struct RuleNode {
    pub op: Op,
    pub tail: Tail,
    /// The rule object as written, kept for tracing and custom handlers.
    pub raw: JsonValue,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tail {
    pub default: Option<JsonValue>,
    pub cast: Option<CastType>,
    pub on_error: Option<ErrorMode>,
}

impl Tail {
    pub fn from_object(obj: &JsonMap<String, JsonValue>) -> Self {
        Self {
            default: obj.get("default").cloned(),
            cast: obj.get("cast").and_then(JsonValue::as_str).and_then(CastType::parse),
            on_error: obj
                .get("on_error")
                .and_then(JsonValue::as_str)
                .and_then(ErrorMode::parse),
        }
    }

    /// `default` replaces `null`, then `cast` converts non-null values.
    /// A failed cast yields `null`.
    pub fn apply(&self, value: JsonValue) -> JsonValue {
        let value = match (value, &self.default) {
            (JsonValue::Null, Some(default)) => default.clone(),
            (value, _) => value,
        };
        match (self.cast, value) {
            (_, JsonValue::Null) => JsonValue::Null,
            (Some(cast), value) => cast_value(cast, &value),
            (None, value) => value,
        }
    }
}

pub fn cast_value(cast: CastType, value: &JsonValue) -> JsonValue {
    match cast {
        CastType::Str => JsonValue::String(to_text(value)),
        CastType::Bool => JsonValue::Bool(is_truthy(value)),
        CastType::Float => match value {
            JsonValue::Array(_) | JsonValue::Object(_) => JsonValue::Null,
            other => to_float(other)
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
        },
        CastType::Int => match value {
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => value.clone(),
            JsonValue::Array(_) | JsonValue::Object(_) => JsonValue::Null,
            other => match to_float(other) {
                Some(f) if f.is_finite() && f.trunc().abs() < 9.2e18 => {
                    JsonValue::from(f.trunc() as i64)
                }
                _ => JsonValue::Null,
            },
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl MathOp {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add" => Some(MathOp::Add),
            "sub" => Some(MathOp::Sub),
            "mul" => Some(MathOp::Mul),
            "div" => Some(MathOp::Div),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl Aggregate {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sum" => Some(Aggregate::Sum),
            "mean" => Some(Aggregate::Mean),
            "min" => Some(Aggregate::Min),
            "max" => Some(Aggregate::Max),
            "count" => Some(Aggregate::Count),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Millis,
    Micros,
    Nanos,
}

impl TimeUnit {
    /// Unknown units are read as seconds.
    pub fn parse(value: &str) -> Self {
        match value {
            "ms" => TimeUnit::Millis,
            "us" => TimeUnit::Micros,
            "ns" => TimeUnit::Nanos,
            _ => TimeUnit::Seconds,
        }
    }

    pub fn per_second(&self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Millis => 1_000.0,
            TimeUnit::Micros => 1_000_000.0,
            TimeUnit::Nanos => 1_000_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Override,
    FirstNonNull,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmitMode {
    List,
    Json,
    Count,
    Join(String),
}

/// Post-step shared by the list-producing operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEmit {
    pub limit: Option<usize>,
    pub mode: EmitMode,
}

impl ListEmit {
    fn from_spec(spec: &JsonMap<String, JsonValue>) -> Self {
        let limit = spec
            .get("limit")
            .and_then(JsonValue::as_u64)
            .map(|n| n as usize);
        let emit = spec
            .get("emit")
            .filter(|v| is_truthy(v))
            .or_else(|| spec.get("as"))
            .and_then(JsonValue::as_str);
        let mode = match emit {
            Some("json") => EmitMode::Json,
            Some("count") => EmitMode::Count,
            Some("join") => EmitMode::Join(
                spec.get("sep")
                    .and_then(JsonValue::as_str)
                    .unwrap_or(",")
                    .to_string(),
            ),
            _ => EmitMode::List,
        };
        Self { limit, mode }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    Lt,
    Regex,
}

/// Condition of `if.cond` and `filter.where`.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Missing, non-object or unknown predicates are always false.
    Never,
    Exists(Rule),
    Compare { op: CompareOp, a: Rule, b: Rule },
    /// `regex` against a literal pattern, compiled once. `None` when the
    /// pattern is `null` or invalid, which never matches.
    Matches { a: Rule, pattern: Option<Regex> },
}

#[derive(Clone)]
pub struct CustomOp {
    pub key: String,
    pub handler: Arc<OperationFn>,
}

impl std::fmt::Debug for CustomOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomOp").field("key", &self.key).finish()
    }
}

#[derive(Debug, Clone)]
pub enum Op {
    /// No registered head key; only the tail applies.
    Missing,
    Malformed {
        key: String,
        reason: String,
    },
    Path(PathExpr),
    RelPath(PathExpr),
    Const(JsonValue),
    Coalesce(Vec<Rule>),
    /// `op: None` evaluates to `null` (unknown operator or short spec).
    Math {
        op: Option<MathOp>,
        args: Vec<Rule>,
    },
    Concat(Vec<Rule>),
    Join {
        over: Rule,
        sep: String,
    },
    Index {
        of: Rule,
        at: Option<usize>,
    },
    Len(Rule),
    Reduce {
        over: Rule,
        apply: Option<Rule>,
        agg: Option<Aggregate>,
    },
    DateFormat {
        parse: Rule,
        fmt: String,
        fmt_in: Option<String>,
    },
    DateParse {
        text: Rule,
        formats: Vec<String>,
        strict: bool,
    },
    FromTimestamp {
        sec: Rule,
        unit: TimeUnit,
    },
    ToTimezone {
        dt: Rule,
        from: Option<String>,
        to: Option<String>,
    },
    If {
        cond: Predicate,
        then: Rule,
        otherwise: Rule,
    },
    Ref(String),
    Lookup {
        key: Rule,
        table: Option<JsonMap<String, JsonValue>>,
        default: JsonValue,
    },
    Map {
        over: Rule,
        apply: Rule,
        emit: ListEmit,
    },
    Filter {
        over: Rule,
        predicate: Predicate,
        emit: ListEmit,
    },
    FlatMap {
        over: Rule,
        apply: Rule,
        emit: ListEmit,
    },
    Unique {
        over: Rule,
        key: Option<Rule>,
        emit: ListEmit,
    },
    Sort {
        over: Rule,
        key: Option<Rule>,
        reverse: bool,
        emit: ListEmit,
    },
    GroupReduce {
        over: Rule,
        by: Rule,
        value: Rule,
        agg: Option<Aggregate>,
        as_list: bool,
    },
    Serialize(Rule),
    Merge {
        objects: Vec<Rule>,
        strategy: Option<MergeStrategy>,
    },
    Udf {
        name: Option<String>,
        args: Vec<Rule>,
    },
    Custom(CustomOp),
}

impl Op {
    /// Head key this operation was compiled from.
    pub fn key(&self) -> Option<&str> {
        let builtin = match self {
            Op::Missing => return None,
            Op::Malformed { key, .. } => return Some(key),
            Op::Custom(custom) => return Some(&custom.key),
            Op::Path(_) => BuiltinOp::Path,
            Op::RelPath(_) => BuiltinOp::RelPath,
            Op::Const(_) => BuiltinOp::Const,
            Op::Coalesce(_) => BuiltinOp::Coalesce,
            Op::Math { .. } => BuiltinOp::Math,
            Op::Concat(_) => BuiltinOp::Concat,
            Op::Join { .. } => BuiltinOp::Join,
            Op::Index { .. } => BuiltinOp::Index,
            Op::Len(_) => BuiltinOp::Len,
            Op::Reduce { .. } => BuiltinOp::Reduce,
            Op::DateFormat { .. } => BuiltinOp::DateFormat,
            Op::DateParse { .. } => BuiltinOp::DateParse,
            Op::FromTimestamp { .. } => BuiltinOp::FromTimestamp,
            Op::ToTimezone { .. } => BuiltinOp::ToTimezone,
            Op::If { .. } => BuiltinOp::If,
            Op::Ref(_) => BuiltinOp::Ref,
            Op::Lookup { .. } => BuiltinOp::Lookup,
            Op::Map { .. } => BuiltinOp::Map,
            Op::Filter { .. } => BuiltinOp::Filter,
            Op::FlatMap { .. } => BuiltinOp::FlatMap,
            Op::Unique { .. } => BuiltinOp::Unique,
            Op::Sort { .. } => BuiltinOp::Sort,
            Op::GroupReduce { .. } => BuiltinOp::GroupReduce,
            Op::Serialize(_) => BuiltinOp::Serialize,
            Op::Merge { .. } => BuiltinOp::Merge,
            Op::Udf { .. } => BuiltinOp::Udf,
        };
        Some(builtin.key())
    }
}

impl Rule {
    pub fn null() -> Self {
        Rule::Literal(JsonValue::Null)
    }

    /// Compiles a raw rule. Fails only on path syntax errors.
    pub fn compile(value: &JsonValue, registry: &OperationRegistry) -> Result<Rule, TransformError> {
        Compiler { registry }.rule(value, "")
    }

    /// Like [`Rule::compile`], with error paths prefixed by `location`.
    pub fn compile_at(
        value: &JsonValue,
        registry: &OperationRegistry,
        location: &str,
    ) -> Result<Rule, TransformError> {
        Compiler { registry }.rule(value, location)
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Rule::Literal(_))
    }
}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", base, key)
    }
}

fn index_path(base: &str, index: usize) -> String {
    format!("{}[{}]", base, index)
}

struct Compiler<'r> {
    registry: &'r OperationRegistry,
}

impl Compiler<'_> {
    fn rule(&self, value: &JsonValue, at: &str) -> Result<Rule, TransformError> {
        let JsonValue::Object(obj) = value else {
            return Ok(Rule::Literal(value.clone()));
        };
        let op = match self.registry.match_key(obj) {
            None => Op::Missing,
            Some(key) => match self.registry.handler(key) {
                Some(Handler::Custom(handler)) => Op::Custom(CustomOp {
                    key: key.to_string(),
                    handler: Arc::clone(handler),
                }),
                Some(Handler::Builtin(builtin)) => {
                    self.builtin(*builtin, &obj[key], &join_path(at, key))?
                }
                None => Op::Missing,
            },
        };
        Ok(Rule::Node(Box::new(RuleNode {
            op,
            tail: Tail::from_object(obj),
            raw: value.clone(),
        })))
    }

    fn optional(&self, value: Option<&JsonValue>, at: &str) -> Result<Rule, TransformError> {
        match value {
            Some(value) => self.rule(value, at),
            None => Ok(Rule::null()),
        }
    }

    /// A rule only when the value is present and truthy.
    fn optional_truthy(
        &self,
        value: Option<&JsonValue>,
        at: &str,
    ) -> Result<Option<Rule>, TransformError> {
        match value {
            Some(value) if is_truthy(value) => Ok(Some(self.rule(value, at)?)),
            _ => Ok(None),
        }
    }

    fn list(&self, items: &[JsonValue], at: &str) -> Result<Vec<Rule>, TransformError> {
        items
            .iter()
            .enumerate()
            .map(|(idx, item)| self.rule(item, &index_path(at, idx)))
            .collect()
    }

    fn path(&self, value: &JsonValue, at: &str) -> Result<Option<PathExpr>, TransformError> {
        let Some(text) = value.as_str() else {
            return Ok(None);
        };
        parse_path(text).map(Some).map_err(|err| {
            TransformError::new(TransformErrorKind::InvalidPath, err.to_string()).with_path(at)
        })
    }

    fn predicate(&self, value: Option<&JsonValue>, at: &str) -> Result<Predicate, TransformError> {
        let Some(JsonValue::Object(obj)) = value else {
            return Ok(Predicate::Never);
        };
        let op = match obj.get("op").and_then(JsonValue::as_str) {
            Some("exists") => {
                return Ok(Predicate::Exists(
                    self.optional(obj.get("arg"), &join_path(at, "arg"))?,
                ));
            }
            Some("eq") => CompareOp::Eq,
            Some("gt") => CompareOp::Gt,
            Some("lt") => CompareOp::Lt,
            Some("regex") => CompareOp::Regex,
            _ => return Ok(Predicate::Never),
        };
        let a = self.optional(obj.get("a"), &join_path(at, "a"))?;
        let b = self.optional(obj.get("b"), &join_path(at, "b"))?;
        if let (CompareOp::Regex, Rule::Literal(pattern)) = (op, &b) {
            let pattern = match pattern {
                JsonValue::Null => None,
                other => Regex::new(&to_text(other)).ok(),
            };
            return Ok(Predicate::Matches { a, pattern });
        }
        Ok(Predicate::Compare { op, a, b })
    }

    fn builtin(&self, op: BuiltinOp, spec: &JsonValue, at: &str) -> Result<Op, TransformError> {
        let malformed = |reason: &str| Op::Malformed {
            key: op.key().to_string(),
            reason: reason.to_string(),
        };

        // Operations whose argument is not an object.
        match op {
            BuiltinOp::Path | BuiltinOp::RelPath => {
                return Ok(match self.path(spec, at)? {
                    Some(path) if op == BuiltinOp::Path => Op::Path(path),
                    Some(path) => Op::RelPath(path),
                    None => malformed("expected a path string"),
                });
            }
            BuiltinOp::Const => return Ok(Op::Const(spec.clone())),
            BuiltinOp::Coalesce => {
                return Ok(match spec {
                    JsonValue::Array(items) => Op::Coalesce(self.list(items, at)?),
                    _ => malformed("expected a list of rules"),
                });
            }
            BuiltinOp::Math => {
                return Ok(match spec.as_array() {
                    Some(items) if items.len() >= 2 => Op::Math {
                        op: items[0].as_str().and_then(MathOp::parse),
                        args: items[1..]
                            .iter()
                            .enumerate()
                            .map(|(idx, item)| self.rule(item, &index_path(at, idx + 1)))
                            .collect::<Result<_, _>>()?,
                    },
                    _ => Op::Math {
                        op: None,
                        args: Vec::new(),
                    },
                });
            }
            BuiltinOp::Concat => {
                return Ok(match spec {
                    JsonValue::Array(items) => Op::Concat(self.list(items, at)?),
                    _ => malformed("expected a list of rules"),
                });
            }
            BuiltinOp::Len => return Ok(Op::Len(self.rule(spec, at)?)),
            BuiltinOp::Ref => {
                return Ok(match spec.as_str() {
                    Some(name) => Op::Ref(name.to_string()),
                    None => malformed("expected a definition name"),
                });
            }
            _ => {}
        }

        let Some(obj) = spec.as_object() else {
            return Ok(malformed("expected an object"));
        };
        let field = |name: &str| obj.get(name);
        let sub = |name: &str| join_path(at, name);
        let text = |name: &str| field(name).and_then(JsonValue::as_str).map(str::to_string);

        let compiled = match op {
            BuiltinOp::Join => Op::Join {
                over: self.optional(field("over"), &sub("over"))?,
                sep: text("sep").unwrap_or_else(|| ",".to_string()),
            },
            BuiltinOp::Index => Op::Index {
                of: self.optional(field("of"), &sub("of"))?,
                at: match field("at") {
                    None => Some(0),
                    Some(at) => at.as_u64().map(|n| n as usize),
                },
            },
            BuiltinOp::Reduce => Op::Reduce {
                over: self.optional(field("over"), &sub("over"))?,
                apply: match field("apply") {
                    None | Some(JsonValue::Null) => None,
                    Some(apply) => Some(self.rule(apply, &sub("apply"))?),
                },
                agg: Aggregate::parse(text("op").as_deref().unwrap_or("sum"))
                    .filter(|agg| *agg != Aggregate::Count),
            },
            BuiltinOp::DateFormat => Op::DateFormat {
                parse: self.optional(field("parse"), &sub("parse"))?,
                fmt: text("fmt").unwrap_or_else(|| "%Y-%m-%d %H:%M:%S".to_string()),
                fmt_in: text("fmt_in").filter(|fmt| !fmt.is_empty()),
            },
            BuiltinOp::DateParse => Op::DateParse {
                text: self.optional(field("text"), &sub("text"))?,
                formats: field("formats")
                    .and_then(JsonValue::as_array)
                    .map(|formats| {
                        formats
                            .iter()
                            .filter_map(JsonValue::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                strict: field("strict").is_some_and(is_truthy),
            },
            BuiltinOp::FromTimestamp => Op::FromTimestamp {
                sec: self.optional(field("sec"), &sub("sec"))?,
                unit: TimeUnit::parse(text("unit").as_deref().unwrap_or("s")),
            },
            BuiltinOp::ToTimezone => Op::ToTimezone {
                dt: self.optional(field("dt"), &sub("dt"))?,
                from: text("from").filter(|zone| !zone.is_empty()),
                to: text("to"),
            },
            BuiltinOp::If => Op::If {
                cond: self.predicate(field("cond"), &sub("cond"))?,
                then: self.optional(field("then"), &sub("then"))?,
                otherwise: self.optional(field("else"), &sub("else"))?,
            },
            BuiltinOp::Lookup => Op::Lookup {
                key: self.optional(field("key"), &sub("key"))?,
                table: field("table").and_then(JsonValue::as_object).cloned(),
                default: field("default").cloned().unwrap_or(JsonValue::Null),
            },
            BuiltinOp::Map => Op::Map {
                over: self.optional(field("over"), &sub("over"))?,
                apply: self.optional(field("apply"), &sub("apply"))?,
                emit: ListEmit::from_spec(obj),
            },
            BuiltinOp::Filter => Op::Filter {
                over: self.optional(field("over"), &sub("over"))?,
                predicate: self.predicate(field("where"), &sub("where"))?,
                emit: ListEmit::from_spec(obj),
            },
            BuiltinOp::FlatMap => Op::FlatMap {
                over: self.optional(field("over"), &sub("over"))?,
                apply: self.optional(field("apply"), &sub("apply"))?,
                emit: ListEmit::from_spec(obj),
            },
            BuiltinOp::Unique => Op::Unique {
                over: self.optional(field("over"), &sub("over"))?,
                key: self.optional_truthy(field("key"), &sub("key"))?,
                emit: ListEmit::from_spec(obj),
            },
            BuiltinOp::Sort => Op::Sort {
                over: self.optional(field("over"), &sub("over"))?,
                key: self.optional_truthy(field("key"), &sub("key"))?,
                reverse: field("reverse").is_some_and(is_truthy),
                emit: ListEmit::from_spec(obj),
            },
            BuiltinOp::GroupReduce => Op::GroupReduce {
                over: self.optional(field("over"), &sub("over"))?,
                by: self.optional(field("by"), &sub("by"))?,
                value: self.optional(field("value"), &sub("value"))?,
                agg: Aggregate::parse(text("agg").as_deref().unwrap_or("sum")),
                as_list: field("as_list").is_some_and(is_truthy),
            },
            BuiltinOp::Serialize => Op::Serialize(self.optional(field("of"), &sub("of"))?),
            BuiltinOp::Merge => Op::Merge {
                objects: match field("objects") {
                    Some(JsonValue::Array(items)) => self.list(items, &sub("objects"))?,
                    _ => Vec::new(),
                },
                strategy: match text("strategy").as_deref().unwrap_or("override") {
                    "override" => Some(MergeStrategy::Override),
                    "first_non_null" => Some(MergeStrategy::FirstNonNull),
                    _ => None,
                },
            },
            BuiltinOp::Udf => Op::Udf {
                name: field("name")
                    .filter(|name| is_truthy(name))
                    .map(to_text),
                args: match field("args") {
                    Some(JsonValue::Array(items)) => self.list(items, &sub("args"))?,
                    _ => Vec::new(),
                },
            },
            BuiltinOp::Path
            | BuiltinOp::RelPath
            | BuiltinOp::Const
            | BuiltinOp::Coalesce
            | BuiltinOp::Math
            | BuiltinOp::Concat
            | BuiltinOp::Len
            | BuiltinOp::Ref => malformed("expected an object"),
        };
        Ok(compiled)
    }
}
