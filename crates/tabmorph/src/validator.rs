//! Static checks over a raw mapping value. Nothing is evaluated; the
//! mapping is never modified.

use std::collections::{HashMap, HashSet};

use chrono_tz::Tz;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::engine::{Converter, RecordTrace};
use crate::error::{ErrorCode, RuleError, ValidationResult};
use crate::model::{CastType, ErrorMode, JoinHow, Mapping};
use crate::path::parse_path;
use crate::registry::{BuiltinOp, Handler, OperationRegistry};
use crate::rule::{Aggregate, MathOp, TAIL_KEYS};

const MAPPING_KEYS: [&str; 5] = ["columns", "explode", "explode_join", "definitions", "schema"];
const SCHEMA_TYPES: [&str; 5] = ["str", "int", "float", "bool", "number"];
const LIST_EMIT_KEYS: [&str; 4] = ["emit", "as", "limit", "sep"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<RuleError>,
    pub warnings: Vec<RuleError>,
}

impl ValidationReport {
    pub fn into_result(self) -> ValidationResult {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

struct RefUse {
    name: String,
    path: String,
    definition: Option<String>,
}

struct ValidationCtx<'r> {
    registry: &'r OperationRegistry,
    errors: Vec<RuleError>,
    warnings: Vec<RuleError>,
    refs: Vec<RefUse>,
    /// Definition whose body is being walked, for cycle detection.
    definition: Option<String>,
}

impl<'r> ValidationCtx<'r> {
    fn new(registry: &'r OperationRegistry) -> Self {
        Self {
            registry,
            errors: Vec::new(),
            warnings: Vec::new(),
            refs: Vec::new(),
            definition: None,
        }
    }

    fn push(&mut self, code: ErrorCode, message: &str, path: impl Into<String>) {
        self.errors.push(RuleError::new(code, message).with_path(path));
    }

    fn warn(&mut self, code: ErrorCode, message: &str, path: impl Into<String>) {
        self.warnings.push(RuleError::new(code, message).with_path(path));
    }

    fn finish(self) -> ValidationReport {
        ValidationReport {
            ok: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

/// Structural and per-rule errors of a mapping.
pub fn validate_mapping(mapping: &JsonValue, registry: &OperationRegistry) -> ValidationReport {
    let mut report = validate_with_warnings(mapping, registry);
    report.warnings.clear();
    report
}

/// Like [`validate_mapping`], and also reports rule objects with several
/// head keys, `ref`s to missing definitions, and cyclic definitions.
pub fn validate_with_warnings(mapping: &JsonValue, registry: &OperationRegistry) -> ValidationReport {
    let mut ctx = ValidationCtx::new(registry);
    let Some(root) = mapping.as_object() else {
        ctx.push(ErrorCode::InvalidMapping, "mapping must be an object", "mapping");
        return ctx.finish();
    };

    for key in root.keys() {
        if !MAPPING_KEYS.contains(&key.as_str()) {
            ctx.push(ErrorCode::UnknownKey, "unknown mapping key", key.as_str());
        }
    }

    validate_columns(root.get("columns"), &mut ctx);
    validate_explode(root.get("explode"), &mut ctx);
    validate_explode_join(root.get("explode_join"), &mut ctx);
    if root.get("explode").is_some() && root.get("explode_join").is_some() {
        ctx.push(
            ErrorCode::ExplodeConflict,
            "'explode' and 'explode_join' cannot be used together",
            "explode_join",
        );
    }
    let definitions = validate_definitions(root.get("definitions"), &mut ctx);
    if let Some(schema) = root.get("schema") {
        validate_schema(schema, &mut ctx);
    }
    check_refs(&definitions, &mut ctx);
    ctx.finish()
}

fn validate_columns(columns: Option<&JsonValue>, ctx: &mut ValidationCtx<'_>) {
    let Some(columns) = columns.and_then(JsonValue::as_object).filter(|c| !c.is_empty()) else {
        ctx.push(
            ErrorCode::MissingColumns,
            "'columns' must be a non-empty object",
            "columns",
        );
        return;
    };
    for (name, rule) in columns {
        if name.trim().is_empty() {
            ctx.push(
                ErrorCode::InvalidColumnName,
                "column names must be non-empty strings",
                "columns",
            );
        }
        validate_rule(rule, &format!("columns.{}", name), ctx);
    }
}

fn validate_explode(explode: Option<&JsonValue>, ctx: &mut ValidationCtx<'_>) {
    let Some(explode) = explode else {
        return;
    };
    let Some(obj) = explode.as_object() else {
        ctx.push(ErrorCode::InvalidExplode, "'explode' must be an object", "explode");
        return;
    };
    unknown_fields(obj, &["path", "emit_root_when_empty"], "explode", ctx);
    match obj.get("path").and_then(JsonValue::as_str) {
        Some(path) if !path.is_empty() => check_path(path, "explode.path", ctx),
        _ => ctx.push(
            ErrorCode::InvalidExplode,
            "'explode.path' must be a non-empty string",
            "explode.path",
        ),
    }
    if obj
        .get("emit_root_when_empty")
        .is_some_and(|flag| !flag.is_boolean())
    {
        ctx.push(
            ErrorCode::InvalidExplode,
            "'emit_root_when_empty' must be a boolean",
            "explode.emit_root_when_empty",
        );
    }
}

fn validate_explode_join(join: Option<&JsonValue>, ctx: &mut ValidationCtx<'_>) {
    let Some(join) = join else {
        return;
    };
    let Some(obj) = join.as_object() else {
        ctx.push(
            ErrorCode::InvalidExplodeJoin,
            "'explode_join' must be an object",
            "explode_join",
        );
        return;
    };
    unknown_fields(obj, &["left", "right", "how"], "explode_join", ctx);
    for side in ["left", "right"] {
        let path = format!("explode_join.{}", side);
        match obj.get(side).and_then(JsonValue::as_str) {
            Some(text) if !text.is_empty() => check_path(text, &path, ctx),
            _ => ctx.push(
                ErrorCode::InvalidExplodeJoin,
                "must be a non-empty path string",
                path,
            ),
        }
    }
    if let Some(how) = obj.get("how") {
        if how.as_str().and_then(JoinHow::parse).is_none() {
            ctx.push(
                ErrorCode::InvalidExplodeJoin,
                "'how' must be one of inner, left, right, outer",
                "explode_join.how",
            );
        }
    }
}

/// Validates definition bodies and returns their names.
fn validate_definitions(definitions: Option<&JsonValue>, ctx: &mut ValidationCtx<'_>) -> HashSet<String> {
    let mut names = HashSet::new();
    let Some(definitions) = definitions else {
        return names;
    };
    let Some(obj) = definitions.as_object() else {
        ctx.push(
            ErrorCode::InvalidDefinitions,
            "'definitions' must be an object",
            "definitions",
        );
        return names;
    };
    for (name, rule) in obj {
        if name.trim().is_empty() {
            ctx.push(
                ErrorCode::InvalidDefinitions,
                "definition names must be non-empty strings",
                "definitions",
            );
        }
        names.insert(name.clone());
        ctx.definition = Some(name.clone());
        validate_rule(rule, &format!("definitions.{}", name), ctx);
        ctx.definition = None;
    }
    names
}

fn validate_schema(schema: &JsonValue, ctx: &mut ValidationCtx<'_>) {
    let Some(obj) = schema.as_object() else {
        ctx.push(ErrorCode::InvalidSchema, "'schema' must be an object", "schema");
        return;
    };
    unknown_fields(obj, &["columns", "strict"], "schema", ctx);
    if obj.get("strict").is_some_and(|strict| !strict.is_boolean()) {
        ctx.push(
            ErrorCode::InvalidSchema,
            "'schema.strict' must be a boolean",
            "schema.strict",
        );
    }
    let Some(columns) = obj.get("columns") else {
        return;
    };
    let Some(columns) = columns.as_object() else {
        ctx.push(
            ErrorCode::InvalidSchema,
            "'schema.columns' must be an object",
            "schema.columns",
        );
        return;
    };
    for (name, spec) in columns {
        let base = format!("schema.columns.{}", name);
        let Some(spec) = spec.as_object() else {
            ctx.push(ErrorCode::InvalidSchema, "column schema must be an object", base);
            continue;
        };
        unknown_fields(spec, &["type", "nullable", "min", "max", "regex"], &base, ctx);
        if let Some(kind) = spec.get("type") {
            if !kind.as_str().is_some_and(|k| SCHEMA_TYPES.contains(&k)) {
                ctx.push(
                    ErrorCode::InvalidSchema,
                    "type must be one of str, int, float, bool, number",
                    format!("{}.type", base),
                );
            }
        }
        if spec.get("nullable").is_some_and(|v| !v.is_boolean()) {
            ctx.push(
                ErrorCode::InvalidSchema,
                "nullable must be a boolean",
                format!("{}.nullable", base),
            );
        }
        for bound in ["min", "max"] {
            if spec.get(bound).is_some_and(|v| !v.is_number()) {
                ctx.push(
                    ErrorCode::InvalidSchema,
                    "bound must be a number",
                    format!("{}.{}", base, bound),
                );
            }
        }
        if let Some(pattern) = spec.get("regex") {
            let valid = pattern.as_str().is_some_and(|p| Regex::new(p).is_ok());
            if !valid {
                ctx.push(
                    ErrorCode::InvalidSchema,
                    "regex must be a valid pattern string",
                    format!("{}.regex", base),
                );
            }
        }
    }
}

fn check_refs(definitions: &HashSet<String>, ctx: &mut ValidationCtx<'_>) {
    let mut undefined = Vec::new();
    let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
    for usage in &ctx.refs {
        if !definitions.contains(&usage.name) {
            undefined.push((usage.name.clone(), usage.path.clone()));
        }
        if let Some(owner) = &usage.definition {
            graph.entry(owner.as_str()).or_default().push(usage.name.as_str());
        }
    }

    let mut owners: Vec<&str> = graph.keys().copied().collect();
    owners.sort_unstable();
    let cyclic: Vec<String> = owners
        .into_iter()
        .filter(|owner| reaches(&graph, owner, owner))
        .map(str::to_string)
        .collect();

    for (name, path) in undefined {
        ctx.warn(
            ErrorCode::UndefinedRef,
            &format!("ref '{}' does not name a definition", name),
            path,
        );
    }
    for name in cyclic {
        ctx.warn(
            ErrorCode::CyclicRef,
            &format!("definition '{}' refers back to itself", name),
            format!("definitions.{}", name),
        );
    }
}

/// Whether `target` is reachable from `start` through at least one edge.
fn reaches(graph: &HashMap<&str, Vec<&str>>, start: &str, target: &str) -> bool {
    let mut stack: Vec<&str> = graph.get(start).cloned().unwrap_or_default();
    let mut seen = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if seen.insert(node) {
            if let Some(next) = graph.get(node) {
                stack.extend(next.iter().copied());
            }
        }
    }
    false
}

fn check_path(path: &str, at: &str, ctx: &mut ValidationCtx<'_>) {
    if let Err(err) = parse_path(path) {
        ctx.push(ErrorCode::InvalidPath, &err.to_string(), at);
    }
}

fn unknown_fields(obj: &JsonMap<String, JsonValue>, allowed: &[&str], base: &str, ctx: &mut ValidationCtx<'_>) {
    for key in obj.keys() {
        if !allowed.contains(&key.as_str()) {
            ctx.push(
                ErrorCode::UnknownKey,
                &format!("unknown field '{}'", key),
                format!("{}.{}", base, key),
            );
        }
    }
}

fn validate_rule(rule: &JsonValue, path: &str, ctx: &mut ValidationCtx<'_>) {
    let JsonValue::Object(obj) = rule else {
        return;
    };

    if let Some(cast) = obj.get("cast") {
        if cast.as_str().and_then(CastType::parse).is_none() {
            ctx.push(
                ErrorCode::InvalidCast,
                "cast must be one of str, int, float, bool",
                format!("{}.cast", path),
            );
        }
    }
    if let Some(mode) = obj.get("on_error") {
        if mode.as_str().and_then(ErrorMode::parse).is_none() {
            ctx.push(
                ErrorCode::InvalidErrorMode,
                "on_error must be one of null, default, raise, warn",
                format!("{}.on_error", path),
            );
        }
    }

    let registry = ctx.registry;
    let heads = registry.matching_keys(obj);
    if heads.len() > 1 {
        ctx.warn(
            ErrorCode::AmbiguousOp,
            &format!("several operations {:?}; '{}' takes precedence", heads, heads[0]),
            path,
        );
    }

    let unknown: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|key| !TAIL_KEYS.contains(key) && !registry.contains(key))
        .collect();

    let Some(head) = heads.first().copied() else {
        if !unknown.is_empty() {
            ctx.push(
                ErrorCode::UnknownKey,
                &format!("no operation matches keys {:?}", unknown),
                path,
            );
        }
        return;
    };

    match registry.handler(head) {
        Some(Handler::Builtin(op)) => {
            for key in unknown {
                ctx.push(
                    ErrorCode::UnknownKey,
                    &format!("unknown key '{}' next to '{}'", key, head),
                    format!("{}.{}", path, key),
                );
            }
            validate_builtin(*op, &obj[head], &format!("{}.{}", path, head), ctx);
        }
        Some(Handler::Custom(_)) | None => {}
    }
}

/// Walks a rule field that must be present.
fn required_rule(obj: &JsonMap<String, JsonValue>, field: &str, at: &str, ctx: &mut ValidationCtx<'_>) {
    let path = format!("{}.{}", at, field);
    match obj.get(field) {
        Some(rule) => validate_rule(rule, &path, ctx),
        None => ctx.push(
            ErrorCode::MissingOp,
            &format!("'{}' is required", field),
            path,
        ),
    }
}

fn optional_rule(obj: &JsonMap<String, JsonValue>, field: &str, at: &str, ctx: &mut ValidationCtx<'_>) {
    if let Some(rule) = obj.get(field) {
        validate_rule(rule, &format!("{}.{}", at, field), ctx);
    }
}

fn expect_kind(
    obj: &JsonMap<String, JsonValue>,
    field: &str,
    at: &str,
    expected: &str,
    check: fn(&JsonValue) -> bool,
    ctx: &mut ValidationCtx<'_>,
) {
    if obj.get(field).is_some_and(|value| !check(value)) {
        ctx.push(
            ErrorCode::InvalidArgs,
            &format!("'{}' must be {}", field, expected),
            format!("{}.{}", at, field),
        );
    }
}

fn rule_list(items: &JsonValue, at: &str, ctx: &mut ValidationCtx<'_>) {
    match items.as_array() {
        Some(items) if !items.is_empty() => {
            for (idx, item) in items.iter().enumerate() {
                validate_rule(item, &format!("{}[{}]", at, idx), ctx);
            }
        }
        _ => ctx.push(
            ErrorCode::InvalidArgs,
            "expected a non-empty list of rules",
            at,
        ),
    }
}

fn list_emit(obj: &JsonMap<String, JsonValue>, at: &str, ctx: &mut ValidationCtx<'_>) {
    for field in ["emit", "as"] {
        let Some(mode) = obj.get(field) else {
            continue;
        };
        if !matches!(mode.as_str(), Some("list" | "json" | "count" | "join")) {
            ctx.push(
                ErrorCode::InvalidArgs,
                "emit must be one of list, json, count, join",
                format!("{}.{}", at, field),
            );
        }
    }
    expect_kind(obj, "limit", at, "a non-negative integer", JsonValue::is_u64, ctx);
    expect_kind(obj, "sep", at, "a string", JsonValue::is_string, ctx);
}

fn predicate(value: Option<&JsonValue>, at: &str, ctx: &mut ValidationCtx<'_>) {
    let Some(value) = value else {
        ctx.push(ErrorCode::MissingOp, "a predicate is required", at);
        return;
    };
    let Some(obj) = value.as_object() else {
        ctx.push(ErrorCode::InvalidPredicate, "predicate must be an object", at);
        return;
    };
    match obj.get("op").and_then(JsonValue::as_str) {
        Some("exists") => {
            unknown_fields(obj, &["op", "arg"], at, ctx);
            required_rule(obj, "arg", at, ctx);
        }
        Some("eq" | "gt" | "lt" | "regex") => {
            unknown_fields(obj, &["op", "a", "b"], at, ctx);
            required_rule(obj, "a", at, ctx);
            required_rule(obj, "b", at, ctx);
        }
        _ => ctx.push(
            ErrorCode::InvalidPredicate,
            "predicate op must be one of exists, eq, gt, lt, regex",
            format!("{}.op", at),
        ),
    }
}

fn validate_builtin(op: BuiltinOp, spec: &JsonValue, at: &str, ctx: &mut ValidationCtx<'_>) {
    match op {
        BuiltinOp::Path | BuiltinOp::RelPath => match spec.as_str() {
            Some(path) => check_path(path, at, ctx),
            None => ctx.push(ErrorCode::InvalidPath, "path must be a string", at),
        },
        BuiltinOp::Const => {}
        BuiltinOp::Coalesce | BuiltinOp::Concat => rule_list(spec, at, ctx),
        BuiltinOp::Math => {
            let Some(items) = spec.as_array().filter(|items| items.len() >= 2) else {
                ctx.push(
                    ErrorCode::InvalidArgs,
                    "math expects [operator, arg, ...]",
                    at,
                );
                return;
            };
            if items[0].as_str().and_then(MathOp::parse).is_none() {
                ctx.push(
                    ErrorCode::InvalidOperator,
                    "math operator must be one of add, sub, mul, div",
                    format!("{}[0]", at),
                );
            }
            for (idx, item) in items.iter().enumerate().skip(1) {
                validate_rule(item, &format!("{}[{}]", at, idx), ctx);
            }
        }
        BuiltinOp::Len => validate_rule(spec, at, ctx),
        BuiltinOp::Ref => match spec.as_str() {
            Some(name) if !name.is_empty() => ctx.refs.push(RefUse {
                name: name.to_string(),
                path: at.to_string(),
                definition: ctx.definition.clone(),
            }),
            _ => ctx.push(
                ErrorCode::InvalidArgs,
                "ref must name a definition",
                at,
            ),
        },
        _ => {
            let Some(obj) = spec.as_object() else {
                ctx.push(ErrorCode::InvalidArgs, "expected an object", at);
                return;
            };
            validate_object_op(op, obj, at, ctx);
        }
    }
}

fn validate_object_op(
    op: BuiltinOp,
    obj: &JsonMap<String, JsonValue>,
    at: &str,
    ctx: &mut ValidationCtx<'_>,
) {
    let with_emit = |fields: &[&'static str]| -> Vec<&'static str> {
        fields.iter().chain(LIST_EMIT_KEYS.iter()).copied().collect()
    };

    match op {
        BuiltinOp::Join => {
            unknown_fields(obj, &["over", "sep"], at, ctx);
            required_rule(obj, "over", at, ctx);
            expect_kind(obj, "sep", at, "a string", JsonValue::is_string, ctx);
        }
        BuiltinOp::Index => {
            unknown_fields(obj, &["of", "at"], at, ctx);
            required_rule(obj, "of", at, ctx);
            expect_kind(obj, "at", at, "a non-negative integer", JsonValue::is_u64, ctx);
        }
        BuiltinOp::Reduce => {
            unknown_fields(obj, &["over", "op", "apply"], at, ctx);
            required_rule(obj, "over", at, ctx);
            optional_rule(obj, "apply", at, ctx);
            let agg = obj
                .get("op")
                .and_then(JsonValue::as_str)
                .and_then(Aggregate::parse)
                .filter(|agg| *agg != Aggregate::Count);
            if agg.is_none() {
                ctx.push(
                    ErrorCode::InvalidOperator,
                    "reduce op must be one of sum, mean, min, max",
                    format!("{}.op", at),
                );
            }
        }
        BuiltinOp::DateFormat => {
            unknown_fields(obj, &["parse", "fmt", "fmt_in"], at, ctx);
            required_rule(obj, "parse", at, ctx);
            expect_kind(obj, "fmt", at, "a string", JsonValue::is_string, ctx);
            expect_kind(obj, "fmt_in", at, "a string", JsonValue::is_string, ctx);
        }
        BuiltinOp::DateParse => {
            unknown_fields(obj, &["text", "formats", "strict"], at, ctx);
            required_rule(obj, "text", at, ctx);
            expect_kind(obj, "formats", at, "a list of strings", |v| {
                v.as_array().is_some_and(|items| items.iter().all(JsonValue::is_string))
            }, ctx);
            expect_kind(obj, "strict", at, "a boolean", JsonValue::is_boolean, ctx);
        }
        BuiltinOp::FromTimestamp => {
            unknown_fields(obj, &["sec", "unit"], at, ctx);
            required_rule(obj, "sec", at, ctx);
            expect_kind(obj, "unit", at, "one of s, ms, us, ns", |v| {
                matches!(v.as_str(), Some("s" | "ms" | "us" | "ns"))
            }, ctx);
        }
        BuiltinOp::ToTimezone => {
            unknown_fields(obj, &["dt", "from", "to"], at, ctx);
            required_rule(obj, "dt", at, ctx);
            if !obj.contains_key("to") {
                ctx.push(ErrorCode::MissingOp, "'to' is required", format!("{}.to", at));
            }
            for field in ["from", "to"] {
                expect_kind(obj, field, at, "an IANA time zone name", |v| {
                    v.as_str().is_some_and(|zone| zone.parse::<Tz>().is_ok())
                }, ctx);
            }
        }
        BuiltinOp::If => {
            unknown_fields(obj, &["cond", "then", "else"], at, ctx);
            predicate(obj.get("cond"), &format!("{}.cond", at), ctx);
            required_rule(obj, "then", at, ctx);
            optional_rule(obj, "else", at, ctx);
        }
        BuiltinOp::Lookup => {
            unknown_fields(obj, &["key", "table", "default"], at, ctx);
            required_rule(obj, "key", at, ctx);
            expect_kind(obj, "table", at, "an object", JsonValue::is_object, ctx);
        }
        BuiltinOp::Map | BuiltinOp::FlatMap => {
            unknown_fields(obj, &with_emit(&["over", "apply"]), at, ctx);
            required_rule(obj, "over", at, ctx);
            required_rule(obj, "apply", at, ctx);
            list_emit(obj, at, ctx);
        }
        BuiltinOp::Filter => {
            unknown_fields(obj, &with_emit(&["over", "where"]), at, ctx);
            required_rule(obj, "over", at, ctx);
            predicate(obj.get("where"), &format!("{}.where", at), ctx);
            list_emit(obj, at, ctx);
        }
        BuiltinOp::Unique => {
            unknown_fields(obj, &with_emit(&["over", "key"]), at, ctx);
            required_rule(obj, "over", at, ctx);
            optional_rule(obj, "key", at, ctx);
            list_emit(obj, at, ctx);
        }
        BuiltinOp::Sort => {
            unknown_fields(obj, &with_emit(&["over", "key", "reverse"]), at, ctx);
            required_rule(obj, "over", at, ctx);
            optional_rule(obj, "key", at, ctx);
            expect_kind(obj, "reverse", at, "a boolean", JsonValue::is_boolean, ctx);
            list_emit(obj, at, ctx);
        }
        BuiltinOp::GroupReduce => {
            unknown_fields(obj, &["over", "by", "value", "agg", "as_list"], at, ctx);
            required_rule(obj, "over", at, ctx);
            required_rule(obj, "by", at, ctx);
            required_rule(obj, "value", at, ctx);
            if let Some(agg) = obj.get("agg") {
                if agg.as_str().and_then(Aggregate::parse).is_none() {
                    ctx.push(
                        ErrorCode::InvalidOperator,
                        "agg must be one of sum, mean, min, max, count",
                        format!("{}.agg", at),
                    );
                }
            }
            expect_kind(obj, "as_list", at, "a boolean", JsonValue::is_boolean, ctx);
        }
        BuiltinOp::Serialize => {
            unknown_fields(obj, &["of"], at, ctx);
            required_rule(obj, "of", at, ctx);
        }
        BuiltinOp::Merge => {
            unknown_fields(obj, &["objects", "strategy"], at, ctx);
            match obj.get("objects") {
                Some(objects) => rule_list(objects, &format!("{}.objects", at), ctx),
                None => ctx.push(
                    ErrorCode::MissingOp,
                    "'objects' is required",
                    format!("{}.objects", at),
                ),
            }
            expect_kind(obj, "strategy", at, "override or first_non_null", |v| {
                matches!(v.as_str(), Some("override" | "first_non_null"))
            }, ctx);
        }
        BuiltinOp::Udf => {
            unknown_fields(obj, &["name", "args"], at, ctx);
            if !obj
                .get("name")
                .and_then(JsonValue::as_str)
                .is_some_and(|name| !name.is_empty())
            {
                ctx.push(
                    ErrorCode::InvalidArgs,
                    "udf name must be a non-empty string",
                    format!("{}.name", at),
                );
            }
            match obj.get("args") {
                Some(JsonValue::Array(args)) => {
                    for (idx, arg) in args.iter().enumerate() {
                        validate_rule(arg, &format!("{}.args[{}]", at, idx), ctx);
                    }
                }
                Some(_) => ctx.push(
                    ErrorCode::InvalidArgs,
                    "'args' must be a list",
                    format!("{}.args", at),
                ),
                None => {}
            }
        }
        BuiltinOp::Path
        | BuiltinOp::RelPath
        | BuiltinOp::Const
        | BuiltinOp::Coalesce
        | BuiltinOp::Math
        | BuiltinOp::Concat
        | BuiltinOp::Len
        | BuiltinOp::Ref => {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DryRunStage {
    Structure,
    Evaluation,
}

/// Outcome of building a converter and running it over sample input.
#[derive(Debug, Clone, Serialize)]
pub struct DryRun {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<DryRunStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub rows: usize,
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<RecordTrace>,
}

impl DryRun {
    fn failed(stage: DryRunStage, error: String) -> Self {
        Self {
            ok: false,
            stage: Some(stage),
            error: Some(error),
            rows: 0,
            columns: Vec::new(),
            trace: None,
        }
    }
}

/// Converts `sample` (one record or an array of records) and traces its
/// first record.
pub fn dry_run(mapping: &JsonValue, sample: &JsonValue) -> DryRun {
    let converter = match serde_json::from_value::<Mapping>(mapping.clone()) {
        Ok(mapping) => match Converter::new(mapping) {
            Ok(converter) => converter,
            Err(err) => return DryRun::failed(DryRunStage::Structure, err.to_string()),
        },
        Err(err) => return DryRun::failed(DryRunStage::Structure, err.to_string()),
    };

    let conversion = match converter.convert(sample) {
        Ok(conversion) => conversion,
        Err(err) => return DryRun::failed(DryRunStage::Evaluation, err.to_string()),
    };
    let first = match sample {
        JsonValue::Array(records) => records.first(),
        other => Some(other),
    };
    let trace = match first.map(|record| converter.trace(record)).transpose() {
        Ok(trace) => trace,
        Err(err) => return DryRun::failed(DryRunStage::Evaluation, err.to_string()),
    };

    DryRun {
        ok: true,
        stage: None,
        error: None,
        rows: conversion.table.len(),
        columns: conversion.table.columns,
        trace,
    }
}
