//! Head-key registry for operations and the UDF table.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::context::EvalContext;
use crate::error::TransformError;

/// Recursion handle passed to custom operation handlers.
pub trait ChildEval {
    /// Evaluates a raw rule against `ctx`, which is either the handler's own
    /// context or one derived from it with [`EvalContext::with_rel`].
    fn eval(&mut self, rule: &JsonValue, ctx: &EvalContext<'_>)
    -> Result<JsonValue, TransformError>;

    /// Applies the `default`/`cast` tail of `rule` to `value`.
    fn apply_tail(&self, value: JsonValue, rule: &JsonValue) -> JsonValue;
}

/// A custom operation. Receives the whole rule object; the returned value
/// still goes through the rule's tail operations.
pub type OperationFn = dyn Fn(&JsonValue, &EvalContext<'_>, &mut dyn ChildEval) -> Result<JsonValue, TransformError>
    + Send
    + Sync;

pub type UdfFn = dyn Fn(&[JsonValue]) -> Result<JsonValue, String> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinOp {
    Path,
    RelPath,
    Const,
    Coalesce,
    Math,
    Concat,
    Join,
    Index,
    Len,
    Reduce,
    DateFormat,
    DateParse,
    FromTimestamp,
    ToTimezone,
    If,
    Ref,
    Lookup,
    Map,
    Filter,
    FlatMap,
    Unique,
    Sort,
    GroupReduce,
    Serialize,
    Merge,
    Udf,
}

impl BuiltinOp {
    /// Built-ins in detection precedence order.
    pub const ALL: [BuiltinOp; 26] = [
        BuiltinOp::Path,
        BuiltinOp::RelPath,
        BuiltinOp::Const,
        BuiltinOp::Coalesce,
        BuiltinOp::Math,
        BuiltinOp::Concat,
        BuiltinOp::Join,
        BuiltinOp::Index,
        BuiltinOp::Len,
        BuiltinOp::Reduce,
        BuiltinOp::DateFormat,
        BuiltinOp::DateParse,
        BuiltinOp::FromTimestamp,
        BuiltinOp::ToTimezone,
        BuiltinOp::If,
        BuiltinOp::Ref,
        BuiltinOp::Lookup,
        BuiltinOp::Map,
        BuiltinOp::Filter,
        BuiltinOp::FlatMap,
        BuiltinOp::Unique,
        BuiltinOp::Sort,
        BuiltinOp::GroupReduce,
        BuiltinOp::Serialize,
        BuiltinOp::Merge,
        BuiltinOp::Udf,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            BuiltinOp::Path => "path",
            BuiltinOp::RelPath => "rel_path",
            BuiltinOp::Const => "const",
            BuiltinOp::Coalesce => "coalesce",
            BuiltinOp::Math => "math",
            BuiltinOp::Concat => "concat",
            BuiltinOp::Join => "join",
            BuiltinOp::Index => "index",
            BuiltinOp::Len => "len",
            BuiltinOp::Reduce => "reduce",
            BuiltinOp::DateFormat => "date_format",
            BuiltinOp::DateParse => "date_parse",
            BuiltinOp::FromTimestamp => "from_timestamp",
            BuiltinOp::ToTimezone => "to_timezone",
            BuiltinOp::If => "if",
            BuiltinOp::Ref => "ref",
            BuiltinOp::Lookup => "lookup",
            BuiltinOp::Map => "map",
            BuiltinOp::Filter => "filter",
            BuiltinOp::FlatMap => "flat_map",
            BuiltinOp::Unique => "unique",
            BuiltinOp::Sort => "sort",
            BuiltinOp::GroupReduce => "group_reduce",
            BuiltinOp::Serialize => "serialize",
            BuiltinOp::Merge => "merge",
            BuiltinOp::Udf => "udf",
        }
    }
}

#[derive(Clone)]
pub enum Handler {
    Builtin(BuiltinOp),
    Custom(Arc<OperationFn>),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Builtin(op) => write!(f, "Builtin({})", op.key()),
            Handler::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Ordered head key -> handler table. Order is detection precedence: when a
/// rule object carries several registered keys, the earliest one wins.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    entries: Vec<(String, Handler)>,
}

impl OperationRegistry {
    /// Registry with every built-in operation.
    pub fn new() -> Self {
        Self {
            entries: BuiltinOp::ALL
                .into_iter()
                .map(|op| (op.key().to_string(), Handler::Builtin(op)))
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds `key` at the lowest precedence, or replaces the handler of an
    /// existing key without moving it.
    pub fn register<F>(&mut self, key: &str, handler: F) -> Result<(), TransformError>
    where
        F: Fn(&JsonValue, &EvalContext<'_>, &mut dyn ChildEval) -> Result<JsonValue, TransformError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(key, Handler::Custom(Arc::new(handler)), false)
    }

    /// Adds or moves `key` to the highest precedence.
    pub fn register_first<F>(&mut self, key: &str, handler: F) -> Result<(), TransformError>
    where
        F: Fn(&JsonValue, &EvalContext<'_>, &mut dyn ChildEval) -> Result<JsonValue, TransformError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(key, Handler::Custom(Arc::new(handler)), true)
    }

    /// Adds a built-in under its own key, or restores it after an override.
    /// Starting from [`OperationRegistry::empty`] this gives a registry with a
    /// chosen subset of the built-ins.
    pub fn register_builtin(&mut self, op: BuiltinOp) -> Result<(), TransformError> {
        self.insert(op.key(), Handler::Builtin(op), false)
    }

    fn insert(&mut self, key: &str, handler: Handler, first: bool) -> Result<(), TransformError> {
        if key.trim().is_empty() {
            return Err(TransformError::mapping(
                "operation key must be a non-empty string",
            ));
        }
        let existing = self.entries.iter().position(|(k, _)| k == key);
        match (existing, first) {
            (Some(idx), false) => self.entries[idx].1 = handler,
            (Some(idx), true) => {
                self.entries.remove(idx);
                self.entries.insert(0, (key.to_string(), handler));
            }
            (None, false) => self.entries.push((key.to_string(), handler)),
            (None, true) => self.entries.insert(0, (key.to_string(), handler)),
        }
        Ok(())
    }

    /// First registered key present in `rule`.
    pub fn match_key(&self, rule: &JsonMap<String, JsonValue>) -> Option<&str> {
        self.entries
            .iter()
            .map(|(key, _)| key.as_str())
            .find(|key| rule.contains_key(*key))
    }

    /// Every registered key present in `rule`, in precedence order.
    pub fn matching_keys(&self, rule: &JsonMap<String, JsonValue>) -> Vec<&str> {
        self.entries
            .iter()
            .map(|(key, _)| key.as_str())
            .filter(|key| rule.contains_key(*key))
            .collect()
    }

    pub fn handler(&self, key: &str) -> Option<&Handler> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, handler)| handler)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handler(key).is_some()
    }

    pub fn head_keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }
}

/// Named functions callable from `udf` rules with positional arguments.
#[derive(Clone, Default)]
pub struct UdfRegistry {
    funcs: HashMap<String, Arc<UdfFn>>,
}

impl UdfRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, func: F) -> Result<(), TransformError>
    where
        F: Fn(&[JsonValue]) -> Result<JsonValue, String> + Send + Sync + 'static,
    {
        if name.trim().is_empty() {
            return Err(TransformError::mapping("udf name must be a non-empty string"));
        }
        self.funcs.insert(name.to_string(), Arc::new(func));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&UdfFn> {
        self.funcs.get(name).map(|func| func.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }
}

impl std::fmt::Debug for UdfRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.funcs.keys().collect();
        names.sort();
        f.debug_struct("UdfRegistry").field("funcs", &names).finish()
    }
}

/// Process-wide registry holding the built-ins; read-only once created.
pub fn default_registry() -> &'static OperationRegistry {
    static REGISTRY: OnceLock<OperationRegistry> = OnceLock::new();
    REGISTRY.get_or_init(OperationRegistry::new)
}

pub fn default_udfs() -> &'static UdfRegistry {
    static UDFS: OnceLock<UdfRegistry> = OnceLock::new();
    UDFS.get_or_init(UdfRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: JsonValue) -> JsonMap<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn precedence_follows_registration_order() {
        let registry = OperationRegistry::new();
        let rule = object(json!({"const": 1, "path": "a"}));
        assert_eq!(registry.match_key(&rule), Some("path"));
        assert_eq!(registry.matching_keys(&rule), vec!["path", "const"]);
        assert_eq!(registry.match_key(&object(json!({"cast": "int"}))), None);
    }

    #[test]
    fn reregistering_keeps_position() {
        let mut registry = OperationRegistry::new();
        registry
            .register("path", |_, _, _| Ok(json!("custom")))
            .unwrap();
        assert_eq!(registry.head_keys().next(), Some("path"));
        assert!(matches!(registry.handler("path"), Some(Handler::Custom(_))));
    }

    #[test]
    fn register_first_takes_top_precedence() {
        let mut registry = OperationRegistry::new();
        registry.register_first("upper", |_, _, _| Ok(JsonValue::Null)).unwrap();
        registry.register("lower", |_, _, _| Ok(JsonValue::Null)).unwrap();
        let rule = object(json!({"path": "a", "upper": 1, "lower": 2}));
        assert_eq!(registry.match_key(&rule), Some("upper"));
        assert_eq!(registry.head_keys().last(), Some("lower"));
    }

    #[test]
    fn empty_keys_are_rejected() {
        let mut registry = OperationRegistry::empty();
        assert!(registry.register("", |_, _, _| Ok(JsonValue::Null)).is_err());
        let mut udfs = UdfRegistry::new();
        assert!(udfs.register(" ", |_| Ok(JsonValue::Null)).is_err());
    }

    #[test]
    fn register_builtin_restores_in_place() {
        let mut registry = OperationRegistry::new();
        registry.register("const", |_, _, _| Ok(JsonValue::Null)).unwrap();
        registry.register_builtin(BuiltinOp::Const).unwrap();
        assert!(matches!(
            registry.handler("const"),
            Some(Handler::Builtin(BuiltinOp::Const))
        ));
        assert_eq!(registry.head_keys().nth(2), Some("const"));

        let mut subset = OperationRegistry::empty();
        subset.register_builtin(BuiltinOp::Concat).unwrap();
        subset.register_builtin(BuiltinOp::Path).unwrap();
        assert_eq!(subset.head_keys().collect::<Vec<_>>(), vec!["concat", "path"]);
    }

    #[test]
    fn default_instances_are_shared() {
        assert!(std::ptr::eq(default_registry(), default_registry()));
        assert!(default_registry().contains("group_reduce"));
        assert!(!default_udfs().contains("anything"));
    }
}
