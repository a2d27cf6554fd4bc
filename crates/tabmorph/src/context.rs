use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::path::{PathExpr, resolve};
use crate::rule::Rule;

/// Evaluation context: the whole record, the current relative sub-object
/// (explode element, mapped-over element, join pair) and the compiled
/// definitions backing `ref`.
///
/// Contexts are never mutated; iteration builds a new one with [`with_rel`].
///
/// [`with_rel`]: EvalContext::with_rel
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    root: &'a JsonValue,
    rel: Option<&'a JsonValue>,
    definitions: &'a HashMap<String, Rule>,
}

impl<'a> EvalContext<'a> {
    pub fn new(root: &'a JsonValue, definitions: &'a HashMap<String, Rule>) -> Self {
        Self {
            root,
            rel: None,
            definitions,
        }
    }

    /// Same root and definitions, scoped to `rel`.
    pub fn with_rel<'b>(&self, rel: &'b JsonValue) -> EvalContext<'b>
    where
        'a: 'b,
    {
        EvalContext {
            root: self.root,
            rel: Some(rel),
            definitions: self.definitions,
        }
    }

    pub fn root(&self) -> &'a JsonValue {
        self.root
    }

    pub fn rel(&self) -> Option<&'a JsonValue> {
        self.rel
    }

    pub fn definition(&self, name: &str) -> Option<&'a Rule> {
        self.definitions.get(name)
    }

    pub fn get_from_root(&self, path: &PathExpr) -> JsonValue {
        resolve(self.root, path)
    }

    /// `null` when there is no relative object.
    pub fn get_from_rel(&self, path: &PathExpr) -> JsonValue {
        match self.rel {
            Some(rel) => resolve(rel, path),
            None => JsonValue::Null,
        }
    }
}

impl std::fmt::Debug for EvalContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalContext")
            .field("root", self.root)
            .field("rel", &self.rel)
            .field("definitions", &self.definitions.keys().collect::<Vec<_>>())
            .finish()
    }
}
