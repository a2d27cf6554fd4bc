//! Recursive rule evaluation with tail operations, error modes and tracing.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::context::EvalContext;
use crate::engine::EngineConfig;
use crate::error::{TransformError, TransformErrorKind};
use crate::model::ErrorMode;
use crate::ops::eval_op;
use crate::registry::{ChildEval, OperationRegistry, UdfRegistry};
use crate::rule::{Rule, RuleNode, Tail};

/// Counter bumped through [`crate::Hooks`] for every failed rule.
pub const RULE_ERROR_COUNTER: &str = "converter.rule_errors";

/// Maximum nesting of `ref` evaluations.
pub const MAX_REF_DEPTH: usize = 64;

/// One evaluated rule node, as recorded in trace mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    pub rule: JsonValue,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TraceNode>,
    pub value: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceNode {
    fn literal(value: &JsonValue) -> Self {
        Self {
            op: None,
            rule: value.clone(),
            children: Vec::new(),
            value: value.clone(),
            error: None,
        }
    }
}

/// Everything rule evaluation reads besides the context.
#[derive(Clone, Copy)]
pub(crate) struct Evaluator<'e> {
    pub registry: &'e OperationRegistry,
    pub udfs: &'e UdfRegistry,
    pub config: &'e EngineConfig,
}

impl<'e> Evaluator<'e> {
    pub fn scope(self, column: &'e str) -> Scope<'e> {
        Scope {
            env: self,
            column,
            depth: 0,
            trace: None,
        }
    }

    pub fn tracing_scope(self, column: &'e str) -> Scope<'e> {
        Scope {
            trace: Some(Vec::new()),
            ..self.scope(column)
        }
    }
}

/// Evaluation state for one column of one row.
pub(crate) struct Scope<'e> {
    env: Evaluator<'e>,
    column: &'e str,
    depth: usize,
    /// Sink for trace nodes of the rule currently being evaluated.
    trace: Option<Vec<TraceNode>>,
}

impl<'e> Scope<'e> {
    pub fn udfs(&self) -> &'e UdfRegistry {
        self.env.udfs
    }

    /// Root trace node of the column, once evaluation finished.
    pub fn into_trace(self) -> Option<TraceNode> {
        self.trace.and_then(|mut nodes| nodes.pop())
    }

    pub fn eval_rule(
        &mut self,
        rule: &Rule,
        ctx: &EvalContext<'_>,
    ) -> Result<JsonValue, TransformError> {
        let node = match rule {
            Rule::Literal(value) => {
                if let Some(trace) = self.trace.as_mut() {
                    trace.push(TraceNode::literal(value));
                }
                return Ok(value.clone());
            }
            Rule::Node(node) => node,
        };

        let siblings = self.trace.as_mut().map(std::mem::take);
        let (result, error) = match eval_op(self, node, ctx) {
            Ok(value) => (Ok(node.tail.apply(value)), None),
            Err(err) if err.is_recoverable() => {
                let message = err.to_string();
                (self.absorb(node, err), Some(message))
            }
            Err(err) => {
                let message = err.to_string();
                (Err(err), Some(message))
            }
        };

        if let Some(mut siblings) = siblings {
            let children = self.trace.take().unwrap_or_default();
            siblings.push(TraceNode {
                op: node.op.key().map(str::to_string),
                rule: node.raw.clone(),
                children,
                value: result.as_ref().cloned().unwrap_or(JsonValue::Null),
                error,
            });
            self.trace = Some(siblings);
        }
        result
    }

    /// Evaluates a named definition. Missing names are `null`.
    pub fn eval_ref(
        &mut self,
        name: &str,
        ctx: &EvalContext<'_>,
    ) -> Result<JsonValue, TransformError> {
        let Some(rule) = ctx.definition(name) else {
            return Ok(JsonValue::Null);
        };
        if self.depth >= MAX_REF_DEPTH {
            return Err(TransformError::expr(format!(
                "ref '{}' exceeds the maximum depth of {}",
                name, MAX_REF_DEPTH
            )));
        }
        self.depth += 1;
        let result = self.eval_rule(rule, ctx);
        self.depth -= 1;
        result
    }

    /// Applies the rule's error mode to a recoverable failure. Tail
    /// operations are not applied to the resulting value.
    fn absorb(&self, node: &RuleNode, err: TransformError) -> Result<JsonValue, TransformError> {
        let config = self.env.config;
        let mode = node.tail.on_error.unwrap_or(config.default_on_error);
        config.hooks.increment(RULE_ERROR_COUNTER, 1);

        match mode {
            ErrorMode::Raise => Err(TransformError::new(
                TransformErrorKind::RuleFailed,
                format!(
                    "rule '{}' failed: {}",
                    node.op.key().unwrap_or("?"),
                    err.message
                ),
            )
            .with_path(format!("columns.{}", self.column))),
            ErrorMode::Warn => {
                warn!(column = self.column, error = %err, rule = %node.raw, "rule error");
                config.hooks.warn(&format!(
                    "Rule error for column '{}': {} | rule={}",
                    self.column, err, node.raw
                ));
                Ok(JsonValue::Null)
            }
            ErrorMode::Default => {
                debug!(column = self.column, error = %err, "rule error replaced by default");
                Ok(node.tail.default.clone().unwrap_or(JsonValue::Null))
            }
            ErrorMode::Null => {
                debug!(column = self.column, error = %err, "rule error replaced by null");
                Ok(JsonValue::Null)
            }
        }
    }
}

impl ChildEval for Scope<'_> {
    fn eval(
        &mut self,
        rule: &JsonValue,
        ctx: &EvalContext<'_>,
    ) -> Result<JsonValue, TransformError> {
        let rule = Rule::compile(rule, self.env.registry)?;
        self.eval_rule(&rule, ctx)
    }

    fn apply_tail(&self, value: JsonValue, rule: &JsonValue) -> JsonValue {
        match rule {
            JsonValue::Object(obj) => Tail::from_object(obj).apply(value),
            _ => value,
        }
    }
}
