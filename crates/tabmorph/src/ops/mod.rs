//! Built-in operations. [`eval_op`] dispatches a compiled node to its
//! implementation and returns the value before tail operations.

mod datetime;
mod list;
mod scalar;

use serde_json::Value as JsonValue;

use crate::context::EvalContext;
use crate::error::TransformError;
use crate::eval::Scope;
use crate::predicate;
use crate::rule::{Aggregate, Op, RuleNode};
use crate::value::number_value;

pub(crate) fn eval_op(
    scope: &mut Scope<'_>,
    node: &RuleNode,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    match &node.op {
        Op::Missing => Ok(JsonValue::Null),
        Op::Malformed { key, reason } => Err(TransformError::expr(format!(
            "invalid '{}' rule: {}",
            key, reason
        ))),
        Op::Path(path) => Ok(ctx.get_from_root(path)),
        Op::RelPath(path) => Ok(ctx.get_from_rel(path)),
        Op::Const(value) => Ok(value.clone()),
        Op::Coalesce(candidates) => scalar::coalesce(scope, candidates, ctx),
        Op::Math { op, args } => scalar::math(scope, *op, args, ctx),
        Op::Concat(parts) => scalar::concat(scope, parts, ctx),
        Op::Join { over, sep } => scalar::join(scope, over, sep, ctx),
        Op::Index { of, at } => scalar::index(scope, of, *at, ctx),
        Op::Len(target) => scalar::len(scope, target, ctx),
        Op::Reduce { over, apply, agg } => scalar::reduce(scope, over, apply.as_ref(), *agg, ctx),
        Op::DateFormat { parse, fmt, fmt_in } => {
            let source = scope.eval_rule(parse, ctx)?;
            Ok(datetime::date_format(&source, fmt, fmt_in.as_deref()))
        }
        Op::DateParse {
            text,
            formats,
            strict,
        } => {
            let text = scope.eval_rule(text, ctx)?;
            Ok(datetime::date_parse(&text, formats, *strict))
        }
        Op::FromTimestamp { sec, unit } => {
            let sec = scope.eval_rule(sec, ctx)?;
            Ok(datetime::from_timestamp(&sec, *unit))
        }
        Op::ToTimezone { dt, from, to } => {
            let dt = scope.eval_rule(dt, ctx)?;
            Ok(datetime::to_timezone(&dt, from.as_deref(), to.as_deref()))
        }
        Op::If {
            cond,
            then,
            otherwise,
        } => {
            let branch = if predicate::evaluate(scope, cond, ctx)? {
                then
            } else {
                otherwise
            };
            scope.eval_rule(branch, ctx)
        }
        Op::Ref(name) => scope.eval_ref(name, ctx),
        Op::Lookup {
            key,
            table,
            default,
        } => scalar::lookup(scope, key, table.as_ref(), default, ctx),
        Op::Map { over, apply, emit } => list::map(scope, over, apply, emit, ctx),
        Op::Filter {
            over,
            predicate,
            emit,
        } => list::filter(scope, over, predicate, emit, ctx),
        Op::FlatMap { over, apply, emit } => list::flat_map(scope, over, apply, emit, ctx),
        Op::Unique { over, key, emit } => list::unique(scope, over, key.as_ref(), emit, ctx),
        Op::Sort {
            over,
            key,
            reverse,
            emit,
        } => list::sort(scope, over, key.as_ref(), *reverse, emit, ctx),
        Op::GroupReduce {
            over,
            by,
            value,
            agg,
            as_list,
        } => list::group_reduce(scope, over, by, value, *agg, *as_list, ctx),
        Op::Serialize(of) => {
            let value = scope.eval_rule(of, ctx)?;
            Ok(serde_json::to_string(&value)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null))
        }
        Op::Merge { objects, strategy } => scalar::merge(scope, objects, *strategy, ctx),
        Op::Udf { name, args } => scalar::udf(scope, name.as_deref(), args, ctx),
        Op::Custom(custom) => (custom.handler)(&node.raw, ctx, scope),
    }
}

/// Aggregates already-coerced numbers. Empty input is `null`; `count` is
/// an integer, everything else a float.
fn aggregate(agg: Aggregate, values: &[f64]) -> JsonValue {
    if values.is_empty() {
        return JsonValue::Null;
    }
    match agg {
        Aggregate::Sum => number_value(values.iter().sum()),
        Aggregate::Mean => number_value(values.iter().sum::<f64>() / values.len() as f64),
        Aggregate::Min => number_value(values.iter().copied().fold(f64::INFINITY, f64::min)),
        Aggregate::Max => number_value(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        Aggregate::Count => JsonValue::from(values.len()),
    }
}
