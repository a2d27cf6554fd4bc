use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::debug;

use super::aggregate;
use crate::context::EvalContext;
use crate::error::TransformError;
use crate::eval::Scope;
use crate::rule::{Aggregate, MathOp, MergeStrategy, Rule};
use crate::value::{length_of, number_value, to_float, to_text};

pub(super) fn coalesce(
    scope: &mut Scope<'_>,
    candidates: &[Rule],
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    for candidate in candidates {
        let value = scope.eval_rule(candidate, ctx)?;
        if !value.is_null() {
            return Ok(value);
        }
    }
    Ok(JsonValue::Null)
}

pub(super) fn math(
    scope: &mut Scope<'_>,
    op: Option<MathOp>,
    args: &[Rule],
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let mut numbers = Vec::with_capacity(args.len());
    for arg in args {
        numbers.push(to_float(&scope.eval_rule(arg, ctx)?));
    }
    let (Some(op), Some(numbers)) = (op, numbers.into_iter().collect::<Option<Vec<f64>>>())
    else {
        return Ok(JsonValue::Null);
    };
    let Some((first, rest)) = numbers.split_first() else {
        return Ok(JsonValue::Null);
    };

    let result = match op {
        MathOp::Add => numbers.iter().sum(),
        MathOp::Sub => first - rest.iter().sum::<f64>(),
        MathOp::Mul => numbers.iter().product(),
        MathOp::Div => {
            let mut acc = *first;
            for divisor in rest {
                if *divisor == 0.0 {
                    return Ok(JsonValue::Null);
                }
                acc /= divisor;
            }
            acc
        }
    };
    Ok(number_value(result))
}

pub(super) fn concat(
    scope: &mut Scope<'_>,
    parts: &[Rule],
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let mut out = String::new();
    for part in parts {
        out.push_str(&to_text(&scope.eval_rule(part, ctx)?));
    }
    Ok(JsonValue::String(out))
}

pub(super) fn join(
    scope: &mut Scope<'_>,
    over: &Rule,
    sep: &str,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    match scope.eval_rule(over, ctx)? {
        JsonValue::Array(items) => Ok(JsonValue::String(
            items.iter().map(to_text).collect::<Vec<_>>().join(sep),
        )),
        _ => Ok(JsonValue::Null),
    }
}

pub(super) fn index(
    scope: &mut Scope<'_>,
    of: &Rule,
    at: Option<usize>,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let value = scope.eval_rule(of, ctx)?;
    Ok(match (value, at) {
        (JsonValue::Array(mut items), Some(at)) if at < items.len() => items.swap_remove(at),
        _ => JsonValue::Null,
    })
}

pub(super) fn len(
    scope: &mut Scope<'_>,
    target: &Rule,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let value = scope.eval_rule(target, ctx)?;
    Ok(length_of(&value)
        .map(JsonValue::from)
        .unwrap_or(JsonValue::Null))
}

/// Elements (or their `apply` projections, evaluated with the element as
/// `rel`) that do not coerce to numbers are skipped.
pub(super) fn reduce(
    scope: &mut Scope<'_>,
    over: &Rule,
    apply: Option<&Rule>,
    agg: Option<Aggregate>,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let JsonValue::Array(items) = scope.eval_rule(over, ctx)? else {
        return Ok(JsonValue::Null);
    };
    let mut numbers = Vec::with_capacity(items.len());
    for item in &items {
        let number = match apply {
            Some(apply) => to_float(&scope.eval_rule(apply, &ctx.with_rel(item))?),
            None => to_float(item),
        };
        numbers.extend(number);
    }
    match agg {
        Some(agg) => Ok(aggregate(agg, &numbers)),
        None => Ok(JsonValue::Null),
    }
}

fn lookup_key(key: &JsonValue) -> Option<String> {
    match key {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(_) | JsonValue::Bool(_) => Some(to_text(key)),
        _ => None,
    }
}

pub(super) fn lookup(
    scope: &mut Scope<'_>,
    key: &Rule,
    table: Option<&JsonMap<String, JsonValue>>,
    default: &JsonValue,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let key = scope.eval_rule(key, ctx)?;
    let found = match (table, lookup_key(&key)) {
        (Some(table), Some(key)) => table.get(&key).cloned(),
        _ => None,
    };
    Ok(found.unwrap_or_else(|| default.clone()))
}

/// Only object results take part. `override` lets later objects win per
/// key; `first_non_null` takes the first non-null value per key.
pub(super) fn merge(
    scope: &mut Scope<'_>,
    objects: &[Rule],
    strategy: Option<MergeStrategy>,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let mut maps = Vec::with_capacity(objects.len());
    for object in objects {
        if let JsonValue::Object(map) = scope.eval_rule(object, ctx)? {
            maps.push(map);
        }
    }
    if maps.is_empty() {
        return Ok(JsonValue::Null);
    }

    let mut out = JsonMap::new();
    match strategy {
        Some(MergeStrategy::Override) => {
            for map in maps {
                out.extend(map);
            }
        }
        Some(MergeStrategy::FirstNonNull) => {
            for map in &maps {
                for key in map.keys() {
                    if out.contains_key(key) {
                        continue;
                    }
                    let value = maps
                        .iter()
                        .filter_map(|candidate| candidate.get(key))
                        .find(|value| !value.is_null())
                        .cloned()
                        .unwrap_or(JsonValue::Null);
                    out.insert(key.clone(), value);
                }
            }
        }
        None => return Ok(JsonValue::Null),
    }
    Ok(JsonValue::Object(out))
}

pub(super) fn udf(
    scope: &mut Scope<'_>,
    name: Option<&str>,
    args: &[Rule],
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let udfs = scope.udfs();
    let Some((name, func)) = name.and_then(|name| udfs.get(name).map(|func| (name, func))) else {
        return Ok(JsonValue::Null);
    };
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(scope.eval_rule(arg, ctx)?);
    }
    match func(&values) {
        Ok(value) => Ok(value),
        Err(err) => {
            debug!(udf = name, error = %err, "udf failed");
            Ok(JsonValue::Null)
        }
    }
}
