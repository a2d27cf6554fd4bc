use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde_json::{Map as JsonMap, Value as JsonValue};

use super::aggregate;
use crate::context::EvalContext;
use crate::error::TransformError;
use crate::eval::Scope;
use crate::predicate;
use crate::rule::{Aggregate, EmitMode, ListEmit, Predicate, Rule};
use crate::value::{canonical_key, compare_scalars, to_float, to_text};

/// Non-array values iterate as empty.
fn items_of(
    scope: &mut Scope<'_>,
    over: &Rule,
    ctx: &EvalContext<'_>,
) -> Result<Vec<JsonValue>, TransformError> {
    match scope.eval_rule(over, ctx)? {
        JsonValue::Array(items) => Ok(items),
        _ => Ok(Vec::new()),
    }
}

fn emit(mut out: Vec<JsonValue>, emit: &ListEmit) -> JsonValue {
    if let Some(limit) = emit.limit {
        out.truncate(limit);
    }
    match &emit.mode {
        EmitMode::List => JsonValue::Array(out),
        EmitMode::Json => serde_json::to_string(&out)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
        EmitMode::Count => JsonValue::from(out.len()),
        EmitMode::Join(sep) => {
            JsonValue::String(out.iter().map(to_text).collect::<Vec<_>>().join(sep))
        }
    }
}

pub(super) fn map(
    scope: &mut Scope<'_>,
    over: &Rule,
    apply: &Rule,
    spec: &ListEmit,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let items = items_of(scope, over, ctx)?;
    let mut out = Vec::with_capacity(items.len());
    for item in &items {
        out.push(scope.eval_rule(apply, &ctx.with_rel(item))?);
    }
    Ok(emit(out, spec))
}

pub(super) fn filter(
    scope: &mut Scope<'_>,
    over: &Rule,
    condition: &Predicate,
    spec: &ListEmit,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let items = items_of(scope, over, ctx)?;
    let mut out = Vec::new();
    for item in items {
        if predicate::evaluate(scope, condition, &ctx.with_rel(&item))? {
            out.push(item);
        }
    }
    Ok(emit(out, spec))
}

/// Array results are spliced in; `null` results are dropped.
pub(super) fn flat_map(
    scope: &mut Scope<'_>,
    over: &Rule,
    apply: &Rule,
    spec: &ListEmit,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let items = items_of(scope, over, ctx)?;
    let mut out = Vec::new();
    for item in &items {
        match scope.eval_rule(apply, &ctx.with_rel(item))? {
            JsonValue::Array(inner) => out.extend(inner),
            JsonValue::Null => {}
            other => out.push(other),
        }
    }
    Ok(emit(out, spec))
}

pub(super) fn unique(
    scope: &mut Scope<'_>,
    over: &Rule,
    key: Option<&Rule>,
    spec: &ListEmit,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let items = items_of(scope, over, ctx)?;
    let mut seen = HashSet::with_capacity(items.len());
    let mut out = Vec::new();
    for item in items {
        let identity = match key {
            Some(key) => canonical_key(&scope.eval_rule(key, &ctx.with_rel(&item))?),
            None => canonical_key(&item),
        };
        if seen.insert(identity) {
            out.push(item);
        }
    }
    Ok(emit(out, spec))
}

/// With a key: nulls first, stable, `reverse` flips the whole order, keys of
/// mixed kinds are an error. Without a key: only arrays of all numbers, all
/// strings or all booleans are sorted; anything else is left as is.
pub(super) fn sort(
    scope: &mut Scope<'_>,
    over: &Rule,
    key: Option<&Rule>,
    reverse: bool,
    spec: &ListEmit,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let items = items_of(scope, over, ctx)?;
    let direction = |ordering: Ordering| if reverse { ordering.reverse() } else { ordering };

    let out = match key {
        Some(key) => {
            let mut decorated = Vec::with_capacity(items.len());
            for item in items {
                let sort_key = scope.eval_rule(key, &ctx.with_rel(&item))?;
                decorated.push((sort_key, item));
            }
            let mut incomparable = false;
            decorated.sort_by(|(a, _), (b, _)| {
                let ordering = match (a.is_null(), b.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    (false, false) => compare_scalars(a, b).unwrap_or_else(|| {
                        incomparable = true;
                        Ordering::Equal
                    }),
                };
                direction(ordering)
            });
            if incomparable {
                return Err(TransformError::expr("sort keys are not comparable"));
            }
            decorated.into_iter().map(|(_, item)| item).collect()
        }
        None => {
            let mut items = items;
            if natively_ordered(&items) {
                items.sort_by(|a, b| direction(compare_scalars(a, b).unwrap_or(Ordering::Equal)));
            }
            items
        }
    };
    Ok(emit(out, spec))
}

fn natively_ordered(items: &[JsonValue]) -> bool {
    let all = |check: fn(&JsonValue) -> bool| items.iter().all(check);
    all(JsonValue::is_number) || all(JsonValue::is_string) || all(JsonValue::is_boolean)
}

/// Groups keep first-seen order. Elements whose key is `null` or whose value
/// is not numeric are skipped; object or array keys are an error.
pub(super) fn group_reduce(
    scope: &mut Scope<'_>,
    over: &Rule,
    by: &Rule,
    value: &Rule,
    agg: Option<Aggregate>,
    as_list: bool,
    ctx: &EvalContext<'_>,
) -> Result<JsonValue, TransformError> {
    let items = items_of(scope, over, ctx)?;
    let mut groups: Vec<(JsonValue, Vec<f64>)> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    for item in &items {
        let item_ctx = ctx.with_rel(item);
        let key = scope.eval_rule(by, &item_ctx)?;
        let number = to_float(&scope.eval_rule(value, &item_ctx)?);
        if matches!(key, JsonValue::Array(_) | JsonValue::Object(_)) {
            return Err(TransformError::expr(
                "group_reduce keys must be scalar values",
            ));
        }
        let (false, Some(number)) = (key.is_null(), number) else {
            continue;
        };
        let slot = *slots.entry(canonical_key(&key)).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(number);
    }

    let reduce = |numbers: &[f64]| match agg {
        Some(agg) => aggregate(agg, numbers),
        None => JsonValue::Null,
    };
    if as_list {
        let pairs = groups
            .iter()
            .map(|(key, numbers)| {
                let mut pair = JsonMap::new();
                pair.insert("key".to_string(), key.clone());
                pair.insert("value".to_string(), reduce(numbers));
                JsonValue::Object(pair)
            })
            .collect();
        return Ok(JsonValue::Array(pairs));
    }
    let mut out = JsonMap::new();
    for (key, numbers) in &groups {
        out.insert(to_text(key), reduce(numbers));
    }
    Ok(JsonValue::Object(out))
}
