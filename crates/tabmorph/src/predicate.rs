use regex::Regex;
use serde_json::Value as JsonValue;

use crate::context::EvalContext;
use crate::error::TransformError;
use crate::eval::Scope;
use crate::rule::{CompareOp, Predicate};
use crate::value::{to_float, to_text, values_equal};

/// Evaluates both operands first, then compares. Comparisons that cannot be
/// made (non-numeric `gt`/`lt`, `null` regex operands, invalid patterns)
/// are false.
pub(crate) fn evaluate(
    scope: &mut Scope<'_>,
    predicate: &Predicate,
    ctx: &EvalContext<'_>,
) -> Result<bool, TransformError> {
    match predicate {
        Predicate::Never => Ok(false),
        Predicate::Exists(arg) => Ok(!scope.eval_rule(arg, ctx)?.is_null()),
        Predicate::Compare { op, a, b } => {
            let a = scope.eval_rule(a, ctx)?;
            let b = scope.eval_rule(b, ctx)?;
            Ok(compare(*op, &a, &b))
        }
        Predicate::Matches { a, pattern } => {
            let a = scope.eval_rule(a, ctx)?;
            Ok(match pattern {
                Some(re) if !a.is_null() => re.is_match(&to_text(&a)),
                _ => false,
            })
        }
    }
}

fn compare(op: CompareOp, a: &JsonValue, b: &JsonValue) -> bool {
    match op {
        CompareOp::Eq => values_equal(a, b),
        CompareOp::Gt => matches!((to_float(a), to_float(b)), (Some(a), Some(b)) if a > b),
        CompareOp::Lt => matches!((to_float(a), to_float(b)), (Some(a), Some(b)) if a < b),
        CompareOp::Regex => {
            if a.is_null() || b.is_null() {
                return false;
            }
            Regex::new(&to_text(b))
                .map(|re| re.is_match(&to_text(a)))
                .unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_is_numeric_aware() {
        assert!(compare(CompareOp::Eq, &json!(1), &json!(1.0)));
        assert!(compare(CompareOp::Eq, &json!(null), &json!(null)));
        assert!(!compare(CompareOp::Eq, &json!("1"), &json!(1)));
    }

    #[test]
    fn ordering_coerces_numeric_text() {
        assert!(compare(CompareOp::Gt, &json!("10"), &json!(9)));
        assert!(compare(CompareOp::Lt, &json!(1), &json!("2.5")));
        assert!(!compare(CompareOp::Gt, &json!("abc"), &json!(1)));
        assert!(!compare(CompareOp::Lt, &json!(null), &json!(1)));
    }

    #[test]
    fn regex_searches_and_tolerates_bad_patterns() {
        assert!(compare(CompareOp::Regex, &json!("order-123"), &json!("\\d+$")));
        assert!(compare(CompareOp::Regex, &json!(12345), &json!("^123")));
        assert!(!compare(CompareOp::Regex, &json!("abc"), &json!("(")));
        assert!(!compare(CompareOp::Regex, &json!(null), &json!(".*")));
    }
}
