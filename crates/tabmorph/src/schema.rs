//! Post-conversion check of a table against a mapping's `schema` block.

use regex::Regex;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::model::{ColumnSchema, SchemaSpec};
use crate::table::Table;
use crate::value::to_text;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaIssue {
    pub column: String,
    #[serde(flatten)]
    pub kind: IssueKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IssueKind {
    Missing,
    InvalidRegex { message: String },
    UnknownType { expected: String },
    DtypeMismatch { expected: String, actual: String },
    NullNotAllowed { count: usize },
    MinViolation { count: usize, min: f64 },
    MaxViolation { count: usize, max: f64 },
    RegexViolation { count: usize, pattern: String },
}

/// `errors` are problems with the check itself (absent columns, bad
/// patterns); `violations` are cells that break a declared constraint.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SchemaReport {
    pub errors: Vec<SchemaIssue>,
    pub violations: Vec<SchemaIssue>,
}

impl SchemaReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.violations.is_empty()
    }

    fn error(&mut self, column: &str, kind: IssueKind) {
        self.errors.push(SchemaIssue {
            column: column.to_string(),
            kind,
        });
    }

    fn violation(&mut self, column: &str, kind: IssueKind) {
        self.violations.push(SchemaIssue {
            column: column.to_string(),
            kind,
        });
    }
}

/// Kind of a column's non-null cells.
fn actual_kind(cells: &[&JsonValue]) -> &'static str {
    let mut present = cells.iter().filter(|v| !v.is_null()).peekable();
    if present.peek().is_none() {
        return "null";
    }
    let present: Vec<_> = present.collect();
    let all = |check: fn(&JsonValue) -> bool| present.iter().all(|v| check(v));
    if all(JsonValue::is_string) {
        "str"
    } else if all(|v| v.is_i64() || v.is_u64()) {
        "int"
    } else if all(JsonValue::is_number) {
        "float"
    } else if all(JsonValue::is_boolean) {
        "bool"
    } else if all(|v| v.is_number() || v.is_boolean()) {
        "number"
    } else {
        "mixed"
    }
}

/// `None` when `expected` is not a known type name.
fn kind_matches(expected: &str, actual: &str) -> Option<bool> {
    let ok = match expected {
        "str" => matches!(actual, "null" | "str"),
        "int" => matches!(actual, "null" | "int"),
        "float" => matches!(actual, "null" | "int" | "float"),
        "bool" => matches!(actual, "null" | "bool"),
        "number" => matches!(actual, "null" | "int" | "float" | "bool" | "number"),
        _ => return None,
    };
    Some(ok)
}

pub fn check(table: &Table, schema: &SchemaSpec) -> SchemaReport {
    let mut report = SchemaReport::default();
    for (name, spec) in &schema.columns {
        match table.column(name) {
            Some(cells) => check_column(&mut report, name, &cells, spec),
            None => report.error(name, IssueKind::Missing),
        }
    }
    report
}

fn check_column(report: &mut SchemaReport, name: &str, cells: &[&JsonValue], spec: &ColumnSchema) {
    let actual = actual_kind(cells);

    if let Some(expected) = &spec.value_type {
        match kind_matches(expected, actual) {
            None => report.violation(
                name,
                IssueKind::UnknownType {
                    expected: expected.clone(),
                },
            ),
            Some(false) => report.violation(
                name,
                IssueKind::DtypeMismatch {
                    expected: expected.clone(),
                    actual: actual.to_string(),
                },
            ),
            Some(true) => {}
        }
    }

    if spec.nullable == Some(false) {
        let count = cells.iter().filter(|v| v.is_null()).count();
        if count > 0 {
            report.violation(name, IssueKind::NullNotAllowed { count });
        }
    }

    if matches!(actual, "int" | "float") {
        let numbers = || cells.iter().filter_map(|v| v.as_f64());
        if let Some(min) = spec.min {
            let count = numbers().filter(|n| *n < min).count();
            if count > 0 {
                report.violation(name, IssueKind::MinViolation { count, min });
            }
        }
        if let Some(max) = spec.max {
            let count = numbers().filter(|n| *n > max).count();
            if count > 0 {
                report.violation(name, IssueKind::MaxViolation { count, max });
            }
        }
    }

    if let Some(pattern) = spec.regex.as_deref().filter(|p| !p.is_empty()) {
        match Regex::new(pattern) {
            Ok(re) => {
                let count = cells.iter().filter(|v| !re.is_match(&to_text(v))).count();
                if count > 0 {
                    report.violation(
                        name,
                        IssueKind::RegexViolation {
                            count,
                            pattern: pattern.to_string(),
                        },
                    );
                }
            }
            Err(err) => report.error(
                name,
                IssueKind::InvalidRegex {
                    message: err.to_string(),
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(columns: &[&str], rows: Vec<Vec<JsonValue>>) -> Table {
        Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    fn schema(value: JsonValue) -> SchemaSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn clean_table_passes() {
        let t = table(&["age", "name"], vec![vec![json!(30), json!("Ada")], vec![json!(null), json!("Bob")]]);
        let report = check(
            &t,
            &schema(json!({"columns": {
                "age": {"type": "int", "min": 0, "max": 150},
                "name": {"type": "str", "nullable": false, "regex": "^[A-Z]"}
            }})),
        );
        assert!(report.is_clean(), "{:?}", report);
    }

    #[test]
    fn reports_each_violation_kind() {
        let t = table(
            &["age", "code"],
            vec![vec![json!(-1), json!("x1")], vec![json!(200), json!(null)], vec![json!(null), json!("Y2")]],
        );
        let report = check(
            &t,
            &schema(json!({"columns": {
                "age": {"type": "int", "nullable": false, "min": 0, "max": 150},
                "code": {"type": "float", "regex": "^[A-Z]\\d$"},
                "gone": {"type": "str"}
            }})),
        );
        let kinds: Vec<_> = report
            .violations
            .iter()
            .map(|issue| serde_json::to_value(issue).unwrap()["type"].clone())
            .collect();
        assert_eq!(
            kinds,
            vec![
                json!("null-not-allowed"),
                json!("min-violation"),
                json!("max-violation"),
                json!("dtype-mismatch"),
                json!("regex-violation"),
            ]
        );
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, IssueKind::Missing);
        let regex = &report.violations[4];
        assert_eq!(
            regex.kind,
            IssueKind::RegexViolation {
                count: 2,
                pattern: "^[A-Z]\\d$".to_string()
            }
        );
    }

    #[test]
    fn report_follows_declared_column_order() {
        let t = table(&["b", "a"], vec![vec![json!(null), json!(null)]]);
        let report = check(
            &t,
            &schema(json!({"columns": {
                "zeta": {"type": "str"},
                "b": {"nullable": false},
                "a": {"nullable": false},
                "alpha": {"type": "str"}
            }})),
        );
        let columns = |issues: &[SchemaIssue]| {
            issues.iter().map(|issue| issue.column.clone()).collect::<Vec<_>>()
        };
        assert_eq!(columns(&report.violations), vec!["b", "a"]);
        assert_eq!(columns(&report.errors), vec!["zeta", "alpha"]);
    }

    #[test]
    fn kinds_are_inferred_from_non_null_cells() {
        assert_eq!(actual_kind(&[&json!(null)]), "null");
        assert_eq!(actual_kind(&[&json!(1), &json!(null)]), "int");
        assert_eq!(actual_kind(&[&json!(1), &json!(2.5)]), "float");
        assert_eq!(actual_kind(&[&json!(1), &json!(true)]), "number");
        assert_eq!(actual_kind(&[&json!(1), &json!("a")]), "mixed");
        assert_eq!(kind_matches("float", "int"), Some(true));
        assert_eq!(kind_matches("int", "float"), Some(false));
        assert_eq!(kind_matches("decimal", "int"), None);
    }

    #[test]
    fn unknown_type_and_bad_regex() {
        let t = table(&["a"], vec![vec![json!("x")]]);
        let report = check(
            &t,
            &schema(json!({"columns": {"a": {"type": "decimal", "regex": "("}}})),
        );
        assert_eq!(report.violations.len(), 1);
        assert!(matches!(report.violations[0].kind, IssueKind::UnknownType { .. }));
        assert!(matches!(report.errors[0].kind, IssueKind::InvalidRegex { .. }));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["errors"][0]["type"], json!("invalid-regex"));
        assert_eq!(json["errors"][0]["column"], json!("a"));
    }
}
