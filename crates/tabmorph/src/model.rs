use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// A declarative record-to-table mapping.
///
/// Column and definition rules stay raw JSON so that a mapping survives a
/// JSON round trip unchanged; they are compiled into [`crate::Rule`] trees by
/// [`crate::Converter`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Mapping {
    pub columns: JsonMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explode: Option<ExplodeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explode_join: Option<ExplodeJoinSpec>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub definitions: JsonMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaSpec>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExplodeSpec {
    pub path: String,
    #[serde(default = "default_true")]
    pub emit_root_when_empty: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExplodeJoinSpec {
    pub left: String,
    pub right: String,
    #[serde(default)]
    pub how: JoinHow,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JoinHow {
    #[default]
    Inner,
    Left,
    Right,
    Outer,
}

impl JoinHow {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inner" => Some(JoinHow::Inner),
            "left" => Some(JoinHow::Left),
            "right" => Some(JoinHow::Right),
            "outer" => Some(JoinHow::Outer),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SchemaSpec {
    #[serde(default)]
    pub columns: IndexMap<String, ColumnSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ColumnSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

/// What happens when a rule's operation fails.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    #[default]
    Null,
    Default,
    Raise,
    Warn,
}

impl ErrorMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "null" => Some(ErrorMode::Null),
            "default" => Some(ErrorMode::Default),
            "raise" => Some(ErrorMode::Raise),
            "warn" => Some(ErrorMode::Warn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorMode::Null => "null",
            ErrorMode::Default => "default",
            ErrorMode::Raise => "raise",
            ErrorMode::Warn => "warn",
        }
    }
}

impl std::str::FromStr for ErrorMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ErrorMode::parse(value).ok_or_else(|| {
            format!(
                "unknown error mode '{}' (expected null, default, raise or warn)",
                value
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    Str,
    Int,
    Float,
    Bool,
}

impl CastType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "str" => Some(CastType::Str),
            "int" => Some(CastType::Int),
            "float" => Some(CastType::Float),
            "bool" => Some(CastType::Bool),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explode_defaults_to_emitting_root() {
        let mapping: Mapping = serde_json::from_value(json!({
            "columns": {"id": {"path": "id"}},
            "explode": {"path": "items"}
        }))
        .unwrap();
        let explode = mapping.explode.unwrap();
        assert!(explode.emit_root_when_empty);
        assert!(mapping.explode_join.is_none());
    }

    #[test]
    fn join_how_defaults_to_inner() {
        let spec: ExplodeJoinSpec =
            serde_json::from_value(json!({"left": "a", "right": "b"})).unwrap();
        assert_eq!(spec.how, JoinHow::Inner);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let result: Result<Mapping, _> =
            serde_json::from_value(json!({"columns": {"a": 1}, "colums": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn schema_type_field_is_renamed() {
        let schema: SchemaSpec = serde_json::from_value(json!({
            "columns": {"age": {"type": "int", "nullable": false, "min": 0}},
            "strict": true
        }))
        .unwrap();
        let age = &schema.columns["age"];
        assert_eq!(age.value_type.as_deref(), Some("int"));
        assert_eq!(age.nullable, Some(false));
        assert_eq!(age.min, Some(0.0));
        assert_eq!(schema.strict, Some(true));
    }

    #[test]
    fn error_mode_parses_from_str() {
        assert_eq!("warn".parse::<ErrorMode>(), Ok(ErrorMode::Warn));
        assert!("loud".parse::<ErrorMode>().is_err());
    }
}
