#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidMapping,
    MissingColumns,
    InvalidColumnName,
    InvalidExplode,
    InvalidExplodeJoin,
    ExplodeConflict,
    InvalidDefinitions,
    InvalidSchema,

    UnknownKey,
    AmbiguousOp,
    MissingOp,
    InvalidCast,
    InvalidErrorMode,
    InvalidArgs,
    InvalidOperator,
    InvalidPath,
    InvalidPredicate,

    UndefinedRef,
    CyclicRef,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidMapping => "InvalidMapping",
            ErrorCode::MissingColumns => "MissingColumns",
            ErrorCode::InvalidColumnName => "InvalidColumnName",
            ErrorCode::InvalidExplode => "InvalidExplode",
            ErrorCode::InvalidExplodeJoin => "InvalidExplodeJoin",
            ErrorCode::ExplodeConflict => "ExplodeConflict",
            ErrorCode::InvalidDefinitions => "InvalidDefinitions",
            ErrorCode::InvalidSchema => "InvalidSchema",
            ErrorCode::UnknownKey => "UnknownKey",
            ErrorCode::AmbiguousOp => "AmbiguousOp",
            ErrorCode::MissingOp => "MissingOp",
            ErrorCode::InvalidCast => "InvalidCast",
            ErrorCode::InvalidErrorMode => "InvalidErrorMode",
            ErrorCode::InvalidArgs => "InvalidArgs",
            ErrorCode::InvalidOperator => "InvalidOperator",
            ErrorCode::InvalidPath => "InvalidPath",
            ErrorCode::InvalidPredicate => "InvalidPredicate",
            ErrorCode::UndefinedRef => "UndefinedRef",
            ErrorCode::CyclicRef => "CyclicRef",
        }
    }
}

/// A single finding of the mapping validator, qualified by the location
/// inside the mapping (`columns.total.math[0]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleError {
    pub code: ErrorCode,
    pub message: String,
    pub path: Option<String>,
}

impl RuleError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

pub type ValidationResult = Result<(), Vec<RuleError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformErrorKind {
    /// Structural problem in the mapping itself; raised at construction.
    InvalidMapping,
    /// Unparseable path expression.
    InvalidPath,
    /// A rule failed while evaluating; subject to the rule's error mode.
    ExprError,
    /// A rule failed under the `raise` error mode.
    RuleFailed,
    SchemaViolation,
    InvalidInput,
}

impl TransformErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformErrorKind::InvalidMapping => "InvalidMapping",
            TransformErrorKind::InvalidPath => "InvalidPath",
            TransformErrorKind::ExprError => "ExprError",
            TransformErrorKind::RuleFailed => "RuleFailed",
            TransformErrorKind::SchemaViolation => "SchemaViolation",
            TransformErrorKind::InvalidInput => "InvalidInput",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    pub kind: TransformErrorKind,
    pub message: String,
    pub path: Option<String>,
}

impl TransformError {
    pub fn new(kind: TransformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub(crate) fn expr(message: impl Into<String>) -> Self {
        Self::new(TransformErrorKind::ExprError, message)
    }

    pub(crate) fn mapping(message: impl Into<String>) -> Self {
        Self::new(TransformErrorKind::InvalidMapping, message)
    }

    /// Only expression errors are absorbed by a rule's `on_error` mode;
    /// everything else is a defect in the mapping or the input and propagates.
    pub fn is_recoverable(&self) -> bool {
        self.kind == TransformErrorKind::ExprError
    }
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{} (path: {})", self.message, path)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for TransformError {}

impl From<csv::Error> for TransformError {
    fn from(err: csv::Error) -> Self {
        TransformError::new(
            TransformErrorKind::InvalidInput,
            format!("csv error: {}", err),
        )
    }
}

impl From<serde_json::Error> for TransformError {
    fn from(err: serde_json::Error) -> Self {
        TransformError::new(
            TransformErrorKind::InvalidInput,
            format!("json error: {}", err),
        )
    }
}

impl From<serde_yaml::Error> for TransformError {
    fn from(err: serde_yaml::Error) -> Self {
        TransformError::new(
            TransformErrorKind::InvalidMapping,
            format!("yaml error: {}", err),
        )
    }
}

impl From<std::io::Error> for TransformError {
    fn from(err: std::io::Error) -> Self {
        TransformError::new(
            TransformErrorKind::InvalidInput,
            format!("io error: {}", err),
        )
    }
}
