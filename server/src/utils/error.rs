use thiserror::Error;

/// Probe-level error taxonomy.
///
/// Every variant carries the underlying driver message so analyzers can
/// surface it as finding evidence. The variant decides recovery policy:
/// on a required descriptor every variant except `Other` stops the run;
/// on optional descriptors all errors become dataset tokens, and `Absent`
/// degrades to an insufficient-data insight.
#[derive(Error, Debug, Clone)]
pub enum ProbeError {
    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("statement rejected: {0}")]
    Syntax(String),

    #[error("object not found: {0}")]
    Absent(String),

    #[error("probe error: {0}")]
    Other(String),
}

impl ProbeError {
    /// Stable token for error classification inside a collected dataset.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Syntax(_) => "syntax",
            Self::Absent(_) => "absent",
            Self::Other(_) => "other",
        }
    }

    /// Whether this error must stop the whole pipeline run when it hits a
    /// descriptor marked `required`.
    pub fn fatal_when_required(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::PermissionDenied(_) | Self::Syntax(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Unavailable(m)
            | Self::PermissionDenied(m)
            | Self::Syntax(m)
            | Self::Absent(m)
            | Self::Other(m) => m,
        }
    }
}

/// Engine error with rich context and automatic error trait implementations
///
/// Design: Uses thiserror for ergonomic error handling with context.
/// Each variant carries meaningful context to help with debugging.
#[derive(Error, Debug)]
pub enum DoctorError {
    // Tool dispatch errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Duplicate tool registration: {0}")]
    DuplicateTool(String),

    #[error("Invalid tool schema for '{tool}': {reason}")]
    InvalidSchema { tool: String, reason: String },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    // Plan validation errors
    #[error("Invalid query plan: {0}")]
    InvalidPlan(String),

    #[error("Tool '{tool}' does not implement {mode} mode")]
    UnsupportedMode { tool: String, mode: &'static str },

    // Probe errors bubble up only when they abort the run
    #[error(transparent)]
    Probe(#[from] ProbeError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // LLM adapter errors (non-fatal for callers; see llm module)
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // Generic wrapper for other errors - auto-convert from anyhow::Error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DoctorError {
    /// Helper to create a tool-not-found error
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    /// Helper to create an invalid-arguments error
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    /// Helper to create an invalid-plan error
    pub fn invalid_plan(message: impl Into<String>) -> Self {
        Self::InvalidPlan(message.into())
    }

    /// Helper to create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Helper to create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<serde_json::Error> for DoctorError {
    fn from(err: serde_json::Error) -> Self {
        DoctorError::internal(format!("JSON serialization error: {}", err))
    }
}

pub type DoctorResult<T> = Result<T, DoctorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_error_kind_is_stable() {
        assert_eq!(ProbeError::Unavailable("refused".into()).kind(), "unavailable");
        assert_eq!(ProbeError::Absent("no such table".into()).kind(), "absent");
    }

    #[test]
    fn fatal_when_required_excludes_absent() {
        assert!(ProbeError::Unavailable("x".into()).fatal_when_required());
        assert!(ProbeError::Syntax("x".into()).fatal_when_required());
        assert!(!ProbeError::Absent("x".into()).fatal_when_required());
        assert!(!ProbeError::Other("x".into()).fatal_when_required());
    }
}
