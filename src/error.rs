use thiserror::Error;

/// Boxed cause carried by execution errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Raised before any I/O, while checking a request against the
/// configured limits. `rule` is a stable identifier usable in tests
/// and API documentation (e.g. `MaxFilterTreeCount`).
#[derive(Debug, Error)]
#[error("validation failed on {rule}: {message}")]
pub struct ValidationError {
    pub rule: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

/// Raised when lowering a request encounters a graph mismatch:
/// unknown field, unknown relation, broken chain, DISTINCT with
/// wildcard. `op` names the build site.
#[derive(Debug, Error)]
#[error("build failed at {op}: {message}")]
pub struct QueryBuildError {
    pub op: &'static str,
    pub message: String,
}

impl QueryBuildError {
    pub fn new(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
        }
    }
}

/// Raised during or after SQL execution: driver error, no-row
/// scalar, type mismatch on a pagination count, missing search
/// response for a pagination key.
#[derive(Debug, Error)]
#[error("execution failed at {op}: {source}")]
pub struct ExecError {
    pub op: String,
    #[source]
    pub source: BoxError,
}

impl ExecError {
    pub fn new(op: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            op: op.into(),
            source: source.into(),
        }
    }

    pub fn message(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            source: message.into().into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    QueryBuild(#[from] QueryBuildError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl Error {
    /// The validation rule identifier, when this is a validation error.
    pub fn rule(&self) -> Option<&'static str> {
        match self {
            Error::Validation(e) => Some(e.rule),
            _ => None,
        }
    }

    /// The build-site identifier, when this is a build error.
    pub fn build_op(&self) -> Option<&'static str> {
        match self {
            Error::QueryBuild(e) => Some(e.op),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display_includes_rule() {
        let err = ValidationError::new("MaxFilterTreeCount", "filters count exceeds max 5");
        assert_eq!(
            err.to_string(),
            "validation failed on MaxFilterTreeCount: filters count exceeds max 5"
        );
    }

    #[test]
    fn error_exposes_rule_and_op() {
        let err: Error = ValidationError::new("InvalidOperator", "bad").into();
        assert_eq!(err.rule(), Some("InvalidOperator"));
        assert_eq!(err.build_op(), None);

        let err: Error = QueryBuildError::new("Filter.predicate", "broken").into();
        assert_eq!(err.build_op(), Some("Filter.predicate"));
    }

    #[test]
    fn exec_error_wraps_source() {
        use std::error::Error as _;
        let err = ExecError::message("ExecuteScalar", "no rows returned");
        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "execution failed at ExecuteScalar: no rows returned"
        );
    }
}
