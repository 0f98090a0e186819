//! Application-wide error types.

use thiserror::Error;

/// Result type alias using `AppError`.
pub type AppResult<T> = Result<T, AppError>;

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Access denied by a row-level rule.
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Referenced object not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Policy or schema configuration defect.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Conflict (e.g., change-set already recorded with another checksum).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the error code for logs and operator reports.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if the enclosing operation must be aborted rather than
    /// reported as a plain denial.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Forbidden(_) | Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AppError::Forbidden(String::new()), "FORBIDDEN")]
    #[case(AppError::NotFound(String::new()), "NOT_FOUND")]
    #[case(AppError::Validation(String::new()), "VALIDATION_ERROR")]
    #[case(AppError::Configuration(String::new()), "CONFIGURATION_ERROR")]
    #[case(AppError::Conflict(String::new()), "CONFLICT")]
    #[case(AppError::Database(String::new()), "DATABASE_ERROR")]
    #[case(AppError::Internal(String::new()), "INTERNAL_ERROR")]
    fn test_error_codes(#[case] err: AppError, #[case] code: &str) {
        assert_eq!(err.error_code(), code);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            AppError::Forbidden("msg".into()).to_string(),
            "Access denied: msg"
        );
        assert_eq!(
            AppError::Configuration("msg".into()).to_string(),
            "Configuration error: msg"
        );
        assert_eq!(
            AppError::Database("msg".into()).to_string(),
            "Database error: msg"
        );
    }

    #[test]
    fn test_fatality() {
        assert!(!AppError::Forbidden(String::new()).is_fatal());
        assert!(!AppError::Validation(String::new()).is_fatal());
        assert!(AppError::Configuration(String::new()).is_fatal());
        assert!(AppError::NotFound(String::new()).is_fatal());
    }
}
