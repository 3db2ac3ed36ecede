//! Error type definitions for the impression scheduler

use thiserror::Error;

use crate::job_scheduling::types::SchedulingError;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors (SeaORM)
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Repository layer errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Validation errors raised before anything is persisted
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Run-control state violations
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Repository layer specific errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database errors from SeaORM
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Data serialization/deserialization failures
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// A stored column held a value the domain model does not recognise
    #[error("Invalid stored value: {field} = '{value}'")]
    InvalidValue { field: String, value: String },

    /// A record with the same primary key already exists
    #[error("Duplicate key in {table}: {value}")]
    DuplicateKey { table: String, value: String },

    /// Record not found
    #[error("Record not found: {table} with {field} = {value}")]
    RecordNotFound {
        table: String,
        field: String,
        value: String,
    },
}

/// Validation errors for distribution specs and run requests
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A percentage map did not add up to 100
    #[error("{dimension} percentages must sum to 100, got {sum}")]
    PercentageSum { dimension: String, sum: f64 },

    /// A percentage map had no entries
    #[error("{dimension} percentages must not be empty")]
    EmptyDimension { dimension: String },

    /// A single percentage was negative or not a finite number
    #[error("{dimension} percentage for '{key}' is invalid: {value}")]
    InvalidPercentage {
        dimension: String,
        key: String,
        value: f64,
    },

    /// A requested device type has no browser with known device identities
    #[error("device type '{device_type}' has no valid browser/device combination")]
    NoValidBrowser { device_type: String },

    /// Generic field-level validation failure
    #[error("{field}: {message}")]
    InvalidField { field: String, message: String },
}

impl AppError {
    /// Create a field validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation(ValidationError::InvalidField {
            field: field.into(),
            message: message.into(),
        })
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl RepositoryError {
    /// Create an invalid stored value error
    pub fn invalid_value<F: Into<String>, V: Into<String>>(field: F, value: V) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn duplicate_key<T: Into<String>, V: Into<String>>(table: T, value: V) -> Self {
        Self::DuplicateKey {
            table: table.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_helper_builds_field_error() {
        let err = AppError::validation("target_units", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Validation error: target_units: must be greater than zero"
        );
    }

    #[test]
    fn test_repository_error_converts_into_app_error() {
        let repo = RepositoryError::invalid_value("status", "paused");
        let app: AppError = repo.into();
        assert!(matches!(app, AppError::Repository(_)));
        assert!(app.to_string().contains("status = 'paused'"));
    }
}
