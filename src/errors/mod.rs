//! Centralized error handling for the impression scheduler
//!
//! Errors are grouped by layer so callers can match on what actually went
//! wrong without string inspection.
//!
//! # Error Categories
//!
//! - **Repository Errors**: persistence failures and stored values that no longer parse
//! - **Validation Errors**: distribution specs and run requests rejected before anything is persisted
//! - **Scheduling Errors**: run-control state violations (see `job_scheduling::types`)
//!
//! # Usage
//!
//! ```rust
//! use impression_scheduler::errors::{AppError, AppResult};
//!
//! fn check_target(target: u64) -> AppResult<u64> {
//!     if target == 0 {
//!         return Err(AppError::validation("target_units", "must be greater than zero"));
//!     }
//!     Ok(target)
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Repository Results
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Convenience type alias for Validation Results
pub type ValidationResult<T> = Result<T, ValidationError>;
