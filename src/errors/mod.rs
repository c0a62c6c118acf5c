//! Centralized error handling for the guide cache service
//!
//! Unifies error types across application layers. Source errors carry enough
//! context to be stored verbatim as a snapshot's `last_error` string.

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Source Results
pub type SourceResult<T> = Result<T, SourceError>;
