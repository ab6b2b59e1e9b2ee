//! Store limiter error abstractions.

use thiserror::Error;

/// Errors raised at the configuration boundary of the limiter.
///
/// The admission path itself is infallible; these only surface while building or updating
/// policy from operator input.
#[derive(Debug, Error)]
pub enum AppError {
    /// The given input was invalid.
    #[error("validation error: {0}")]
    InvalidInput(String),
}
