//! API handlers module

pub mod health;
pub mod search;
pub mod sessions;

use citeforge_common::errors::{AppError, Result};
use citeforge_search::RetrievalMode;
use validator::Validate;

/// Run the derived validation rules, reporting the first failing field
pub(crate) fn validate_request<T: Validate>(request: &T) -> Result<()> {
    request.validate().map_err(|errors| {
        let field = errors.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: errors.to_string(),
            field,
        }
    })
}

/// Parse an optional mode from a request, falling back to the service default
pub(crate) fn resolve_mode(requested: Option<&str>, default: RetrievalMode) -> Result<RetrievalMode> {
    match requested {
        Some(mode) => mode.parse(),
        None => Ok(default),
    }
}
