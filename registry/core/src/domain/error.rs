// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy returned by every application-level catalog operation.

use crate::domain::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller identity is missing or not in the user directory
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is known but lacks the staff capability
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl CatalogError {
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::NotFound(_) => "not_found",
            CatalogError::Validation(_) => "validation_error",
            CatalogError::Conflict(_) => "conflict",
            CatalogError::Unauthorized(_) => "unauthorized",
            CatalogError::Forbidden(_) => "forbidden",
            CatalogError::Unavailable(_) => "unavailable",
        }
    }
}

impl From<RepositoryError> for CatalogError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => CatalogError::NotFound(msg),
            RepositoryError::Conflict(msg) => CatalogError::Conflict(msg),
            RepositoryError::Database(msg) | RepositoryError::Serialization(msg) => {
                CatalogError::Unavailable(msg)
            }
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Unavailable(format!("serialization failed: {}", err))
    }
}
