use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::auth::AuthError;

/// 应用层错误，对应连接协议中的四类失败
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("store unavailable: {0}")]
    TransientStore(String),
}

impl ApplicationError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// 稳定的错误码，用于 `ERROR` 事件和 HTTP 错误体
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTH_FAILED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::TransientStore(_) => "STORE_UNAVAILABLE",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        ApplicationError::Validation(value.to_string())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ApplicationError::not_found("record", "unknown"),
            other => ApplicationError::TransientStore(other.to_string()),
        }
    }
}
