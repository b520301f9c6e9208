//! 领域模型错误定义
//!
//! 领域层只关心两类失败：实体不变量被违反（`DomainError`），
//! 以及持久化协作方的失败（`RepositoryError`）。

use thiserror::Error;

use crate::entities::MessageStatus;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 消息状态只能向前推进
    #[error("message status cannot move from {from:?} to {to:?}")]
    StatusRegression {
        from: MessageStatus,
        to: MessageStatus,
    },

    /// 单聊必须恰好两个参与者
    #[error("direct conversation requires exactly two participants, got {0}")]
    DirectConversationSize(usize),

    /// 不允许直接设置的在线状态
    #[error("status {0} cannot be set explicitly")]
    StatusNotSettable(String),
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 持久化协作方返回的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record conflict")]
    Conflict,
    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
