use domain::Identity;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,
    #[error("malformed credential")]
    Malformed,
    #[error("credential rejected: {0}")]
    Rejected(String),
}

/// 会话认证器：在接入时校验凭证并给出身份，不保存任何状态。
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: Option<&str>) -> Result<Identity, AuthError>;
}
