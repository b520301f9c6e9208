use std::future::Future;
use std::time::Duration;

use domain::RepositoryResult;

use crate::error::ApplicationError;

/// 为一次持久化调用加上超时，超时按可重试的存储错误处理。
pub(crate) async fn within<T, F>(
    limit: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, ApplicationError>
where
    F: Future<Output = RepositoryResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(ApplicationError::from),
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "持久化调用超时");
            Err(ApplicationError::TransientStore(format!(
                "{operation} timed out after {}ms",
                limit.as_millis()
            )))
        }
    }
}
