use std::sync::Arc;

use application::{DomainEventPublisher, TracingEventPublisher};
use config::AppConfig;
use thiserror::Error;

use crate::{
    events::RedisEventPublisher,
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgChatStore},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// 组装好的外部适配器
#[derive(Clone)]
pub struct Infrastructure {
    pub store: Arc<PgChatStore>,
    pub publisher: Arc<dyn DomainEventPublisher>,
}

impl Infrastructure {
    /// 连接数据库并执行迁移；配置了 Redis 时领域事件发往 Redis，否则只写日志
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!("数据库迁移完成");

        let publisher: Arc<dyn DomainEventPublisher> = match &config.redis.url {
            Some(url) => Arc::new(RedisEventPublisher::connect(url, config.redis.channel.clone()).await?),
            None => {
                tracing::info!("未配置 Redis，领域事件只写日志");
                Arc::new(TracingEventPublisher)
            }
        };

        Ok(Self {
            store: Arc::new(PgChatStore::new(pool)),
            publisher,
        })
    }
}
