//! Redis 领域事件发布
//!
//! 每个事件序列化为 JSON 后 `PUBLISH` 到单一频道。发布在后台任务中完成，
//! 调用方不等待结果；发布失败只记录日志，不影响消息流程。

use application::DomainEventPublisher;
use domain::DomainEvent;
use redis::{aio::ConnectionManager, AsyncCommands};

#[derive(Clone)]
pub struct RedisEventPublisher {
    connection: ConnectionManager,
    channel: String,
}

impl RedisEventPublisher {
    pub async fn connect(url: &str, channel: impl Into<String>) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        let channel = channel.into();
        tracing::info!(channel = %channel, "Redis 领域事件发布器已连接");
        Ok(Self {
            connection,
            channel,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// 事件在频道上的载荷
pub fn event_payload(event: &DomainEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

impl DomainEventPublisher for RedisEventPublisher {
    fn publish(&self, event: DomainEvent) {
        let payload = match event_payload(&event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(event = event.name(), error = %err, "领域事件序列化失败");
                return;
            }
        };

        let mut connection = self.connection.clone();
        let channel = self.channel.clone();
        let name = event.name();
        tokio::spawn(async move {
            match connection.publish::<_, _, i64>(&channel, payload).await {
                Ok(receivers) => {
                    tracing::debug!(event = name, channel = %channel, receivers, "领域事件已发布")
                }
                Err(err) => {
                    tracing::warn!(event = name, channel = %channel, error = %err, "领域事件发布失败")
                }
            }
        });
    }
}
