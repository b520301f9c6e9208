use domain::DomainEvent;

/// 领域事件发布器，单向且不被等待。
pub trait DomainEventPublisher: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// 只写日志的发布器，未配置消息总线时使用
#[derive(Debug, Default)]
pub struct TracingEventPublisher;

impl DomainEventPublisher for TracingEventPublisher {
    fn publish(&self, event: DomainEvent) {
        tracing::info!(
            event = event.name(),
            conversation_id = %event.conversation_id(),
            "领域事件"
        );
    }
}
