//! 应用层实现。
//!
//! 围绕领域模型的实时协调服务：连接网关、在线状态表、会话房间路由、
//! 输入状态存储与消息管道，以及它们依赖的外部协作方抽象
//! （认证器、持久化、领域事件发布、时钟）。

pub mod auth;
pub mod clock;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod memory;
pub mod pipeline;
pub mod presence;
pub mod publisher;
pub mod rooms;
pub mod scheduler;
pub mod typing;

mod timeout;

pub use auth::{AuthError, Authenticator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ApplicationError;
pub use gateway::{
    ConnectionState, Dispatch, Gateway, GatewayDependencies, RealtimeOptions, RealtimeServices,
    Session,
};
pub use hub::{ConnectionHub, OutboundChannel};
pub use memory::InMemoryChatStore;
pub use pipeline::{MessagePipeline, MessagePipelineDependencies, ReadReceipt, SendMessageRequest};
pub use presence::{PresenceRegistry, PresenceSnapshot};
pub use publisher::{DomainEventPublisher, TracingEventPublisher};
pub use rooms::RoomRouter;
pub use scheduler::TypingSweeper;
pub use typing::TypingStore;
