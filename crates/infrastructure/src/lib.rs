//! 基础设施层实现。
//!
//! 提供 PostgreSQL 持久化与 Redis 领域事件发布等适配器，实现应用/领域层定义的接口。

pub mod builder;
pub mod events;
pub mod migrations;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use events::RedisEventPublisher;
pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgChatStore};
