//! 实时在线状态与会话消息协调器的领域模型
//!
//! 包含标识符、实体、客户端/服务端事件协议、领域事件以及持久化接口。

pub mod entities;
pub mod errors;
pub mod events;
pub mod protocol;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use protocol::*;
pub use repositories::*;
pub use value_objects::*;
