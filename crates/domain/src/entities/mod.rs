//! 领域实体定义
//!
//! 身份、在线状态、会话/参与者、消息、输入状态。

pub mod conversation;
pub mod identity;
pub mod message;
pub mod presence;
pub mod typing;

pub use conversation::{Conversation, ConversationType, Membership, Participant};
pub use identity::Identity;
pub use message::{Message, MessageStatus, MessageType};
pub use presence::{Presence, PresenceStatus};
pub use typing::TypingIndicator;
