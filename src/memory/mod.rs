//! 会话记忆：对话消息与状态持久化

pub mod message;
pub mod store;

pub use message::{Message, Role};
pub use store::SessionStore;
