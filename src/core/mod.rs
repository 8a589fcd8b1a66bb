//! 核心类型：错误、事件、会话控制信号

pub mod error;
pub mod events;
pub mod signals;

pub use error::AgentError;
pub use events::{emit, AgentEvent, EventSender};
pub use signals::SessionSignals;
