//! 工具层：注册表、工作区适配器与执行器

pub mod adapter;
pub mod executor;
pub mod registry;

pub use adapter::{LocalFsAdapter, WorkspaceAdapter};
pub use executor::{ToolExecutor, ToolObserver};
pub use registry::{ToolEntry, ToolOp, BUILTIN_TOOLS};
