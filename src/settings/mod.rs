//! 客户端配置模块
//!
//! 提供配置同步客户端自身配置的定义、加载与验证

pub mod loader;
pub mod types;

// 重新导出主要类型
pub use loader::{SettingsLoader, TomlSettingsLoader};
pub use types::{validate_settings, ClientSettings};
