//! 配置同步模块
//!
//! 组合拉取器、绑定器与监听器，完成启动加载与实时同步

pub mod client;
mod entries;
pub mod handle;
pub mod live;

// 重新导出主要类型
pub use client::{SyncClient, SyncHandle};
pub use handle::{ConfigHandle, ReloadNotification};
pub use live::{rearm_delay, WatchState};
