//! confsync - 远程配置实时同步客户端
//!
//! 将应用的内存配置与远程配置中心保持同步，变更时无需重启即可生效：
//! - 多主机容错的配置拉取与文件下载
//! - 基于 ZooKeeper 的变更监听与实例登记
//! - 按配置键类型化绑定到应用配置结构
//! - 启动加载与后台实时同步
//!
//! ```no_run
//! use confsync::{ClientSettings, Configurable, FieldBinding, SyncClient};
//!
//! #[derive(Debug, Clone, Default)]
//! struct AppConfig {
//!     timeout_ms: i64,
//! }
//!
//! impl Configurable for AppConfig {
//!     fn bindings() -> Vec<FieldBinding<Self>> {
//!         vec![FieldBinding::int64("timeout_ms", "timeout", |c: &mut Self, v| c.timeout_ms = v)
//!             .reloadable()]
//!     }
//! }
//!
//! # async fn run() -> confsync::Result<()> {
//! let settings = ClientSettings::new("127.0.0.1:8081", "demo", "1_0_0_0", "rd");
//! let handle = SyncClient::new(settings, AppConfig::default())?.start().await?;
//! println!("timeout = {}", handle.config().snapshot().await.timeout_ms);
//! # Ok(())
//! # }
//! ```

pub mod binder;
pub mod coordination;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod settings;
pub mod sync;

// 重新导出主要类型
pub use binder::{BindMode, Binder, Configurable, FieldBinding, FieldKind};
pub use error::{ConfSyncError, Result};
pub use fetch::{Entry, EntryKind, Fetcher, HttpFetcher};
pub use settings::{ClientSettings, SettingsLoader, TomlSettingsLoader};
pub use sync::{ConfigHandle, ReloadNotification, SyncClient, SyncHandle};

/// 库版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 库名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 库描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
