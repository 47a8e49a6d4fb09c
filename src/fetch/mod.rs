//! 远程配置拉取模块
//!
//! 提供多主机容错的配置列表、单值配置、文件下载与协调服务地址查询

pub mod fetcher;
pub mod types;

// 重新导出主要类型
pub use fetcher::{Fetcher, HttpFetcher, FILE_PATH, ITEM_PATH, LIST_PATH, ZOO_HOSTS_PATH};
pub use types::{Entry, EntryKind, HostSet, Query, RetryPolicy, PROPERTIES_SUFFIX};
