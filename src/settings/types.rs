//! 客户端配置数据结构定义
//!
//! 定义配置同步客户端的配置项、默认值和验证逻辑

use crate::fetch::{HostSet, Query, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 配置同步客户端配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSettings {
    /// 配置服务地址，多个地址以逗号分隔
    pub server_hosts: String,
    /// 应用名称
    pub app: String,
    /// 应用版本
    pub version: String,
    /// 运行环境
    pub env: String,
    /// 是否启用远程配置与实时同步
    #[serde(default = "default_enable_remote")]
    pub enable_remote: bool,
    /// 调试模式：协调服务首次连接失败即退出
    #[serde(default)]
    pub debug: bool,
    /// 远程请求重试次数
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,
    /// 重试间隔（秒）
    #[serde(default = "default_retry_sleep_seconds")]
    pub retry_sleep_seconds: u64,
    /// 配置文件下载目录
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// 忽略的配置项名称，逗号分隔
    #[serde(default)]
    pub ignore: String,
    /// 协调服务根节点名称
    #[serde(default = "default_coordination_root")]
    pub coordination_root: String,
    /// HTTP请求超时时间（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// 协调服务连接超时时间（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// 刷新失败后重新监听的最大退避时间（秒）
    #[serde(default = "default_rearm_backoff_max")]
    pub rearm_backoff_max_seconds: u64,
}

// 默认值函数
fn default_enable_remote() -> bool {
    true
}
fn default_retry_times() -> u32 {
    3
}
fn default_retry_sleep_seconds() -> u64 {
    5
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("./disconf/download/")
}
fn default_coordination_root() -> String {
    "disconf".to_string()
}
fn default_request_timeout() -> u64 {
    10
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_rearm_backoff_max() -> u64 {
    60
}

impl ClientSettings {
    /// 使用必填项创建配置，其余字段取默认值
    ///
    /// # 参数
    /// * `server_hosts` - 配置服务地址，逗号分隔
    /// * `app` - 应用名称
    /// * `version` - 应用版本
    /// * `env` - 运行环境
    pub fn new(
        server_hosts: impl Into<String>,
        app: impl Into<String>,
        version: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        Self {
            server_hosts: server_hosts.into(),
            app: app.into(),
            version: version.into(),
            env: env.into(),
            enable_remote: default_enable_remote(),
            debug: false,
            retry_times: default_retry_times(),
            retry_sleep_seconds: default_retry_sleep_seconds(),
            download_dir: default_download_dir(),
            ignore: String::new(),
            coordination_root: default_coordination_root(),
            request_timeout_seconds: default_request_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            rearm_backoff_max_seconds: default_rearm_backoff_max(),
        }
    }

    /// 设置重试次数
    pub fn with_retry_times(mut self, retry_times: u32) -> Self {
        self.retry_times = retry_times;
        self
    }

    /// 设置重试间隔
    pub fn with_retry_sleep_seconds(mut self, seconds: u64) -> Self {
        self.retry_sleep_seconds = seconds;
        self
    }

    /// 设置下载目录
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// 设置忽略列表
    pub fn with_ignore(mut self, ignore: impl Into<String>) -> Self {
        self.ignore = ignore.into();
        self
    }

    /// 启用或关闭实时同步
    pub fn with_live_sync(mut self, enabled: bool) -> Self {
        self.enable_remote = enabled;
        self
    }

    /// 启用或关闭调试模式
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// 设置协调服务根节点
    pub fn with_coordination_root(mut self, root: impl Into<String>) -> Self {
        self.coordination_root = root.into();
        self
    }

    /// 规范化后的配置服务地址列表
    pub fn host_set(&self) -> HostSet {
        HostSet::parse(&self.server_hosts)
    }

    /// 重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_times,
            Duration::from_secs(self.retry_sleep_seconds),
        )
    }

    /// 查询参数
    pub fn query(&self) -> Query {
        Query::new(&self.app, &self.env, &self.version)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// 刷新失败后重新监听的退避上限
    pub fn rearm_backoff_max(&self) -> Duration {
        Duration::from_secs(self.rearm_backoff_max_seconds)
    }

    /// 配置项是否在忽略列表中（逗号分隔，精确匹配）
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore.split(',').any(|item| item == name)
    }
}

/// 配置验证函数
///
/// # 参数
/// * `settings` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_settings(settings: &ClientSettings) -> Result<(), String> {
    if settings.host_set().is_empty() {
        return Err("配置服务地址不能为空".to_string());
    }

    for (name, value) in [
        ("app", &settings.app),
        ("version", &settings.version),
        ("env", &settings.env),
    ] {
        if value.trim().is_empty() {
            return Err(format!("{name} 不能为空"));
        }
    }

    if settings.request_timeout_seconds == 0 {
        return Err("请求超时时间不能为0".to_string());
    }

    if settings.connect_timeout_seconds == 0 {
        return Err("协调服务连接超时时间不能为0".to_string());
    }

    if settings.coordination_root.is_empty() || settings.coordination_root.contains('/') {
        return Err(format!(
            "无效的协调服务根节点: {:?}",
            settings.coordination_root
        ));
    }

    Ok(())
}
