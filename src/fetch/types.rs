//! 远程配置数据结构定义
//!
//! 定义配置项、主机列表、查询参数、重试策略以及配置服务的响应结构

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

/// 可被自动加载的属性文件后缀
pub const PROPERTIES_SUFFIX: &str = ".properties";

/// 配置项类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum EntryKind {
    /// 属性文件
    File,
    /// 单值配置项
    Item,
    /// 服务端返回的未知类型
    Unknown(i32),
}

impl From<i32> for EntryKind {
    fn from(code: i32) -> Self {
        match code {
            0 => EntryKind::File,
            1 => EntryKind::Item,
            other => EntryKind::Unknown(other),
        }
    }
}

impl From<EntryKind> for i32 {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::File => 0,
            EntryKind::Item => 1,
            EntryKind::Unknown(code) => code,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Item => write!(f, "item"),
            EntryKind::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

/// 服务端返回 null 时使用默认值
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 单个配置项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    #[serde(default)]
    pub id: i64,
    /// 配置类型
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub status: i32,
    /// 配置项名称（单值配置的键或文件名）
    pub name: String,
    /// 单值配置项的值
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: String,
    #[serde(default)]
    pub app_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(default)]
    pub env_id: i64,
}

impl Entry {
    /// 创建单值配置项
    pub fn item(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(EntryKind::Item, name.into(), value.into())
    }

    /// 创建文件配置项
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(EntryKind::File, name.into(), String::new())
    }

    fn new(kind: EntryKind, name: String, value: String) -> Self {
        Self {
            id: 0,
            kind,
            status: 0,
            name,
            value,
            app_id: 0,
            version: String::new(),
            env_id: 0,
        }
    }

    /// 是否为属性文件（按后缀识别）
    pub fn is_properties_file(&self) -> bool {
        self.kind == EntryKind::File && self.name.ends_with(PROPERTIES_SUFFIX)
    }

    /// 是否可以被实时监听：全部单值配置项以及属性文件
    pub fn is_watchable(&self) -> bool {
        self.kind == EntryKind::Item || self.is_properties_file()
    }
}

/// 规范化后的配置服务地址列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSet {
    hosts: Vec<String>,
}

impl HostSet {
    /// 解析逗号分隔的地址列表，缺少协议时补全 `http://`
    pub fn parse(raw: &str) -> Self {
        let hosts = raw
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(|host| {
                let host = host.trim_end_matches('/');
                if host.starts_with("http://") || host.starts_with("https://") {
                    host.to_string()
                } else {
                    format!("http://{host}")
                }
            })
            .collect();
        Self { hosts }
    }

    /// 拼接接口路径
    pub fn urls(&self, path: &str) -> impl Iterator<Item = String> + '_ {
        let path = path.to_string();
        self.hosts.iter().map(move |host| format!("{host}{path}"))
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.hosts
    }
}

/// 配置服务查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub app: String,
    pub env: String,
    pub version: String,
}

impl Query {
    pub fn new(app: impl Into<String>, env: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            env: env.into(),
            version: version.into(),
        }
    }

    /// 查询参数列表，可选附带配置键
    pub fn params<'a>(&'a self, key: Option<&'a str>) -> Vec<(&'static str, &'a str)> {
        let mut params = vec![
            ("app", self.app.as_str()),
            ("env", self.env.as_str()),
            ("version", self.version.as_str()),
        ];
        if let Some(key) = key {
            params.push(("key", key));
        }
        params
    }
}

/// 单个主机上的重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 首次请求失败后的重试次数
    pub times: u32,
    /// 两次尝试之间的固定间隔
    pub sleep: Duration,
}

impl RetryPolicy {
    pub fn new(times: u32, sleep: Duration) -> Self {
        Self { times, sleep }
    }

    /// 单个主机的最大尝试次数
    pub fn attempts(&self) -> u32 {
        self.times + 1
    }
}

/// 配置列表接口响应
#[derive(Debug, Deserialize)]
pub(crate) struct CatalogResponse {
    #[serde(default)]
    pub success: serde_json::Value,
    #[serde(default)]
    pub message: serde_json::Value,
    #[serde(default)]
    pub page: CatalogPage,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CatalogPage {
    #[serde(default, rename = "result", deserialize_with = "null_as_default")]
    pub results: Vec<Entry>,
}

impl CatalogResponse {
    /// 服务端以字符串 "true" 表示成功，兼容布尔值
    pub fn is_success(&self) -> bool {
        match &self.success {
            serde_json::Value::String(s) => s == "true",
            serde_json::Value::Bool(b) => *b,
            _ => false,
        }
    }
}

/// 成功状态码
pub(crate) const STATUS_OK: i32 = 1;

/// 单值接口与协调服务地址接口的响应
#[derive(Debug, Deserialize)]
pub(crate) struct ValueResponse {
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub message: serde_json::Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: String,
}

/// 将 message 字段转为可读文本
pub(crate) fn message_text(message: &serde_json::Value) -> String {
    match message {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
