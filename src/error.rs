//! 错误处理模块
//!
//! 定义配置同步客户端的统一错误类型

use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

/// 将一组错误拼接为单行描述
fn join_errors<E: Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// confsync 的主要错误类型
#[derive(Error, Debug)]
pub enum ConfSyncError {
    /// 客户端配置错误
    #[error("客户端配置错误: {0}")]
    Settings(#[from] SettingsError),

    /// HTTP客户端初始化失败
    #[error("HTTP客户端初始化失败: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// 远程拉取失败（所有主机与重试均已耗尽）
    #[error("远程拉取失败: {0}")]
    Fetch(#[from] FetchErrors),

    /// 配置文件下载失败
    #[error("配置文件下载失败: {}", join_errors(.0))]
    Download(Vec<FileDownloadError>),

    /// 协调服务错误
    #[error("协调服务错误: {0}")]
    Coordination(#[from] CoordinationError),

    /// 配置项加载或绑定失败
    #[error("配置项加载失败: {}", join_errors(.0))]
    Entries(Vec<EntryError>),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// 客户端配置错误类型
#[derive(Error, Debug)]
pub enum SettingsError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 单次HTTP请求的错误类型
#[derive(Error, Debug)]
pub enum FetchError {
    /// 传输层错误
    #[error("HTTP请求失败 [{url}]: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// 非成功状态码
    #[error("HTTP状态异常 [{url}]: {status}")]
    Status { url: String, status: u16 },

    /// 响应体无法解析
    #[error("响应解析失败 [{url}]: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// 响应携带失败标记
    #[error("服务端拒绝请求 [{url}]: {message}")]
    Rejected { url: String, message: String },

    /// 配置文件名不是下载目录内的单一文件名
    #[error("非法的配置文件名: {key}")]
    InvalidKey { key: String },

    /// 下载任务在完成前被中止
    #[error("下载任务被中止: {key}")]
    Aborted { key: String },

    /// 下载文件写入失败
    #[error("写入文件失败 [{}]: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// 是否属于可重试的瞬时错误
    ///
    /// 请求格式错误（400）、服务端错误（5xx）以及连接/超时类传输错误可重试，
    /// 其余错误直接切换到下一个主机。
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 400 || (500..600).contains(status),
            FetchError::Transport { source, .. } => source.is_connect() || source.is_timeout(),
            _ => false,
        }
    }
}

/// 所有主机与重试耗尽后的聚合错误
#[derive(Error, Debug, Default)]
#[error("{} 次尝试全部失败: {}", .0.len(), join_errors(.0))]
pub struct FetchErrors(pub Vec<FetchError>);

impl FetchErrors {
    /// 创建聚合错误
    pub fn new(errors: Vec<FetchError>) -> Self {
        Self(errors)
    }

    /// 底层错误数量
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 遍历底层错误
    pub fn iter(&self) -> std::slice::Iter<'_, FetchError> {
        self.0.iter()
    }

    /// 取出底层错误列表
    pub fn into_inner(self) -> Vec<FetchError> {
        self.0
    }
}

/// 单个文件的下载失败
#[derive(Error, Debug)]
#[error("下载文件 {key} 失败: {errors}")]
pub struct FileDownloadError {
    /// 文件名
    pub key: String,
    /// 该文件的聚合错误
    pub errors: FetchErrors,
}

/// 协调服务错误类型
#[derive(Error, Debug)]
pub enum CoordinationError {
    /// 连接超时
    #[error("连接协调服务超时: {hosts}")]
    ConnectTimeout { hosts: String },

    /// 连接失败
    #[error("连接协调服务失败: {0}")]
    Connect(String),

    /// 会话已失效
    #[error("协调服务会话已失效")]
    SessionLost,

    /// 尚未建立会话
    #[error("协调服务尚未连接")]
    NotConnected,

    /// 节点已存在
    #[error("节点已存在: {0}")]
    NodeExists(String),

    /// 节点不存在
    #[error("节点不存在: {0}")]
    NoNode(String),

    /// 无法识别的配置类型
    #[error("无法识别的配置类型: {0}")]
    UnknownKind(i32),

    /// 监听收到非数据变更事件
    #[error("监听节点 {path} 收到非数据变更事件: {event}")]
    UnexpectedEvent { path: String, event: String },

    /// 本机地址获取失败
    #[error("本机地址获取失败: {0}")]
    LocalAddress(#[from] std::io::Error),

    /// 其他节点操作失败
    #[error("协调服务操作失败 [{path}]: {message}")]
    Operation { path: String, message: String },
}

impl CoordinationError {
    /// 是否意味着会话已不可用，需要重新连接
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            CoordinationError::SessionLost | CoordinationError::NotConnected
        )
    }
}

/// 字段绑定失败的原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindErrorKind {
    /// 值无法转换为字段类型
    #[error("无法将 {value:?} 解析为 {type_name}: {reason}")]
    Parse {
        value: String,
        type_name: &'static str,
        reason: String,
    },

    /// 字段类型不受支持
    #[error("不支持的字段类型 {0}")]
    UnsupportedType(&'static str),
}

/// 字段绑定错误
#[derive(Error, Debug, Clone, PartialEq)]
#[error("绑定字段 {field} [key:{key}] 失败: {kind}")]
pub struct BindError {
    /// 字段名
    pub field: &'static str,
    /// 配置键
    pub key: String,
    /// 失败原因
    pub kind: BindErrorKind,
}

/// 属性文件解析错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropertiesError {
    /// 键为空
    #[error("第 {line} 行的键为空")]
    EmptyKey { line: usize },
}

/// 单个配置项加载错误
#[derive(Error, Debug)]
pub enum EntryError {
    /// 字段绑定失败
    #[error("{0}")]
    Bind(#[from] BindError),

    /// 属性文件解析失败
    #[error("解析属性文件 {name} 失败: {source}")]
    Properties {
        name: String,
        #[source]
        source: PropertiesError,
    },

    /// 本地文件读取失败
    #[error("读取本地文件 {name} 失败: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// 配置类型无法识别
    #[error("配置项 {name} 的类型无法识别: {code}")]
    UnknownKind { name: String, code: i32 },
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ConfSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transient_classes() {
        let status = |status| FetchError::Status {
            url: "http://127.0.0.1/api".to_string(),
            status,
        };

        assert!(status(400).is_transient());
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(401).is_transient());
    }

    #[test]
    fn test_rejected_is_not_transient() {
        let error = FetchError::Rejected {
            url: "http://127.0.0.1/api".to_string(),
            message: "denied".to_string(),
        };
        assert!(!error.is_transient());
    }

    #[test]
    fn test_aggregate_display_lists_every_error() {
        let errors = FetchErrors::new(vec![
            FetchError::Status {
                url: "http://a".to_string(),
                status: 500,
            },
            FetchError::Status {
                url: "http://b".to_string(),
                status: 400,
            },
        ]);

        let message = errors.to_string();
        assert_eq!(errors.len(), 2);
        assert!(message.contains("http://a"));
        assert!(message.contains("http://b"));
    }

    #[test]
    fn test_session_lost_detection() {
        assert!(CoordinationError::SessionLost.is_session_lost());
        assert!(CoordinationError::NotConnected.is_session_lost());
        assert!(!CoordinationError::NoNode("/a".to_string()).is_session_lost());
    }
}
