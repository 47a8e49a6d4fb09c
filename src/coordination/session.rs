//! 协调服务会话抽象
//!
//! 监听器只依赖这里定义的节点原语，ZooKeeper 与内存实现都在其后

use crate::error::CoordinationError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    SessionLost,
}

/// 节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    /// 会话结束后保留
    Persistent,
    /// 随会话结束删除
    Ephemeral,
}

/// 一次性监听触发时收到的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    DataChanged,
    Created,
    Deleted,
    ChildrenChanged,
    SessionLost,
    Other(String),
}

impl NodeEvent {
    pub fn is_data_change(&self) -> bool {
        matches!(self, NodeEvent::DataChanged)
    }
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEvent::DataChanged => write!(f, "data_changed"),
            NodeEvent::Created => write!(f, "created"),
            NodeEvent::Deleted => write!(f, "deleted"),
            NodeEvent::ChildrenChanged => write!(f, "children_changed"),
            NodeEvent::SessionLost => write!(f, "session_lost"),
            NodeEvent::Other(desc) => write!(f, "{}", desc),
        }
    }
}

/// 一个已建立会话上的节点操作
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// 节点是否存在
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError>;

    /// 创建节点，已存在时返回 [`CoordinationError::NodeExists`]
    async fn create(&self, path: &str, data: &[u8], mode: NodeMode)
        -> Result<(), CoordinationError>;

    /// 无条件覆盖节点数据
    async fn set_data(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError>;

    /// 在节点数据上注册一次性监听
    ///
    /// 注册成功后返回的 future 在第一个事件到达时完成，之后不再触发。
    async fn watch_data(
        &self,
        path: &str,
    ) -> Result<BoxFuture<'static, NodeEvent>, CoordinationError>;
}

/// 建立新会话
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn CoordinationClient>, CoordinationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_data_change_counts() {
        assert!(NodeEvent::DataChanged.is_data_change());
        assert!(!NodeEvent::Deleted.is_data_change());
        assert!(!NodeEvent::SessionLost.is_data_change());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(NodeEvent::Deleted.to_string(), "deleted");
        assert_eq!(NodeEvent::Other("Disconnected".into()).to_string(), "Disconnected");
    }
}
