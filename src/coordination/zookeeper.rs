//! ZooKeeper 会话实现

use super::session::{CoordinationClient, NodeEvent, NodeMode, SessionConnector};
use crate::error::CoordinationError;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use zookeeper_client as zk;

/// 按地址列表连接 ZooKeeper 集群
#[derive(Debug, Clone)]
pub struct ZkConnector {
    hosts: String,
    timeout: Duration,
}

impl ZkConnector {
    /// 创建连接器
    ///
    /// # 参数
    /// * `hosts` - 逗号分隔的 `host:port` 列表
    /// * `timeout` - 单次连接的超时时间
    pub fn new(hosts: impl Into<String>, timeout: Duration) -> Self {
        Self {
            hosts: hosts.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SessionConnector for ZkConnector {
    async fn connect(&self) -> Result<Arc<dyn CoordinationClient>, CoordinationError> {
        debug!("连接ZooKeeper: {}", self.hosts);

        let client = match tokio::time::timeout(self.timeout, zk::Client::connect(&self.hosts)).await
        {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => return Err(CoordinationError::Connect(e.to_string())),
            Err(_) => {
                return Err(CoordinationError::ConnectTimeout {
                    hosts: self.hosts.clone(),
                })
            }
        };

        info!("ZooKeeper会话已建立: {}", self.hosts);
        Ok(Arc::new(ZkClient { client }))
    }
}

/// 单个 ZooKeeper 会话
pub struct ZkClient {
    client: zk::Client,
}

#[async_trait]
impl CoordinationClient for ZkClient {
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        self.client
            .check_stat(path)
            .await
            .map(|stat| stat.is_some())
            .map_err(|e| map_error(path, e))
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: NodeMode,
    ) -> Result<(), CoordinationError> {
        let create_mode = match mode {
            NodeMode::Persistent => zk::CreateMode::Persistent,
            NodeMode::Ephemeral => zk::CreateMode::Ephemeral,
        };
        let options = create_mode.with_acls(zk::Acls::anyone_all());

        self.client
            .create(path, data, &options)
            .await
            .map(|_| ())
            .map_err(|e| map_error(path, e))
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        self.client
            .set_data(path, data, None)
            .await
            .map(|_| ())
            .map_err(|e| map_error(path, e))
    }

    async fn watch_data(
        &self,
        path: &str,
    ) -> Result<BoxFuture<'static, NodeEvent>, CoordinationError> {
        let (_, _, watcher) = self
            .client
            .get_and_watch_data(path)
            .await
            .map_err(|e| map_error(path, e))?;

        Ok(async move { node_event(watcher.changed().await) }.boxed())
    }
}

fn node_event(event: zk::WatchedEvent) -> NodeEvent {
    match event.event_type {
        zk::EventType::NodeDataChanged => NodeEvent::DataChanged,
        zk::EventType::NodeCreated => NodeEvent::Created,
        zk::EventType::NodeDeleted => NodeEvent::Deleted,
        zk::EventType::NodeChildrenChanged => NodeEvent::ChildrenChanged,
        _ => match event.session_state {
            zk::SessionState::Expired | zk::SessionState::Closed => NodeEvent::SessionLost,
            state => NodeEvent::Other(format!("{:?}", state)),
        },
    }
}

fn map_error(path: &str, err: zk::Error) -> CoordinationError {
    match err {
        zk::Error::NodeExists => CoordinationError::NodeExists(path.to_string()),
        zk::Error::NoNode => CoordinationError::NoNode(path.to_string()),
        zk::Error::SessionExpired | zk::Error::ClientClosed => CoordinationError::SessionLost,
        other => CoordinationError::Operation {
            path: path.to_string(),
            message: other.to_string(),
        },
    }
}
