//! 进程内协调服务
//!
//! 提供持久/临时节点、一次性数据监听、会话失效以及可编排的连接失败，
//! 用于本地开发和测试，不需要真实的 ZooKeeper 集群

use super::session::{CoordinationClient, NodeEvent, NodeMode, SessionConnector};
use crate::error::CoordinationError;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    /// 临时节点所属的会话
    owner: Option<u64>,
}

#[derive(Debug)]
struct PendingWatch {
    session: u64,
    sender: oneshot::Sender<NodeEvent>,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    watches: HashMap<String, Vec<PendingWatch>>,
    live_sessions: Vec<u64>,
    next_session: u64,
    connects: usize,
    failures_to_inject: usize,
}

impl Tree {
    fn fire(&mut self, path: &str, event: NodeEvent) {
        if let Some(pending) = self.watches.remove(path) {
            for watch in pending {
                let _ = watch.sender.send(event.clone());
            }
        }
    }

    fn check_session(&self, session: u64) -> Result<(), CoordinationError> {
        if self.live_sessions.contains(&session) {
            Ok(())
        } else {
            Err(CoordinationError::SessionLost)
        }
    }
}

/// 内存中的协调服务树，可被多个会话共享
#[derive(Debug, Clone, Default)]
pub struct MemoryCoordination {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的 `count` 次连接尝试将失败
    pub async fn fail_next_connects(&self, count: usize) {
        self.tree.lock().await.failures_to_inject = count;
    }

    /// 累计的连接尝试次数（含失败）
    pub async fn connect_count(&self) -> usize {
        self.tree.lock().await.connects
    }

    /// 读取节点数据
    pub async fn node_data(&self, path: &str) -> Option<Vec<u8>> {
        self.tree.lock().await.nodes.get(path).map(|n| n.data.clone())
    }

    /// 节点是否存在
    pub async fn contains(&self, path: &str) -> bool {
        self.tree.lock().await.nodes.contains_key(path)
    }

    /// 直接子节点的完整路径
    pub async fn children(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.tree
            .lock()
            .await
            .nodes
            .keys()
            .filter(|key| {
                key.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .cloned()
            .collect()
    }

    /// 节点上尚未触发的监听数量
    pub async fn watch_count(&self, path: &str) -> usize {
        self.tree
            .lock()
            .await
            .watches
            .get(path)
            .map(|w| w.iter().filter(|p| !p.sender.is_closed()).count())
            .unwrap_or(0)
    }

    /// 以外部写入者的身份修改节点数据并触发监听
    pub async fn set_data(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        let mut tree = self.tree.lock().await;
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
        node.data = data.to_vec();
        tree.fire(path, NodeEvent::DataChanged);
        Ok(())
    }

    /// 删除节点并触发监听
    pub async fn delete(&self, path: &str) -> Result<(), CoordinationError> {
        let mut tree = self.tree.lock().await;
        tree.nodes
            .remove(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
        tree.fire(path, NodeEvent::Deleted);
        Ok(())
    }

    /// 使所有存活会话失效：删除其临时节点并以会话丢失事件结束其监听
    pub async fn expire_sessions(&self) {
        let mut tree = self.tree.lock().await;
        let expired = std::mem::take(&mut tree.live_sessions);
        tree.nodes
            .retain(|_, node| node.owner.map_or(true, |s| !expired.contains(&s)));

        for pending in tree.watches.values_mut() {
            let (lost, kept): (Vec<_>, Vec<_>) = pending
                .drain(..)
                .partition(|w| expired.contains(&w.session));
            *pending = kept;
            for watch in lost {
                let _ = watch.sender.send(NodeEvent::SessionLost);
            }
        }
        tree.watches.retain(|_, pending| !pending.is_empty());
        debug!("内存协调服务会话已失效: {:?}", expired);
    }
}

#[async_trait]
impl SessionConnector for MemoryCoordination {
    async fn connect(&self) -> Result<Arc<dyn CoordinationClient>, CoordinationError> {
        let mut tree = self.tree.lock().await;
        tree.connects += 1;

        if tree.failures_to_inject > 0 {
            tree.failures_to_inject -= 1;
            return Err(CoordinationError::Connect("注入的连接失败".to_string()));
        }

        tree.next_session += 1;
        let session = tree.next_session;
        tree.live_sessions.push(session);

        Ok(Arc::new(MemorySession {
            tree: Arc::clone(&self.tree),
            session,
        }))
    }
}

/// [`MemoryCoordination`] 上的一个会话
#[derive(Debug)]
pub struct MemorySession {
    tree: Arc<Mutex<Tree>>,
    session: u64,
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(pos) => Some(&path[..pos]),
    }
}

#[async_trait]
impl CoordinationClient for MemorySession {
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        let tree = self.tree.lock().await;
        tree.check_session(self.session)?;
        Ok(tree.nodes.contains_key(path))
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: NodeMode,
    ) -> Result<(), CoordinationError> {
        let mut tree = self.tree.lock().await;
        tree.check_session(self.session)?;

        if tree.nodes.contains_key(path) {
            return Err(CoordinationError::NodeExists(path.to_string()));
        }
        if let Some(parent) = parent_of(path) {
            if !tree.nodes.contains_key(parent) {
                return Err(CoordinationError::NoNode(parent.to_string()));
            }
        }

        let owner = match mode {
            NodeMode::Persistent => None,
            NodeMode::Ephemeral => Some(self.session),
        };
        tree.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                owner,
            },
        );
        tree.fire(path, NodeEvent::Created);
        Ok(())
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        let mut tree = self.tree.lock().await;
        tree.check_session(self.session)?;

        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
        node.data = data.to_vec();
        tree.fire(path, NodeEvent::DataChanged);
        Ok(())
    }

    async fn watch_data(
        &self,
        path: &str,
    ) -> Result<BoxFuture<'static, NodeEvent>, CoordinationError> {
        let mut tree = self.tree.lock().await;
        tree.check_session(self.session)?;

        if !tree.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }

        let (sender, receiver) = oneshot::channel();
        tree.watches
            .entry(path.to_string())
            .or_default()
            .push(PendingWatch {
                session: self.session,
                sender,
            });

        Ok(async move { receiver.await.unwrap_or(NodeEvent::SessionLost) }.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn session(memory: &MemoryCoordination) -> Arc<dyn CoordinationClient> {
        memory.connect().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let memory = MemoryCoordination::new();
        let client = session(&memory).await;

        let err = client
            .create("/a/b", b"", NodeMode::Persistent)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::NoNode(p) if p == "/a"));

        client.create("/a", b"", NodeMode::Persistent).await.unwrap();
        client.create("/a/b", b"x", NodeMode::Persistent).await.unwrap();
        assert_eq!(memory.node_data("/a/b").await, Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn test_duplicate_create_reports_exists() {
        let memory = MemoryCoordination::new();
        let client = session(&memory).await;
        client.create("/a", b"", NodeMode::Persistent).await.unwrap();

        let err = client
            .create("/a", b"", NodeMode::Persistent)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::NodeExists(_)));
    }

    #[tokio::test]
    async fn test_watch_fires_once() {
        let memory = MemoryCoordination::new();
        let client = session(&memory).await;
        client.create("/a", b"1", NodeMode::Persistent).await.unwrap();

        let fired = client.watch_data("/a").await.unwrap();
        assert_eq!(memory.watch_count("/a").await, 1);

        memory.set_data("/a", b"2").await.unwrap();
        assert_eq!(fired.await, NodeEvent::DataChanged);
        assert_eq!(memory.watch_count("/a").await, 0);

        // 监听已消耗，再次修改不会触发任何东西
        memory.set_data("/a", b"3").await.unwrap();
        assert_eq!(memory.watch_count("/a").await, 0);
    }

    #[tokio::test]
    async fn test_watch_on_missing_node_fails() {
        let memory = MemoryCoordination::new();
        let client = session(&memory).await;
        assert!(matches!(
            client.watch_data("/missing").await,
            Err(CoordinationError::NoNode(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_fires_deleted() {
        let memory = MemoryCoordination::new();
        let client = session(&memory).await;
        client.create("/a", b"", NodeMode::Persistent).await.unwrap();

        let fired = client.watch_data("/a").await.unwrap();
        memory.delete("/a").await.unwrap();
        assert_eq!(fired.await, NodeEvent::Deleted);
    }

    #[tokio::test]
    async fn test_expiry_removes_ephemeral_nodes() {
        let memory = MemoryCoordination::new();
        let client = session(&memory).await;
        client.create("/a", b"", NodeMode::Persistent).await.unwrap();
        client.create("/a/me", b"v", NodeMode::Ephemeral).await.unwrap();
        let fired = client.watch_data("/a").await.unwrap();

        memory.expire_sessions().await;

        assert_eq!(fired.await, NodeEvent::SessionLost);
        assert!(memory.contains("/a").await);
        assert!(!memory.contains("/a/me").await);
        assert!(client.exists("/a").await.unwrap_err().is_session_lost());

        let fresh = session(&memory).await;
        assert!(fresh.exists("/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_connect_failures() {
        let memory = MemoryCoordination::new();
        memory.fail_next_connects(2).await;

        assert!(memory.connect().await.is_err());
        assert!(memory.connect().await.is_err());
        assert!(memory.connect().await.is_ok());
        assert_eq!(memory.connect_count().await, 3);
    }
}
