//! 配置变更监听器
//!
//! 维护协调服务会话，登记实例节点，并为每个配置项提供一次性监听

use super::path::{instance_suffix, local_ipv4, random_token, Namespace};
use super::session::{CoordinationClient, NodeEvent, NodeMode, SessionConnector, SessionState};
use crate::error::CoordinationError;
use crate::fetch::EntryKind;
use futures::future::BoxFuture;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// 首次连接失败后的额外尝试次数
pub const CONNECT_RETRIES: u32 = 3;

/// 一次监听的结果
#[derive(Debug)]
pub struct WatchEvent {
    pub key: String,
    pub kind: EntryKind,
    /// 监听注册失败或收到非数据变更事件时携带错误
    pub error: Option<CoordinationError>,
}

impl WatchEvent {
    pub fn new(key: String, kind: EntryKind, result: Result<(), CoordinationError>) -> Self {
        Self {
            key,
            kind,
            error: result.err(),
        }
    }

    pub fn is_session_lost(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(CoordinationError::is_session_lost)
    }
}

/// 已注册、尚未触发的一次性监听
pub struct ArmedWatch {
    path: String,
    /// 注册监听时的会话代次
    generation: u64,
    fired: BoxFuture<'static, NodeEvent>,
}

struct Session {
    client: Arc<dyn CoordinationClient>,
    generation: u64,
}

/// 协调服务监听器
pub struct Watcher {
    connector: Arc<dyn SessionConnector>,
    session: RwLock<Session>,
    namespace: Namespace,
    local_ip: Ipv4Addr,
    token: String,
    state: watch::Sender<SessionState>,
}

impl Watcher {
    /// 建立会话
    ///
    /// 失败后最多再尝试 [`CONNECT_RETRIES`] 次；调试模式下首次失败即返回错误。
    ///
    /// # 参数
    /// * `connector` - 会话连接器
    /// * `namespace` - 应用、版本、环境对应的节点命名空间
    /// * `debug` - 调试模式
    pub async fn connect(
        connector: Arc<dyn SessionConnector>,
        namespace: Namespace,
        debug: bool,
    ) -> Result<Self, CoordinationError> {
        let (state, _) = watch::channel(SessionState::Connecting);
        let local_ip = local_ipv4()?;
        let attempts = if debug { 1 } else { CONNECT_RETRIES + 1 };

        let mut last_error = CoordinationError::NotConnected;
        for attempt in 1..=attempts {
            match connector.connect().await {
                Ok(client) => {
                    state.send_replace(SessionState::Connected);
                    info!(
                        "协调服务已连接 (第{}次尝试), 命名空间: {}",
                        attempt,
                        namespace.namespace_path()
                    );
                    return Ok(Self {
                        connector,
                        session: RwLock::new(Session {
                            client,
                            generation: 1,
                        }),
                        namespace,
                        local_ip,
                        token: random_token(),
                        state,
                    });
                }
                Err(e) => {
                    warn!("连接协调服务失败 (第{}/{}次): {}", attempt, attempts, e);
                    last_error = e;
                }
            }
        }

        state.send_replace(SessionState::Disconnected);
        error!("协调服务连接失败，放弃重试: {}", last_error);
        Err(last_error)
    }

    /// 当前会话状态
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    async fn client(&self) -> (Arc<dyn CoordinationClient>, u64) {
        let session = self.session.read().await;
        (Arc::clone(&session.client), session.generation)
    }

    /// 配置项的定义节点路径
    pub fn definition_path(&self, key: &str, kind: EntryKind) -> Result<String, CoordinationError> {
        self.namespace.definition_path(key, kind)
    }

    /// 本实例的节点后缀
    pub fn instance_path(&self) -> String {
        instance_suffix(self.local_ip, &self.token)
    }

    /// 本实例在某个配置项下的标记节点
    pub fn marker_path(&self, key: &str, kind: EntryKind) -> Result<String, CoordinationError> {
        Ok(format!(
            "{}{}",
            self.definition_path(key, kind)?,
            self.instance_path()
        ))
    }

    /// 逐级创建根、命名空间、类型与定义节点，已存在视为成功
    ///
    /// 返回定义节点路径。
    pub async fn register_presence(
        &self,
        kind: EntryKind,
        key: &str,
    ) -> Result<String, CoordinationError> {
        let kind_path = self.namespace.kind_path(kind)?;
        let definition = self.definition_path(key, kind)?;
        let local_ip = self.local_ip.to_string();

        let nodes = [
            (self.namespace.root_path(), Vec::new()),
            (self.namespace.namespace_path(), Vec::new()),
            (kind_path, local_ip.into_bytes()),
            (definition.clone(), Vec::new()),
        ];

        let (client, _) = self.client().await;
        for (path, data) in nodes.iter() {
            if client.exists(path).await? {
                continue;
            }
            // 其他实例可能在 exists 与 create 之间抢先创建
            match client.create(path, data, NodeMode::Persistent).await {
                Ok(()) => debug!("已创建节点: {}", path),
                Err(CoordinationError::NodeExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(definition)
    }

    /// 创建本实例的临时标记节点，节点已存在时覆盖其数据
    pub async fn create_ephemeral_marker(
        &self,
        path: &str,
        value: &str,
    ) -> Result<(), CoordinationError> {
        let (client, _) = self.client().await;
        match client
            .create(path, value.as_bytes(), NodeMode::Ephemeral)
            .await
        {
            Err(CoordinationError::NodeExists(_)) => client.set_data(path, value.as_bytes()).await,
            other => other,
        }
    }

    /// 无条件覆盖标记节点数据
    pub async fn update_marker(&self, path: &str, value: &str) -> Result<(), CoordinationError> {
        let (client, _) = self.client().await;
        client.set_data(path, value.as_bytes()).await
    }

    /// 在定义节点上注册一次性监听，并等待其触发
    ///
    /// 返回的事件是终态，监听不会自动重新注册。
    pub async fn watch_once(&self, key: String, kind: EntryKind) -> WatchEvent {
        let result = match self.arm_watch(&key, kind).await {
            Ok(armed) => self.wait_fired(armed).await,
            Err(e) => Err(e),
        };
        WatchEvent::new(key, kind, result)
    }

    /// 在定义节点上注册一次性监听，注册成功即返回
    pub async fn arm_watch(
        &self,
        key: &str,
        kind: EntryKind,
    ) -> Result<ArmedWatch, CoordinationError> {
        let path = self.definition_path(key, kind)?;
        let (client, generation) = self.client().await;

        match client.watch_data(&path).await {
            Ok(fired) => Ok(ArmedWatch {
                path,
                generation,
                fired,
            }),
            Err(e) => {
                if e.is_session_lost() {
                    self.mark_lost(generation).await;
                }
                debug!("注册监听失败 [path:{}]: {}", path, e);
                Err(e)
            }
        }
    }

    /// 等待已注册的监听触发，只有数据变更视为成功
    pub async fn wait_fired(&self, armed: ArmedWatch) -> Result<(), CoordinationError> {
        let ArmedWatch {
            path,
            generation,
            fired,
        } = armed;

        let result = match fired.await {
            event if event.is_data_change() => Ok(()),
            NodeEvent::SessionLost => {
                self.mark_lost(generation).await;
                Err(CoordinationError::SessionLost)
            }
            other => Err(CoordinationError::UnexpectedEvent {
                path: path.clone(),
                event: other.to_string(),
            }),
        };

        if let Err(e) = &result {
            debug!("监听 {} 结束: {}", path, e);
        }
        result
    }

    async fn mark_lost(&self, generation: u64) {
        // 旧会话的迟到事件不影响已重连的会话
        if self.session.read().await.generation == generation {
            self.state.send_if_modified(|state| {
                if *state == SessionState::Connected {
                    *state = SessionState::SessionLost;
                    true
                } else {
                    false
                }
            });
        }
    }

    /// 会话丢失后重新建立会话
    pub async fn reconnect(&self) -> Result<(), CoordinationError> {
        let mut session = self.session.write().await;
        self.state.send_replace(SessionState::Connecting);
        info!("重新连接协调服务: {}", self.namespace.namespace_path());

        match self.connector.connect().await {
            Ok(client) => {
                session.client = client;
                session.generation += 1;
                self.state.send_replace(SessionState::Connected);
                info!("协调服务会话已恢复");
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(SessionState::SessionLost);
                error!("重新连接协调服务失败: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryCoordination;

    fn namespace() -> Namespace {
        Namespace::new("disconf", "demo", "1_0", "rd")
    }

    async fn connected(memory: &MemoryCoordination) -> Watcher {
        Watcher::connect(Arc::new(memory.clone()), namespace(), false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_retries_three_more_times() {
        let memory = MemoryCoordination::new();
        memory.fail_next_connects(3).await;

        let watcher = connected(&memory).await;
        assert_eq!(watcher.state(), SessionState::Connected);
        assert_eq!(memory.connect_count().await, 4);
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_retries() {
        let memory = MemoryCoordination::new();
        memory.fail_next_connects(4).await;

        let result = Watcher::connect(Arc::new(memory.clone()), namespace(), false).await;
        assert!(result.is_err());
        assert_eq!(memory.connect_count().await, 4);
    }

    #[tokio::test]
    async fn test_debug_mode_fails_fast() {
        let memory = MemoryCoordination::new();
        memory.fail_next_connects(1).await;

        let result = Watcher::connect(Arc::new(memory.clone()), namespace(), true).await;
        assert!(result.is_err());
        assert_eq!(memory.connect_count().await, 1);
    }

    #[tokio::test]
    async fn test_register_presence_is_idempotent() {
        let memory = MemoryCoordination::new();
        let watcher = connected(&memory).await;

        let first = watcher.register_presence(EntryKind::Item, "a").await.unwrap();
        let second = watcher.register_presence(EntryKind::Item, "a").await.unwrap();
        assert_eq!(first, "/disconf/demo_1_0_rd/item/a");
        assert_eq!(first, second);

        let kind_data = memory.node_data("/disconf/demo_1_0_rd/item").await.unwrap();
        assert_eq!(String::from_utf8(kind_data).unwrap(), watcher.local_ip.to_string());
    }

    #[tokio::test]
    async fn test_register_presence_keeps_existing_nodes() {
        let memory = MemoryCoordination::new();
        let watcher = connected(&memory).await;
        watcher.register_presence(EntryKind::Item, "a").await.unwrap();

        memory.set_data("/disconf/demo_1_0_rd/item", b"10.0.0.9").await.unwrap();
        watcher.register_presence(EntryKind::Item, "b").await.unwrap();

        assert_eq!(
            memory.node_data("/disconf/demo_1_0_rd/item").await,
            Some(b"10.0.0.9".to_vec())
        );
        assert!(memory.contains("/disconf/demo_1_0_rd/item/b").await);

        memory.expire_sessions().await;
        let err = watcher.register_presence(EntryKind::Item, "c").await.unwrap_err();
        assert!(err.is_session_lost());
    }

    #[tokio::test]
    async fn test_marker_create_overwrites_existing() {
        let memory = MemoryCoordination::new();
        let watcher = connected(&memory).await;
        watcher.register_presence(EntryKind::Item, "a").await.unwrap();

        let marker = watcher.marker_path("a", EntryKind::Item).unwrap();
        assert!(marker.starts_with("/disconf/demo_1_0_rd/item/a/"));
        assert!(marker.contains("_8080_"));

        watcher.create_ephemeral_marker(&marker, "1").await.unwrap();
        watcher.create_ephemeral_marker(&marker, "2").await.unwrap();
        assert_eq!(memory.node_data(&marker).await, Some(b"2".to_vec()));

        watcher.update_marker(&marker, "3").await.unwrap();
        assert_eq!(memory.node_data(&marker).await, Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn test_watch_once_reports_data_change() {
        let memory = MemoryCoordination::new();
        let watcher = Arc::new(connected(&memory).await);
        let path = watcher.register_presence(EntryKind::Item, "a").await.unwrap();

        let task = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_once("a".to_string(), EntryKind::Item).await })
        };
        while memory.watch_count(&path).await == 0 {
            tokio::task::yield_now().await;
        }

        memory.set_data(&path, b"changed").await.unwrap();
        let event = task.await.unwrap();
        assert_eq!(event.key, "a");
        assert!(event.error.is_none());
    }

    #[tokio::test]
    async fn test_arm_watch_registers_before_returning() {
        let memory = MemoryCoordination::new();
        let watcher = connected(&memory).await;
        let path = watcher.register_presence(EntryKind::Item, "a").await.unwrap();

        let armed = watcher.arm_watch("a", EntryKind::Item).await.unwrap();
        assert_eq!(memory.watch_count(&path).await, 1);

        memory.set_data(&path, b"changed").await.unwrap();
        assert!(watcher.wait_fired(armed).await.is_ok());
        assert_eq!(memory.watch_count(&path).await, 0);
    }

    #[tokio::test]
    async fn test_watch_once_on_deleted_node_carries_error() {
        let memory = MemoryCoordination::new();
        let watcher = Arc::new(connected(&memory).await);
        let path = watcher.register_presence(EntryKind::File, "x.properties").await.unwrap();

        let task = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move {
                watcher
                    .watch_once("x.properties".to_string(), EntryKind::File)
                    .await
            })
        };
        while memory.watch_count(&path).await == 0 {
            tokio::task::yield_now().await;
        }

        memory.delete(&path).await.unwrap();
        let event = task.await.unwrap();
        assert!(matches!(
            event.error,
            Some(CoordinationError::UnexpectedEvent { .. })
        ));
    }

    #[tokio::test]
    async fn test_session_loss_and_reconnect() {
        let memory = MemoryCoordination::new();
        let watcher = Arc::new(connected(&memory).await);
        let path = watcher.register_presence(EntryKind::Item, "a").await.unwrap();

        let task = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_once("a".to_string(), EntryKind::Item).await })
        };
        while memory.watch_count(&path).await == 0 {
            tokio::task::yield_now().await;
        }

        memory.expire_sessions().await;
        let event = task.await.unwrap();
        assert!(event.is_session_lost());
        assert_eq!(watcher.state(), SessionState::SessionLost);

        watcher.reconnect().await.unwrap();
        assert_eq!(watcher.state(), SessionState::Connected);
        assert!(watcher.register_presence(EntryKind::Item, "a").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_kind_watch_fails_immediately() {
        let memory = MemoryCoordination::new();
        let watcher = connected(&memory).await;
        let event = watcher
            .watch_once("a".to_string(), EntryKind::Unknown(9))
            .await;
        assert!(matches!(event.error, Some(CoordinationError::UnknownKind(9))));
    }
}
