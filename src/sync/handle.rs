//! 共享配置句柄
//!
//! 应用通过句柄读取配置快照并订阅实时同步结果，写入只发生在同步循环内

use crate::fetch::EntryKind;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock, RwLockReadGuard};
use tracing::{debug, info};

/// 通知通道容量
const NOTIFICATION_CAPACITY: usize = 32;

/// 一次实时同步结束后的通知
#[derive(Debug, Clone)]
pub struct ReloadNotification {
    /// 配置项名称
    pub key: String,
    /// 配置项类型
    pub kind: EntryKind,
    /// 本次同步后的配置版本号
    pub version: u64,
    /// 同步完成时间
    pub timestamp: DateTime<Utc>,
    /// 拉取、绑定与标记更新是否全部成功
    pub success: bool,
}

/// 配置与其版本号、写入时间，同一把锁保护
#[derive(Debug)]
struct Versioned<T> {
    config: T,
    /// 配置版本号，每次写入加一
    version: u64,
    /// 最后写入时间
    last_update: DateTime<Utc>,
}

/// 线程安全的应用配置句柄
pub struct ConfigHandle<T> {
    /// 当前配置
    state: Arc<RwLock<Versioned<T>>>,
    /// 同步结果通知发送器
    update_sender: broadcast::Sender<ReloadNotification>,
}

impl<T> Clone for ConfigHandle<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            update_sender: self.update_sender.clone(),
        }
    }
}

impl<T: Clone> ConfigHandle<T> {
    /// 以启动绑定完成后的配置创建句柄，版本号从 1 开始
    pub fn new(initial: T) -> Self {
        let (update_sender, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Self {
            state: Arc::new(RwLock::new(Versioned {
                config: initial,
                version: 1,
                last_update: Utc::now(),
            })),
            update_sender,
        }
    }

    /// 获取当前配置的副本
    pub async fn snapshot(&self) -> T {
        self.state.read().await.config.clone()
    }

    /// 获取当前配置的副本及其对应的版本号
    pub async fn versioned_snapshot(&self) -> (T, u64) {
        let state = self.state.read().await;
        (state.config.clone(), state.version)
    }

    /// 持有读锁访问当前配置，持有期间同步循环无法写入
    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        RwLockReadGuard::map(self.state.read().await, |state| &state.config)
    }

    /// 当前版本号
    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }

    /// 最后一次写入配置的时间
    pub async fn last_reload(&self) -> DateTime<Utc> {
        self.state.read().await.last_update
    }

    /// 订阅实时同步通知
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadNotification> {
        self.update_sender.subscribe()
    }

    /// 在写锁内修改配置，并推进版本号
    pub(crate) async fn apply<R>(&self, update: impl FnOnce(&mut T) -> R) -> R {
        let mut state = self.state.write().await;
        let result = update(&mut state.config);
        state.version += 1;
        state.last_update = Utc::now();
        result
    }

    /// 发送一次同步结果通知
    pub(crate) async fn notify(&self, key: &str, kind: EntryKind, success: bool) {
        let notification = ReloadNotification {
            key: key.to_string(),
            kind,
            version: self.version().await,
            timestamp: Utc::now(),
            success,
        };

        info!(
            "配置同步完成 [key:{}] 版本: {} 成功: {}",
            key, notification.version, success
        );

        if self.update_sender.send(notification).is_err() {
            debug!("没有订阅者接收配置同步通知");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Settings {
        port: i32,
    }

    #[tokio::test]
    async fn test_snapshot_reflects_applied_writes() {
        let handle = ConfigHandle::new(Settings { port: 80 });
        assert_eq!(handle.version().await, 1);

        let before = handle.last_reload().await;
        handle.apply(|s| s.port = 8080).await;

        assert_eq!(handle.snapshot().await, Settings { port: 8080 });
        assert_eq!(handle.read().await.port, 8080);
        assert_eq!(handle.version().await, 2);
        assert!(handle.last_reload().await >= before);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let handle = ConfigHandle::new(Settings::default());
        let other = handle.clone();
        other.apply(|s| s.port = 1).await;
        assert_eq!(handle.snapshot().await.port, 1);
    }

    #[tokio::test]
    async fn test_subscribers_receive_notifications() {
        let handle = ConfigHandle::new(Settings::default());
        let mut receiver = handle.subscribe();

        handle.apply(|s| s.port = 2).await;
        handle.notify("port", EntryKind::Item, true).await;

        let notification = receiver.recv().await.unwrap();
        assert_eq!(notification.key, "port");
        assert_eq!(notification.kind, EntryKind::Item);
        assert_eq!(notification.version, 2);
        assert!(notification.success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readers_never_see_config_ahead_of_version() {
        // port 始终等于写入它的那次版本号
        let handle = ConfigHandle::new(Settings { port: 1 });
        let writer = handle.clone();

        let task = tokio::spawn(async move {
            for _ in 0..200 {
                writer.apply(|s| s.port += 1).await;
                tokio::task::yield_now().await;
            }
        });

        while !task.is_finished() {
            let (config, version) = handle.versioned_snapshot().await;
            assert_eq!(config.port as u64, version);
        }
        task.await.unwrap();

        assert_eq!(handle.versioned_snapshot().await, (Settings { port: 201 }, 201));
    }

    #[tokio::test]
    async fn test_notify_without_subscribers_is_harmless() {
        let handle = ConfigHandle::new(Settings::default());
        handle.notify("port", EntryKind::Item, false).await;
        assert_eq!(handle.version().await, 1);
    }
}
