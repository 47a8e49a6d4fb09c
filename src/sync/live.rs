//! 实时同步循环
//!
//! 每个被监听的配置项对应一个一次性监听任务，触发结果汇入同一个通道，
//! 由唯一的消费者逐个执行 拉取 → 绑定 → 更新标记 → 重新监听

use super::entries::{bind_map, marker_value, read_properties};
use super::handle::ConfigHandle;
use crate::binder::{BindMode, Binder};
use crate::coordination::{SessionState, WatchEvent, Watcher};
use crate::error::{ConfSyncError, CoordinationError, EntryError, FileDownloadError, Result};
use crate::fetch::{Entry, EntryKind, Fetcher, Query};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 监听事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// 单个配置项的监听状态
///
/// `Armed -> Fired -> Rearming -> Armed`，只有协调服务确认注册后才回到 `Armed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// 监听已注册，等待触发
    Armed,
    /// 监听已触发，正在刷新
    Fired,
    /// 等待退避结束并重新注册监听
    Rearming,
}

/// 全部配置项的监听状态，供同步句柄查询
pub type WatchStates = Arc<RwLock<HashMap<String, WatchState>>>;

/// 监听任务发回同步循环的消息
#[derive(Debug)]
enum LiveMessage {
    /// 监听已在协调服务上注册
    Armed(String),
    /// 监听已触发或注册失败
    Fired(WatchEvent),
}

#[derive(Debug)]
struct KeyWatch {
    kind: EntryKind,
    state: WatchState,
    /// 连续失败次数
    failures: u32,
    /// 最近一次写入标记节点的值
    last_value: String,
    marker_path: Option<String>,
}

impl KeyWatch {
    async fn transition(&mut self, key: &str, next: WatchState, states: &WatchStates) {
        debug!("监听状态 [key:{}] {:?} -> {:?}", key, self.state, next);
        self.state = next;
        states.write().await.insert(key.to_string(), next);
    }
}

/// 刷新失败后的重新监听延迟：以重试间隔为基数指数增长，不超过上限
pub fn rearm_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32 << (failures - 1).min(16);
    base.saturating_mul(factor).min(max)
}

pub(crate) struct LiveSync<T> {
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) binder: Arc<Binder<T>>,
    pub(crate) watcher: Arc<Watcher>,
    pub(crate) config: ConfigHandle<T>,
    pub(crate) query: Query,
    pub(crate) download_dir: PathBuf,
    pub(crate) backoff_base: Duration,
    pub(crate) backoff_max: Duration,
    pub(crate) states: WatchStates,
}

impl<T: Clone + Send + Sync + 'static> LiveSync<T> {
    /// 为每个配置项登记节点并注册监听，然后处理事件直到被取消
    ///
    /// # 参数
    /// * `targets` - 需要监听的配置项及其当前标记值
    /// * `cancel` - 取消令牌
    pub(crate) async fn run(self, targets: Vec<(Entry, String)>, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut keys: HashMap<String, KeyWatch> = HashMap::with_capacity(targets.len());

        for (entry, value) in targets {
            let marker_path = self.register(&entry.name, entry.kind, &value).await;
            let watch = KeyWatch {
                kind: entry.kind,
                state: WatchState::Rearming,
                failures: 0,
                last_value: value,
                marker_path,
            };
            self.states
                .write()
                .await
                .insert(entry.name.clone(), WatchState::Rearming);
            self.arm(&tx, &cancel, entry.name.clone(), entry.kind, Duration::ZERO);
            keys.insert(entry.name, watch);
        }

        info!("实时同步已启动，监听 {} 个配置项", keys.len());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("实时同步已停止");
                    break;
                }
                Some(message) = rx.recv() => match message {
                    LiveMessage::Armed(key) => self.mark_armed(&key, &mut keys).await,
                    LiveMessage::Fired(event) => {
                        self.handle_event(event, &mut keys, &tx, &cancel).await
                    }
                },
            }
        }
    }

    async fn mark_armed(&self, key: &str, keys: &mut HashMap<String, KeyWatch>) {
        match keys.get_mut(key) {
            Some(watch) if watch.state == WatchState::Rearming => {
                watch.transition(key, WatchState::Armed, &self.states).await
            }
            Some(watch) => warn!("监听状态异常 [key:{}] 当前为 {:?}", key, watch.state),
            None => warn!("收到未登记配置项的监听注册: {}", key),
        }
    }

    /// 登记定义节点并创建本实例的标记节点，返回标记路径
    async fn register(&self, key: &str, kind: EntryKind, value: &str) -> Option<String> {
        if let Err(e) = self.watcher.register_presence(kind, key).await {
            error!("登记配置项节点失败 [key:{}]: {}", key, e);
        }

        let marker_path = match self.watcher.marker_path(key, kind) {
            Ok(path) => path,
            Err(e) => {
                error!("计算标记节点路径失败 [key:{}]: {}", key, e);
                return None;
            }
        };

        match self.watcher.create_ephemeral_marker(&marker_path, value).await {
            Ok(()) => Some(marker_path),
            Err(e) => {
                error!("创建标记节点失败 [path:{}]: {}", marker_path, e);
                None
            }
        }
    }

    /// 启动一个一次性监听任务，`delay` 之后注册
    ///
    /// 注册成功后先报告 [`LiveMessage::Armed`]，触发后报告 [`LiveMessage::Fired`]。
    fn arm(
        &self,
        tx: &mpsc::Sender<LiveMessage>,
        cancel: &CancellationToken,
        key: String,
        kind: EntryKind,
        delay: Duration,
    ) {
        let watcher = Arc::clone(&self.watcher);
        let tx = tx.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            if !delay.is_zero() {
                debug!("{:?} 后重新监听 [key:{}]", delay, key);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let armed = tokio::select! {
                _ = cancel.cancelled() => return,
                armed = watcher.arm_watch(&key, kind) => armed,
            };

            let result = match armed {
                Ok(armed) => {
                    if tx.send(LiveMessage::Armed(key.clone())).await.is_err() {
                        return;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        result = watcher.wait_fired(armed) => result,
                    }
                }
                Err(e) => Err(e),
            };

            let event = WatchEvent::new(key, kind, result);
            if tx.send(LiveMessage::Fired(event)).await.is_err() {
                debug!("实时同步已结束，丢弃监听事件");
            }
        });
    }

    async fn handle_event(
        &self,
        event: WatchEvent,
        keys: &mut HashMap<String, KeyWatch>,
        tx: &mpsc::Sender<LiveMessage>,
        cancel: &CancellationToken,
    ) {
        if !keys.contains_key(&event.key) {
            warn!("收到未登记配置项的监听事件: {}", event.key);
            return;
        }

        let recovered = if event.is_session_lost() {
            self.recover_session(keys).await
        } else {
            Ok(())
        };

        let Some(watch) = keys.get_mut(&event.key) else {
            return;
        };
        watch
            .transition(&event.key, WatchState::Fired, &self.states)
            .await;

        let outcome = match (recovered, event.error) {
            (Err(e), _) => Err(e.into()),
            (Ok(()), Some(e)) if !e.is_session_lost() => Err(e.into()),
            (Ok(()), _) => self.refresh(&event.key, watch).await,
        };

        let success = match outcome {
            Ok(()) => {
                watch.failures = 0;
                true
            }
            Err(e) => {
                watch.failures += 1;
                error!(
                    "配置项刷新失败 [key:{}] (连续第{}次): {}",
                    event.key, watch.failures, e
                );
                false
            }
        };

        watch
            .transition(&event.key, WatchState::Rearming, &self.states)
            .await;
        let delay = rearm_delay(self.backoff_base, self.backoff_max, watch.failures);
        self.arm(tx, cancel, event.key.clone(), watch.kind, delay);

        self.config.notify(&event.key, watch.kind, success).await;
    }

    /// 拉取最新值、绑定并更新标记节点
    async fn refresh(&self, key: &str, watch: &mut KeyWatch) -> Result<()> {
        let (value, bind_errors) = match watch.kind {
            EntryKind::Item => {
                let value = self.fetcher.fetch_item_value(&self.query, key).await?;
                let errors = self
                    .config
                    .apply(|config| self.binder.bind(config, &value, key, BindMode::Auto))
                    .await;
                (value, errors)
            }
            EntryKind::File => {
                self.fetcher
                    .download_file(&self.query, key)
                    .await
                    .map_err(|errors| {
                        ConfSyncError::Download(vec![FileDownloadError {
                            key: key.to_string(),
                            errors,
                        }])
                    })?;
                let map = read_properties(&self.download_dir, key)
                    .await
                    .map_err(|e| ConfSyncError::Entries(vec![e]))?;
                let errors = self
                    .config
                    .apply(|config| bind_map(&self.binder, config, &map, BindMode::Auto))
                    .await;
                (marker_value(&map)?, errors)
            }
            EntryKind::Unknown(code) => {
                return Err(ConfSyncError::Entries(vec![EntryError::UnknownKind {
                    name: key.to_string(),
                    code,
                }]))
            }
        };

        if !bind_errors.is_empty() {
            return Err(ConfSyncError::Entries(
                bind_errors.into_iter().map(EntryError::from).collect(),
            ));
        }

        match watch.marker_path.clone() {
            Some(path) => self.watcher.update_marker(&path, &value).await?,
            None => watch.marker_path = self.register(key, watch.kind, &value).await,
        }
        watch.last_value = value;

        debug!("配置项已刷新 [key:{}]", key);
        Ok(())
    }

    /// 会话丢失后重连，重新登记全部节点与标记
    ///
    /// 多个监听会同时报告同一次会话丢失，只有第一个触发重连。
    async fn recover_session(
        &self,
        keys: &mut HashMap<String, KeyWatch>,
    ) -> std::result::Result<(), CoordinationError> {
        if self.watcher.state() != SessionState::SessionLost {
            return Ok(());
        }

        warn!("协调服务会话丢失，开始恢复");
        self.watcher.reconnect().await?;

        for (key, watch) in keys.iter_mut() {
            watch.marker_path = self.register(key, watch.kind, &watch.last_value).await;
        }

        info!("协调服务会话恢复完成，已重新登记 {} 个配置项", keys.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rearm_delay_grows_and_caps() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(60);

        assert_eq!(rearm_delay(base, max, 0), Duration::ZERO);
        assert_eq!(rearm_delay(base, max, 1), Duration::from_secs(5));
        assert_eq!(rearm_delay(base, max, 2), Duration::from_secs(10));
        assert_eq!(rearm_delay(base, max, 3), Duration::from_secs(20));
        assert_eq!(rearm_delay(base, max, 5), Duration::from_secs(60));
        assert_eq!(rearm_delay(base, max, 200), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_base_means_immediate_rearm() {
        assert_eq!(
            rearm_delay(Duration::ZERO, Duration::from_secs(60), 4),
            Duration::ZERO
        );
    }
}
