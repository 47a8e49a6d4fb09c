//! 配置同步客户端
//!
//! 负责启动流程：获取协调服务地址、拉取配置列表、并发下载文件、
//! 初始绑定，最后在后台启动实时同步

use super::entries::{bind_map, marker_value, read_properties};
use super::handle::ConfigHandle;
use super::live::{LiveSync, WatchState, WatchStates};
use crate::binder::{BindMode, Binder, Configurable};
use crate::coordination::{Namespace, SessionConnector, Watcher, ZkConnector};
use crate::error::{
    ConfSyncError, EntryError, FetchError, FetchErrors, FileDownloadError, Result, SettingsError,
};
use crate::fetch::{Entry, EntryKind, Fetcher, HttpFetcher, PROPERTIES_SUFFIX};
use crate::settings::{validate_settings, ClientSettings};
use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 配置同步客户端
pub struct SyncClient<T: Configurable> {
    settings: ClientSettings,
    fetcher: Arc<dyn Fetcher>,
    binder: Arc<Binder<T>>,
    initial: T,
}

impl<T: Configurable> SyncClient<T> {
    /// 创建使用 HTTP 拉取器的客户端
    ///
    /// # 参数
    /// * `settings` - 客户端配置
    /// * `initial` - 绑定前的应用配置
    pub fn new(settings: ClientSettings, initial: T) -> Result<Self> {
        validate_settings(&settings).map_err(SettingsError::ValidationError)?;

        let fetcher = HttpFetcher::new(
            settings.host_set(),
            settings.retry_policy(),
            settings.download_dir.clone(),
            settings.request_timeout(),
        )?;

        Self::with_fetcher(settings, initial, Arc::new(fetcher))
    }

    /// 使用自定义拉取器创建客户端
    pub fn with_fetcher(
        settings: ClientSettings,
        initial: T,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        validate_settings(&settings).map_err(SettingsError::ValidationError)?;

        let binder = Binder::for_config();
        for unsupported in binder.unsupported_fields() {
            warn!("字段类型无法绑定: {}", unsupported);
        }

        Ok(Self {
            settings,
            fetcher,
            binder: Arc::new(binder),
            initial,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// 启动同步，协调服务使用 ZooKeeper
    pub async fn start(self) -> Result<SyncHandle<T>> {
        let timeout = self.settings.connect_timeout();
        self.start_with_connector(move |hosts| {
            Arc::new(ZkConnector::new(hosts, timeout)) as Arc<dyn SessionConnector>
        })
        .await
    }

    /// 启动同步，协调服务会话由 `make_connector` 根据服务端返回的地址创建
    ///
    /// 返回前完成全部初始绑定，任何启动错误都会使本方法失败。
    pub async fn start_with_connector<F>(self, make_connector: F) -> Result<SyncHandle<T>>
    where
        F: FnOnce(&str) -> Arc<dyn SessionConnector>,
    {
        let hosts = self.fetcher.resolve_coordination_hosts().await?;
        info!("协调服务地址: {}", hosts);

        if !self.settings.enable_remote {
            let mut config = self.initial.clone();
            self.load_local_directory(&mut config).await?;
            info!("实时同步未启用，已从本地目录加载配置");
            return Ok(SyncHandle::local(ConfigHandle::new(config)));
        }

        let namespace = Namespace::new(
            self.settings.coordination_root.as_str(),
            self.settings.app.as_str(),
            self.settings.version.as_str(),
            self.settings.env.as_str(),
        );
        let watcher =
            Watcher::connect(make_connector(&hosts), namespace, self.settings.debug).await?;

        let query = self.settings.query();
        let entries = self.fetcher.fetch_catalog(&query).await?;
        info!("获取到 {} 个配置项", entries.len());

        self.download_files(&entries).await?;

        let mut config = self.initial.clone();
        let markers = self.bind_initial(&entries, &mut config).await?;

        let targets: Vec<(Entry, String)> = entries
            .into_iter()
            .filter(|entry| entry.is_watchable() && !self.settings.is_ignored(&entry.name))
            .filter_map(|entry| {
                let value = markers.get(&entry.name)?.clone();
                Some((entry, value))
            })
            .collect();

        let handle = ConfigHandle::new(config);
        let shutdown = CancellationToken::new();
        let watch_states = WatchStates::default();
        let live = LiveSync {
            fetcher: Arc::clone(&self.fetcher),
            binder: Arc::clone(&self.binder),
            watcher: Arc::new(watcher),
            config: handle.clone(),
            query,
            download_dir: self.settings.download_dir.clone(),
            backoff_base: self.settings.retry_policy().sleep,
            backoff_max: self.settings.rearm_backoff_max(),
            states: Arc::clone(&watch_states),
        };
        let live_task = tokio::spawn(live.run(targets, shutdown.clone()));

        Ok(SyncHandle {
            config: handle,
            shutdown,
            live_task: Some(live_task),
            watch_states,
        })
    }

    /// 并发下载全部文件类型配置项，所有下载结束后汇总失败
    ///
    /// # 返回
    /// * `Result<Vec<PathBuf>>` - 成功写入的文件路径
    pub async fn download_files(&self, entries: &[Entry]) -> Result<Vec<PathBuf>> {
        let query = self.settings.query();
        let (keys, tasks): (Vec<String>, Vec<JoinHandle<_>>) = entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::File)
            .map(|entry| {
                let fetcher = Arc::clone(&self.fetcher);
                let query = query.clone();
                let key = entry.name.clone();
                let task =
                    tokio::spawn(async move { fetcher.download_file(&query, &key).await });
                (entry.name.clone(), task)
            })
            .unzip();

        collect_downloads(keys.into_iter().zip(join_all(tasks).await))
    }

    /// 按名称顺序加载下载目录中未被忽略的属性文件
    pub async fn load_local_directory(&self, target: &mut T) -> Result<()> {
        let dir = &self.settings.download_dir;
        let mut reader = tokio::fs::read_dir(dir).await?;

        let mut names = Vec::new();
        while let Some(item) = reader.next_entry().await? {
            if !item.file_type().await?.is_file() {
                continue;
            }
            let name = item.file_name().to_string_lossy().into_owned();
            if name.ends_with(PROPERTIES_SUFFIX) && !self.settings.is_ignored(&name) {
                names.push(name);
            }
        }
        names.sort();

        let mut errors = Vec::new();
        for name in &names {
            match read_properties(dir, name).await {
                Ok(map) => errors.extend(
                    bind_map(&self.binder, target, &map, BindMode::Initial)
                        .into_iter()
                        .map(EntryError::from),
                ),
                Err(e) => errors.push(e),
            }
        }

        debug!("本地目录 {} 加载了 {} 个文件", dir.display(), names.len());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfSyncError::Entries(errors))
        }
    }

    /// 初始绑定全部未被忽略的配置项，返回可监听配置项的标记值
    async fn bind_initial(
        &self,
        entries: &[Entry],
        target: &mut T,
    ) -> Result<HashMap<String, String>> {
        let mut markers = HashMap::new();
        let mut errors = Vec::new();

        for entry in entries {
            if self.settings.is_ignored(&entry.name) {
                debug!("忽略配置项: {}", entry.name);
                continue;
            }

            match entry.kind {
                EntryKind::Item => {
                    errors.extend(
                        self.binder
                            .bind(target, &entry.value, &entry.name, BindMode::Initial)
                            .into_iter()
                            .map(EntryError::from),
                    );
                    markers.insert(entry.name.clone(), entry.value.clone());
                }
                EntryKind::File => {
                    let map = match read_properties(&self.settings.download_dir, &entry.name).await
                    {
                        Ok(map) => map,
                        Err(e) => {
                            errors.push(e);
                            continue;
                        }
                    };
                    errors.extend(
                        bind_map(&self.binder, target, &map, BindMode::Initial)
                            .into_iter()
                            .map(EntryError::from),
                    );
                    if entry.is_properties_file() {
                        markers.insert(entry.name.clone(), marker_value(&map)?);
                    }
                }
                EntryKind::Unknown(code) => errors.push(EntryError::UnknownKind {
                    name: entry.name.clone(),
                    code,
                }),
            }
        }

        if errors.is_empty() {
            Ok(markers)
        } else {
            Err(ConfSyncError::Entries(errors))
        }
    }
}

/// 汇总下载任务结果；任务崩溃时继续传播，被中止的任务记为下载失败
fn collect_downloads(
    results: impl IntoIterator<
        Item = (
            String,
            std::result::Result<std::result::Result<PathBuf, FetchErrors>, JoinError>,
        ),
    >,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    let mut failures = Vec::new();

    for (key, joined) in results {
        match joined {
            Ok(Ok(path)) => {
                debug!("文件下载完成 [key:{}] -> {}", key, path.display());
                written.push(path);
            }
            Ok(Err(errors)) => {
                error!("文件下载失败 [key:{}]: {}", key, errors);
                failures.push(FileDownloadError { key, errors });
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                error!("文件下载任务被中止 [key:{}]: {}", key, e);
                let errors = FetchErrors::new(vec![FetchError::Aborted { key: key.clone() }]);
                failures.push(FileDownloadError { key, errors });
            }
        }
    }

    if failures.is_empty() {
        Ok(written)
    } else {
        Err(ConfSyncError::Download(failures))
    }
}

/// 启动完成后的同步句柄
pub struct SyncHandle<T> {
    config: ConfigHandle<T>,
    shutdown: CancellationToken,
    live_task: Option<JoinHandle<()>>,
    watch_states: WatchStates,
}

impl<T> SyncHandle<T> {
    fn local(config: ConfigHandle<T>) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            live_task: None,
            watch_states: WatchStates::default(),
        }
    }

    /// 应用配置句柄
    pub fn config(&self) -> &ConfigHandle<T> {
        &self.config
    }

    /// 实时同步是否仍在运行
    pub fn is_live(&self) -> bool {
        self.live_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// 配置项当前的监听状态，未被监听的配置项返回 `None`
    pub async fn watch_state(&self, key: &str) -> Option<WatchState> {
        self.watch_states.read().await.get(key).copied()
    }

    /// 停止实时同步并等待循环退出
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.live_task.take() {
            if let Err(e) = task.await {
                error!("实时同步任务异常退出: {}", e);
            }
        }
    }
}
