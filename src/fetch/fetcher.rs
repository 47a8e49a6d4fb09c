//! HTTP配置拉取器实现
//!
//! 按主机顺序依次尝试，单个主机上对瞬时错误做固定间隔重试，
//! 第一个有效响应即返回，全部失败时返回完整的错误聚合

use crate::error::{FetchError, FetchErrors, Result};
use crate::fetch::types::{
    message_text, CatalogResponse, Entry, HostSet, Query, RetryPolicy, ValueResponse, STATUS_OK,
};
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 配置列表接口
pub const LIST_PATH: &str = "/api/config/list";
/// 单值配置接口
pub const ITEM_PATH: &str = "/api/config/item";
/// 文件下载接口
pub const FILE_PATH: &str = "/api/config/file";
/// 协调服务地址接口
pub const ZOO_HOSTS_PATH: &str = "/api/zoo/hosts";

/// 配置拉取器trait，定义远程配置服务的访问接口
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// 拉取全部配置项
    ///
    /// # 参数
    /// * `query` - 应用、环境、版本
    ///
    /// # 返回
    /// * `Result<Vec<Entry>, FetchErrors>` - 配置项列表或全部尝试的错误
    async fn fetch_catalog(&self, query: &Query) -> std::result::Result<Vec<Entry>, FetchErrors>;

    /// 拉取单值配置项
    async fn fetch_item_value(
        &self,
        query: &Query,
        key: &str,
    ) -> std::result::Result<String, FetchErrors>;

    /// 下载配置文件到本地下载目录，返回写入的路径
    async fn download_file(
        &self,
        query: &Query,
        key: &str,
    ) -> std::result::Result<PathBuf, FetchErrors>;

    /// 获取协调服务地址列表
    async fn resolve_coordination_hosts(&self) -> std::result::Result<String, FetchErrors>;
}

/// 基于 reqwest 的配置拉取器
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    /// HTTP客户端
    client: Client,
    /// 候选主机
    hosts: HostSet,
    /// 重试策略
    policy: RetryPolicy,
    /// 文件下载目录
    download_dir: PathBuf,
}

impl HttpFetcher {
    /// 创建新的HTTP配置拉取器
    ///
    /// # 参数
    /// * `hosts` - 候选主机列表
    /// * `policy` - 单主机重试策略
    /// * `download_dir` - 文件下载目录
    /// * `timeout` - 单次请求超时时间
    ///
    /// # 返回
    /// * `Result<Self>` - 拉取器实例
    pub fn new(
        hosts: HostSet,
        policy: RetryPolicy,
        download_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()?;

        Ok(Self {
            client,
            hosts,
            policy,
            download_dir: download_dir.into(),
        })
    }

    /// 下载目标路径，文件名必须是单一的普通路径组成部分
    fn download_target(&self, key: &str) -> std::result::Result<PathBuf, FetchError> {
        let mut components = Path::new(key).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Ok(self.download_dir.join(name)),
            _ => Err(FetchError::InvalidKey {
                key: key.to_string(),
            }),
        }
    }

    /// 执行单次GET请求，返回响应体
    async fn get_once(
        &self,
        url: &str,
        params: &[(&'static str, &str)],
    ) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        Ok(body.to_vec())
    }

    /// 对单个主机按重试策略请求，失败的每次尝试都记入 `errors`
    async fn get_with_retry(
        &self,
        url: &str,
        params: &[(&'static str, &str)],
        errors: &mut Vec<FetchError>,
    ) -> Option<Vec<u8>> {
        for attempt in 0..self.policy.attempts() {
            debug!("请求配置服务 [url:{}] [attempt:{}]", url, attempt + 1);

            match self.get_once(url, params).await {
                Ok(body) => return Some(body),
                Err(e) => {
                    let transient = e.is_transient();
                    warn!("请求配置服务失败 [url:{}] [err:{}]", url, e);
                    errors.push(e);

                    if !transient || attempt == self.policy.times {
                        break;
                    }
                }
            }

            tokio::time::sleep(self.policy.sleep).await;
        }

        None
    }

    /// 依次尝试所有主机，直到 `accept` 认可某个响应
    async fn with_failover<T, F>(
        &self,
        path: &str,
        params: &[(&'static str, &str)],
        accept: F,
    ) -> std::result::Result<T, FetchErrors>
    where
        F: Fn(&str, &[u8]) -> std::result::Result<T, FetchError> + Sync,
    {
        let mut errors = Vec::new();

        for url in self.hosts.urls(path) {
            let Some(body) = self.get_with_retry(&url, params, &mut errors).await else {
                continue;
            };

            match accept(&url, &body) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("配置服务响应无效 [url:{}] [err:{}]", url, e);
                    errors.push(e);
                }
            }
        }

        Err(FetchErrors::new(errors))
    }

    /// 解析 `{status, message, value}` 形式的响应
    fn accept_value(url: &str, body: &[u8]) -> std::result::Result<String, FetchError> {
        let response: ValueResponse =
            serde_json::from_slice(body).map_err(|source| FetchError::Decode {
                url: url.to_string(),
                source,
            })?;

        if response.status != STATUS_OK {
            return Err(FetchError::Rejected {
                url: url.to_string(),
                message: message_text(&response.message),
            });
        }

        Ok(response.value)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_catalog(&self, query: &Query) -> std::result::Result<Vec<Entry>, FetchErrors> {
        let params = query.params(None);
        let entries = self
            .with_failover(LIST_PATH, &params, |url, body| {
                let response: CatalogResponse =
                    serde_json::from_slice(body).map_err(|source| FetchError::Decode {
                        url: url.to_string(),
                        source,
                    })?;

                if !response.is_success() {
                    return Err(FetchError::Rejected {
                        url: url.to_string(),
                        message: message_text(&response.message),
                    });
                }

                Ok(response.page.results)
            })
            .await?;

        info!("拉取配置列表成功 [app:{}] [count:{}]", query.app, entries.len());
        Ok(entries)
    }

    async fn fetch_item_value(
        &self,
        query: &Query,
        key: &str,
    ) -> std::result::Result<String, FetchErrors> {
        let params = query.params(Some(key));
        self.with_failover(ITEM_PATH, &params, Self::accept_value)
            .await
    }

    async fn download_file(
        &self,
        query: &Query,
        key: &str,
    ) -> std::result::Result<PathBuf, FetchErrors> {
        let io_error = |path: &Path, source| {
            FetchErrors::new(vec![FetchError::Io {
                path: path.to_path_buf(),
                source,
            }])
        };

        let target = self
            .download_target(key)
            .map_err(|e| FetchErrors::new(vec![e]))?;

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| io_error(&self.download_dir, e))?;

        let params = query.params(Some(key));
        let body = self
            .with_failover(FILE_PATH, &params, |_, body| Ok(body.to_vec()))
            .await?;

        tokio::fs::write(&target, &body)
            .await
            .map_err(|e| io_error(&target, e))?;

        debug!("下载配置文件完成 [file:{}] [bytes:{}]", target.display(), body.len());
        Ok(target)
    }

    async fn resolve_coordination_hosts(&self) -> std::result::Result<String, FetchErrors> {
        let hosts = self
            .with_failover(ZOO_HOSTS_PATH, &[], Self::accept_value)
            .await?;

        info!("获取协调服务地址成功: {}", hosts);
        Ok(hosts)
    }
}
