//! 客户端配置加载器实现
//!
//! 提供TOML配置文件解析、环境变量替换和错误处理功能

use crate::error::{Result, SettingsError};
use crate::settings::types::{validate_settings, ClientSettings};
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use tracing::{debug, info};

/// 配置加载器trait，定义配置加载接口
#[async_trait]
pub trait SettingsLoader: Send + Sync {
    /// 从文件加载配置
    ///
    /// # 参数
    /// * `path` - 配置文件路径
    ///
    /// # 返回
    /// * `Result<ClientSettings>` - 加载的配置或错误
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<ClientSettings>;

    /// 从字符串加载配置
    async fn load_from_string(&self, content: &str) -> Result<ClientSettings>;

    /// 验证配置
    fn validate(&self, settings: &ClientSettings) -> Result<()>;
}

/// TOML配置加载器实现
#[derive(Debug, Clone)]
pub struct TomlSettingsLoader {
    /// 是否启用环境变量替换
    enable_env_substitution: bool,
}

impl TomlSettingsLoader {
    /// 创建新的TOML配置加载器
    ///
    /// # 参数
    /// * `enable_env_substitution` - 是否启用 `${VAR}` 环境变量替换
    pub fn new(enable_env_substitution: bool) -> Self {
        Self {
            enable_env_substitution,
        }
    }

    /// 替换字符串中的环境变量
    fn substitute_env_vars(&self, content: &str) -> Result<String> {
        if !self.enable_env_substitution {
            return Ok(content.to_string());
        }

        // 匹配 ${VAR_NAME} 格式的环境变量
        let env_var_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| SettingsError::ParseError(format!("正则表达式错误: {}", e)))?;

        let mut result = content.to_string();

        for captures in env_var_regex.captures_iter(content) {
            let full_match = &captures[0];
            let var_name = &captures[1];

            let value = std::env::var(var_name).map_err(|_| SettingsError::EnvVarError {
                var: var_name.to_string(),
            })?;
            result = result.replace(full_match, &value);
        }

        Ok(result)
    }

    fn parse_toml(&self, content: &str) -> Result<ClientSettings> {
        let processed_content = self.substitute_env_vars(content)?;

        let settings: ClientSettings = toml::from_str(&processed_content)
            .map_err(|e| SettingsError::ParseError(format!("TOML解析失败: {}", e)))?;

        Ok(settings)
    }
}

impl Default for TomlSettingsLoader {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl SettingsLoader for TomlSettingsLoader {
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<ClientSettings> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(SettingsError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            }
            .into());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SettingsError::ParseError(format!("读取文件失败: {}", e)))?;

        let settings = self.parse_toml(&content)?;
        self.validate(&settings)?;

        info!("成功加载客户端配置: {}", path.display());
        debug!("客户端配置内容: {:?}", settings);

        Ok(settings)
    }

    async fn load_from_string(&self, content: &str) -> Result<ClientSettings> {
        let settings = self.parse_toml(content)?;
        self.validate(&settings)?;

        debug!("成功解析客户端配置字符串");

        Ok(settings)
    }

    fn validate(&self, settings: &ClientSettings) -> Result<()> {
        validate_settings(settings).map_err(|e| SettingsError::ValidationError(e).into())
    }
}
