//! 应用配置模块
//!
//! 配置文件为 JSON，按 `service` / `transfer` / `paths` / `log` 分节，
//! 缺失或无法解析的分节回退到默认值。

use crate::error::TransferError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认配置文件名
pub const CONFIG_FILE: &str = "bulkcopier.json";
/// 令牌密钥环境变量，优先于配置文件
pub const TOKEN_SECRET_ENV: &str = "BULKCOPIER_TOKEN_SECRET";

pub const BATCH_SIZE_RANGE: (usize, usize) = (1, 1000);
pub const RETRY_LIMIT_RANGE: (u32, u32) = (1, 10);
pub const MAX_DELAY_SECS: u64 = 120;

/// 服务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    #[default]
    Rest,
    Local,
}

/// 内容服务连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(rename = "type", default)]
    pub typ: ServiceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_secret: Option<String>,
    /// 站点 contentUrl，空字符串为默认站点
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// 本地服务的根目录
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

fn default_api_version() -> String {
    "3.19".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            typ: ServiceType::default(),
            url: None,
            token_name: None,
            token_secret: None,
            site_id: None,
            api_version: default_api_version(),
            root: None,
        }
    }
}

/// 批量传输配置，构造后不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// 批次间隔（秒）
    #[serde(default = "default_delay_secs")]
    pub inter_batch_delay_secs: u64,
}

fn default_batch_size() -> usize {
    50
}

fn default_retry_limit() -> u32 {
    3
}

fn default_delay_secs() -> u64 {
    5
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retry_limit: default_retry_limit(),
            inter_batch_delay_secs: default_delay_secs(),
        }
    }
}

impl TransferConfig {
    pub fn new(
        batch_size: usize,
        retry_limit: u32,
        inter_batch_delay_secs: u64,
    ) -> Result<Self, TransferError> {
        let config = Self {
            batch_size,
            retry_limit,
            inter_batch_delay_secs,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        let (min_batch, max_batch) = BATCH_SIZE_RANGE;
        if !(min_batch..=max_batch).contains(&self.batch_size) {
            return Err(TransferError::Config(format!(
                "batch size must be within {}-{}, got {}",
                min_batch, max_batch, self.batch_size
            )));
        }
        let (min_retry, max_retry) = RETRY_LIMIT_RANGE;
        if !(min_retry..=max_retry).contains(&self.retry_limit) {
            return Err(TransferError::Config(format!(
                "retry limit must be within {}-{}, got {}",
                min_retry, max_retry, self.retry_limit
            )));
        }
        if self.inter_batch_delay_secs > MAX_DELAY_SECS {
            return Err(TransferError::Config(format!(
                "inter-batch delay must be within 0-{}s, got {}s",
                MAX_DELAY_SECS, self.inter_batch_delay_secs
            )));
        }
        Ok(())
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_secs(self.inter_batch_delay_secs)
    }
}

/// 日志文件与临时目录位置（相对工作目录）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathsConfig {
    #[serde(default = "default_success_log")]
    pub success_log: PathBuf,
    #[serde(default = "default_error_log")]
    pub error_log: PathBuf,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

fn default_success_log() -> PathBuf {
    PathBuf::from("success_log.csv")
}

fn default_error_log() -> PathBuf {
    PathBuf::from("error_log.csv")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp_workbooks")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            success_log: default_success_log(),
            error_log: default_error_log(),
            temp_dir: default_temp_dir(),
        }
    }
}

/// 完整应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub transfer: TransferConfig,
    pub paths: PathsConfig,
}

/// 读取单个分节，失败时回退默认值
fn section<T: DeserializeOwned + Default>(config: &serde_json::Value, key: &str) -> T {
    match config.get(key) {
        Some(value) => serde_json::from_value::<T>(value.clone()).unwrap_or_else(|e| {
            tracing::warn!("配置分节 {} 无效，使用默认值: {}", key, e);
            T::default()
        }),
        None => T::default(),
    }
}

/// 读取配置文件为 JSON 值，文件不存在或损坏时返回空对象
pub(crate) fn read_config_value(config_file: &Path) -> serde_json::Value {
    fs::read_to_string(config_file)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .unwrap_or_else(|| serde_json::json!({}))
}

impl AppConfig {
    /// 从配置文件加载
    pub fn load(config_file: &Path) -> Self {
        let config = read_config_value(config_file);
        let mut app = Self {
            service: section(&config, "service"),
            transfer: section(&config, "transfer"),
            paths: section(&config, "paths"),
        };
        if let Ok(secret) = std::env::var(TOKEN_SECRET_ENV) {
            if !secret.is_empty() {
                app.service.token_secret = Some(secret);
            }
        }
        app
    }

    /// 保存配置，保留文件中的其他分节
    pub fn save(&self, config_file: &Path) -> io::Result<()> {
        let mut config = read_config_value(config_file);

        config["service"] = serde_json::to_value(&self.service).map_err(io::Error::other)?;
        config["transfer"] = serde_json::to_value(self.transfer).map_err(io::Error::other)?;
        config["paths"] = serde_json::to_value(&self.paths).map_err(io::Error::other)?;

        let content = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
        fs::write(config_file, content)
    }
}
