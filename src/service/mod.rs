pub mod local;
#[cfg(test)]
pub mod memory;
pub mod rest;

use crate::config::{ServiceConfig, ServiceType};
use crate::error::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use local::LocalContentService;
pub use rest::RestContentService;

// ============ 公共常量 ============

/// 非下载类请求超时（秒）
pub const OP_TIMEOUT_SECS: u64 = 60;
/// 下载/发布超时（秒）
pub const IO_TIMEOUT_SECS: u64 = 600;

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// 项目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

/// 项目内的文件夹
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    /// 为 None 时直接位于项目根下
    pub parent_id: Option<String>,
    pub project_id: String,
    /// 祖先名称以 `/` 连接的完整路径
    pub path: String,
}

/// 资产（工作簿）快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub folder_id: Option<String>,
    pub size: Option<u64>,
}

/// 发布冲突策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishMode {
    /// 同一位置已存在同名资产时失败
    CreateNew,
}

/// 内容服务抽象接口
#[async_trait]
pub trait ContentService: Send + Sync {
    /// 列出所有顶层项目
    async fn list_projects(&self) -> ServiceResult<Vec<Project>>;

    /// 列出项目内（含子文件夹）的所有资产，None 表示全部项目
    async fn list_assets(&self, project_id: Option<&str>) -> ServiceResult<Vec<Asset>>;

    /// 重新获取单个资产
    async fn get_asset(&self, asset_id: &str) -> ServiceResult<Asset>;

    /// 列出项目内的所有文件夹
    async fn list_folders(&self, project_id: Option<&str>) -> ServiceResult<Vec<Folder>>;

    async fn get_folder(&self, folder_id: &str) -> ServiceResult<Folder>;

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
        project_id: &str,
    ) -> ServiceResult<Folder>;

    /// 下载资产内容到 `dest_dir` 下，返回写入的文件路径
    async fn download(
        &self,
        asset_id: &str,
        dest_dir: &Path,
        include_full_payload: bool,
    ) -> ServiceResult<PathBuf>;

    /// 将本地文件发布为新资产
    async fn publish(
        &self,
        local_path: &Path,
        name: &str,
        project_id: &str,
        folder_id: Option<&str>,
        mode: PublishMode,
    ) -> ServiceResult<Asset>;

    /// 结束会话
    async fn sign_out(&self) -> ServiceResult<()> {
        Ok(())
    }

    /// 获取服务名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建已认证的服务实例
pub async fn create_service(config: &ServiceConfig) -> ServiceResult<Arc<dyn ContentService>> {
    match config.typ {
        ServiceType::Rest => {
            let url = config
                .url
                .as_ref()
                .ok_or_else(|| ServiceError::Config("REST service requires url".into()))?;
            let token_name = config
                .token_name
                .as_ref()
                .ok_or_else(|| ServiceError::Config("REST service requires tokenName".into()))?;
            let token_secret = config
                .token_secret
                .as_ref()
                .ok_or_else(|| ServiceError::Config("REST service requires tokenSecret".into()))?;
            tracing::info!("登录内容服务: {} (site={:?})", url, config.site_id);
            Ok(Arc::new(
                RestContentService::sign_in(
                    url,
                    &config.api_version,
                    token_name,
                    token_secret,
                    config.site_id.as_deref().unwrap_or(""),
                )
                .await?,
            ) as Arc<dyn ContentService>)
        }
        ServiceType::Local => {
            let root = config
                .root
                .as_ref()
                .ok_or_else(|| ServiceError::Config("Local service requires root".into()))?;
            tracing::info!("使用本地内容目录: {}", root);
            Ok(Arc::new(LocalContentService::new(root)?) as Arc<dyn ContentService>)
        }
    }
}
