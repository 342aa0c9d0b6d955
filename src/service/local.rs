//! 本地目录形式的内容服务
//!
//! 根目录下的一级目录是项目，更深的目录是文件夹，普通文件是资产（名称为去掉扩展名的文件名）。
//! 所有 id 都是相对根目录、以 `/` 分隔的路径。

use super::{Asset, ContentService, Folder, Project, PublishMode, ServiceResult};
use crate::error::ServiceError;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

pub struct LocalContentService {
    base_path: PathBuf,
    name: String,
}

impl LocalContentService {
    pub fn new(path: &str) -> ServiceResult<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path).map_err(|e| ServiceError::io(&base_path, e))?;
        }
        let name = format!("local:{}", path);
        Ok(Self { base_path, name })
    }

    /// 将 id 解析为根目录下的路径，拒绝越界的 id
    fn resolve_id(&self, id: &str) -> ServiceResult<PathBuf> {
        let rel = Path::new(id.trim_start_matches('/'));
        let safe = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if id.is_empty() || !safe {
            return Err(ServiceError::Protocol(format!("invalid id: {:?}", id)));
        }
        Ok(self.base_path.join(rel))
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    fn relative_id(base: &Path, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(base).ok()?.to_str()?;
        Some(Self::normalize_path(rel))
    }

    fn is_hidden(name: &str) -> bool {
        name.starts_with('.') || name.ends_with(".tmp")
    }

    fn project_of(id: &str) -> String {
        id.split('/').next().unwrap_or_default().to_string()
    }

    fn parent_id(id: &str) -> Option<String> {
        let (parent, _) = id.rsplit_once('/')?;
        // 父级是项目本身时视为根
        parent.contains('/').then(|| parent.to_string())
    }

    fn folder_from_id(id: &str) -> Folder {
        let project_id = Self::project_of(id);
        let path = id
            .strip_prefix(&project_id)
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string();
        let name = id.rsplit('/').next().unwrap_or_default().to_string();
        Folder {
            id: id.to_string(),
            name,
            parent_id: Self::parent_id(id),
            project_id,
            path,
        }
    }

    fn asset_from_id(id: &str, size: Option<u64>) -> Asset {
        let file_name = id.rsplit('/').next().unwrap_or_default();
        let name = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name)
            .to_string();
        Asset {
            id: id.to_string(),
            name,
            project_id: Self::project_of(id),
            folder_id: Self::parent_id(id),
            size,
        }
    }

    /// 遍历项目目录，返回 (相对 id, 是否目录, 大小)
    async fn walk(&self, project_id: Option<&str>) -> ServiceResult<Vec<(String, bool, u64)>> {
        let start = match project_id {
            Some(p) => self.resolve_id(p)?,
            None => self.base_path.clone(),
        };
        if !start.is_dir() {
            return Err(ServiceError::not_found(
                "project",
                project_id.unwrap_or_default(),
            ));
        }
        let base = self.base_path.clone();
        // 根目录遍历时跳过一级目录（项目本身）
        let min_depth = if project_id.is_some() { 1 } else { 2 };

        // 使用 spawn_blocking 避免阻塞 async runtime
        let entries = tokio::task::spawn_blocking(move || {
            WalkDir::new(&start)
                .min_depth(min_depth)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    e.depth() == 0 || !e.file_name().to_str().is_some_and(Self::is_hidden)
                })
                .filter_map(|e| e.ok())
                .filter_map(|entry| {
                    let metadata = entry.metadata().ok()?;
                    let id = Self::relative_id(&base, entry.path())?;
                    Some((id, metadata.is_dir(), metadata.len()))
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| ServiceError::Protocol(format!("directory walk aborted: {}", e)))?;

        Ok(entries)
    }

    /// 查找目录下同名（忽略扩展名）的文件
    async fn find_by_stem(dir: &Path, stem: &str) -> ServiceResult<Option<PathBuf>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ServiceError::io(dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ServiceError::io(dir, e))?
        {
            let path = entry.path();
            if path.is_file() && path.file_stem().and_then(|s| s.to_str()) == Some(stem) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ContentService for LocalContentService {
    async fn list_projects(&self) -> ServiceResult<Vec<Project>> {
        let mut projects = Vec::new();
        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| ServiceError::io(&self.base_path, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ServiceError::io(&self.base_path, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if entry.path().is_dir() && !Self::is_hidden(&name) {
                projects.push(Project {
                    id: name.clone(),
                    name,
                    parent_id: None,
                });
            }
        }
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    async fn list_assets(&self, project_id: Option<&str>) -> ServiceResult<Vec<Asset>> {
        Ok(self
            .walk(project_id)
            .await?
            .into_iter()
            .filter(|(_, is_dir, _)| !is_dir)
            .map(|(id, _, size)| Self::asset_from_id(&id, Some(size)))
            .collect())
    }

    async fn get_asset(&self, asset_id: &str) -> ServiceResult<Asset> {
        let path = self.resolve_id(asset_id)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Self::asset_from_id(asset_id, Some(meta.len()))),
            Ok(_) => Err(ServiceError::not_found("asset", asset_id)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServiceError::not_found("asset", asset_id))
            }
            Err(e) => Err(ServiceError::io(path, e)),
        }
    }

    async fn list_folders(&self, project_id: Option<&str>) -> ServiceResult<Vec<Folder>> {
        Ok(self
            .walk(project_id)
            .await?
            .into_iter()
            .filter(|(_, is_dir, _)| *is_dir)
            .map(|(id, _, _)| Self::folder_from_id(&id))
            .collect())
    }

    async fn get_folder(&self, folder_id: &str) -> ServiceResult<Folder> {
        let path = self.resolve_id(folder_id)?;
        if !folder_id.contains('/') || !path.is_dir() {
            return Err(ServiceError::not_found("folder", folder_id));
        }
        Ok(Self::folder_from_id(folder_id))
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
        project_id: &str,
    ) -> ServiceResult<Folder> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ServiceError::Protocol(format!("invalid folder name: {:?}", name)));
        }
        let parent = parent_id.unwrap_or(project_id);
        let parent_path = self.resolve_id(parent)?;
        if !parent_path.is_dir() {
            return Err(ServiceError::not_found("folder", parent));
        }
        let id = format!("{}/{}", parent, name);
        let path = parent_path.join(name);
        match fs::create_dir(&path).await {
            Ok(()) => Ok(Self::folder_from_id(&id)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(ServiceError::AlreadyExists { name: id })
            }
            Err(e) => Err(ServiceError::io(path, e)),
        }
    }

    async fn download(
        &self,
        asset_id: &str,
        dest_dir: &Path,
        _include_full_payload: bool,
    ) -> ServiceResult<PathBuf> {
        let source = self.resolve_id(asset_id)?;
        let file_name = source
            .file_name()
            .ok_or_else(|| ServiceError::not_found("asset", asset_id))?;
        fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| ServiceError::io(dest_dir, e))?;
        let dest = dest_dir.join(file_name);
        match fs::copy(&source, &dest).await {
            Ok(_) => Ok(dest),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServiceError::not_found("asset", asset_id))
            }
            Err(e) => Err(ServiceError::io(source, e)),
        }
    }

    async fn publish(
        &self,
        local_path: &Path,
        name: &str,
        project_id: &str,
        folder_id: Option<&str>,
        mode: PublishMode,
    ) -> ServiceResult<Asset> {
        let dir_id = folder_id.unwrap_or(project_id);
        let dir = self.resolve_id(dir_id)?;
        if !dir.is_dir() {
            return Err(ServiceError::not_found("folder", dir_id));
        }

        match mode {
            PublishMode::CreateNew => {
                if Self::find_by_stem(&dir, name).await?.is_some() {
                    return Err(ServiceError::AlreadyExists {
                        name: name.to_string(),
                    });
                }
            }
        }

        let file_name = match local_path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", name, ext),
            None => name.to_string(),
        };
        let full_path = dir.join(&file_name);

        // 先写临时文件再原子重命名
        let temp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        fs::copy(local_path, &temp_path)
            .await
            .map_err(|e| ServiceError::io(local_path, e))?;
        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ServiceError::io(full_path, e));
        }

        let size = fs::metadata(&full_path).await.ok().map(|m| m.len());
        Ok(Self::asset_from_id(&format!("{}/{}", dir_id, file_name), size))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, LocalContentService) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("Finance/Reports/2024")).unwrap();
        std::fs::create_dir_all(root.join("Archive")).unwrap();
        std::fs::write(root.join("Finance/Budget.twbx"), b"budget").unwrap();
        std::fs::write(root.join("Finance/Reports/2024/Q1.twbx"), b"quarter one").unwrap();
        let service = LocalContentService::new(root.to_str().unwrap()).unwrap();
        (dir, service)
    }

    #[tokio::test]
    async fn test_lists_projects_assets_and_folders() {
        let (_dir, service) = setup();

        let projects = service.list_projects().await.unwrap();
        let names: Vec<_> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Archive", "Finance"]);

        let assets = service.list_assets(Some("Finance")).await.unwrap();
        let budget = assets.iter().find(|a| a.name == "Budget").unwrap();
        assert_eq!(budget.folder_id, None);
        let q1 = assets.iter().find(|a| a.name == "Q1").unwrap();
        assert_eq!(q1.folder_id.as_deref(), Some("Finance/Reports/2024"));
        assert_eq!(q1.size, Some(11));

        let folder = service.get_folder("Finance/Reports/2024").await.unwrap();
        assert_eq!(folder.path, "Reports/2024");
        assert_eq!(folder.parent_id.as_deref(), Some("Finance/Reports"));
        let top = service.get_folder("Finance/Reports").await.unwrap();
        assert_eq!(top.parent_id, None);
    }

    #[tokio::test]
    async fn test_publish_rejects_existing_name() {
        let (dir, service) = setup();
        let scratch = tempfile::tempdir().unwrap();

        let local = service
            .download("Finance/Budget.twbx", scratch.path(), true)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"budget");

        let folder = service.create_folder("Copied", None, "Archive").await.unwrap();
        let published = service
            .publish(&local, "Budget - Copy", "Archive", Some(&folder.id), PublishMode::CreateNew)
            .await
            .unwrap();
        assert_eq!(published.name, "Budget - Copy");
        assert_eq!(published.folder_id.as_deref(), Some("Archive/Copied"));
        assert!(dir.path().join("Archive/Copied/Budget - Copy.twbx").exists());

        let again = service
            .publish(&local, "Budget - Copy", "Archive", Some(&folder.id), PublishMode::CreateNew)
            .await;
        assert!(matches!(again, Err(ServiceError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_rejects_escaping_ids() {
        let (_dir, service) = setup();
        assert!(service.get_asset("../etc/passwd").await.is_err());
        assert!(matches!(
            service.get_asset("Finance/Missing.twbx").await,
            Err(ServiceError::NotFound { .. })
        ));
    }
}
