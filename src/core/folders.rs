//! 目标项目中的文件夹路径复制

use crate::error::ServiceError;
use crate::service::ContentService;
use tracing::{debug, info};

/// 将 `/` 分隔的路径拆成非空段
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// 在目标项目中按层级查找或创建文件夹
pub struct FolderReplicator<'a> {
    service: &'a dyn ContentService,
}

impl<'a> FolderReplicator<'a> {
    pub fn new(service: &'a dyn ContentService) -> Self {
        Self { service }
    }

    /// 确保路径对应的文件夹链存在，返回末级文件夹 id；空路径表示项目根，返回 None。
    ///
    /// 每一层都重新列出项目内的文件夹再查找，不做跨调用缓存，
    /// 因此两次调用之间外部新建的文件夹也会被复用。
    pub async fn ensure_folder(
        &self,
        project_id: &str,
        path: &str,
    ) -> Result<Option<String>, ServiceError> {
        let segments = split_path(path);
        if segments.is_empty() {
            return Ok(None);
        }

        let mut parent_id: Option<String> = None;
        let mut current_path = String::new();

        for segment in segments {
            if !current_path.is_empty() {
                current_path.push('/');
            }
            current_path.push_str(segment);

            let folders = self.service.list_folders(Some(project_id)).await?;
            let existing = folders
                .into_iter()
                .find(|f| f.name == segment && f.parent_id == parent_id);

            let folder = match existing {
                Some(f) => {
                    debug!("文件夹已存在: {}", current_path);
                    f
                }
                None => {
                    let created = self
                        .service
                        .create_folder(segment, parent_id.as_deref(), project_id)
                        .await?;
                    info!("创建文件夹: {}", current_path);
                    created
                }
            };
            parent_id = Some(folder.id);
        }

        Ok(parent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::memory::{MemoryContentService, Op};

    #[tokio::test]
    async fn test_empty_path_is_root_without_calls() {
        let service = MemoryContentService::new();
        let project = service.add_project("Target");
        let replicator = FolderReplicator::new(&service);

        assert_eq!(replicator.ensure_folder(&project, "").await.unwrap(), None);
        assert_eq!(replicator.ensure_folder(&project, "/").await.unwrap(), None);
        assert_eq!(service.calls("list_folders"), 0);
        assert_eq!(service.calls("create_folder"), 0);
    }

    #[tokio::test]
    async fn test_replication_is_idempotent() {
        let service = MemoryContentService::new();
        let project = service.add_project("Target");
        let replicator = FolderReplicator::new(&service);

        for path in ["Sales", "Sales/EMEA/2024", "Ops/Sales"] {
            let first = replicator.ensure_folder(&project, path).await.unwrap();
            let created = service.calls("create_folder");
            let second = replicator.ensure_folder(&project, path).await.unwrap();

            assert!(first.is_some());
            assert_eq!(first, second);
            assert_eq!(service.calls("create_folder"), created);
            assert_eq!(service.folder_path(first.as_deref().unwrap()), path);
        }

        // Sales, EMEA, 2024, Ops, Ops/Sales：同名但父级不同的文件夹各自独立
        assert_eq!(service.folders_in(&project).len(), 5);
    }

    #[tokio::test]
    async fn test_reuses_existing_prefix() {
        let service = MemoryContentService::new();
        let project = service.add_project("Target");
        let existing = service.add_folder_path(&project, "Finance/Reports");
        let replicator = FolderReplicator::new(&service);

        let leaf = replicator
            .ensure_folder(&project, "/Finance/Reports/Q1/")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.calls("create_folder"), 1);
        let leaf_folder = service
            .folders_in(&project)
            .into_iter()
            .find(|f| f.id == leaf)
            .unwrap();
        assert_eq!(leaf_folder.parent_id, existing);
    }

    #[tokio::test]
    async fn test_create_failure_propagates() {
        let service = MemoryContentService::new();
        let project = service.add_project("Target");
        service.fail_always(Op::CreateFolder, "Broken");
        let replicator = FolderReplicator::new(&service);

        let result = replicator.ensure_folder(&project, "Ok/Broken").await;
        assert!(matches!(result, Err(ServiceError::Http { status: 503, .. })));
    }
}
