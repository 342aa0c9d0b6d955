//! 内存内容服务，供测试使用：记录调用次数并支持注入失败

use super::{Asset, ContentService, Folder, Project, PublishMode, ServiceResult};
use crate::error::ServiceError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 注入失败的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetAsset,
    Download,
    CreateFolder,
    Publish,
}

#[derive(Default)]
struct State {
    projects: Vec<Project>,
    folders: Vec<Folder>,
    assets: Vec<(Asset, Vec<u8>)>,
    /// (操作, 资产或文件夹名) -> 剩余失败次数，u32::MAX 表示一直失败
    failures: HashMap<(Op, String), u32>,
    calls: HashMap<&'static str, usize>,
    next_id: usize,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn hit(&mut self, call: &'static str) {
        *self.calls.entry(call).or_default() += 1;
    }

    fn should_fail(&mut self, op: Op, key: &str) -> bool {
        match self.failures.get_mut(&(op, key.to_string())) {
            Some(0) | None => false,
            Some(n) => {
                if *n != u32::MAX {
                    *n -= 1;
                }
                true
            }
        }
    }

    fn folder_path(&self, folder_id: &str) -> String {
        let mut names = Vec::new();
        let mut current = Some(folder_id.to_string());
        while let Some(id) = current {
            match self.folders.iter().find(|f| f.id == id) {
                Some(f) => {
                    names.push(f.name.clone());
                    current = f.parent_id.clone();
                }
                None => break,
            }
        }
        names.reverse();
        names.join("/")
    }
}

#[derive(Default)]
pub struct MemoryContentService {
    state: Mutex<State>,
}

impl MemoryContentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.id("project");
        state.projects.push(Project {
            id: id.clone(),
            name: name.to_string(),
            parent_id: None,
        });
        id
    }

    /// 按路径创建文件夹链，返回末级 id
    pub fn add_folder_path(&self, project_id: &str, path: &str) -> Option<String> {
        let mut parent: Option<String> = None;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let mut state = self.state.lock().unwrap();
            let existing = state
                .folders
                .iter()
                .find(|f| f.project_id == project_id && f.parent_id == parent && f.name == segment)
                .map(|f| f.id.clone());
            let id = match existing {
                Some(id) => id,
                None => {
                    let id = state.id("folder");
                    state.folders.push(Folder {
                        id: id.clone(),
                        name: segment.to_string(),
                        parent_id: parent.clone(),
                        project_id: project_id.to_string(),
                        path: String::new(),
                    });
                    id
                }
            };
            parent = Some(id);
        }
        parent
    }

    pub fn add_asset(&self, project_id: &str, folder_path: &str, name: &str, content: &[u8]) -> String {
        let folder_id = self.add_folder_path(project_id, folder_path);
        let mut state = self.state.lock().unwrap();
        let id = state.id("asset");
        state.assets.push((
            Asset {
                id: id.clone(),
                name: name.to_string(),
                project_id: project_id.to_string(),
                folder_id,
                size: Some(content.len() as u64),
            },
            content.to_vec(),
        ));
        id
    }

    /// 让 `key` 上的 `op` 接下来失败 `times` 次
    pub fn fail(&self, op: Op, key: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((op, key.to_string()), times);
    }

    pub fn fail_always(&self, op: Op, key: &str) {
        self.fail(op, key, u32::MAX);
    }

    pub fn calls(&self, call: &str) -> usize {
        self.state.lock().unwrap().calls.get(call).copied().unwrap_or(0)
    }

    pub fn folders_in(&self, project_id: &str) -> Vec<Folder> {
        let state = self.state.lock().unwrap();
        state
            .folders
            .iter()
            .filter(|f| f.project_id == project_id)
            .cloned()
            .collect()
    }

    pub fn assets_in(&self, project_id: &str) -> Vec<Asset> {
        let state = self.state.lock().unwrap();
        state
            .assets
            .iter()
            .filter(|(a, _)| a.project_id == project_id)
            .map(|(a, _)| a.clone())
            .collect()
    }

    pub fn folder_path(&self, folder_id: &str) -> String {
        self.state.lock().unwrap().folder_path(folder_id)
    }

    /// 直接移动资产，模拟目标端被外部改动
    pub fn move_asset(&self, asset_id: &str, folder_id: Option<String>) {
        let mut state = self.state.lock().unwrap();
        if let Some((asset, _)) = state.assets.iter_mut().find(|(a, _)| a.id == asset_id) {
            asset.folder_id = folder_id;
        }
    }
}

fn injected(op: Op, key: &str) -> ServiceError {
    ServiceError::Http {
        status: 503,
        message: format!("injected {:?} failure for {}", op, key),
    }
}

#[async_trait]
impl ContentService for MemoryContentService {
    async fn list_projects(&self) -> ServiceResult<Vec<Project>> {
        let mut state = self.state.lock().unwrap();
        state.hit("list_projects");
        Ok(state.projects.clone())
    }

    async fn list_assets(&self, project_id: Option<&str>) -> ServiceResult<Vec<Asset>> {
        let mut state = self.state.lock().unwrap();
        state.hit("list_assets");
        Ok(state
            .assets
            .iter()
            .filter(|(a, _)| project_id.map_or(true, |p| a.project_id == p))
            .map(|(a, _)| a.clone())
            .collect())
    }

    async fn get_asset(&self, asset_id: &str) -> ServiceResult<Asset> {
        let mut state = self.state.lock().unwrap();
        state.hit("get_asset");
        let asset = state
            .assets
            .iter()
            .find(|(a, _)| a.id == asset_id)
            .map(|(a, _)| a.clone())
            .ok_or_else(|| ServiceError::not_found("asset", asset_id))?;
        if state.should_fail(Op::GetAsset, &asset.name) {
            return Err(injected(Op::GetAsset, &asset.name));
        }
        Ok(asset)
    }

    async fn list_folders(&self, project_id: Option<&str>) -> ServiceResult<Vec<Folder>> {
        let mut state = self.state.lock().unwrap();
        state.hit("list_folders");
        let folders = state
            .folders
            .iter()
            .filter(|f| project_id.map_or(true, |p| f.project_id == p))
            .map(|f| Folder {
                path: state.folder_path(&f.id),
                ..f.clone()
            })
            .collect();
        Ok(folders)
    }

    async fn get_folder(&self, folder_id: &str) -> ServiceResult<Folder> {
        let mut state = self.state.lock().unwrap();
        state.hit("get_folder");
        let folder = state
            .folders
            .iter()
            .find(|f| f.id == folder_id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("folder", folder_id))?;
        Ok(Folder {
            path: state.folder_path(folder_id),
            ..folder
        })
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
        project_id: &str,
    ) -> ServiceResult<Folder> {
        let mut state = self.state.lock().unwrap();
        state.hit("create_folder");
        if state.should_fail(Op::CreateFolder, name) {
            return Err(injected(Op::CreateFolder, name));
        }
        let id = state.id("folder");
        let folder = Folder {
            id: id.clone(),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
            project_id: project_id.to_string(),
            path: String::new(),
        };
        state.folders.push(folder.clone());
        Ok(Folder {
            path: state.folder_path(&id),
            ..folder
        })
    }

    async fn download(
        &self,
        asset_id: &str,
        dest_dir: &Path,
        _include_full_payload: bool,
    ) -> ServiceResult<PathBuf> {
        let (name, content) = {
            let mut state = self.state.lock().unwrap();
            state.hit("download");
            let (asset, content) = state
                .assets
                .iter()
                .find(|(a, _)| a.id == asset_id)
                .cloned()
                .ok_or_else(|| ServiceError::not_found("asset", asset_id))?;
            if state.should_fail(Op::Download, &asset.name) {
                return Err(injected(Op::Download, &asset.name));
            }
            (asset.name, content)
        };
        std::fs::create_dir_all(dest_dir).map_err(|e| ServiceError::io(dest_dir, e))?;
        let path = dest_dir.join(format!("{}.twbx", name));
        std::fs::write(&path, content).map_err(|e| ServiceError::io(&path, e))?;
        Ok(path)
    }

    async fn publish(
        &self,
        local_path: &Path,
        name: &str,
        project_id: &str,
        folder_id: Option<&str>,
        _mode: PublishMode,
    ) -> ServiceResult<Asset> {
        let content = std::fs::read(local_path).map_err(|e| ServiceError::io(local_path, e))?;
        let mut state = self.state.lock().unwrap();
        state.hit("publish");
        if state.should_fail(Op::Publish, name) {
            return Err(injected(Op::Publish, name));
        }
        let taken = state.assets.iter().any(|(a, _)| {
            a.project_id == project_id && a.folder_id.as_deref() == folder_id && a.name == name
        });
        if taken {
            return Err(ServiceError::AlreadyExists {
                name: name.to_string(),
            });
        }
        let asset = Asset {
            id: state.id("asset"),
            name: name.to_string(),
            project_id: project_id.to_string(),
            folder_id: folder_id.map(str::to_string),
            size: Some(content.len() as u64),
        };
        state.assets.push((asset.clone(), content));
        Ok(asset)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
