//! Tableau 风格 REST 接口的内容服务
//!
//! 文件夹在服务端表现为嵌套项目（`parentProjectId`），资产所在的嵌套项目即其文件夹。

use super::{
    Asset, ContentService, Folder, Project, PublishMode, ServiceResult, IO_TIMEOUT_SECS,
    OP_TIMEOUT_SECS,
};
use crate::error::ServiceError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const PAGE_SIZE: u32 = 100;
const AUTH_HEADER: &str = "X-Tableau-Auth";

// ============ 响应结构 ============

#[derive(Debug, Deserialize)]
struct SignInResponse {
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct Credentials {
    token: String,
    site: SiteRef,
}

#[derive(Debug, Deserialize)]
struct SiteRef {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    #[serde(deserialize_with = "de_u64")]
    page_number: u64,
    #[serde(deserialize_with = "de_u64")]
    total_available: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProject {
    id: String,
    name: String,
    #[serde(default)]
    parent_project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectList {
    #[serde(default)]
    project: Vec<RawProject>,
}

#[derive(Debug, Deserialize)]
struct ProjectsPage {
    #[serde(default)]
    pagination: Pagination,
    #[serde(default)]
    projects: Option<ProjectList>,
}

#[derive(Debug, Deserialize)]
struct ProjectEnvelope {
    project: RawProject,
}

#[derive(Debug, Clone, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawWorkbook {
    id: String,
    name: String,
    project: IdRef,
    #[serde(default, deserialize_with = "de_opt_u64")]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WorkbookList {
    #[serde(default)]
    workbook: Vec<RawWorkbook>,
}

#[derive(Debug, Deserialize)]
struct WorkbooksPage {
    #[serde(default)]
    pagination: Pagination,
    #[serde(default)]
    workbooks: Option<WorkbookList>,
}

#[derive(Debug, Deserialize)]
struct WorkbookEnvelope {
    workbook: RawWorkbook,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    detail: String,
}

/// 服务端把数字写成字符串，两种都接受
#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(u64),
    Str(String),
}

fn de_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    match NumOrString::deserialize(d)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn de_opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(match Option::<NumOrString>::deserialize(d)? {
        Some(NumOrString::Num(n)) => Some(n),
        Some(NumOrString::Str(s)) => s.trim().parse().ok(),
        None => None,
    })
}

// ============ 项目树 ============

/// 全部项目的快照，用于推导文件夹归属与路径
struct ProjectTree {
    by_id: HashMap<String, RawProject>,
}

impl ProjectTree {
    fn new(projects: Vec<RawProject>) -> Self {
        Self {
            by_id: projects.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// 返回 (顶层项目 id, 从顶层之下到自身的名称链)
    fn locate(&self, id: &str) -> Option<(String, Vec<String>)> {
        let mut names = Vec::new();
        let mut current = self.by_id.get(id)?;
        // 防御环状数据
        for _ in 0..self.by_id.len() {
            match current.parent_project_id.as_deref() {
                Some(parent) => {
                    names.push(current.name.clone());
                    current = self.by_id.get(parent)?;
                }
                None => {
                    names.reverse();
                    return Some((current.id.clone(), names));
                }
            }
        }
        None
    }

    /// 顶层项目；嵌套项目只作为文件夹出现，不能按名称选作源或目标
    fn projects(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self
            .by_id
            .values()
            .filter(|p| p.parent_project_id.is_none())
            .map(|p| Project {
                id: p.id.clone(),
                name: p.name.clone(),
                parent_id: None,
            })
            .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        projects
    }

    fn folder(&self, id: &str) -> Option<Folder> {
        let raw = self.by_id.get(id)?;
        let parent = raw.parent_project_id.as_deref()?;
        let (root, names) = self.locate(id)?;
        Some(Folder {
            id: raw.id.clone(),
            name: raw.name.clone(),
            parent_id: (parent != root).then(|| parent.to_string()),
            project_id: root,
            path: names.join("/"),
        })
    }

    fn folders_in(&self, project_id: Option<&str>) -> Vec<Folder> {
        let mut folders: Vec<Folder> = self
            .by_id
            .keys()
            .filter_map(|id| self.folder(id))
            .filter(|f| project_id.map_or(true, |p| f.project_id == p))
            .collect();
        folders.sort_by(|a, b| a.path.cmp(&b.path));
        folders
    }

    fn asset(&self, wb: RawWorkbook) -> Option<Asset> {
        let (root, _) = self.locate(&wb.project.id)?;
        let folder_id = (wb.project.id != root).then(|| wb.project.id.clone());
        Some(Asset {
            id: wb.id,
            name: wb.name,
            project_id: root,
            folder_id,
            size: wb.size,
        })
    }
}

// ============ 服务实现 ============

pub struct RestContentService {
    client: Client,
    /// `{server}/api/{version}`
    api_base: String,
    site_id: String,
    token: String,
    name: String,
}

impl RestContentService {
    /// 使用个人访问令牌登录
    pub async fn sign_in(
        server_url: &str,
        api_version: &str,
        token_name: &str,
        token_secret: &str,
        site_content_url: &str,
    ) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .build()?;
        let api_base = format!("{}/api/{}", server_url.trim_end_matches('/'), api_version);

        let body = json!({
            "credentials": {
                "personalAccessTokenName": token_name,
                "personalAccessTokenSecret": token_secret,
                "site": { "contentUrl": site_content_url }
            }
        });
        let resp = client
            .post(format!("{}/auth/signin", api_base))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        // 登录阶段任何 4xx 都视为认证失败
        if resp.status().is_client_error() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Authentication(format!(
                "{}: {}",
                status,
                error_message(&text)
            )));
        }
        let signed: SignInResponse = check(resp, "sign-in", "").await?.json().await?;

        tracing::debug!("已登录站点 {}", signed.credentials.site.id);
        Ok(Self {
            client,
            name: format!("rest:{}", server_url.trim_end_matches('/')),
            api_base,
            site_id: signed.credentials.site.id,
            token: signed.credentials.token,
        })
    }

    fn site_url(&self, path: &str) -> String {
        format!("{}/sites/{}/{}", self.api_base, self.site_id, path)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(AUTH_HEADER, &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn all_projects(&self) -> ServiceResult<Vec<RawProject>> {
        let mut out = Vec::new();
        let mut page = 1u64;
        loop {
            let url = self.site_url(&format!("projects?pageSize={}&pageNumber={}", PAGE_SIZE, page));
            let resp = self.request(Method::GET, url).send().await?;
            let parsed: ProjectsPage = check(resp, "projects", "").await?.json().await?;
            let got = parsed.projects.map(|p| p.project).unwrap_or_default();
            let empty = got.is_empty();
            out.extend(got);
            if empty || !has_more(&parsed.pagination, out.len()) {
                return Ok(out);
            }
            page = parsed.pagination.page_number + 1;
        }
    }

    async fn all_workbooks(&self) -> ServiceResult<Vec<RawWorkbook>> {
        let mut out = Vec::new();
        let mut page = 1u64;
        loop {
            let url = self.site_url(&format!("workbooks?pageSize={}&pageNumber={}", PAGE_SIZE, page));
            let resp = self.request(Method::GET, url).send().await?;
            let parsed: WorkbooksPage = check(resp, "workbooks", "").await?.json().await?;
            let got = parsed.workbooks.map(|w| w.workbook).unwrap_or_default();
            let empty = got.is_empty();
            out.extend(got);
            if empty || !has_more(&parsed.pagination, out.len()) {
                return Ok(out);
            }
            page = parsed.pagination.page_number + 1;
        }
    }

    async fn tree(&self) -> ServiceResult<ProjectTree> {
        Ok(ProjectTree::new(self.all_projects().await?))
    }
}

fn has_more(pagination: &Pagination, fetched: usize) -> bool {
    (fetched as u64) < pagination.total_available
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) if !env.error.detail.is_empty() => {
            format!("{} ({})", env.error.summary, env.error.detail)
        }
        Ok(env) => env.error.summary,
        Err(_) => body.chars().take(200).collect(),
    }
}

/// 将非 2xx 响应映射为服务错误
async fn check(resp: Response, kind: &'static str, id: &str) -> ServiceResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => ServiceError::Authentication(error_message(&text)),
        StatusCode::NOT_FOUND => ServiceError::not_found(kind, id),
        StatusCode::CONFLICT => ServiceError::AlreadyExists {
            name: id.to_string(),
        },
        _ => ServiceError::Http {
            status: status.as_u16(),
            message: error_message(&text),
        },
    })
}

/// 从 Content-Disposition 中取出文件名
fn disposition_filename(header: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let value = part.trim().strip_prefix("filename=")?;
        let name = value.trim_matches('"');
        let name = Path::new(name).file_name()?.to_str()?;
        (!name.is_empty()).then(|| name.to_string())
    })
}

/// 构造 multipart/mixed 发布请求体
fn publish_body(boundary: &str, payload: &serde_json::Value, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: name=\"request_payload\"\r\nContent-Type: application/json\r\n\r\n{p}\r\n\
             --{b}\r\nContent-Disposition: name=\"tableau_workbook\"; filename=\"{f}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = boundary,
            p = payload,
            f = file_name.replace('"', "'"),
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[async_trait]
impl ContentService for RestContentService {
    async fn list_projects(&self) -> ServiceResult<Vec<Project>> {
        Ok(self.tree().await?.projects())
    }

    async fn list_assets(&self, project_id: Option<&str>) -> ServiceResult<Vec<Asset>> {
        let tree = self.tree().await?;
        Ok(self
            .all_workbooks()
            .await?
            .into_iter()
            .filter_map(|wb| tree.asset(wb))
            .filter(|a| project_id.map_or(true, |p| a.project_id == p))
            .collect())
    }

    async fn get_asset(&self, asset_id: &str) -> ServiceResult<Asset> {
        let url = self.site_url(&format!("workbooks/{}", urlencoding::encode(asset_id)));
        let resp = self.request(Method::GET, url).send().await?;
        let env: WorkbookEnvelope = check(resp, "asset", asset_id).await?.json().await?;
        let tree = self.tree().await?;
        tree.asset(env.workbook)
            .ok_or_else(|| ServiceError::Protocol(format!("asset {} has no project", asset_id)))
    }

    async fn list_folders(&self, project_id: Option<&str>) -> ServiceResult<Vec<Folder>> {
        Ok(self.tree().await?.folders_in(project_id))
    }

    async fn get_folder(&self, folder_id: &str) -> ServiceResult<Folder> {
        self.tree()
            .await?
            .folder(folder_id)
            .ok_or_else(|| ServiceError::not_found("folder", folder_id))
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
        project_id: &str,
    ) -> ServiceResult<Folder> {
        let body = json!({
            "project": {
                "name": name,
                "parentProjectId": parent_id.unwrap_or(project_id),
            }
        });
        let resp = self
            .request(Method::POST, self.site_url("projects"))
            .json(&body)
            .send()
            .await?;
        let created: ProjectEnvelope = check(resp, "folder", name).await?.json().await?;
        let tree = self.tree().await?;
        tree.folder(&created.project.id)
            .ok_or_else(|| ServiceError::Protocol(format!("created folder {} not listed", name)))
    }

    async fn download(
        &self,
        asset_id: &str,
        dest_dir: &Path,
        include_full_payload: bool,
    ) -> ServiceResult<PathBuf> {
        let url = self.site_url(&format!(
            "workbooks/{}/content?includeExtract={}",
            urlencoding::encode(asset_id),
            include_full_payload
        ));
        let resp = self
            .request(Method::GET, url)
            .timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .send()
            .await?;
        let resp = check(resp, "asset", asset_id).await?;

        let file_name = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename)
            .unwrap_or_else(|| format!("{}.twbx", asset_id));

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| ServiceError::io(dest_dir, e))?;
        let path = dest_dir.join(file_name);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| ServiceError::io(&path, e))?;

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: bytes::Bytes = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ServiceError::io(&path, e))?;
        }
        file.flush().await.map_err(|e| ServiceError::io(&path, e))?;

        Ok(path)
    }

    async fn publish(
        &self,
        local_path: &Path,
        name: &str,
        project_id: &str,
        folder_id: Option<&str>,
        mode: PublishMode,
    ) -> ServiceResult<Asset> {
        let overwrite = match mode {
            PublishMode::CreateNew => false,
        };
        let ext = local_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("twbx")
            .to_lowercase();
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| ServiceError::io(local_path, e))?;

        let payload = json!({
            "workbook": {
                "name": name,
                "project": { "id": folder_id.unwrap_or(project_id) }
            }
        });
        let boundary = format!("bulkcopier-{}", uuid::Uuid::new_v4().simple());
        let body = publish_body(&boundary, &payload, &format!("{}.{}", name, ext), &data);

        let url = self.site_url(&format!(
            "workbooks?workbookType={}&overwrite={}",
            ext, overwrite
        ));
        let resp = self
            .request(Method::POST, url)
            .timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/mixed; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await?;
        let env: WorkbookEnvelope = check(resp, "asset", name).await?.json().await?;

        let tree = self.tree().await?;
        tree.asset(env.workbook)
            .ok_or_else(|| ServiceError::Protocol(format!("published {} has no project", name)))
    }

    async fn sign_out(&self) -> ServiceResult<()> {
        let resp = self
            .request(Method::POST, format!("{}/auth/signout", self.api_base))
            .send()
            .await?;
        check(resp, "session", "").await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
