//! 批次完成后的目标端核验

use crate::core::scratch::scratch_dir;
use crate::core::target_name;
use crate::service::{Asset, ContentService};
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, Level};

pub const MSG_VERIFIED: &str = "verification successful";
pub const MSG_NOT_FOUND: &str = "not found";
pub const MSG_WRONG_FOLDER: &str = "wrong folder";
pub const MSG_CONTENT_FAILED: &str = "content check failed";
pub const MSG_ERROR: &str = "verification error";

/// 本批次尝试过的资产，以及为它复制出的目标文件夹（如果复制过）
#[derive(Debug, Clone)]
pub struct AttemptedAsset {
    pub asset: Asset,
    pub target_folder_id: Option<String>,
}

/// 单个资产的核验结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub asset_name: String,
    pub success: bool,
    pub message: String,
}

/// 批次核验汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchVerification {
    pub all_succeeded: bool,
    pub results: Vec<VerificationResult>,
}

impl BatchVerification {
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

pub struct Verifier<'a> {
    service: &'a dyn ContentService,
    temp_dir: &'a Path,
}

impl<'a> Verifier<'a> {
    pub fn new(service: &'a dyn ContentService, temp_dir: &'a Path) -> Self {
        Self { service, temp_dir }
    }

    /// 逐个核验；失败只报告，不重试也不回滚
    pub async fn verify_batch(
        &self,
        attempted: &[AttemptedAsset],
        target_project_id: &str,
    ) -> BatchVerification {
        let mut results = Vec::with_capacity(attempted.len());
        let mut all_succeeded = true;

        for item in attempted {
            let (success, message) = self.verify_asset(item, target_project_id).await;
            if !success {
                all_succeeded = false;
                error!("核验失败 {}: {}", item.asset.name, message);
            }
            results.push(VerificationResult {
                asset_name: item.asset.name.clone(),
                success,
                message,
            });
        }

        BatchVerification {
            all_succeeded,
            results,
        }
    }

    async fn verify_asset(&self, item: &AttemptedAsset, target_project_id: &str) -> (bool, String) {
        let expected = target_name(&item.asset.name);

        let assets = match self.service.list_assets(Some(target_project_id)).await {
            Ok(a) => a,
            Err(e) => return (false, format!("{}: {}", MSG_ERROR, e)),
        };
        // 同名资产可能分布在不同文件夹
        let candidates: Vec<Asset> = assets.into_iter().filter(|a| a.name == expected).collect();
        if candidates.is_empty() {
            return (false, format!("{}: {}", MSG_NOT_FOUND, expected));
        }

        let wanted = item.target_folder_id.as_ref();
        let found = match wanted {
            Some(_) => candidates.iter().find(|a| a.folder_id.as_ref() == wanted),
            None => candidates
                .iter()
                .find(|a| a.folder_id.is_none())
                .or_else(|| candidates.first()),
        };
        let Some(found) = found else {
            return (false, format!("{}: {}", MSG_WRONG_FOLDER, expected));
        };

        let scratch = match scratch_dir(self.temp_dir) {
            Ok(dir) => dir,
            Err(e) => return (false, format!("{}: {}", MSG_ERROR, e)),
        };
        match self.service.download(&found.id, &scratch, true).await {
            Ok(path) => {
                if tracing::enabled!(Level::DEBUG) {
                    log_digest(&expected, path).await;
                }
                (true, MSG_VERIFIED.to_string())
            }
            Err(e) => (false, format!("{}: {}", MSG_CONTENT_FAILED, e)),
        }
    }
}

/// 流式计算下载文件的 blake3，只用于诊断日志
async fn log_digest(name: &str, path: PathBuf) {
    let digest = tokio::task::spawn_blocking(move || -> io::Result<(u64, String)> {
        let mut file = File::open(&path)?;
        let mut hasher = blake3::Hasher::new();
        let len = io::copy(&mut file, &mut hasher)?;
        Ok((len, hasher.finalize().to_hex().to_string()))
    })
    .await;

    match digest {
        Ok(Ok((len, hex))) => {
            debug!("核验下载 {} ({} 字节, blake3 {})", name, len, hex)
        }
        Ok(Err(e)) => debug!("无法计算 {} 的摘要: {}", name, e),
        Err(e) => debug!("摘要任务失败 {}: {}", name, e),
    }
}
