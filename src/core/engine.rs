use crate::config::TransferConfig;
use crate::core::folders::FolderReplicator;
use crate::core::logstore::{ErrorRecord, LogStore, SuccessRecord};
use crate::core::scratch::{dir_size, scratch_dir};
use crate::core::target_name;
use crate::core::verify::{AttemptedAsset, BatchVerification, Verifier};
use crate::error::{ServiceError, TransferError};
use crate::service::{Asset, ContentService, Project, PublishMode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 要复制的资产范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// 源项目中的全部资产
    All,
    /// 只复制名称在列表中的资产
    Named(Vec<String>),
}

/// 引擎发布给订阅方的事件，引擎从不等待订阅方处理
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    BatchStarted {
        batch: usize,
        batches: usize,
        size: usize,
    },
    /// 已处理（成功或最终失败）的资产数 / 总数
    Progress { current: usize, total: usize },
    BatchVerified {
        batch: usize,
        verification: BatchVerification,
    },
    /// 批次结束后的等待
    Pausing { delay: Duration },
}

/// 单个资产在一次运行中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssetState {
    Pending,
    Downloading,
    FolderReplicating,
    Publishing,
    Succeeded,
    RetryPending,
    Failed,
}

impl std::fmt::Display for AssetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetState::Pending => write!(f, "pending"),
            AssetState::Downloading => write!(f, "downloading"),
            AssetState::FolderReplicating => write!(f, "folder_replicating"),
            AssetState::Publishing => write!(f, "publishing"),
            AssetState::Succeeded => write!(f, "succeeded"),
            AssetState::RetryPending => write!(f, "retry_pending"),
            AssetState::Failed => write!(f, "failed"),
        }
    }
}

/// 运行汇总；单个资产的失败只体现在这里、日志和核验结果中
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub batches: usize,
    pub verification_failures: usize,
}

/// 一次尝试成功后的结果
struct AttemptSuccess {
    folder_path: String,
    target_folder_id: Option<String>,
    new_name: String,
    size_bytes: u64,
}

/// 一次尝试失败时已知的信息
struct AttemptFailure {
    phase: AssetState,
    folder_path: Option<String>,
    target_folder_id: Option<String>,
    error: ServiceError,
}

impl AttemptFailure {
    fn at(phase: AssetState, error: ServiceError) -> Self {
        Self {
            phase,
            folder_path: None,
            target_folder_id: None,
            error,
        }
    }

    fn with_path(mut self, folder_path: &str) -> Self {
        self.folder_path = Some(folder_path.to_string());
        self
    }

    fn with_target(mut self, target_folder_id: Option<String>) -> Self {
        self.target_folder_id = target_folder_id;
        self
    }
}

/// 单个资产的最终结果
struct AssetOutcome {
    state: AssetState,
    target_folder_id: Option<String>,
}

/// 迁移引擎：按批次顺序处理资产，一次只有一个远程调用在进行
pub struct TransferEngine {
    service: Arc<dyn ContentService>,
    logs: LogStore,
    config: TransferConfig,
    events: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl TransferEngine {
    pub fn new(
        service: Arc<dyn ContentService>,
        logs: LogStore,
        config: TransferConfig,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            service,
            logs,
            config,
            events: None,
        })
    }

    /// 订阅进度与核验事件
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TransferEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn logs(&self) -> &LogStore {
        &self.logs
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// 复制源项目中选中的资产到目标项目
    ///
    /// 只有项目解析、资产枚举等引擎层错误会返回 `Err`（包装为 `TransferFailed`）；
    /// 单个资产的失败写入失败日志后继续。
    pub async fn transfer_all(
        &self,
        source_project: &str,
        target_project: &str,
        selection: &Selection,
    ) -> Result<RunSummary, TransferError> {
        self.run_batches(source_project, target_project, selection)
            .await
            .map_err(|e| {
                error!("复制过程出现致命错误: {}", e);
                TransferError::failed("copy assets", e)
            })
    }

    async fn run_batches(
        &self,
        source_project: &str,
        target_project: &str,
        selection: &Selection,
    ) -> Result<RunSummary, TransferError> {
        let source = self.resolve_project(source_project).await?;
        let target = self.resolve_project(target_project).await?;
        if source.id == target.id {
            return Err(TransferError::Config(
                "source and target projects must differ".to_string(),
            ));
        }

        let mut assets = self.service.list_assets(Some(&source.id)).await?;
        if let Selection::Named(names) = selection {
            assets.retain(|a| names.iter().any(|n| n == &a.name));
            if assets.is_empty() {
                return Err(TransferError::NoMatchingAssets(source.name));
            }
        }

        let total = assets.len();
        let batch_size = self.config.batch_size;
        let batches = total.div_ceil(batch_size);
        let delay = self.config.inter_batch_delay();
        info!("找到 {} 个待复制资产，共 {} 批", total, batches);

        let mut summary = RunSummary {
            total,
            batches,
            ..RunSummary::default()
        };
        let mut processed = 0usize;

        for (index, batch) in assets.chunks(batch_size).enumerate() {
            let batch_no = index + 1;
            info!("处理第 {} 批 ({} 个资产)", batch_no, batch.len());
            self.emit(TransferEvent::BatchStarted {
                batch: batch_no,
                batches,
                size: batch.len(),
            });

            let mut attempted = Vec::with_capacity(batch.len());
            for asset in batch {
                let outcome = self.transfer_with_retry(asset, &target).await;
                match outcome.state {
                    AssetState::Succeeded => summary.succeeded += 1,
                    _ => summary.failed += 1,
                }
                processed += 1;
                self.emit(TransferEvent::Progress {
                    current: processed,
                    total,
                });
                attempted.push(AttemptedAsset {
                    asset: asset.clone(),
                    target_folder_id: outcome.target_folder_id,
                });
            }

            info!("正在核验第 {} 批...", batch_no);
            let verification = Verifier::new(self.service.as_ref(), self.logs.temp_dir())
                .verify_batch(&attempted, &target.id)
                .await;
            if !verification.all_succeeded {
                warn!("第 {} 批核验发现问题，请查看核验结果", batch_no);
            }
            summary.verification_failures += verification.failures();
            self.emit(TransferEvent::BatchVerified {
                batch: batch_no,
                verification,
            });

            info!("批次间等待 {}s...", delay.as_secs());
            self.emit(TransferEvent::Pausing { delay });
            tokio::time::sleep(delay).await;
        }

        info!(
            "复制完成: 成功 {}, 失败 {}, 核验失败 {}",
            summary.succeeded, summary.failed, summary.verification_failures
        );
        Ok(summary)
    }

    /// 单资产复制：一次尝试，不重试不核验，供重试流程使用
    pub async fn transfer_one(
        &self,
        source_project: &str,
        target_project: &str,
        asset_name: &str,
    ) -> Result<(), TransferError> {
        let source = self.resolve_project(source_project).await?;
        let target = self.resolve_project(target_project).await?;

        let asset = self
            .service
            .list_assets(Some(&source.id))
            .await?
            .into_iter()
            .find(|a| a.name == asset_name)
            .ok_or_else(|| TransferError::AssetNotFound {
                name: asset_name.to_string(),
                project: source.name.clone(),
            })?;

        info!("重试: {}", asset.name);
        match self.attempt(&asset, &target).await {
            Ok(done) => {
                self.logs.append_success(&SuccessRecord::new(
                    &asset.name,
                    &done.folder_path,
                    &done.new_name,
                    done.size_bytes,
                ));
                Ok(())
            }
            Err(failure) => {
                debug!("{} 在 {} 阶段失败", asset.name, failure.phase);
                Err(failure.error.into())
            }
        }
    }

    async fn resolve_project(&self, name: &str) -> Result<Project, TransferError> {
        self.service
            .list_projects()
            .await?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| TransferError::ProjectNotFound(name.to_string()))
    }

    /// 带重试的单资产复制；失败不会向上传播
    async fn transfer_with_retry(&self, asset: &Asset, target: &Project) -> AssetOutcome {
        let limit = self.config.retry_limit;
        let mut state = AssetState::Pending;
        let mut attempt = 0u32;
        let mut last_path: Option<String> = None;
        let mut last_target: Option<String> = None;

        loop {
            attempt += 1;
            debug!("{}: {} -> 第 {} 次尝试", asset.name, state, attempt);

            match self.attempt(asset, target).await {
                Ok(done) => {
                    self.logs.append_success(&SuccessRecord::new(
                        &asset.name,
                        &done.folder_path,
                        &done.new_name,
                        done.size_bytes,
                    ));
                    return AssetOutcome {
                        state: AssetState::Succeeded,
                        target_folder_id: done.target_folder_id,
                    };
                }
                Err(failure) => {
                    if failure.folder_path.is_some() {
                        last_path = failure.folder_path;
                    }
                    if failure.target_folder_id.is_some() {
                        last_target = failure.target_folder_id;
                    }

                    if attempt < limit {
                        state = AssetState::RetryPending;
                        warn!(
                            "第 {} 次尝试失败 {} ({}): {}",
                            attempt, asset.name, failure.phase, failure.error
                        );
                        continue;
                    }

                    self.logs.append_error(&ErrorRecord::new(
                        &asset.name,
                        last_path.as_deref().unwrap_or_default(),
                        &failure.error.to_string(),
                        attempt,
                    ));
                    return AssetOutcome {
                        state: AssetState::Failed,
                        target_folder_id: last_target,
                    };
                }
            }
        }
    }

    /// 一次完整尝试：查询 → 下载 → 复制文件夹 → 发布
    ///
    /// 下载的临时目录由 guard 持有，函数返回时无论成败都会删除。
    async fn attempt(&self, asset: &Asset, target: &Project) -> Result<AttemptSuccess, AttemptFailure> {
        use AssetState::*;

        let current = self
            .service
            .get_asset(&asset.id)
            .await
            .map_err(|e| AttemptFailure::at(Downloading, e))?;
        let folder_path = match current.folder_id.as_deref() {
            Some(id) => {
                self.service
                    .get_folder(id)
                    .await
                    .map_err(|e| AttemptFailure::at(Downloading, e))?
                    .path
            }
            None => String::new(),
        };

        info!("下载: {}", display_name(&folder_path, &asset.name));
        let temp_root = self.logs.temp_dir();
        let scratch = scratch_dir(temp_root).map_err(|e| {
            AttemptFailure::at(Downloading, ServiceError::io(temp_root, e)).with_path(&folder_path)
        })?;
        let local = self
            .service
            .download(&asset.id, &scratch, true)
            .await
            .map_err(|e| AttemptFailure::at(Downloading, e).with_path(&folder_path))?;

        let target_folder_id = FolderReplicator::new(self.service.as_ref())
            .ensure_folder(&target.id, &folder_path)
            .await
            .map_err(|e| AttemptFailure::at(FolderReplicating, e).with_path(&folder_path))?;

        let new_name = target_name(&asset.name);
        self.service
            .publish(
                &local,
                &new_name,
                &target.id,
                target_folder_id.as_deref(),
                PublishMode::CreateNew,
            )
            .await
            .map_err(|e| {
                AttemptFailure::at(Publishing, e)
                    .with_path(&folder_path)
                    .with_target(target_folder_id.clone())
            })?;
        info!("已复制: {}", display_name(&folder_path, &new_name));

        Ok(AttemptSuccess {
            size_bytes: dir_size(&scratch),
            folder_path,
            target_folder_id,
            new_name,
        })
    }
}

fn display_name(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}
