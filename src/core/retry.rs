//! 基于失败日志的重试
//!
//! 按失败日志的行序逐个重试，每个名称只尝试一次。日志不会被重建，
//! 已经重试成功的旧失败行依然保留在失败日志中。

use crate::core::engine::TransferEngine;
use crate::core::logstore::ErrorRecord;
use crate::error::TransferError;
use serde::Serialize;
use tracing::{error, info, warn};

/// 重试汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct RetryPass<'a> {
    engine: &'a TransferEngine,
}

impl<'a> RetryPass<'a> {
    pub fn new(engine: &'a TransferEngine) -> Self {
        Self { engine }
    }

    pub async fn run(
        &self,
        source_project: &str,
        target_project: &str,
    ) -> Result<RetryReport, TransferError> {
        let logs = self.engine.logs();
        if !logs.error_path().exists() {
            warn!("失败日志不存在: {:?}", logs.error_path());
            return Ok(RetryReport::default());
        }

        let names = logs
            .failed_asset_names()
            .map_err(|e| TransferError::failed("retry failed assets", e))?;
        info!("重试 {} 个失败资产", names.len());

        let mut report = RetryReport::default();
        for name in &names {
            report.attempted += 1;
            match self
                .engine
                .transfer_one(source_project, target_project, name)
                .await
            {
                Ok(()) => report.succeeded += 1,
                // 认证失败时后续重试也不会成功
                Err(e @ TransferError::Authentication(_)) => return Err(e),
                Err(e) => {
                    report.failed += 1;
                    error!("重试失败 {}: {}", name, e);
                    logs.append_error(&ErrorRecord::new(name, "", &e.to_string(), 1));
                }
            }
        }

        info!(
            "重试完成: 成功 {}, 失败 {}",
            report.succeeded, report.failed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::core::engine::Selection;
    use crate::core::logstore::LogStore;
    use crate::service::memory::{MemoryContentService, Op};
    use std::sync::Arc;

    fn setup(dir: &std::path::Path) -> (Arc<MemoryContentService>, TransferEngine) {
        let service = Arc::new(MemoryContentService::new());
        let source = service.add_project("Source");
        service.add_project("Target");
        for name in ["A", "D", "E"] {
            service.add_asset(&source, "Team", name, name.as_bytes());
        }
        let logs = LogStore::new(
            dir.join("success_log.csv"),
            dir.join("error_log.csv"),
            dir.join("temp"),
        );
        let config = TransferConfig::new(10, 2, 0).unwrap();
        let engine = TransferEngine::new(service.clone(), logs, config).unwrap();
        (service, engine)
    }

    #[tokio::test]
    async fn test_retry_keeps_stale_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (service, engine) = setup(dir.path());
        engine.logs().init().unwrap();
        service.fail(Op::Publish, "D - Copy", 2);

        let summary = engine
            .transfer_all("Source", "Target", &Selection::All)
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);

        let report = RetryPass::new(&engine).run("Source", "Target").await.unwrap();
        assert_eq!(
            report,
            RetryReport {
                attempted: 1,
                succeeded: 1,
                failed: 0
            }
        );

        let stats = engine.logs().statistics().unwrap();
        assert_eq!(stats.successful, 3);
        // 旧的失败行不会被清除
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.failed_assets, vec!["D".to_string()]);
        let retried = engine.logs().read_successes().unwrap();
        assert_eq!(retried.last().unwrap().source_folder_path, "Team");
    }

    #[tokio::test]
    async fn test_retry_failures_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let (service, engine) = setup(dir.path());
        let logs = engine.logs();
        logs.init().unwrap();
        logs.append_error(&ErrorRecord::new("D", "Team", "boom", 2));
        logs.append_error(&ErrorRecord::new("Gone", "", "boom", 2));
        logs.append_error(&ErrorRecord::new("D", "Team", "boom", 2));
        service.fail_always(Op::Publish, "D - Copy");

        let report = RetryPass::new(&engine).run("Source", "Target").await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.failed, 3);
        // 每个名称只尝试一次，不走重试循环
        assert_eq!(service.calls("publish"), 2);

        let errors = logs.read_errors().unwrap();
        assert_eq!(errors.len(), 6);
        let appended = &errors[3..];
        assert!(appended.iter().all(|e| e.attempt == 1 && e.source_folder_path.is_empty()));
        assert!(appended[1].error.contains("not found"));
    }

    #[tokio::test]
    async fn test_missing_error_log_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (service, engine) = setup(dir.path());

        let report = RetryPass::new(&engine).run("Source", "Target").await.unwrap();
        assert_eq!(report, RetryReport::default());
        assert_eq!(service.calls("list_projects"), 0);
        assert!(!engine.logs().error_path().exists());
    }
}
