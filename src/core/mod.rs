pub mod engine;
pub mod folders;
pub mod logstore;
pub mod retry;
pub mod scratch;
pub mod verify;

pub use engine::{AssetState, RunSummary, Selection, TransferEngine, TransferEvent};
pub use folders::FolderReplicator;
pub use logstore::{ErrorRecord, LogStatistics, LogStore, SuccessRecord};
pub use retry::{RetryPass, RetryReport};
pub use verify::{AttemptedAsset, BatchVerification, VerificationResult, Verifier};

/// 复制到目标端后的资产名称
pub fn target_name(source_name: &str) -> String {
    format!("{} - Copy", source_name)
}
