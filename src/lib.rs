//! 批量迁移内容服务器上的工作簿：分批复制、逐个重试、复制文件夹结构，
//! 并以 CSV 记录每个资产的结果。

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod service;

pub use config::{AppConfig, ServiceConfig, ServiceType, TransferConfig};
pub use core::{
    LogStatistics, LogStore, RetryPass, RetryReport, RunSummary, Selection, TransferEngine,
    TransferEvent,
};
pub use error::{ErrorKind, ServiceError, TransferError};
pub use service::{create_service, Asset, ContentService, Folder, Project};
