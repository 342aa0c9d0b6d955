//! 迁移结果记录
//!
//! 成功与失败各写一个 CSV 文件，首行为表头，只追加。每次复制运行开始时截断重建，
//! 重试不会重建，因此旧的失败行会一直保留。

use crate::error::TransferError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const SUCCESS_HEADER: [&str; 6] = [
    "AssetName",
    "SourceFolderPath",
    "NewName",
    "Status",
    "Timestamp",
    "SizeKB",
];
pub const ERROR_HEADER: [&str; 5] = ["AssetName", "SourceFolderPath", "Error", "Timestamp", "Attempt"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 当前时间戳
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// 成功记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessRecord {
    #[serde(rename = "AssetName")]
    pub asset_name: String,
    #[serde(rename = "SourceFolderPath")]
    pub source_folder_path: String,
    #[serde(rename = "NewName")]
    pub new_name: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "SizeKB")]
    pub size_kb: String,
}

impl SuccessRecord {
    pub fn new(asset_name: &str, source_folder_path: &str, new_name: &str, size_bytes: u64) -> Self {
        Self {
            asset_name: asset_name.to_string(),
            source_folder_path: source_folder_path.to_string(),
            new_name: new_name.to_string(),
            status: "Success".to_string(),
            timestamp: timestamp(),
            size_kb: format!("{:.2}", size_bytes as f64 / 1024.0),
        }
    }

    pub fn size_kb(&self) -> Option<f64> {
        self.size_kb.parse().ok()
    }
}

/// 失败记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(rename = "AssetName")]
    pub asset_name: String,
    #[serde(rename = "SourceFolderPath")]
    pub source_folder_path: String,
    #[serde(rename = "Error")]
    pub error: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Attempt")]
    pub attempt: u32,
}

impl ErrorRecord {
    pub fn new(asset_name: &str, source_folder_path: &str, error: &str, attempt: u32) -> Self {
        Self {
            asset_name: asset_name.to_string(),
            source_folder_path: source_folder_path.to_string(),
            error: error.to_string(),
            timestamp: timestamp(),
            attempt,
        }
    }
}

/// 日志统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStatistics {
    pub successful: usize,
    pub failed: usize,
    /// 成功记录的平均大小（KB），没有成功记录时为 None
    pub average_size_kb: Option<f64>,
    pub failed_assets: Vec<String>,
}

/// 成功/失败日志文件
#[derive(Debug, Clone)]
pub struct LogStore {
    success_path: PathBuf,
    error_path: PathBuf,
    temp_dir: PathBuf,
}

impl LogStore {
    pub fn new(
        success_path: impl Into<PathBuf>,
        error_path: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            success_path: success_path.into(),
            error_path: error_path.into(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn success_path(&self) -> &Path {
        &self.success_path
    }

    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// 截断两个日志并写入表头，同时确保临时目录存在
    pub fn init(&self) -> Result<(), TransferError> {
        let result = (|| -> io::Result<()> {
            fs::create_dir_all(&self.temp_dir)?;
            write_header(&self.success_path, &SUCCESS_HEADER)?;
            write_header(&self.error_path, &ERROR_HEADER)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                info!("日志文件已初始化");
                Ok(())
            }
            Err(e) => {
                error!("初始化日志失败: {}", e);
                Err(TransferError::LogInit(e))
            }
        }
    }

    /// 追加成功记录，写入失败只记录诊断日志
    pub fn append_success(&self, record: &SuccessRecord) {
        match append_row(&self.success_path, record) {
            Ok(()) => info!(
                "复制成功: {} -> {}",
                display_path(&record.source_folder_path, &record.asset_name),
                record.new_name
            ),
            Err(e) => error!("写入成功记录失败 {}: {}", record.asset_name, e),
        }
    }

    /// 追加失败记录，写入失败只记录诊断日志
    pub fn append_error(&self, record: &ErrorRecord) {
        match append_row(&self.error_path, record) {
            Ok(()) => error!(
                "复制失败 {} (第 {} 次尝试): {}",
                display_path(&record.source_folder_path, &record.asset_name),
                record.attempt,
                record.error
            ),
            Err(e) => error!("写入失败记录失败 {}: {}", record.asset_name, e),
        }
    }

    pub fn read_successes(&self) -> Result<Vec<SuccessRecord>, TransferError> {
        read_rows(&self.success_path)
    }

    pub fn read_errors(&self) -> Result<Vec<ErrorRecord>, TransferError> {
        read_rows(&self.error_path)
    }

    /// 失败日志中的资产名称，按行序保留重复
    pub fn failed_asset_names(&self) -> Result<Vec<String>, TransferError> {
        if !self.error_path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.error_path)
            .map_err(|e| log_read_error(&self.error_path, e))?;

        let mut names = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| log_read_error(&self.error_path, e))?;
            if let Some(name) = row.get(0).filter(|n| !n.is_empty()) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    pub fn statistics(&self) -> Result<LogStatistics, TransferError> {
        let successes = self.read_successes()?;
        let errors = self.read_errors()?;

        let sizes: Vec<f64> = successes.iter().filter_map(SuccessRecord::size_kb).collect();
        let average_size_kb =
            (!sizes.is_empty()).then(|| sizes.iter().sum::<f64>() / sizes.len() as f64);

        let failed_assets: BTreeSet<String> =
            errors.iter().map(|e| e.asset_name.clone()).collect();

        Ok(LogStatistics {
            successful: successes.len(),
            failed: errors.len(),
            average_size_kb,
            failed_assets: failed_assets.into_iter().collect(),
        })
    }
}

fn display_path(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

fn write_header(path: &Path, header: &[&str]) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(header)?;
    writer.flush()
}

fn append_row<T: Serialize>(path: &Path, record: &T) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer.serialize(record)?;
    writer.flush()
}

fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, TransferError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| log_read_error(path, e))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        match row {
            Ok(r) => rows.push(r),
            Err(e) => warn!("跳过无法解析的日志行 {:?}: {}", path, e),
        }
    }
    Ok(rows)
}

fn log_read_error(path: &Path, err: csv::Error) -> TransferError {
    TransferError::LogRead {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
