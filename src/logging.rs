//! 诊断日志 - 文件日志和大小管理
//!
//! 这里是进程自身的运行日志（`bulkcopier.log`），与迁移结果的 CSV 记录无关。

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

/// 诊断日志文件名
pub const LOG_FILE: &str = "bulkcopier.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否写入日志文件
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 日志目录，默认为工作目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
            dir: None,
        }
    }
}

impl LogConfig {
    /// 从配置文件的 `log` 分节加载
    pub fn load(config_file: &Path) -> Self {
        crate::config::read_config_value(config_file)
            .get("log")
            .and_then(|v| serde_json::from_value::<LogConfig>(v.clone()).ok())
            .unwrap_or_default()
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

struct WriterState {
    file_path: PathBuf,
    max_size: u64,
    written: u64,
    writer: Option<BufWriter<File>>,
}

impl WriterState {
    fn open(file_path: &Path) -> io::Result<(BufWriter<File>, u64)> {
        let file = OpenOptions::new().create(true).append(true).open(file_path)?;
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok((BufWriter::new(file), len))
    }

    /// 当前文件改名为 `.old` 后重新打开
    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }
        let backup_path = self.file_path.with_extension("log.old");
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(&self.file_path, &backup_path)?;
        let (writer, len) = Self::open(&self.file_path)?;
        self.writer = Some(writer);
        self.written = len;
        Ok(())
    }
}

/// 带大小限制的日志写入器
#[derive(Clone)]
pub struct SizeRotatingWriter {
    state: Arc<Mutex<WriterState>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE);
        let max_size = u64::from(max_size_mb.max(1)) * 1024 * 1024;
        let (writer, written) = WriterState::open(&file_path)?;

        let mut state = WriterState {
            file_path,
            max_size,
            written,
            writer: Some(writer),
        };
        // 启动时已超限则先轮转
        if state.written > state.max_size {
            state.rotate()?;
        }

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 单次写入句柄
pub struct LogWriter {
    inner: SizeRotatingWriter,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.inner.lock();
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::other("Writer not available"))?;
        let n = writer.write(buf)?;
        writer.flush()?;
        state.written += n as u64;

        if state.written > state.max_size {
            // 轮转失败不影响本次写入
            let _ = state.rotate();
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.lock().writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.clone(),
        }
    }
}
