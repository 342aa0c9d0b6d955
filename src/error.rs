//! 错误类型
//!
//! `ServiceError` 描述内容服务调用失败，`TransferError` 描述迁移流程中
//! 会传播给调用方的错误。单个资产的传输失败在重试循环内消化，不会出现在这里。

use std::path::PathBuf;

/// 内容服务错误
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("'{name}' already exists in the target location")]
    AlreadyExists { name: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("invalid service configuration: {0}")]
    Config(String),
}

impl ServiceError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ServiceError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ServiceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// 迁移流程错误
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("project '{0}' not found")]
    ProjectNotFound(String),

    #[error("no matching assets found in source project '{0}'")]
    NoMatchingAssets(String),

    #[error("asset '{name}' not found in source project '{project}'")]
    AssetNotFound { name: String, project: String },

    #[error(transparent)]
    Service(ServiceError),

    #[error("failed to initialize logs: {0}")]
    LogInit(#[source] std::io::Error),

    #[error("failed to read log {path:?}: {message}")]
    LogRead { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to {operation}: {source}")]
    TransferFailed {
        operation: String,
        #[source]
        source: Box<TransferError>,
    },
}

/// 错误种类，忽略 `TransferFailed` 包装层
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    ProjectNotFound,
    NoMatchingAssets,
    AssetNotFound,
    Service,
    Log,
    Config,
}

impl TransferError {
    /// 将引擎层错误包装为单一的 `TransferFailed`
    pub fn failed(operation: impl Into<String>, source: TransferError) -> Self {
        match source {
            // 认证失败在任何传输之前就应直接暴露
            TransferError::Authentication(_) | TransferError::TransferFailed { .. } => source,
            other => TransferError::TransferFailed {
                operation: operation.into(),
                source: Box::new(other),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Authentication(_) => ErrorKind::Authentication,
            TransferError::ProjectNotFound(_) => ErrorKind::ProjectNotFound,
            TransferError::NoMatchingAssets(_) => ErrorKind::NoMatchingAssets,
            TransferError::AssetNotFound { .. } => ErrorKind::AssetNotFound,
            TransferError::Service(_) => ErrorKind::Service,
            TransferError::LogInit(_) | TransferError::LogRead { .. } => ErrorKind::Log,
            TransferError::Config(_) => ErrorKind::Config,
            TransferError::TransferFailed { source, .. } => source.kind(),
        }
    }
}

impl From<ServiceError> for TransferError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Authentication(msg) => TransferError::Authentication(msg),
            other => TransferError::Service(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_keeps_inner_kind() {
        let err = TransferError::failed("copy assets", TransferError::ProjectNotFound("X".into()));
        assert!(matches!(err, TransferError::TransferFailed { .. }));
        assert_eq!(err.kind(), ErrorKind::ProjectNotFound);
        assert_eq!(err.to_string(), "failed to copy assets: project 'X' not found");
    }

    #[test]
    fn test_failed_does_not_double_wrap() {
        let once = TransferError::failed("a", TransferError::Config("bad".into()));
        let twice = TransferError::failed("b", once);
        match twice {
            TransferError::TransferFailed { operation, source } => {
                assert_eq!(operation, "a");
                assert_eq!(source.kind(), ErrorKind::Config);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_authentication_is_not_wrapped() {
        let err: TransferError = ServiceError::Authentication("401".into()).into();
        let err = TransferError::failed("copy assets", err);
        assert!(matches!(err, TransferError::Authentication(_)));
    }
}
