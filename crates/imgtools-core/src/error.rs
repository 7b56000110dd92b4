//! 错误定义模块

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// imgtools 统一错误类型
#[derive(Error, Debug)]
pub enum ImgtoolsError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("DICOM处理错误: {0}")]
    Dicom(String),

    #[error("DICOM解析错误: {0}")]
    DicomParse(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("表格读写错误: {0}")]
    Table(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("无效查询: {0}")]
    InvalidQuery(String),

    #[error("查询依赖规则不满足: {modality} 需要链中先出现 {required} 之一")]
    DependencyViolation { modality: String, required: String },

    #[error("不支持的分组方式: {0}")]
    UnsupportedGrouping(String),

    #[error("等待索引锁超时: {path:?} (已等待 {waited:?})")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for ImgtoolsError {
    fn from(err: config::ConfigError) -> Self {
        ImgtoolsError::Config(err.to_string())
    }
}

/// imgtools 统一结果类型
pub type Result<T> = std::result::Result<T, ImgtoolsError>;
