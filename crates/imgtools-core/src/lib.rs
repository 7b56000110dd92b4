//! # imgtools Core
//!
//! 核心模块，提供序列元数据模型、统一错误定义、配置加载、索引表读写和DICOM日期/UID工具。

pub mod config;
pub mod error;
pub mod models;
pub mod table;
pub mod utils;

pub use config::{AmbiguityPolicy, FailurePolicy, GroupBy, ImgtoolsConfig};
pub use error::{ImgtoolsError, Result};
pub use models::*;
