//! 配置管理
//!
//! 配置来源按优先级从低到高：内置默认值、TOML 配置文件、`IMGTOOLS__` 前缀的环境变量。
//! 命令行参数由调用方在加载后覆盖。

use crate::error::{ImgtoolsError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// imgtools 完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImgtoolsConfig {
    /// 爬取配置
    pub crawl: CrawlSettings,
    /// 索引持久化配置
    pub index: IndexSettings,
    /// 森林构建与查询配置
    pub interlacer: InterlacerSettings,
}

/// 单个序列提取失败时的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 从表中省略
    Skip,
    /// 保留标识信息并标记错误
    #[default]
    Flag,
}

/// 旧式引用解析出现多个候选序列时的策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// 取出现次数最多的序列，并记录歧义
    #[default]
    MostFrequent,
    /// 视为未引用
    Unreferenced,
}

/// 构建父子边的分组方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    ReferencedSeries,
    Study,
    Patient,
}

/// 爬取配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    /// 并行工作线程数
    pub n_jobs: usize,
    /// DICOM 文件扩展名（不区分大小写）
    pub extensions: Vec<String>,
    /// 忽略已有索引，重新提取全部序列
    pub force: bool,
    pub failure_policy: FailurePolicy,
    pub ambiguity_policy: AmbiguityPolicy,
}

/// 索引持久化配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// 覆盖默认的旁路目录
    pub sidecar_dir: Option<PathBuf>,
    /// 等待索引锁的最长时间（秒）
    pub lock_timeout_secs: u64,
    /// 重试获取锁的间隔（毫秒）
    pub lock_retry_ms: u64,
    /// 锁文件超过该时长未更新即视为残留（秒）
    pub stale_lock_secs: u64,
}

/// 森林构建与查询配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterlacerSettings {
    pub group_by: GroupBy,
    /// 查询结果按根节点合并
    pub group_by_root: bool,
}

/// 默认并行度：可用核心数
pub fn default_n_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            n_jobs: default_n_jobs(),
            extensions: vec!["dcm".to_string()],
            force: false,
            failure_policy: FailurePolicy::default(),
            ambiguity_policy: AmbiguityPolicy::default(),
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            sidecar_dir: None,
            lock_timeout_secs: 30,
            lock_retry_ms: 100,
            stale_lock_secs: 600,
        }
    }
}

impl IndexSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }

    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }
}

impl ImgtoolsConfig {
    /// 加载配置：可选的配置文件叠加环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("IMGTOOLS")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("crawl.extensions")
                    .try_parsing(true),
            )
            .build()?;

        let config: ImgtoolsConfig = settings.try_deserialize()?;
        ConfigValidator::new().validate(&config)?;

        match config_path {
            Some(path) => info!("配置加载完成: {}", path),
            None => info!("使用默认配置与环境变量"),
        }
        Ok(config)
    }

    /// 序列化为 TOML，便于生成配置模板
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ImgtoolsError::Config(format!("无法序列化配置: {}", e)))
    }
}

/// 验证规则
struct ValidationRule {
    field_path: &'static str,
    validator: fn(&ImgtoolsConfig) -> std::result::Result<(), String>,
}

/// 配置验证器
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "crawl.n_jobs",
                validator: |config| {
                    if config.crawl.n_jobs == 0 {
                        Err("并行度不能为 0".to_string())
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "crawl.extensions",
                validator: |config| {
                    if config.crawl.extensions.iter().all(|e| e.trim().is_empty()) {
                        Err("至少需要一个文件扩展名".to_string())
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "index.lock_timeout_secs",
                validator: |config| {
                    if config.index.lock_timeout_secs == 0 {
                        Err("锁等待时间不能为 0".to_string())
                    } else {
                        Ok(())
                    }
                },
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &ImgtoolsConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("配置验证失败 {}: {}", rule.field_path, e);
                return Err(ImgtoolsError::Config(format!("{}: {}", rule.field_path, e)));
            }
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}
