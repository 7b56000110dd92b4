//! # DICOM 数据集爬取模块
//!
//! 遍历目录树，按序列分组并行提取元数据，解析派生对象之间的引用，
//! 并把完整元数据表与精简索引表写入旁路目录。

pub mod crawler;
pub mod discovery;
pub mod grouping;
pub mod resolver;
pub mod sidecar;
pub mod summary;
pub mod tables;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use crawler::{crawl, CancelToken, CrawlOptions, CrawlOutput, Crawler};
pub use sidecar::{Sidecar, SidecarPaths};
pub use summary::CrawlSummary;
