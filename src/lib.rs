//! # imgtools
//!
//! 汇总各子 crate 的入口，供演示程序与下游直接依赖单个包使用。

pub use imgtools_core;
pub use imgtools_crawler;
pub use imgtools_dicom;
pub use imgtools_interlacer;

pub use imgtools_core::{ImgtoolsConfig, ImgtoolsError, IndexEntry, Modality, Result, SeriesRecord};
pub use imgtools_crawler::{crawl, CancelToken, CrawlOptions, CrawlOutput, Crawler};
pub use imgtools_interlacer::{Branch, Interlacer, QueryOptions};
