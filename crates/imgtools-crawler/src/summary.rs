//! 爬取统计

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// 无法读取或缺少必需标识的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidFile {
    pub path: String,
    pub reason: String,
}

/// 提取失败的序列
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedSeries {
    pub series_uid: String,
    pub sub_series: String,
    pub folder: String,
    pub modality: String,
    pub error: String,
}

/// 文件跨目录的序列
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitSeriesReport {
    pub series: String,
    pub folders: Vec<String>,
}

/// 一次爬取的汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlSummary {
    pub files_found: usize,
    /// 遍历时无法读取的目录或文件
    pub unreadable_paths: Vec<InvalidFile>,
    pub invalid_files: Vec<InvalidFile>,
    pub series_found: usize,
    pub extracted: usize,
    /// 沿用上次索引、未重新提取的序列
    pub reused: usize,
    pub failed: Vec<FailedSeries>,
    /// 因取消而未处理的序列
    pub cancelled: usize,
    pub ambiguous_references: usize,
    pub split_series: Vec<SplitSeriesReport>,
    pub elapsed: Duration,
}

impl CrawlSummary {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled > 0
    }

    /// 是否存在需要人工关注的问题
    pub fn has_issues(&self) -> bool {
        !self.invalid_files.is_empty()
            || !self.unreadable_paths.is_empty()
            || !self.failed.is_empty()
            || self.ambiguous_references > 0
            || !self.split_series.is_empty()
    }
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "爬取完成，用时 {:.2}s", self.elapsed.as_secs_f64())?;
        writeln!(
            f,
            "  文件: {} (无效 {}, 无法读取的路径 {})",
            self.files_found,
            self.invalid_files.len(),
            self.unreadable_paths.len()
        )?;
        writeln!(
            f,
            "  序列: {} (提取 {}, 沿用 {}, 失败 {}, 取消 {})",
            self.series_found,
            self.extracted,
            self.reused,
            self.failed.len(),
            self.cancelled
        )?;
        if self.ambiguous_references > 0 {
            writeln!(f, "  歧义引用: {}", self.ambiguous_references)?;
        }
        for failure in &self.failed {
            writeln!(
                f,
                "  失败: {} [{}] {}: {}",
                failure.series_uid, failure.modality, failure.folder, failure.error
            )?;
        }
        for split in &self.split_series {
            writeln!(f, "  跨目录序列: {} -> {}", split.series, split.folders.join(", "))?;
        }
        for invalid in &self.invalid_files {
            writeln!(f, "  无效文件: {}: {}", invalid.path, invalid.reason)?;
        }
        for unreadable in &self.unreadable_paths {
            writeln!(f, "  无法读取: {}: {}", unreadable.path, unreadable.reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let summary = CrawlSummary {
            files_found: 4,
            invalid_files: vec![InvalidFile {
                path: "bad.dcm".into(),
                reason: "无法解析".into(),
            }],
            series_found: 2,
            extracted: 1,
            failed: vec![FailedSeries {
                series_uid: "1.2.3".into(),
                sub_series: "1".into(),
                folder: "p1/ct".into(),
                modality: "CT".into(),
                error: "截断".into(),
            }],
            ..CrawlSummary::default()
        };

        let text = summary.to_string();
        assert!(text.contains("文件: 4 (无效 1, 无法读取的路径 0)"));
        assert!(text.contains("失败: 1.2.3 [CT] p1/ct: 截断"));
        assert!(!text.contains("歧义引用"));
        assert!(summary.has_issues());
        assert!(!summary.is_cancelled());
    }

    #[test]
    fn test_unreadable_paths_count_as_issues() {
        let summary = CrawlSummary {
            files_found: 1,
            unreadable_paths: vec![InvalidFile {
                path: "locked".into(),
                reason: "Permission denied".into(),
            }],
            ..CrawlSummary::default()
        };

        let text = summary.to_string();
        assert!(text.contains("无法读取的路径 1"));
        assert!(text.contains("无法读取: locked: Permission denied"));
        assert!(summary.has_issues());
    }
}
