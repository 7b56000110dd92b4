//! 序列分组
//!
//! 按文件头内容（而不是目录）把文件归入序列。同一目录可以包含多个序列；
//! 一个序列的文件跨越多个目录时只记录，不强制。

use imgtools_core::{Modality, SeriesKey, DEFAULT_SUB_SERIES};
use imgtools_dicom::FileHeader;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::warn;

/// 一个待提取的序列
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesGroup {
    pub key: SeriesKey,
    pub patient_id: String,
    pub study_instance_uid: String,
    pub modality: Modality,
    /// 包含该序列大部分文件的目录
    pub folder: PathBuf,
    /// 用于提取元数据的代表文件
    pub representative: PathBuf,
    pub files: Vec<PathBuf>,
}

impl SeriesGroup {
    pub fn instances(&self) -> usize {
        self.files.len()
    }
}

/// 文件分布在多个目录中的序列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSeries {
    pub key: SeriesKey,
    pub folders: Vec<PathBuf>,
}

/// 分组结果
#[derive(Debug, Default)]
pub struct Grouping {
    pub groups: Vec<SeriesGroup>,
    pub split_series: Vec<SplitSeries>,
}

/// 将文件头分组为序列，结果按序列键排序
///
/// 调用方保证每个文件头都带有 SeriesInstanceUID。
pub fn group_series(headers: &[FileHeader]) -> Grouping {
    let mut by_series: BTreeMap<&str, Vec<&FileHeader>> = BTreeMap::new();
    for header in headers {
        if let Some(uid) = header.series_instance_uid.as_deref() {
            by_series.entry(uid).or_default().push(header);
        }
    }

    let mut by_key: BTreeMap<SeriesKey, Vec<&FileHeader>> = BTreeMap::new();
    for (uid, members) in by_series {
        let ranks = sub_series_ranks(&members);
        for header in members {
            let sub_series = ranks
                .as_ref()
                .and_then(|ranks| ranks.get(&header.acquisition_number).cloned())
                .unwrap_or_else(|| DEFAULT_SUB_SERIES.to_string());
            by_key
                .entry(SeriesKey::new(uid, sub_series))
                .or_default()
                .push(header);
        }
    }

    let mut grouping = Grouping::default();
    for (key, mut members) in by_key {
        members.sort_by(|a, b| a.path.cmp(&b.path));

        let mut folder_counts: BTreeMap<&Path, usize> = BTreeMap::new();
        for header in &members {
            *folder_counts.entry(parent_of(&header.path)).or_default() += 1;
        }

        // 文件最多的目录；数量相同时取路径较小者
        let mut folder = parent_of(&members[0].path);
        let mut best = 0;
        for (candidate, count) in &folder_counts {
            if *count > best {
                best = *count;
                folder = *candidate;
            }
        }

        if folder_counts.len() > 1 {
            warn!(
                "序列 {} 的文件分布在 {} 个目录中，使用 {}",
                key,
                folder_counts.len(),
                folder.display()
            );
            grouping.split_series.push(SplitSeries {
                key: key.clone(),
                folders: folder_counts.keys().map(|p| p.to_path_buf()).collect(),
            });
        }

        let representative = members
            .iter()
            .find(|h| parent_of(&h.path) == folder)
            .map(|h| h.path.clone())
            .unwrap_or_else(|| members[0].path.clone());

        grouping.groups.push(SeriesGroup {
            patient_id: first_value(&members, |h| h.patient_id.as_deref()),
            study_instance_uid: first_value(&members, |h| h.study_instance_uid.as_deref()),
            modality: members
                .iter()
                .find_map(|h| h.modality.as_deref())
                .map(Modality::parse)
                .unwrap_or_else(|| Modality::Other(String::new())),
            folder: folder.to_path_buf(),
            representative,
            files: members.iter().map(|h| h.path.clone()).collect(),
            key,
        });
    }

    grouping
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or(Path::new(""))
}

fn first_value<'a>(
    members: &[&'a FileHeader],
    field: impl Fn(&'a FileHeader) -> Option<&'a str>,
) -> String {
    members
        .iter()
        .find_map(|h| field(*h))
        .unwrap_or_default()
        .to_string()
}

/// 多次采集的 MR 序列：按 AcquisitionNumber 排名（从 1 开始）拆分子序列
fn sub_series_ranks(members: &[&FileHeader]) -> Option<BTreeMap<Option<String>, String>> {
    let is_mr = members
        .iter()
        .find_map(|h| h.modality.as_deref())
        .map(|m| Modality::parse(m) == Modality::MR)
        .unwrap_or(false);
    if !is_mr {
        return None;
    }

    let distinct: BTreeSet<&Option<String>> =
        members.iter().map(|h| &h.acquisition_number).collect();
    if distinct.len() < 2 {
        return None;
    }

    let mut ordered: Vec<&Option<String>> = distinct.into_iter().collect();
    ordered.sort_by_key(|value| acquisition_order(value));

    Some(
        ordered
            .into_iter()
            .enumerate()
            .map(|(rank, value)| (value.clone(), (rank + 1).to_string()))
            .collect(),
    )
}

/// 缺失值排在最前，数字按数值排序，其余按字符串排序
fn acquisition_order(value: &Option<String>) -> (u8, i64, String) {
    match value {
        None => (0, 0, String::new()),
        Some(text) => match text.trim().parse::<i64>() {
            Ok(number) => (1, number, String::new()),
            Err(_) => (2, 0, text.clone()),
        },
    }
}
