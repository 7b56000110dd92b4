//! 森林节点与分支

use imgtools_core::{IndexEntry, Modality, SeriesKey};
use serde::Serialize;
use std::fmt;

/// 节点在森林中的下标
pub type NodeId = usize;

/// 一个序列节点
///
/// 节点由 [`Forest`](crate::Forest) 统一持有，父子关系以下标表示。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesNode {
    pub entry: IndexEntry,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl SeriesNode {
    pub fn new(entry: IndexEntry) -> Self {
        Self {
            entry,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn key(&self) -> SeriesKey {
        self.entry.key()
    }

    pub fn series_uid(&self) -> &str {
        &self.entry.series_instance_uid
    }

    pub fn modality(&self) -> &Modality {
        &self.entry.modality
    }

    pub fn patient_id(&self) -> &str {
        &self.entry.patient_id
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn to_series_ref(&self) -> SeriesRef {
        SeriesRef {
            modality: self.entry.modality.clone(),
            series_uid: self.entry.series_instance_uid.clone(),
            sub_series: self.entry.sub_series.clone(),
        }
    }
}

/// 分支中的一个序列
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SeriesRef {
    #[serde(rename = "Modality")]
    pub modality: Modality,
    #[serde(rename = "SeriesInstanceUID")]
    pub series_uid: String,
    #[serde(rename = "SubSeries")]
    pub sub_series: String,
}

impl fmt::Display for SeriesRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.modality,
            SeriesKey::new(&self.series_uid, &self.sub_series)
        )
    }
}

/// 从根到某个节点的有序路径，也是查询返回的样本
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Branch(pub Vec<SeriesRef>);

impl Branch {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeriesRef> {
        self.0.iter()
    }

    pub fn series_uids(&self) -> Vec<&str> {
        self.0.iter().map(|s| s.series_uid.as_str()).collect()
    }

    /// 分支上出现的模态（去重，保持顺序）
    pub fn modalities(&self) -> Vec<&Modality> {
        let mut seen: Vec<&Modality> = Vec::new();
        for series in &self.0 {
            if !seen.contains(&&series.modality) {
                seen.push(&series.modality);
            }
        }
        seen
    }

    /// 追加未出现过的序列
    pub(crate) fn merge(&mut self, other: Branch) {
        for series in other.0 {
            if !self.0.contains(&series) {
                self.0.push(series);
            }
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(" -> "))
    }
}
