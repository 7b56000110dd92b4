//! 序列森林构建
//!
//! 每个索引行对应一个节点；引用了其他序列的节点挂在被引用序列之下，
//! 被引用序列不在索引中时节点保持为根。

use crate::node::{Branch, NodeId, SeriesNode};
use imgtools_core::{GroupBy, ImgtoolsError, IndexEntry, Result, SeriesKey};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// 序列森林
#[derive(Debug, Clone, Default)]
pub struct Forest {
    nodes: Vec<SeriesNode>,
    roots: Vec<NodeId>,
    by_key: HashMap<SeriesKey, NodeId>,
    /// SeriesInstanceUID → 该 UID 下最小子序列的节点
    by_uid: HashMap<String, NodeId>,
    broken_cycles: Vec<SeriesKey>,
}

impl Forest {
    /// 按分组方式构建森林
    pub fn build(entries: Vec<IndexEntry>, group_by: GroupBy) -> Result<Self> {
        let mut entries = entries;
        entries.sort_by(|a, b| a.key().cmp(&b.key()));
        let before = entries.len();
        entries.dedup_by(|a, b| a.key() == b.key());
        if entries.len() != before {
            warn!("索引中存在 {} 个重复序列，只保留第一条", before - entries.len());
        }

        let mut forest = Forest {
            nodes: entries.into_iter().map(SeriesNode::new).collect(),
            ..Forest::default()
        };
        for (id, node) in forest.nodes.iter().enumerate() {
            forest.by_key.insert(node.key(), id);
            forest.by_uid.entry(node.series_uid().to_string()).or_insert(id);
        }

        let mut parents = forest.parent_edges(group_by)?;
        forest.broken_cycles = break_cycles(&mut parents, &forest.nodes);

        for (id, parent) in parents.iter().enumerate() {
            forest.nodes[id].parent = *parent;
            if let Some(parent) = parent {
                forest.nodes[*parent].children.push(id);
            }
        }

        let sorted: Vec<Vec<NodeId>> = forest
            .nodes
            .iter()
            .map(|node| {
                let mut children = node.children.clone();
                children.sort_by(|a, b| {
                    let (a, b) = (&forest.nodes[*a], &forest.nodes[*b]);
                    (a.modality().as_str(), a.series_uid(), &a.entry.sub_series)
                        .cmp(&(b.modality().as_str(), b.series_uid(), &b.entry.sub_series))
                });
                children
            })
            .collect();
        for (node, children) in forest.nodes.iter_mut().zip(sorted) {
            node.children = children;
        }

        let mut roots: Vec<NodeId> = (0..forest.nodes.len())
            .filter(|id| forest.nodes[*id].is_root())
            .collect();
        roots.sort_by(|a, b| {
            let (a, b) = (&forest.nodes[*a].entry, &forest.nodes[*b].entry);
            (&a.patient_id, &a.study_instance_uid, a.modality.as_str(), &a.series_instance_uid, &a.sub_series).cmp(&(
                &b.patient_id,
                &b.study_instance_uid,
                b.modality.as_str(),
                &b.series_instance_uid,
                &b.sub_series,
            ))
        });
        forest.roots = roots;

        debug!(
            "森林构建完成: {} 个节点, {} 个根",
            forest.nodes.len(),
            forest.roots.len()
        );
        Ok(forest)
    }

    /// 计算每个节点的父节点
    fn parent_edges(&self, group_by: GroupBy) -> Result<Vec<Option<NodeId>>> {
        match group_by {
            GroupBy::ReferencedSeries => Ok(self
                .nodes
                .iter()
                .enumerate()
                .map(|(id, node)| {
                    node.entry
                        .referenced_series_uid
                        .as_deref()
                        .and_then(|uid| self.by_uid.get(uid).copied())
                        .filter(|parent| *parent != id)
                })
                .collect()),
            GroupBy::Study | GroupBy::Patient => Err(ImgtoolsError::UnsupportedGrouping(format!(
                "{:?}，目前只支持按引用序列分组",
                group_by
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &SeriesNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[SeriesNode] {
        &self.nodes
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn find(&self, key: &SeriesKey) -> Option<NodeId> {
        self.by_key.get(key).copied()
    }

    /// 按 SeriesInstanceUID 查找（多个子序列时返回最小者）
    pub fn find_uid(&self, series_uid: &str) -> Option<NodeId> {
        self.by_uid.get(series_uid).copied()
    }

    /// 为打破引用环而移除父边的节点
    pub fn broken_cycles(&self) -> &[SeriesKey] {
        &self.broken_cycles
    }

    /// 节点所在树的根
    pub fn root_of(&self, mut id: NodeId) -> NodeId {
        while let Some(parent) = self.nodes[id].parent {
            id = parent;
        }
        id
    }

    /// 节点深度（根为 0）
    pub fn depth(&self, mut id: NodeId) -> usize {
        let mut depth = 0;
        while let Some(parent) = self.nodes[id].parent {
            id = parent;
            depth += 1;
        }
        depth
    }

    /// 先序遍历全部节点，根与子节点均按确定顺序
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev().copied());
        }
        order
    }

    /// 从根到节点的路径
    pub fn path_to(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = vec![id];
        let mut current = id;
        while let Some(parent) = self.nodes[current].parent {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    pub fn branch(&self, path: &[NodeId]) -> Branch {
        Branch(path.iter().map(|id| self.nodes[*id].to_series_ref()).collect())
    }

    /// 所有从根到叶的最长分支
    pub fn leaf_branches(&self) -> Vec<Branch> {
        self.preorder()
            .into_iter()
            .filter(|id| self.nodes[*id].is_leaf())
            .map(|id| self.branch(&self.path_to(id)))
            .collect()
    }

    /// 各模态的节点数
    pub fn modality_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for node in &self.nodes {
            *counts.entry(node.modality().to_string()).or_default() += 1;
        }
        counts
    }
}

/// 检测并打破引用环：环中键最小的节点失去父边
///
/// 节点已按键排序，下标越小键越小。
fn break_cycles(parents: &mut [Option<NodeId>], nodes: &[SeriesNode]) -> Vec<SeriesKey> {
    const UNVISITED: u8 = 0;
    const ON_PATH: u8 = 1;
    const DONE: u8 = 2;

    let mut state = vec![UNVISITED; parents.len()];
    let mut broken = Vec::new();

    for start in 0..parents.len() {
        if state[start] != UNVISITED {
            continue;
        }
        let mut path = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            match state[id] {
                UNVISITED => {
                    state[id] = ON_PATH;
                    path.push(id);
                    current = parents[id];
                }
                ON_PATH => {
                    let cycle_start = path.iter().position(|p| *p == id).unwrap_or(0);
                    let victim = path[cycle_start..].iter().copied().min().unwrap_or(id);
                    parents[victim] = None;
                    let key = nodes[victim].key();
                    warn!("检测到引用环，移除 {} 的父引用", key);
                    broken.push(key);
                    break;
                }
                _ => break,
            }
        }
        for id in path {
            state[id] = DONE;
        }
    }

    broken.sort();
    broken
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgtools_core::Modality;

    fn entry(patient: &str, uid: &str, modality: Modality, reference: Option<&str>) -> IndexEntry {
        IndexEntry {
            patient_id: patient.into(),
            study_instance_uid: format!("{}-study", patient),
            series_instance_uid: uid.into(),
            sub_series: "1".into(),
            modality,
            referenced_modality: None,
            referenced_series_uid: reference.map(str::to_string),
            instances: 1,
            folder: format!("{}/{}", patient, uid),
        }
    }

    fn uids(forest: &Forest, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|id| forest.node(*id).series_uid().to_string()).collect()
    }

    #[test]
    fn test_reference_edges_and_ordering() {
        let forest = Forest::build(
            vec![
                entry("P1", "RT-1", Modality::RTSTRUCT, Some("CT-1")),
                entry("P1", "DOSE-1", Modality::RTDOSE, Some("CT-1")),
                entry("P1", "CT-1", Modality::CT, None),
                entry("P0", "MR-1", Modality::MR, None),
            ],
            GroupBy::ReferencedSeries,
        )
        .unwrap();

        assert_eq!(uids(&forest, forest.roots()), vec!["MR-1", "CT-1"]);
        let ct = forest.find_uid("CT-1").unwrap();
        assert_eq!(uids(&forest, &forest.node(ct).children), vec!["DOSE-1", "RT-1"]);
        let rt = forest.find_uid("RT-1").unwrap();
        assert_eq!(forest.root_of(rt), ct);
        assert_eq!(forest.depth(rt), 1);
    }

    #[test]
    fn test_missing_reference_stays_root() {
        let forest = Forest::build(
            vec![entry("P1", "RT-9", Modality::RTSTRUCT, Some("GONE"))],
            GroupBy::ReferencedSeries,
        )
        .unwrap();
        assert_eq!(forest.roots().len(), 1);
        assert!(forest.broken_cycles().is_empty());
    }

    #[test]
    fn test_cycle_is_broken_at_smallest_key() {
        let forest = Forest::build(
            vec![
                entry("P1", "B", Modality::RTSTRUCT, Some("C")),
                entry("P1", "C", Modality::RTDOSE, Some("A")),
                entry("P1", "A", Modality::SEG, Some("B")),
                entry("P1", "D", Modality::RTPLAN, Some("D")),
            ],
            GroupBy::ReferencedSeries,
        )
        .unwrap();

        assert_eq!(forest.broken_cycles(), &[SeriesKey::new("A", "1")]);
        // A 失去父边，剩余链为 A <- C <- B
        let a = forest.find_uid("A").unwrap();
        assert!(forest.node(a).is_root());
        assert_eq!(uids(&forest, &forest.path_to(forest.find_uid("B").unwrap())), vec!["A", "C", "B"]);
        // 自引用直接忽略，不算环
        assert!(forest.node(forest.find_uid("D").unwrap()).is_root());
    }

    #[test]
    fn test_sub_series_reference_attaches_to_lowest() {
        let mut second = entry("P1", "MR-1", Modality::MR, None);
        second.sub_series = "2".into();
        let forest = Forest::build(
            vec![
                second,
                entry("P1", "MR-1", Modality::MR, None),
                entry("P1", "SEG-1", Modality::SEG, Some("MR-1")),
            ],
            GroupBy::ReferencedSeries,
        )
        .unwrap();

        let parent = forest.node(forest.find_uid("SEG-1").unwrap()).parent.unwrap();
        assert_eq!(forest.node(parent).key(), SeriesKey::new("MR-1", "1"));
        assert_eq!(forest.roots().len(), 2);
    }

    #[test]
    fn test_duplicate_entries_are_collapsed() {
        let forest = Forest::build(
            vec![
                entry("P1", "CT-1", Modality::CT, None),
                entry("P1", "CT-1", Modality::CT, None),
            ],
            GroupBy::ReferencedSeries,
        )
        .unwrap();
        assert_eq!(forest.len(), 1);
    }

    #[test]
    fn test_unsupported_grouping() {
        for group_by in [GroupBy::Study, GroupBy::Patient] {
            let err = Forest::build(vec![entry("P1", "CT-1", Modality::CT, None)], group_by).unwrap_err();
            assert!(matches!(err, ImgtoolsError::UnsupportedGrouping(_)));
        }
    }

    #[test]
    fn test_leaf_branches() {
        let forest = Forest::build(
            vec![
                entry("P1", "CT-1", Modality::CT, None),
                entry("P1", "RT-1", Modality::RTSTRUCT, Some("CT-1")),
                entry("P1", "PLAN-1", Modality::RTPLAN, Some("RT-1")),
                entry("P1", "DOSE-1", Modality::RTDOSE, Some("CT-1")),
            ],
            GroupBy::ReferencedSeries,
        )
        .unwrap();

        let branches: Vec<String> = forest.leaf_branches().iter().map(ToString::to_string).collect();
        assert_eq!(
            branches,
            vec![
                "CT:CT-1 -> RTDOSE:DOSE-1".to_string(),
                "CT:CT-1 -> RTSTRUCT:RT-1 -> RTPLAN:PLAN-1".to_string(),
            ]
        );
    }
}
