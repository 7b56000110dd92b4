//! Interlacer：由索引表构建序列森林并响应查询

use crate::forest::Forest;
use crate::node::{Branch, SeriesNode};
use crate::query::{self, Chain, QueryOptions};
use crate::render;
use imgtools_core::config::InterlacerSettings;
use imgtools_core::{table, IndexEntry, Result, SeriesKey};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::info;

/// 森林统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ForestStats {
    pub nodes: usize,
    pub roots: usize,
    pub patients: usize,
    pub max_depth: usize,
    pub per_modality: BTreeMap<String, usize>,
    pub broken_cycles: usize,
}

impl fmt::Display for ForestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "节点 {} 个，根 {} 个，患者 {} 名，最大深度 {}",
            self.nodes, self.roots, self.patients, self.max_depth
        )?;
        let modalities: Vec<String> = self
            .per_modality
            .iter()
            .map(|(modality, count)| format!("{}={}", modality, count))
            .collect();
        write!(f, "模态分布: {}", modalities.join(", "))?;
        if self.broken_cycles > 0 {
            write!(f, "\n打破的引用环: {}", self.broken_cycles)?;
        }
        Ok(())
    }
}

/// 序列森林与查询入口
///
/// 构建后不可变；索引变化时需要重新构建。
#[derive(Debug, Clone)]
pub struct Interlacer {
    forest: Forest,
    group_by_root: bool,
}

impl Interlacer {
    /// 按默认设置（按引用序列分组）构建
    pub fn new(entries: Vec<IndexEntry>) -> Result<Self> {
        Self::with_settings(entries, &InterlacerSettings::default())
    }

    pub fn with_settings(entries: Vec<IndexEntry>, settings: &InterlacerSettings) -> Result<Self> {
        let forest = Forest::build(entries, settings.group_by)?;
        info!(
            "Interlacer 构建完成: {} 个序列, {} 棵树",
            forest.len(),
            forest.roots().len()
        );
        Ok(Self {
            forest,
            group_by_root: settings.group_by_root,
        })
    }

    /// 从旁路目录中的 index.csv 构建
    pub fn from_index_csv(path: &Path) -> Result<Self> {
        Self::new(table::read_index_file(path)?)
    }

    pub fn from_index_csv_with(path: &Path, settings: &InterlacerSettings) -> Result<Self> {
        Self::with_settings(table::read_index_file(path)?, settings)
    }

    /// 按模态链查询，是否按根合并取构建时的设置
    pub fn query(&self, chain: &str) -> Result<Vec<Branch>> {
        self.query_with(
            chain,
            QueryOptions {
                group_by_root: self.group_by_root,
            },
        )
    }

    pub fn query_with(&self, chain: &str, options: QueryOptions) -> Result<Vec<Branch>> {
        let chain = Chain::parse(chain)?;
        Ok(query::run(&self.forest, &chain, options))
    }

    /// 所有根到叶的分支
    pub fn branches(&self) -> Vec<Branch> {
        self.forest.leaf_branches()
    }

    pub fn get(&self, series_uid: &str) -> Option<&SeriesNode> {
        self.forest.find_uid(series_uid).map(|id| self.forest.node(id))
    }

    pub fn get_key(&self, key: &SeriesKey) -> Option<&SeriesNode> {
        self.forest.find(key).map(|id| self.forest.node(id))
    }

    /// 节点的子节点
    pub fn children(&self, node: &SeriesNode) -> Vec<&SeriesNode> {
        node.children.iter().map(|id| self.forest.node(*id)).collect()
    }

    pub fn roots(&self) -> Vec<&SeriesNode> {
        self.forest.roots().iter().map(|id| self.forest.node(*id)).collect()
    }

    /// 出现过的患者（有序、去重）
    pub fn patients(&self) -> Vec<&str> {
        let mut patients: Vec<&str> = self.forest.nodes().iter().map(SeriesNode::patient_id).collect();
        patients.sort_unstable();
        patients.dedup();
        patients
    }

    pub fn broken_cycles(&self) -> &[SeriesKey] {
        self.forest.broken_cycles()
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn stats(&self) -> ForestStats {
        let max_depth = (0..self.forest.len())
            .filter(|id| self.forest.node(*id).is_leaf())
            .map(|id| self.forest.depth(id))
            .max()
            .unwrap_or(0);
        ForestStats {
            nodes: self.forest.len(),
            roots: self.forest.roots().len(),
            patients: self.patients().len(),
            max_depth,
            per_modality: self.forest.modality_counts(),
            broken_cycles: self.forest.broken_cycles().len(),
        }
    }

    pub fn render_tree(&self) -> String {
        render::render_tree(&self.forest)
    }

    pub fn render_dot(&self) -> String {
        render::render_dot(&self.forest)
    }

    pub fn write_html_graph(&self, path: &Path) -> Result<()> {
        render::write_html_graph(&self.forest, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgtools_core::{GroupBy, ImgtoolsError, Modality};
    use imgtools_crawler::fixtures::{write_ct_series, write_seg, Instance};
    use imgtools_crawler::{crawl, CrawlOptions, Crawler};

    fn uids(branches: &[Branch]) -> Vec<Vec<&str>> {
        branches.iter().map(Branch::series_uids).collect()
    }

    #[test]
    fn test_reference_scenario_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        imgtools_crawler::fixtures::write_reference_scenario(&root).unwrap();

        let (_, index) = crawl(&root, 2).unwrap();
        assert_eq!(index.len(), 3);

        let interlacer = Interlacer::new(index).unwrap();
        let ct = interlacer.get("CT-1").unwrap();
        let children: Vec<&str> = interlacer.children(ct).iter().map(|n| n.series_uid()).collect();
        assert_eq!(children, vec!["DOSE-1", "RT-1"]);

        assert_eq!(uids(&interlacer.query("CT,RTSTRUCT").unwrap()), vec![vec!["CT-1", "RT-1"]]);
        assert_eq!(uids(&interlacer.query("CT,RTDOSE").unwrap()), vec![vec!["CT-1", "DOSE-1"]]);
        assert!(interlacer.query("SEG").unwrap().is_empty());

        let err = interlacer.query("RTSTRUCT,RTDOSE").unwrap_err();
        assert!(matches!(err, ImgtoolsError::DependencyViolation { .. }));
    }

    #[test]
    fn test_from_sidecar_index() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        imgtools_crawler::fixtures::write_reference_scenario(&root).unwrap();

        let output = Crawler::new(CrawlOptions::default().with_jobs(1)).crawl(&root).unwrap();
        let sidecar = output.sidecar.unwrap();

        let interlacer = Interlacer::from_index_csv(&sidecar.index_csv).unwrap();
        assert_eq!(interlacer.roots().len(), 1);
        assert_eq!(interlacer.branches().len(), 2);
    }

    #[test]
    fn test_forest_shape_independent_of_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        imgtools_crawler::fixtures::write_reference_scenario(&root).unwrap();
        write_ct_series(&root.join("p2/ct"), "PAT-2", "CT-2", 3).unwrap();
        write_seg(
            &root.join("p2/seg/seg.dcm"),
            &Instance::new("SEG-2", "SEG-2.1", "SEG").patient("PAT-2"),
            "CT-2",
        )
        .unwrap();

        let serial = Crawler::new(CrawlOptions::default().with_jobs(1).in_memory()).crawl(&root).unwrap().index;
        let parallel = Crawler::new(CrawlOptions::default().with_jobs(4).in_memory()).crawl(&root).unwrap().index;
        let serial = Interlacer::new(serial).unwrap();
        let parallel = Interlacer::new(parallel).unwrap();

        assert_eq!(serial.render_tree(), parallel.render_tree());
        assert_eq!(serial.branches(), parallel.branches());
        assert_eq!(uids(&serial.query("ct,seg").unwrap()), vec![vec!["CT-2", "SEG-2"]]);
    }

    fn entry(patient: &str, uid: &str, modality: Modality, reference: Option<&str>) -> IndexEntry {
        IndexEntry {
            patient_id: patient.into(),
            study_instance_uid: "ST".into(),
            series_instance_uid: uid.into(),
            sub_series: "1".into(),
            modality,
            referenced_modality: None,
            referenced_series_uid: reference.map(str::to_string),
            instances: 1,
            folder: uid.into(),
        }
    }

    #[test]
    fn test_wildcard_over_three_trees() {
        let interlacer = Interlacer::new(vec![
            entry("P1", "CT-1", Modality::CT, None),
            entry("P1", "RT-1", Modality::RTSTRUCT, Some("CT-1")),
            entry("P2", "MR-1", Modality::MR, None),
            entry("P3", "PT-1", Modality::PT, None),
            entry("P3", "DOSE-3", Modality::RTDOSE, Some("PT-1")),
            entry("P3", "RT-3", Modality::RTSTRUCT, Some("PT-1")),
        ])
        .unwrap();

        let all = interlacer.query("*").unwrap();
        assert_eq!(all.len(), 4);
        let covered: usize = all.iter().map(Branch::len).sum();
        assert_eq!(covered, 7);
        assert_eq!(interlacer.query("all").unwrap(), all);

        let grouped = interlacer
            .query_with("*", QueryOptions { group_by_root: true })
            .unwrap();
        assert_eq!(grouped.len(), 3);
    }

    #[test]
    fn test_group_by_root_setting() {
        let settings = InterlacerSettings {
            group_by: GroupBy::ReferencedSeries,
            group_by_root: true,
        };
        let interlacer = Interlacer::with_settings(
            vec![
                entry("P1", "CT-1", Modality::CT, None),
                entry("P1", "RT-1", Modality::RTSTRUCT, Some("CT-1")),
                entry("P1", "DOSE-1", Modality::RTDOSE, Some("CT-1")),
            ],
            &settings,
        )
        .unwrap();
        let samples = interlacer.query("*").unwrap();
        assert_eq!(uids(&samples), vec![vec!["CT-1", "DOSE-1", "RT-1"]]);
    }

    #[test]
    fn test_unresolved_reference_is_root() {
        let interlacer = Interlacer::new(vec![
            entry("P1", "RT-9", Modality::RTSTRUCT, Some("MISSING")),
            entry("P1", "CT-1", Modality::CT, None),
        ])
        .unwrap();
        assert_eq!(interlacer.roots().len(), 2);
        assert!(interlacer.query("CT,RTSTRUCT").unwrap().is_empty());
    }

    #[test]
    fn test_cycle_reported() {
        let interlacer = Interlacer::new(vec![
            entry("P1", "A", Modality::RTSTRUCT, Some("B")),
            entry("P1", "B", Modality::RTDOSE, Some("A")),
        ])
        .unwrap();
        assert_eq!(interlacer.broken_cycles(), &[SeriesKey::new("A", "1")]);
        assert_eq!(interlacer.stats().broken_cycles, 1);
        assert_eq!(interlacer.branches().len(), 1);
    }

    #[test]
    fn test_unsupported_grouping() {
        let settings = InterlacerSettings {
            group_by: GroupBy::Patient,
            group_by_root: false,
        };
        let err = Interlacer::with_settings(vec![entry("P1", "CT-1", Modality::CT, None)], &settings).unwrap_err();
        assert!(matches!(err, ImgtoolsError::UnsupportedGrouping(_)));
    }

    #[test]
    fn test_stats_and_lookups() {
        let interlacer = Interlacer::new(vec![
            entry("P2", "MR-1", Modality::MR, None),
            entry("P1", "CT-1", Modality::CT, None),
            entry("P1", "RT-1", Modality::RTSTRUCT, Some("CT-1")),
            entry("P1", "PLAN-1", Modality::RTPLAN, Some("RT-1")),
        ])
        .unwrap();

        assert_eq!(interlacer.patients(), vec!["P1", "P2"]);
        assert!(interlacer.get("NOPE").is_none());
        assert_eq!(
            interlacer.get_key(&SeriesKey::new("RT-1", "1")).map(|n| n.series_uid()),
            Some("RT-1")
        );

        let stats = interlacer.stats();
        assert_eq!(stats.nodes, 4);
        assert_eq!(stats.roots, 2);
        assert_eq!(stats.patients, 2);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.per_modality.get("CT"), Some(&1));
        assert!(stats.to_string().contains("最大深度 2"));
    }

    #[test]
    fn test_empty_index() {
        let interlacer = Interlacer::new(Vec::new()).unwrap();
        assert!(interlacer.query("*").unwrap().is_empty());
        assert!(interlacer.query("CT").unwrap().is_empty());
        assert_eq!(interlacer.render_tree(), "");
        assert_eq!(interlacer.stats(), ForestStats::default());
    }
}
