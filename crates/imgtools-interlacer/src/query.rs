//! 模态链查询
//!
//! 查询串为逗号分隔的模态名（不区分大小写），或通配符 `*`/`all`。
//! 多个模态组成的链要求相邻模态之间存在直接的父子引用边。

use crate::forest::Forest;
use crate::node::{Branch, NodeId};
use imgtools_core::{ImgtoolsError, Modality, Result};
use std::collections::HashMap;
use tracing::debug;

/// 查询选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// 同一根节点下的样本合并为一个
    pub group_by_root: bool,
}

/// 解析后的查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chain {
    All,
    Modalities(Vec<Modality>),
}

impl Chain {
    pub fn parse(chain: &str) -> Result<Self> {
        let chain = chain.trim();
        if chain.is_empty() {
            return Err(ImgtoolsError::InvalidQuery("查询串为空".to_string()));
        }

        let parts: Vec<&str> = chain.split(',').map(str::trim).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ImgtoolsError::InvalidQuery(format!("查询串含空元素: {:?}", chain)));
        }

        let is_wildcard = |p: &&str| *p == "*" || p.eq_ignore_ascii_case("all");
        match parts.iter().filter(|p| is_wildcard(p)).count() {
            0 => {}
            _ if parts.len() == 1 => return Ok(Chain::All),
            _ => {
                return Err(ImgtoolsError::InvalidQuery(format!(
                    "通配符不能与具体模态混用: {:?}",
                    chain
                )))
            }
        }

        let modalities: Vec<Modality> = parts.into_iter().map(Modality::parse).collect();
        validate_dependencies(&modalities)?;
        Ok(Chain::Modalities(modalities))
    }
}

/// 派生模态需要链中更早出现的影像模态
fn required_ancestors(modality: &Modality) -> Option<&'static [Modality]> {
    const IMAGING: &[Modality] = &[Modality::CT, Modality::MR, Modality::PT];
    const SEG_SOURCES: &[Modality] = &[Modality::CT, Modality::MR];
    match modality {
        Modality::RTSTRUCT | Modality::RTDOSE => Some(IMAGING),
        Modality::SEG => Some(SEG_SOURCES),
        _ => None,
    }
}

/// 校验依赖规则
///
/// 单个模态的查询只是按模态查找节点，不做依赖校验。
pub fn validate_dependencies(chain: &[Modality]) -> Result<()> {
    if chain.len() < 2 {
        return Ok(());
    }
    for (i, modality) in chain.iter().enumerate() {
        let Some(required) = required_ancestors(modality) else {
            continue;
        };
        if !chain[..i].iter().any(|m| required.contains(m)) {
            let required: Vec<&str> = required.iter().map(Modality::as_str).collect();
            return Err(ImgtoolsError::DependencyViolation {
                modality: modality.to_string(),
                required: required.join("/"),
            });
        }
    }
    Ok(())
}

/// 在森林上执行查询
pub fn run(forest: &Forest, chain: &Chain, options: QueryOptions) -> Vec<Branch> {
    let matches: Vec<Vec<NodeId>> = match chain {
        Chain::All => forest
            .preorder()
            .into_iter()
            .filter(|id| forest.node(*id).is_leaf())
            .map(|id| forest.path_to(id))
            .collect(),
        Chain::Modalities(modalities) => match_chain(forest, modalities),
    };
    debug!("查询 {:?} 匹配 {} 条分支", chain, matches.len());

    if !options.group_by_root {
        return matches.iter().map(|path| forest.branch(path)).collect();
    }

    let mut order: Vec<NodeId> = Vec::new();
    let mut merged: HashMap<NodeId, Branch> = HashMap::new();
    for path in &matches {
        let Some(first) = path.first() else { continue };
        let root = forest.root_of(*first);
        let branch = forest.branch(path);
        match merged.get_mut(&root) {
            Some(existing) => existing.merge(branch),
            None => {
                order.push(root);
                merged.insert(root, branch);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|root| merged.remove(&root))
        .collect()
}

/// 沿父子边查找连续匹配模态链的路径
fn match_chain(forest: &Forest, chain: &[Modality]) -> Vec<Vec<NodeId>> {
    let Some((head, _)) = chain.split_first() else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for start in forest.preorder() {
        if forest.node(start).modality() != head {
            continue;
        }
        let mut path = vec![start];
        extend_match(forest, chain, &mut path, &mut results);
    }
    results
}

fn extend_match(forest: &Forest, chain: &[Modality], path: &mut Vec<NodeId>, results: &mut Vec<Vec<NodeId>>) {
    if path.len() == chain.len() {
        results.push(path.clone());
        return;
    }
    let Some(last) = path.last().copied() else { return };
    let wanted = &chain[path.len()];
    for child in &forest.node(last).children {
        if forest.node(*child).modality() == wanted {
            path.push(*child);
            extend_match(forest, chain, path, results);
            path.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgtools_core::{GroupBy, IndexEntry};

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
            folder: uid.into(),
        }
    }

    /// 三棵树：P1 的 CT 带 RTSTRUCT/RTDOSE，P2 的 MR 带 SEG，P3 单独的 PT
    fn forest() -> Forest {
        Forest::build(
            vec![
                entry("P1", "CT-1", Modality::CT, None),
                entry("P1", "RT-1", Modality::RTSTRUCT, Some("CT-1")),
                entry("P1", "DOSE-1", Modality::RTDOSE, Some("CT-1")),
                entry("P2", "MR-1", Modality::MR, None),
                entry("P2", "SEG-1", Modality::SEG, Some("MR-1")),
                entry("P3", "PT-1", Modality::PT, None),
            ],
            GroupBy::ReferencedSeries,
        )
        .unwrap()
    }

    fn query(chain: &str) -> Vec<Vec<String>> {
        let chain = Chain::parse(chain).unwrap();
        run(&forest(), &chain, QueryOptions::default())
            .iter()
            .map(|b| b.series_uids().into_iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_parse_chain() {
        assert_eq!(Chain::parse(" * ").unwrap(), Chain::All);
        assert_eq!(Chain::parse("ALL").unwrap(), Chain::All);
        assert_eq!(
            Chain::parse("ct, rtstruct").unwrap(),
            Chain::Modalities(vec![Modality::CT, Modality::RTSTRUCT])
        );
    }

    #[test]
    fn test_invalid_chains() {
        for chain in ["", "  ", "CT,", ",CT", "CT,,RTSTRUCT", "*,CT", "CT,all"] {
            let err = Chain::parse(chain).unwrap_err();
            assert!(matches!(err, ImgtoolsError::InvalidQuery(_)), "{chain:?} -> {err}");
        }
    }

    #[test]
    fn test_dependency_violations() {
        for chain in ["RTSTRUCT,RTDOSE", "PT,SEG", "SEG,CT", "RTDOSE,CT"] {
            let err = Chain::parse(chain).unwrap_err();
            assert!(matches!(err, ImgtoolsError::DependencyViolation { .. }), "{chain:?} -> {err}");
        }
        assert!(Chain::parse("PT,RTSTRUCT").is_ok());
        assert!(Chain::parse("MR,SEG").is_ok());
        assert!(Chain::parse("SEG").is_ok());
    }

    #[test]
    fn test_dependency_message_names_rule() {
        let err = Chain::parse("PT,SEG").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("SEG"));
        assert!(message.contains("CT/MR"));
    }

    #[test]
    fn test_chain_matches_direct_edges() {
        assert_eq!(query("CT,RTSTRUCT"), vec![vec!["CT-1", "RT-1"]]);
        assert_eq!(query("CT,RTDOSE"), vec![vec!["CT-1", "DOSE-1"]]);
        assert_eq!(query("mr,seg"), vec![vec!["MR-1", "SEG-1"]]);
        assert!(query("CT,SEG").is_empty());
        assert!(query("CT,RTSTRUCT,RTDOSE").is_empty());
    }

    #[test]
    fn test_single_modality_lookup() {
        assert_eq!(query("PT"), vec![vec!["PT-1"]]);
        assert!(query("RTPLAN").is_empty());
        assert!(query("XA").is_empty());
    }

    #[test]
    fn test_wildcard_covers_every_leaf() {
        let branches = query("*");
        assert_eq!(
            branches,
            vec![
                vec!["CT-1", "DOSE-1"],
                vec!["CT-1", "RT-1"],
                vec!["MR-1", "SEG-1"],
                vec!["PT-1"],
            ]
        );
    }

    #[test]
    fn test_group_by_root_merges_samples() {
        let chain = Chain::parse("all").unwrap();
        let grouped = run(&forest(), &chain, QueryOptions { group_by_root: true });
        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped[0].series_uids(), vec!["CT-1", "DOSE-1", "RT-1"]);
        assert_eq!(
            grouped[0].modalities(),
            vec![&Modality::CT, &Modality::RTDOSE, &Modality::RTSTRUCT]
        );
    }

    #[test]
    fn test_chain_may_start_below_root() {
        let forest = Forest::build(
            vec![
                entry("P1", "MR-1", Modality::MR, None),
                entry("P1", "CT-1", Modality::CT, Some("MR-1")),
                entry("P1", "RT-1", Modality::RTSTRUCT, Some("CT-1")),
                entry("P1", "PLAN-1", Modality::RTPLAN, Some("RT-1")),
                entry("P1", "PLAN-2", Modality::RTPLAN, Some("RT-1")),
            ],
            GroupBy::ReferencedSeries,
        )
        .unwrap();
        let chain = Chain::parse("CT,RTSTRUCT,RTPLAN").unwrap();
        let samples: Vec<String> = run(&forest, &chain, QueryOptions::default())
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            samples,
            vec![
                "CT:CT-1 -> RTSTRUCT:RT-1 -> RTPLAN:PLAN-1",
                "CT:CT-1 -> RTSTRUCT:RT-1 -> RTPLAN:PLAN-2"
            ]
        );

        let grouped = run(&forest, &chain, QueryOptions { group_by_root: true });
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].series_uids(), vec!["CT-1", "RT-1", "PLAN-1", "PLAN-2"]);
    }
}
