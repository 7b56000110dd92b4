//! 引用解析
//!
//! 解析顺序：
//! 1. 新式序列级引用中第一个出现在本次爬取中的 UID；
//! 2. 旧式实例级引用经 SOP→Series 映射后的多数投票（忽略自引用，票数相同取较小 UID）；
//! 3. 未引用。新式引用若只指向本次爬取之外的序列，不写入引用列，
//!    原始 UID 记录在 [`Resolution::unresolved`] 中。

use imgtools_core::{AmbiguityPolicy, Modality};
use imgtools_dicom::ReferenceHints;
use std::collections::{BTreeMap, HashMap};

/// SOPInstanceUID → SeriesInstanceUID
pub type SopSeriesMap = HashMap<String, String>;

/// 引用解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub series_uid: Option<String>,
    pub modality: Option<Modality>,
    /// 旧式引用指向多个不同序列
    pub ambiguous: bool,
    /// 出现歧义时的全部候选序列（按 UID 排序）
    pub candidates: Vec<String>,
    /// 指向本次爬取之外的新式引用 UID
    pub unresolved: Option<String>,
}

/// 引用解析器
pub struct ReferenceResolver<'a> {
    sop_map: &'a SopSeriesMap,
    known_series: &'a HashMap<String, Modality>,
    policy: AmbiguityPolicy,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(
        sop_map: &'a SopSeriesMap,
        known_series: &'a HashMap<String, Modality>,
        policy: AmbiguityPolicy,
    ) -> Self {
        Self {
            sop_map,
            known_series,
            policy,
        }
    }

    /// 解析 `series_uid` 所引用的序列
    pub fn resolve(&self, series_uid: &str, hints: &ReferenceHints) -> Resolution {
        let modern = hints
            .series_uids
            .iter()
            .find(|uid| uid.as_str() != series_uid && self.known_series.contains_key(uid.as_str()));
        if let Some(uid) = modern {
            return self.resolved(uid.clone());
        }

        let mut votes: BTreeMap<&str, usize> = BTreeMap::new();
        for sop in &hints.sop_instance_uids {
            if let Some(target) = self.sop_map.get(sop) {
                if target != series_uid {
                    *votes.entry(target.as_str()).or_default() += 1;
                }
            }
        }

        // BTreeMap 按 UID 升序，严格大于保证平票时保留较小 UID
        let mut winner: Option<(&str, usize)> = None;
        for (uid, count) in &votes {
            if winner.map_or(true, |(_, best)| *count > best) {
                winner = Some((*uid, *count));
            }
        }

        if let Some((uid, _)) = winner {
            if votes.len() == 1 {
                return self.resolved(uid.to_string());
            }
            let candidates: Vec<String> = votes.keys().map(|uid| uid.to_string()).collect();
            let mut resolution = match self.policy {
                AmbiguityPolicy::MostFrequent => self.resolved(uid.to_string()),
                AmbiguityPolicy::Unreferenced => Resolution::default(),
            };
            resolution.ambiguous = true;
            resolution.candidates = candidates;
            return resolution;
        }

        Resolution {
            unresolved: hints
                .series_uids
                .iter()
                .find(|uid| uid.as_str() != series_uid)
                .cloned(),
            ..Resolution::default()
        }
    }

    fn resolved(&self, uid: String) -> Resolution {
        Resolution {
            modality: self.known_series.get(&uid).cloned(),
            series_uid: Some(uid),
            ..Resolution::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (SopSeriesMap, HashMap<String, Modality>) {
        let sop_map: SopSeriesMap = [
            ("CT-1.1", "CT-1"),
            ("CT-1.2", "CT-1"),
            ("CT-1.3", "CT-1"),
            ("MR-1.1", "MR-1"),
            ("MR-1.2", "MR-1"),
            ("RT-1.1", "RT-1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let known = [
            ("CT-1", Modality::CT),
            ("MR-1", Modality::MR),
            ("RT-1", Modality::RTSTRUCT),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        (sop_map, known)
    }

    fn hints(series: &[&str], sops: &[&str]) -> ReferenceHints {
        ReferenceHints {
            series_uids: series.iter().map(|s| s.to_string()).collect(),
            sop_instance_uids: sops.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_modern_reference_preferred() {
        let (sop_map, known) = fixtures();
        let resolver = ReferenceResolver::new(&sop_map, &known, AmbiguityPolicy::MostFrequent);

        let resolution = resolver.resolve("RT-1", &hints(&["MR-1"], &["CT-1.1", "CT-1.2"]));
        assert_eq!(resolution.series_uid.as_deref(), Some("MR-1"));
        assert_eq!(resolution.modality, Some(Modality::MR));
        assert!(!resolution.ambiguous);
    }

    #[test]
    fn test_legacy_majority_vote() {
        let (sop_map, known) = fixtures();
        let resolver = ReferenceResolver::new(&sop_map, &known, AmbiguityPolicy::MostFrequent);

        let resolution = resolver.resolve(
            "DOSE-1",
            &hints(&[], &["CT-1.1", "CT-1.2", "MR-1.1", "UNKNOWN", "RT-1.1"]),
        );
        assert_eq!(resolution.series_uid.as_deref(), Some("CT-1"));
        assert_eq!(resolution.modality, Some(Modality::CT));
        assert!(resolution.ambiguous);
        assert_eq!(
            resolution.candidates,
            vec!["CT-1".to_string(), "MR-1".to_string(), "RT-1".to_string()]
        );
    }

    #[test]
    fn test_legacy_tie_prefers_smaller_uid() {
        let (sop_map, known) = fixtures();
        let resolver = ReferenceResolver::new(&sop_map, &known, AmbiguityPolicy::MostFrequent);

        let resolution = resolver.resolve("DOSE-1", &hints(&[], &["MR-1.1", "CT-1.1"]));
        assert_eq!(resolution.series_uid.as_deref(), Some("CT-1"));
        assert!(resolution.ambiguous);
    }

    #[test]
    fn test_unreferenced_policy_drops_ambiguous() {
        let (sop_map, known) = fixtures();
        let resolver = ReferenceResolver::new(&sop_map, &known, AmbiguityPolicy::Unreferenced);

        let resolution = resolver.resolve("DOSE-1", &hints(&[], &["MR-1.1", "CT-1.1"]));
        assert_eq!(resolution.series_uid, None);
        assert!(resolution.ambiguous);
        assert_eq!(resolution.candidates.len(), 2);

        // 无歧义时策略不影响结果
        let resolution = resolver.resolve("DOSE-1", &hints(&[], &["CT-1.1", "CT-1.3"]));
        assert_eq!(resolution.series_uid.as_deref(), Some("CT-1"));
        assert!(!resolution.ambiguous);
    }

    #[test]
    fn test_self_references_ignored() {
        let (sop_map, known) = fixtures();
        let resolver = ReferenceResolver::new(&sop_map, &known, AmbiguityPolicy::MostFrequent);

        let resolution = resolver.resolve("CT-1", &hints(&["CT-1"], &["CT-1.1", "CT-1.2"]));
        assert_eq!(resolution, Resolution::default());
    }

    #[test]
    fn test_unknown_modern_reference_not_linked() {
        let (sop_map, known) = fixtures();
        let resolver = ReferenceResolver::new(&sop_map, &known, AmbiguityPolicy::MostFrequent);

        let resolution = resolver.resolve("RT-9", &hints(&["MISSING-1"], &["NOPE"]));
        assert_eq!(resolution.series_uid, None);
        assert_eq!(resolution.modality, None);
        assert!(!resolution.ambiguous);
        assert_eq!(resolution.unresolved.as_deref(), Some("MISSING-1"));
    }

    #[test]
    fn test_unknown_modern_reference_loses_to_legacy() {
        let (sop_map, known) = fixtures();
        let resolver = ReferenceResolver::new(&sop_map, &known, AmbiguityPolicy::MostFrequent);

        let resolution = resolver.resolve("RT-9", &hints(&["MISSING-1"], &["CT-1.1"]));
        assert_eq!(resolution.series_uid.as_deref(), Some("CT-1"));
        assert_eq!(resolution.unresolved, None);
    }

    #[test]
    fn test_no_hints_is_unreferenced() {
        let (sop_map, known) = fixtures();
        let resolver = ReferenceResolver::new(&sop_map, &known, AmbiguityPolicy::MostFrequent);
        assert_eq!(resolver.resolve("RT-9", &ReferenceHints::default()), Resolution::default());
    }
}
