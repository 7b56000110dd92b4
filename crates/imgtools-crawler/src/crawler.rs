//! 数据集爬取
//!
//! 流程：发现文件 → 并行读取文件头（同时构建 SOP→Series 映射）→ 按序列分组 →
//! 并行提取元数据 → 引用解析 → 组装并写出表格。
//! 两个并行阶段都在专用线程池中以 fold/reduce 收集各线程的局部结果，
//! 并行期间不共享可变状态。

use crate::discovery::discover_files;
use crate::grouping::{group_series, SeriesGroup};
use crate::resolver::{ReferenceResolver, SopSeriesMap};
use crate::sidecar::{Sidecar, SidecarPaths};
use crate::summary::{CrawlSummary, FailedSeries, InvalidFile, SplitSeriesReport};
use crate::tables::{index_entries, sort_records};
use imgtools_core::config::IndexSettings;
use imgtools_core::utils::relative_folder;
use imgtools_core::{
    AmbiguityPolicy, FailurePolicy, ImgtoolsConfig, ImgtoolsError, IndexEntry, Modality, Result,
    SeriesKey, SeriesRecord, TagValue,
};
use imgtools_dicom::{
    collect_reference_hints, DicomParser, FileHeader, HeaderValidator, MetadataExtractor,
    ReferenceHints,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// 协作式取消标记，在每个序列任务开始前检查
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 爬取选项
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub n_jobs: usize,
    pub extensions: Vec<String>,
    pub force: bool,
    pub failure_policy: FailurePolicy,
    pub ambiguity_policy: AmbiguityPolicy,
    pub index: IndexSettings,
    /// 为 false 时只返回表格，不写旁路目录
    pub persist: bool,
}

impl CrawlOptions {
    pub fn from_config(config: &ImgtoolsConfig) -> Self {
        Self {
            n_jobs: config.crawl.n_jobs.max(1),
            extensions: config.crawl.extensions.clone(),
            force: config.crawl.force,
            failure_policy: config.crawl.failure_policy,
            ambiguity_policy: config.crawl.ambiguity_policy,
            index: config.index.clone(),
            persist: true,
        }
    }

    pub fn with_jobs(mut self, n_jobs: usize) -> Self {
        self.n_jobs = n_jobs.max(1);
        self
    }

    /// 只返回内存中的表，不写旁路目录
    pub fn in_memory(mut self) -> Self {
        self.persist = false;
        self
    }
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self::from_config(&ImgtoolsConfig::default())
    }
}

/// 爬取结果
#[derive(Debug, Clone)]
pub struct CrawlOutput {
    /// 完整元数据表
    pub records: Vec<SeriesRecord>,
    /// 精简索引表
    pub index: Vec<IndexEntry>,
    pub summary: CrawlSummary,
    /// 写出的旁路目录；取消或未持久化时为 `None`
    pub sidecar: Option<SidecarPaths>,
}

/// 文件头扫描阶段的局部结果
#[derive(Default)]
struct ScanPartial {
    headers: Vec<FileHeader>,
    invalid: Vec<(PathBuf, String)>,
    sop_map: SopSeriesMap,
}

impl ScanPartial {
    fn scan(mut self, path: &Path, validator: &HeaderValidator) -> Self {
        match DicomParser::read_header(path) {
            Ok(header) => {
                let validation = validator.validate(&header);
                if !validation.is_valid() {
                    self.invalid.push((path.to_path_buf(), validation.get_summary()));
                    return self;
                }
                if let (Some(sop), Some(series)) =
                    (&header.sop_instance_uid, &header.series_instance_uid)
                {
                    self.sop_map.insert(sop.clone(), series.clone());
                }
                self.headers.push(header);
            }
            Err(e) => self.invalid.push((path.to_path_buf(), e.to_string())),
        }
        self
    }

    fn merge(mut self, other: Self) -> Self {
        self.headers.extend(other.headers);
        self.invalid.extend(other.invalid);
        // 重复的 SOPInstanceUID 取较小的序列 UID，结果与线程数无关
        for (sop, series) in other.sop_map {
            match self.sop_map.get_mut(&sop) {
                Some(existing) if *existing <= series => {}
                Some(existing) => *existing = series,
                None => {
                    self.sop_map.insert(sop, series);
                }
            }
        }
        self
    }
}

struct ExtractedSeries<'a> {
    group: &'a SeriesGroup,
    tags: BTreeMap<String, TagValue>,
    hints: ReferenceHints,
}

/// 提取阶段的局部结果
struct ExtractPartial<'a> {
    extracted: Vec<ExtractedSeries<'a>>,
    failed: Vec<(&'a SeriesGroup, String)>,
    cancelled: usize,
}

impl<'a> Default for ExtractPartial<'a> {
    fn default() -> Self {
        Self {
            extracted: Vec::new(),
            failed: Vec::new(),
            cancelled: 0,
        }
    }
}

impl<'a> ExtractPartial<'a> {
    fn merge(mut self, other: Self) -> Self {
        self.extracted.extend(other.extracted);
        self.failed.extend(other.failed);
        self.cancelled += other.cancelled;
        self
    }
}

/// 数据集爬取器
pub struct Crawler {
    options: CrawlOptions,
    extractor: MetadataExtractor,
    validator: HeaderValidator,
    cancel: CancelToken,
}

impl Crawler {
    pub fn new(options: CrawlOptions) -> Self {
        Self {
            options,
            extractor: MetadataExtractor::new(),
            validator: HeaderValidator::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &CrawlOptions {
        &self.options
    }

    /// 爬取 `root` 并返回完整表、索引表与统计
    pub fn crawl(&self, root: &Path) -> Result<CrawlOutput> {
        let started = Instant::now();
        let root = root.canonicalize().map_err(|e| {
            ImgtoolsError::NotFound(format!("无法访问目录 {}: {}", root.display(), e))
        })?;
        let sidecar = Sidecar::new(
            SidecarPaths::for_root(&root, self.options.index.sidecar_dir.as_deref())?,
            &self.options.index,
        );

        info!(
            "开始爬取 {} (并行度 {})",
            root.display(),
            self.options.n_jobs
        );

        let discovery = discover_files(&root, &self.options.extensions)?;
        let files = &discovery.files;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.n_jobs)
            .thread_name(|i| format!("imgtools-crawl-{}", i))
            .build()
            .map_err(|e| ImgtoolsError::Internal(format!("无法创建线程池: {}", e)))?;

        // 文件头扫描
        let validator = &self.validator;
        let mut scan = pool.install(|| {
            files
                .par_iter()
                .fold(ScanPartial::default, |partial, path| partial.scan(path, validator))
                .reduce(ScanPartial::default, ScanPartial::merge)
        });
        scan.headers.sort_by(|a, b| a.path.cmp(&b.path));
        scan.invalid.sort();
        for (path, reason) in &scan.invalid {
            warn!("跳过无效文件 {}: {}", path.display(), reason);
        }

        let grouping = group_series(&scan.headers);
        debug!(
            "{} 个有效文件分为 {} 个序列",
            scan.headers.len(),
            grouping.groups.len()
        );

        let prior = self.load_prior(&sidecar);

        let mut known_series: HashMap<String, Modality> = HashMap::new();
        for group in &grouping.groups {
            known_series
                .entry(group.key.series_uid.clone())
                .or_insert_with(|| group.modality.clone());
        }
        for record in prior.values() {
            known_series
                .entry(record.series_instance_uid.clone())
                .or_insert_with(|| record.modality.clone());
        }

        // 已有索引中成功提取过的序列不再重复提取
        let (reused, pending): (Vec<&SeriesGroup>, Vec<&SeriesGroup>) = grouping
            .groups
            .iter()
            .partition(|group| prior.contains_key(&group.key));

        // 元数据提取
        let cancel = &self.cancel;
        let extraction = pool.install(|| {
            pending
                .par_iter()
                .copied()
                .fold(ExtractPartial::default, |mut partial, group| {
                    if cancel.is_cancelled() {
                        partial.cancelled += 1;
                        return partial;
                    }
                    match self.extract_series(group) {
                        Ok(extracted) => partial.extracted.push(extracted),
                        Err(e) => {
                            error!(
                                series = %group.key,
                                folder = %group.folder.display(),
                                modality = %group.modality,
                                "序列提取失败: {}",
                                e
                            );
                            partial.failed.push((group, e.to_string()));
                        }
                    }
                    partial
                })
                .reduce(ExtractPartial::default, ExtractPartial::merge)
        });

        // 沿用的引用型序列重新读取引用线索，本次新增的序列可能改变其解析结果
        let reused_hints: HashMap<SeriesKey, ReferenceHints> = pool.install(|| {
            reused
                .par_iter()
                .copied()
                .filter(|group| group.modality.can_reference())
                .filter_map(|group| match DicomParser::open(&group.representative) {
                    Ok(obj) => Some((
                        group.key.clone(),
                        collect_reference_hints(&obj, &group.modality),
                    )),
                    Err(e) => {
                        warn!(series = %group.key, "无法重新读取引用，沿用已有结果: {}", e);
                        None
                    }
                })
                .collect()
        });

        let resolver = ReferenceResolver::new(
            &scan.sop_map,
            &known_series,
            self.options.ambiguity_policy,
        );

        let mut records: Vec<SeriesRecord> = Vec::with_capacity(prior.len() + pending.len());
        for item in &extraction.extracted {
            let mut record = self.base_record(&root, item.group);
            record.tags = item.tags.clone();
            if item.group.modality.can_reference() {
                apply_resolution(&resolver, &mut record, &item.hints);
            }
            records.push(record);
        }

        let mut failed: Vec<FailedSeries> = Vec::with_capacity(extraction.failed.len());
        for (group, message) in &extraction.failed {
            failed.push(FailedSeries {
                series_uid: group.key.series_uid.clone(),
                sub_series: group.key.sub_series.clone(),
                folder: relative_folder(&root, &group.folder),
                modality: group.modality.to_string(),
                error: message.clone(),
            });
            if self.options.failure_policy == FailurePolicy::Flag {
                let mut record = self.base_record(&root, group);
                record.extraction_error = Some(message.clone());
                records.push(record);
            }
        }
        failed.sort_by(|a, b| {
            (&a.series_uid, &a.sub_series).cmp(&(&b.series_uid, &b.sub_series))
        });

        // 合并已有索引：磁盘上仍存在的序列更新文件数、目录与引用，其余原样保留
        let mut prior = prior;
        for group in &reused {
            if let Some(mut record) = prior.remove(&group.key) {
                record.instances = group.instances();
                record.folder = relative_folder(&root, &group.folder);
                if let Some(hints) = reused_hints.get(&group.key) {
                    apply_resolution(&resolver, &mut record, hints);
                }
                records.push(record);
            }
        }
        records.extend(prior.into_values());
        sort_records(&mut records);

        let index = index_entries(&records);
        let summary = CrawlSummary {
            files_found: files.len(),
            unreadable_paths: discovery
                .unreadable
                .iter()
                .map(|(path, reason)| InvalidFile {
                    path: relative_folder(&root, path),
                    reason: reason.clone(),
                })
                .collect(),
            invalid_files: scan
                .invalid
                .iter()
                .map(|(path, reason)| InvalidFile {
                    path: relative_folder(&root, path),
                    reason: reason.clone(),
                })
                .collect(),
            series_found: grouping.groups.len(),
            extracted: extraction.extracted.len(),
            reused: reused.len(),
            failed,
            cancelled: extraction.cancelled,
            ambiguous_references: records.iter().filter(|r| r.reference_ambiguous).count(),
            split_series: grouping
                .split_series
                .iter()
                .map(|split| SplitSeriesReport {
                    series: split.key.to_string(),
                    folders: split
                        .folders
                        .iter()
                        .map(|folder| relative_folder(&root, folder))
                        .collect(),
                })
                .collect(),
            elapsed: started.elapsed(),
        };

        let sidecar_paths = if summary.is_cancelled() {
            warn!("爬取已取消，{} 个序列未处理，不写出索引", summary.cancelled);
            None
        } else if self.options.persist {
            sidecar.persist(&records)?;
            Some(sidecar.paths().clone())
        } else {
            None
        };

        info!(
            "爬取完成: {} 个文件, {} 个序列 (提取 {}, 沿用 {}, 失败 {})",
            summary.files_found,
            summary.series_found,
            summary.extracted,
            summary.reused,
            summary.failed.len()
        );

        Ok(CrawlOutput {
            records,
            index,
            summary,
            sidecar: sidecar_paths,
        })
    }

    /// 读取上次的完整表；提取失败过的序列会重新提取
    fn load_prior(&self, sidecar: &Sidecar) -> HashMap<SeriesKey, SeriesRecord> {
        if self.options.force {
            return HashMap::new();
        }
        match sidecar.load_records() {
            Ok(Some(records)) => {
                info!("读取已有索引: {} 个序列", records.len());
                records
                    .into_iter()
                    .filter(|record| record.extraction_error.is_none())
                    .map(|record| (record.key(), record))
                    .collect()
            }
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(
                    "已有索引无法读取，将重新提取全部序列 {}: {}",
                    sidecar.paths().metadata_json.display(),
                    e
                );
                HashMap::new()
            }
        }
    }

    fn extract_series<'a>(&self, group: &'a SeriesGroup) -> Result<ExtractedSeries<'a>> {
        let obj = DicomParser::open(&group.representative)?;
        Ok(ExtractedSeries {
            group,
            tags: self.extractor.extract(&obj, &group.modality),
            hints: collect_reference_hints(&obj, &group.modality),
        })
    }

    fn base_record(&self, root: &Path, group: &SeriesGroup) -> SeriesRecord {
        SeriesRecord {
            patient_id: group.patient_id.clone(),
            study_instance_uid: group.study_instance_uid.clone(),
            series_instance_uid: group.key.series_uid.clone(),
            sub_series: group.key.sub_series.clone(),
            modality: group.modality.clone(),
            folder: relative_folder(root, &group.folder),
            instances: group.instances(),
            referenced_modality: None,
            referenced_series_uid: None,
            reference_ambiguous: false,
            reference_candidates: Vec::new(),
            unresolved_reference: None,
            extraction_error: None,
            tags: BTreeMap::new(),
        }
    }
}

/// 解析引用并覆盖记录中的全部引用列
fn apply_resolution(resolver: &ReferenceResolver<'_>, record: &mut SeriesRecord, hints: &ReferenceHints) {
    let resolution = resolver.resolve(&record.series_instance_uid, hints);
    if resolution.ambiguous {
        warn!(
            series = %record.key(),
            candidates = ?resolution.candidates,
            "旧式引用指向多个序列"
        );
    }
    if let Some(uid) = &resolution.unresolved {
        warn!(series = %record.key(), reference = %uid, "引用的序列不在本次爬取中");
    }
    record.referenced_series_uid = resolution.series_uid;
    record.referenced_modality = resolution.modality;
    record.reference_ambiguous = resolution.ambiguous;
    record.reference_candidates = resolution.candidates;
    record.unresolved_reference = resolution.unresolved;
}

/// 以默认配置和给定并行度爬取并写出索引，返回 (完整表, 索引表)
pub fn crawl(root: &Path, n_jobs: usize) -> Result<(Vec<SeriesRecord>, Vec<IndexEntry>)> {
    let output = Crawler::new(CrawlOptions::default().with_jobs(n_jobs)).crawl(root)?;
    Ok((output.records, output.index))
}
