//! 引用线索收集
//!
//! 派生对象（RTSTRUCT、RTDOSE、RTPLAN、SEG）通过两种方式指向其来源序列：
//! 新式的序列级引用直接给出 SeriesInstanceUID；旧式文件只有实例级的
//! ReferencedSOPInstanceUID，需要借助 SOP→Series 映射表解析。

use crate::parser::{get_string, get_strings, sequence_items};
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use imgtools_core::Modality;

/// 单个序列的引用线索
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceHints {
    /// 序列级引用（按出现顺序去重）
    pub series_uids: Vec<String>,
    /// 文件中出现的全部 ReferencedSOPInstanceUID（保留重复，用于多数投票）
    pub sop_instance_uids: Vec<String>,
}

impl ReferenceHints {
    pub fn is_empty(&self) -> bool {
        self.series_uids.is_empty() && self.sop_instance_uids.is_empty()
    }
}

/// 收集引用线索；不会引用其他序列的模态返回空结果
pub fn collect_reference_hints(obj: &InMemDicomObject, modality: &Modality) -> ReferenceHints {
    if !modality.can_reference() {
        return ReferenceHints::default();
    }

    let mut series_uids = Vec::new();
    if *modality == Modality::RTSTRUCT {
        collect_rtstruct_series(obj, &mut series_uids);
    }
    collect_referenced_series_sequence(obj, &mut series_uids);

    let mut sop_instance_uids = Vec::new();
    collect_sop_instance_uids(obj, &mut sop_instance_uids);

    ReferenceHints {
        series_uids,
        sop_instance_uids,
    }
}

fn push_unique(target: &mut Vec<String>, uid: String) {
    if !target.contains(&uid) {
        target.push(uid);
    }
}

/// ReferencedFrameOfReferenceSequence → RTReferencedStudySequence → RTReferencedSeriesSequence
fn collect_rtstruct_series(obj: &InMemDicomObject, out: &mut Vec<String>) {
    for frame in sequence_items(obj, tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE) {
        for study in sequence_items(frame, tags::RT_REFERENCED_STUDY_SEQUENCE) {
            for series in sequence_items(study, tags::RT_REFERENCED_SERIES_SEQUENCE) {
                if let Some(uid) = get_string(series, tags::SERIES_INSTANCE_UID) {
                    push_unique(out, uid);
                }
            }
        }
    }
}

/// ReferencedSeriesSequence → SeriesInstanceUID（SEG 以及部分厂商的 RTDOSE/RTPLAN）
fn collect_referenced_series_sequence(obj: &InMemDicomObject, out: &mut Vec<String>) {
    for series in sequence_items(obj, tags::REFERENCED_SERIES_SEQUENCE) {
        if let Some(uid) = get_string(series, tags::SERIES_INSTANCE_UID) {
            push_unique(out, uid);
        }
    }
}

/// 递归收集所有嵌套序列中的 ReferencedSOPInstanceUID
fn collect_sop_instance_uids(obj: &InMemDicomObject, out: &mut Vec<String>) {
    for element in obj.iter() {
        if element.header().tag == tags::REFERENCED_SOP_INSTANCE_UID {
            out.extend(get_strings(obj, tags::REFERENCED_SOP_INSTANCE_UID));
        } else if let Some(items) = element.items() {
            for item in items {
                collect_sop_instance_uids(item, out);
            }
        }
    }
}
