//! 计算字段
//!
//! 每个函数从一个或多个原始标签（或嵌套序列）推导出一个值；
//! 所需的原始标签缺失时返回 `None`，不填充占位值。

use crate::parser::{first_item, get_int, get_string, get_value, sequence_items};
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use imgtools_core::utils::combine_date_time;
use imgtools_core::TagValue;

fn date_time(obj: &InMemDicomObject, date: Tag, time: Tag) -> Option<TagValue> {
    combine_date_time(
        get_string(obj, date).as_deref(),
        get_string(obj, time).as_deref(),
    )
}

fn texts(values: Vec<String>) -> Option<TagValue> {
    if values.is_empty() {
        None
    } else {
        Some(TagValue::Texts(values))
    }
}

pub fn study_datetime(obj: &InMemDicomObject) -> Option<TagValue> {
    date_time(obj, tags::STUDY_DATE, tags::STUDY_TIME)
}

pub fn series_datetime(obj: &InMemDicomObject) -> Option<TagValue> {
    date_time(obj, tags::SERIES_DATE, tags::SERIES_TIME)
}

/// 优先使用 AcquisitionDateTime (DT)，否则合并 AcquisitionDate/AcquisitionTime
pub fn acquisition_datetime(obj: &InMemDicomObject) -> Option<TagValue> {
    get_value(obj, tags::ACQUISITION_DATE_TIME)
        .or_else(|| date_time(obj, tags::ACQUISITION_DATE, tags::ACQUISITION_TIME))
}

pub fn content_datetime(obj: &InMemDicomObject) -> Option<TagValue> {
    date_time(obj, tags::CONTENT_DATE, tags::CONTENT_TIME)
}

pub fn structure_set_datetime(obj: &InMemDicomObject) -> Option<TagValue> {
    date_time(obj, tags::STRUCTURE_SET_DATE, tags::STRUCTURE_SET_TIME)
}

pub fn rt_plan_datetime(obj: &InMemDicomObject) -> Option<TagValue> {
    date_time(obj, tags::RT_PLAN_DATE, tags::RT_PLAN_TIME)
}

/// RTSTRUCT 中的 ROI 名称列表
pub fn rtstruct_roi_names(obj: &InMemDicomObject) -> Option<TagValue> {
    texts(
        sequence_items(obj, tags::STRUCTURE_SET_ROI_SEQUENCE)
            .iter()
            .filter_map(|item| get_string(item, tags::ROI_NAME))
            .collect(),
    )
}

pub fn number_of_rois(obj: &InMemDicomObject) -> Option<TagValue> {
    obj.element(tags::STRUCTURE_SET_ROI_SEQUENCE)
        .ok()?
        .items()
        .map(|items| TagValue::Int(items.len() as i64))
}

/// SEG 中的分割标签列表
pub fn seg_roi_names(obj: &InMemDicomObject) -> Option<TagValue> {
    texts(
        sequence_items(obj, tags::SEGMENT_SEQUENCE)
            .iter()
            .filter_map(|item| get_string(item, tags::SEGMENT_LABEL))
            .collect(),
    )
}

pub fn number_of_segments(obj: &InMemDicomObject) -> Option<TagValue> {
    obj.element(tags::SEGMENT_SEQUENCE)
        .ok()?
        .items()
        .map(|items| TagValue::Int(items.len() as i64))
}

/// SEG 体素间距 `[行间距, 列间距, 层厚]`
///
/// 优先读取共享功能组，缺失时退回第一帧的逐帧功能组。
pub fn seg_spacing(obj: &InMemDicomObject) -> Option<TagValue> {
    [
        tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE,
        tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE,
    ]
    .into_iter()
    .filter_map(|group_tag| first_item(obj, group_tag))
    .filter_map(|group| first_item(group, tags::PIXEL_MEASURES_SEQUENCE))
    .find_map(|measures| {
        let pixel_spacing = measures
            .element(tags::PIXEL_SPACING)
            .ok()?
            .to_multi_float64()
            .ok()?;
        let thickness = measures
            .element(tags::SLICE_THICKNESS)
            .or_else(|_| measures.element(tags::SPACING_BETWEEN_SLICES))
            .ok()?
            .to_float64()
            .ok()?;
        match pixel_spacing.as_slice() {
            [row, column] => Some(TagValue::Floats(vec![*row, *column, thickness])),
            _ => None,
        }
    })
}

fn radiopharmaceutical_field(obj: &InMemDicomObject, tag: Tag) -> Option<TagValue> {
    first_item(obj, tags::RADIOPHARMACEUTICAL_INFORMATION_SEQUENCE)
        .and_then(|item| get_value(item, tag))
}

pub fn radiopharmaceutical(obj: &InMemDicomObject) -> Option<TagValue> {
    radiopharmaceutical_field(obj, tags::RADIOPHARMACEUTICAL)
}

pub fn radionuclide_total_dose(obj: &InMemDicomObject) -> Option<TagValue> {
    radiopharmaceutical_field(obj, tags::RADIONUCLIDE_TOTAL_DOSE)
}

pub fn radionuclide_half_life(obj: &InMemDicomObject) -> Option<TagValue> {
    radiopharmaceutical_field(obj, tags::RADIONUCLIDE_HALF_LIFE)
}

pub fn radiopharmaceutical_start_time(obj: &InMemDicomObject) -> Option<TagValue> {
    radiopharmaceutical_field(obj, tags::RADIOPHARMACEUTICAL_START_TIME)
}

/// 剂量网格的帧数
pub fn number_of_dose_frames(obj: &InMemDicomObject) -> Option<TagValue> {
    let offsets = obj
        .element(tags::GRID_FRAME_OFFSET_VECTOR)
        .ok()?
        .to_multi_float64()
        .ok()?;
    if offsets.is_empty() {
        None
    } else {
        Some(TagValue::Int(offsets.len() as i64))
    }
}

pub fn referenced_rt_plan_sop(obj: &InMemDicomObject) -> Option<TagValue> {
    first_item(obj, tags::REFERENCED_RT_PLAN_SEQUENCE)
        .and_then(|item| get_string(item, tags::REFERENCED_SOP_INSTANCE_UID))
        .map(TagValue::Text)
}

/// 射束数量（光子或离子）
pub fn number_of_beams(obj: &InMemDicomObject) -> Option<TagValue> {
    [tags::BEAM_SEQUENCE, tags::ION_BEAM_SEQUENCE]
        .into_iter()
        .find_map(|tag| obj.element(tag).ok()?.items())
        .map(|items| TagValue::Int(items.len() as i64))
}

pub fn number_of_fractions_planned(obj: &InMemDicomObject) -> Option<TagValue> {
    first_item(obj, tags::FRACTION_GROUP_SEQUENCE)
        .and_then(|item| get_int(item, tags::NUMBER_OF_FRACTIONS_PLANNED))
        .map(TagValue::Int)
}

/// SR 文档标题
pub fn concept_name(obj: &InMemDicomObject) -> Option<TagValue> {
    first_item(obj, tags::CONCEPT_NAME_CODE_SEQUENCE)
        .and_then(|item| get_string(item, tags::CODE_MEANING))
        .map(TagValue::Text)
}
