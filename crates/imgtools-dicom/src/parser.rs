//! DICOM数据解析器
//!
//! 负责打开DICOM文件（不读取像素数据）、读取分组所需的轻量头信息，
//! 以及把数据元素转换为 [`TagValue`]。

use dicom::core::{Tag, VR};
use dicom::dictionary_std::tags;
use dicom::object::mem::InMemElement;
use dicom::object::{DefaultDicomObject, InMemDicomObject, OpenFileOptions};
use imgtools_core::utils::{parse_dicom_date, parse_dicom_datetime};
use imgtools_core::{ImgtoolsError, Result, TagValue};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 读取轻量头信息时停止解析的位置
///
/// 分组所需的标签都位于 (0020,0013) 之前，可以跳过体积较大的轮廓与像素数据。
const HEADER_STOP_TAG: Tag = tags::INSTANCE_NUMBER;

/// 单个文件的轻量头信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileHeader {
    pub path: PathBuf,
    pub patient_id: Option<String>,
    pub study_instance_uid: Option<String>,
    pub series_instance_uid: Option<String>,
    pub sop_instance_uid: Option<String>,
    pub modality: Option<String>,
    pub acquisition_number: Option<String>,
}

/// DICOM数据解析器
pub struct DicomParser;

impl DicomParser {
    /// 读取分组所需的头信息
    pub fn read_header(path: &Path) -> Result<FileHeader> {
        let obj = OpenFileOptions::new()
            .read_until(HEADER_STOP_TAG)
            .open_file(path)
            .map_err(|e| {
                ImgtoolsError::DicomParse(format!("无法解析DICOM文件头 {}: {}", path.display(), e))
            })?;

        Ok(FileHeader {
            path: path.to_path_buf(),
            patient_id: get_string(&obj, tags::PATIENT_ID),
            study_instance_uid: get_string(&obj, tags::STUDY_INSTANCE_UID),
            series_instance_uid: get_string(&obj, tags::SERIES_INSTANCE_UID),
            sop_instance_uid: get_string(&obj, tags::SOP_INSTANCE_UID),
            modality: get_string(&obj, tags::MODALITY),
            acquisition_number: get_string(&obj, tags::ACQUISITION_NUMBER),
        })
    }

    /// 打开完整的元数据部分（像素数据之前的所有元素）
    pub fn open(path: &Path) -> Result<DefaultDicomObject> {
        debug!("打开DICOM文件: {}", path.display());
        OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .map_err(|e| {
                ImgtoolsError::DicomParse(format!("无法解析DICOM文件 {}: {}", path.display(), e))
            })
    }
}

/// 获取字符串类型元素的值（去除填充空白，空值视为缺失）
pub fn get_string(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    let element = obj.element(tag).ok()?;
    let value = element.to_str().ok()?;
    let value = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// 获取多值字符串元素
pub fn get_strings(obj: &InMemDicomObject, tag: Tag) -> Vec<String> {
    obj.element(tag)
        .ok()
        .and_then(|element| element.to_multi_str().ok())
        .map(|values| {
            values
                .iter()
                .map(|v| v.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string())
                .filter(|v| !v.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// 获取整数类型元素的值
pub fn get_int(obj: &InMemDicomObject, tag: Tag) -> Option<i64> {
    obj.element(tag).ok()?.to_int::<i64>().ok()
}

/// 获取序列元素的条目
pub fn sequence_items(obj: &InMemDicomObject, tag: Tag) -> &[InMemDicomObject] {
    obj.element(tag)
        .ok()
        .and_then(|element| element.items())
        .unwrap_or(&[])
}

/// 获取序列元素的第一个条目
pub fn first_item(obj: &InMemDicomObject, tag: Tag) -> Option<&InMemDicomObject> {
    sequence_items(obj, tag).first()
}

/// 读取标签并转换为 [`TagValue`]
pub fn get_value(obj: &InMemDicomObject, tag: Tag) -> Option<TagValue> {
    obj.element(tag).ok().and_then(convert_element)
}

/// 按 VR 转换数据元素
///
/// 序列与二进制元素返回 `None`；日期可解析时归一化，否则保留原始字符串。
pub fn convert_element(element: &InMemElement) -> Option<TagValue> {
    match element.vr() {
        VR::SQ | VR::OB | VR::OW | VR::OF | VR::OD | VR::OL | VR::OV | VR::UN => None,
        VR::DA => {
            let raw = element_text(element)?;
            Some(
                parse_dicom_date(&raw)
                    .map(TagValue::Date)
                    .unwrap_or(TagValue::Text(raw)),
            )
        }
        VR::DT => {
            let raw = element_text(element)?;
            Some(
                parse_dicom_datetime(&raw)
                    .map(TagValue::DateTime)
                    .unwrap_or(TagValue::Text(raw)),
            )
        }
        VR::IS | VR::SL | VR::SS | VR::UL | VR::US | VR::SV | VR::UV => {
            match element.to_multi_int::<i64>() {
                Ok(values) => match values.as_slice() {
                    [] => None,
                    [single] => Some(TagValue::Int(*single)),
                    many => Some(TagValue::Ints(many.to_vec())),
                },
                Err(_) => element_text(element).map(TagValue::Text),
            }
        }
        VR::DS | VR::FL | VR::FD => match element.to_multi_float64() {
            Ok(values) => match values.as_slice() {
                [] => None,
                [single] => Some(TagValue::Float(*single)),
                many => Some(TagValue::Floats(many.to_vec())),
            },
            Err(_) => element_text(element).map(TagValue::Text),
        },
        _ => {
            let values: Vec<String> = element
                .to_multi_str()
                .ok()?
                .iter()
                .map(|v| v.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string())
                .filter(|v| !v.is_empty())
                .collect();
            match values.len() {
                0 => None,
                1 => values.into_iter().next().map(TagValue::Text),
                _ => Some(TagValue::Texts(values)),
            }
        }
    }
}

fn element_text(element: &InMemElement) -> Option<String> {
    let value = element.to_str().ok()?;
    let value = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
