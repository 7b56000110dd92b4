//! 合成 DICOM 数据集
//!
//! 仅写入爬取与提取用到的标签，不包含像素数据。

use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::{tags, uids};
use dicom::object::mem::InMemElement;
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use imgtools_core::{ImgtoolsError, Result};
use std::fs;
use std::path::Path;

/// 一个实例的标识信息
#[derive(Debug, Clone, Copy)]
pub struct Instance<'a> {
    pub patient_id: &'a str,
    pub study_uid: &'a str,
    pub series_uid: &'a str,
    pub sop_uid: &'a str,
    pub modality: &'a str,
}

impl<'a> Instance<'a> {
    pub fn new(series_uid: &'a str, sop_uid: &'a str, modality: &'a str) -> Self {
        Self {
            patient_id: "PAT-1",
            study_uid: "STUDY-1",
            series_uid,
            sop_uid,
            modality,
        }
    }

    pub fn patient(mut self, patient_id: &'a str) -> Self {
        self.patient_id = patient_id;
        self
    }
}

fn sop_class_for(modality: &str) -> &'static str {
    match modality {
        "MR" => uids::MR_IMAGE_STORAGE,
        "PT" => uids::POSITRON_EMISSION_TOMOGRAPHY_IMAGE_STORAGE,
        "RTSTRUCT" => uids::RT_STRUCTURE_SET_STORAGE,
        "RTDOSE" => uids::RT_DOSE_STORAGE,
        "RTPLAN" => uids::RT_PLAN_STORAGE,
        "SEG" => uids::SEGMENTATION_STORAGE,
        _ => uids::CT_IMAGE_STORAGE,
    }
}

pub fn text(tag: Tag, vr: VR, value: &str) -> InMemElement {
    DataElement::new(tag, vr, PrimitiveValue::from(value))
}

pub fn item(elements: Vec<InMemElement>) -> InMemDicomObject {
    InMemDicomObject::from_element_iter(elements)
}

pub fn sequence(tag: Tag, items: Vec<InMemDicomObject>) -> InMemElement {
    DataElement::new(tag, VR::SQ, DataSetSequence::from(items))
}

/// 写出一个实例，`extra` 中的元素追加在标识信息之后
pub fn write_instance(path: &Path, instance: &Instance<'_>, extra: Vec<InMemElement>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let sop_class = sop_class_for(instance.modality);
    let mut obj = item(vec![
        text(tags::SOP_CLASS_UID, VR::UI, sop_class),
        text(tags::SOP_INSTANCE_UID, VR::UI, instance.sop_uid),
        text(tags::STUDY_DATE, VR::DA, "20200115"),
        text(tags::STUDY_TIME, VR::TM, "093000"),
        text(tags::MODALITY, VR::CS, instance.modality),
        text(tags::PATIENT_ID, VR::LO, instance.patient_id),
        text(tags::STUDY_INSTANCE_UID, VR::UI, instance.study_uid),
        text(tags::SERIES_INSTANCE_UID, VR::UI, instance.series_uid),
    ]);
    for element in extra {
        obj.put(element);
    }

    obj.with_meta(
        FileMetaTableBuilder::new()
            .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(sop_class)
            .media_storage_sop_instance_uid(instance.sop_uid),
    )
    .map_err(|e| ImgtoolsError::Dicom(e.to_string()))?
    .write_to_file(path)
    .map_err(|e| ImgtoolsError::Dicom(e.to_string()))
}

/// 写出 `count` 个 CT 实例，SOPInstanceUID 为 `<series>.<n>`，返回这些 UID
pub fn write_ct_series(dir: &Path, patient_id: &str, series_uid: &str, count: usize) -> Result<Vec<String>> {
    (1..=count)
        .map(|n| -> Result<String> {
            let sop_uid = format!("{}.{}", series_uid, n);
            let instance = Instance::new(series_uid, &sop_uid, "CT").patient(patient_id);
            write_instance(
                &dir.join(format!("{}.dcm", n)),
                &instance,
                vec![
                    text(tags::KVP, VR::DS, "120"),
                    DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(512_u16)),
                ],
            )?;
            Ok(sop_uid)
        })
        .collect()
}

/// 写出 RTSTRUCT；`referenced_series` 为新式序列引用，`contour_sops` 为轮廓引用的实例
pub fn write_rtstruct(
    path: &Path,
    instance: &Instance<'_>,
    referenced_series: Option<&str>,
    contour_sops: &[&str],
) -> Result<()> {
    let contour_images: Vec<InMemDicomObject> = contour_sops
        .iter()
        .map(|sop| {
            item(vec![
                text(tags::REFERENCED_SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE),
                text(tags::REFERENCED_SOP_INSTANCE_UID, VR::UI, sop),
            ])
        })
        .collect();

    let mut series_item = vec![sequence(tags::CONTOUR_IMAGE_SEQUENCE, contour_images)];
    if let Some(series_uid) = referenced_series {
        series_item.push(text(tags::SERIES_INSTANCE_UID, VR::UI, series_uid));
    }

    let frame_of_reference = item(vec![sequence(
        tags::RT_REFERENCED_STUDY_SEQUENCE,
        vec![item(vec![sequence(
            tags::RT_REFERENCED_SERIES_SEQUENCE,
            vec![item(series_item)],
        )])],
    )]);

    write_instance(
        path,
        instance,
        vec![
            text(tags::STRUCTURE_SET_LABEL, VR::SH, "RS"),
            sequence(tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE, vec![frame_of_reference]),
            sequence(
                tags::STRUCTURE_SET_ROI_SEQUENCE,
                vec![
                    item(vec![text(tags::ROI_NAME, VR::LO, "GTV")]),
                    item(vec![text(tags::ROI_NAME, VR::LO, "Heart")]),
                ],
            ),
        ],
    )
}

/// 写出只带实例级引用的旧式 RTDOSE
pub fn write_legacy_rtdose(path: &Path, instance: &Instance<'_>, referenced_sops: &[&str]) -> Result<()> {
    let images = referenced_sops
        .iter()
        .map(|sop| item(vec![text(tags::REFERENCED_SOP_INSTANCE_UID, VR::UI, sop)]))
        .collect();

    write_instance(
        path,
        instance,
        vec![
            text(tags::DOSE_UNITS, VR::CS, "GY"),
            text(tags::DOSE_TYPE, VR::CS, "PHYSICAL"),
            sequence(tags::REFERENCED_IMAGE_SEQUENCE, images),
        ],
    )
}

/// 写出带新式序列引用的 SEG
pub fn write_seg(path: &Path, instance: &Instance<'_>, referenced_series: &str) -> Result<()> {
    write_instance(
        path,
        instance,
        vec![
            text(tags::SEGMENTATION_TYPE, VR::CS, "BINARY"),
            sequence(
                tags::REFERENCED_SERIES_SEQUENCE,
                vec![item(vec![text(tags::SERIES_INSTANCE_UID, VR::UI, referenced_series)])],
            ),
            sequence(
                tags::SEGMENT_SEQUENCE,
                vec![item(vec![text(tags::SEGMENT_LABEL, VR::LO, "Liver")])],
            ),
        ],
    )
}

/// CT-1（两个实例）、RT-1（新式引用 CT-1）、DOSE-1（旧式实例引用指向 CT-1）
pub fn write_reference_scenario(root: &Path) -> Result<()> {
    let ct_sops = write_ct_series(&root.join("patient/ct"), "PAT-1", "CT-1", 2)?;
    write_rtstruct(
        &root.join("patient/rt/rtstruct.dcm"),
        &Instance::new("RT-1", "RT-1.1", "RTSTRUCT"),
        Some("CT-1"),
        &[ct_sops[0].as_str()],
    )?;
    let refs: Vec<&str> = ct_sops.iter().map(String::as_str).collect();
    write_legacy_rtdose(
        &root.join("patient/dose/rtdose.dcm"),
        &Instance::new("DOSE-1", "DOSE-1.1", "RTDOSE"),
        &refs,
    )
}
