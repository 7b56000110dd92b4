//! 元数据提取器
//!
//! 每种模态对应一张声明式的表：直接读取的原始标签，加上由原始标签或嵌套序列
//! 推导出的计算字段。未知模态只提取基础标签。

use crate::computed;
use crate::parser::{get_value, DicomParser};
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use imgtools_core::{Modality, Result, TagValue};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// 原始标签：输出列名与 DICOM 标签
pub type RawTag = (&'static str, Tag);

/// 计算字段
#[derive(Clone, Copy)]
pub struct ComputedField {
    pub name: &'static str,
    pub compute: fn(&InMemDicomObject) -> Option<TagValue>,
}

impl std::fmt::Debug for ComputedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedField").field("name", &self.name).finish()
    }
}

/// 单个模态的提取表
#[derive(Debug, Clone, Copy)]
pub struct ModalitySchema {
    pub raw_tags: &'static [&'static [RawTag]],
    pub computed: &'static [ComputedField],
}

const fn field(
    name: &'static str,
    compute: fn(&InMemDicomObject) -> Option<TagValue>,
) -> ComputedField {
    ComputedField { name, compute }
}

const BASE_TAGS: &[RawTag] = &[
    ("PatientID", tags::PATIENT_ID),
    ("StudyInstanceUID", tags::STUDY_INSTANCE_UID),
    ("SeriesInstanceUID", tags::SERIES_INSTANCE_UID),
    ("SOPClassUID", tags::SOP_CLASS_UID),
    ("Modality", tags::MODALITY),
    ("FrameOfReferenceUID", tags::FRAME_OF_REFERENCE_UID),
    ("StudyDescription", tags::STUDY_DESCRIPTION),
    ("SeriesDescription", tags::SERIES_DESCRIPTION),
    ("SeriesNumber", tags::SERIES_NUMBER),
    ("Manufacturer", tags::MANUFACTURER),
    ("ManufacturerModelName", tags::MANUFACTURER_MODEL_NAME),
    ("InstitutionName", tags::INSTITUTION_NAME),
    ("BodyPartExamined", tags::BODY_PART_EXAMINED),
    ("NumberOfFrames", tags::NUMBER_OF_FRAMES),
];

const BASE_COMPUTED: &[ComputedField] = &[
    field("StudyDateTime", computed::study_datetime),
    field("SeriesDateTime", computed::series_datetime),
];

const GEOMETRY_TAGS: &[RawTag] = &[
    ("SliceThickness", tags::SLICE_THICKNESS),
    ("PixelSpacing", tags::PIXEL_SPACING),
    ("Rows", tags::ROWS),
    ("Columns", tags::COLUMNS),
    ("ImageOrientationPatient", tags::IMAGE_ORIENTATION_PATIENT),
];

const CT_TAGS: &[RawTag] = &[
    ("KVP", tags::KVP),
    ("ConvolutionKernel", tags::CONVOLUTION_KERNEL),
    ("ReconstructionDiameter", tags::RECONSTRUCTION_DIAMETER),
    ("XRayTubeCurrent", tags::X_RAY_TUBE_CURRENT),
    ("ExposureTime", tags::EXPOSURE_TIME),
    ("ContrastBolusAgent", tags::CONTRAST_BOLUS_AGENT),
];

const MR_TAGS: &[RawTag] = &[
    ("MagneticFieldStrength", tags::MAGNETIC_FIELD_STRENGTH),
    ("RepetitionTime", tags::REPETITION_TIME),
    ("EchoTime", tags::ECHO_TIME),
    ("InversionTime", tags::INVERSION_TIME),
    ("FlipAngle", tags::FLIP_ANGLE),
    ("ScanningSequence", tags::SCANNING_SEQUENCE),
    ("SequenceVariant", tags::SEQUENCE_VARIANT),
    ("ImagingFrequency", tags::IMAGING_FREQUENCY),
    ("EchoTrainLength", tags::ECHO_TRAIN_LENGTH),
    ("AcquisitionNumber", tags::ACQUISITION_NUMBER),
];

const PT_TAGS: &[RawTag] = &[
    ("Units", tags::UNITS),
    ("DecayCorrection", tags::DECAY_CORRECTION),
    ("CorrectedImage", tags::CORRECTED_IMAGE),
    ("AttenuationCorrectionMethod", tags::ATTENUATION_CORRECTION_METHOD),
    ("ReconstructionMethod", tags::RECONSTRUCTION_METHOD),
];

const SEG_TAGS: &[RawTag] = &[
    ("SegmentationType", tags::SEGMENTATION_TYPE),
    ("ContentLabel", tags::CONTENT_LABEL),
    ("Rows", tags::ROWS),
    ("Columns", tags::COLUMNS),
];

const RTSTRUCT_TAGS: &[RawTag] = &[
    ("StructureSetLabel", tags::STRUCTURE_SET_LABEL),
    ("StructureSetName", tags::STRUCTURE_SET_NAME),
];

const RTDOSE_TAGS: &[RawTag] = &[
    ("DoseUnits", tags::DOSE_UNITS),
    ("DoseType", tags::DOSE_TYPE),
    ("DoseSummationType", tags::DOSE_SUMMATION_TYPE),
    ("DoseGridScaling", tags::DOSE_GRID_SCALING),
    ("Rows", tags::ROWS),
    ("Columns", tags::COLUMNS),
    ("PixelSpacing", tags::PIXEL_SPACING),
];

const RTPLAN_TAGS: &[RawTag] = &[
    ("RTPlanLabel", tags::RT_PLAN_LABEL),
    ("RTPlanName", tags::RT_PLAN_NAME),
    ("ApprovalStatus", tags::APPROVAL_STATUS),
    ("PlanIntent", tags::PLAN_INTENT),
];

const SR_TAGS: &[RawTag] = &[
    ("CompletionFlag", tags::COMPLETION_FLAG),
    ("VerificationFlag", tags::VERIFICATION_FLAG),
];

const IMAGE_COMPUTED: &[ComputedField] =
    &[field("AcquisitionDateTime", computed::acquisition_datetime)];

const PT_COMPUTED: &[ComputedField] = &[
    field("AcquisitionDateTime", computed::acquisition_datetime),
    field("Radiopharmaceutical", computed::radiopharmaceutical),
    field("RadionuclideTotalDose", computed::radionuclide_total_dose),
    field("RadionuclideHalfLife", computed::radionuclide_half_life),
    field("RadiopharmaceuticalStartTime", computed::radiopharmaceutical_start_time),
];

const SEG_COMPUTED: &[ComputedField] = &[
    field("ROINames", computed::seg_roi_names),
    field("NumberOfSegments", computed::number_of_segments),
    field("SegSpacing", computed::seg_spacing),
    field("ContentDateTime", computed::content_datetime),
];

const RTSTRUCT_COMPUTED: &[ComputedField] = &[
    field("ROINames", computed::rtstruct_roi_names),
    field("NumberOfROIs", computed::number_of_rois),
    field("StructureSetDateTime", computed::structure_set_datetime),
];

const RTDOSE_COMPUTED: &[ComputedField] = &[
    field("NumberOfDoseFrames", computed::number_of_dose_frames),
    field("ReferencedRTPlanSOPInstanceUID", computed::referenced_rt_plan_sop),
];

const RTPLAN_COMPUTED: &[ComputedField] = &[
    field("RTPlanDateTime", computed::rt_plan_datetime),
    field("NumberOfBeams", computed::number_of_beams),
    field("NumberOfFractionsPlanned", computed::number_of_fractions_planned),
];

const SR_COMPUTED: &[ComputedField] = &[
    field("ContentDateTime", computed::content_datetime),
    field("ConceptName", computed::concept_name),
];

/// 获取模态对应的提取表（不含基础标签）
pub fn schema_for(modality: &Modality) -> ModalitySchema {
    match modality {
        Modality::CT => ModalitySchema {
            raw_tags: &[GEOMETRY_TAGS, CT_TAGS],
            computed: IMAGE_COMPUTED,
        },
        Modality::MR => ModalitySchema {
            raw_tags: &[GEOMETRY_TAGS, MR_TAGS],
            computed: IMAGE_COMPUTED,
        },
        Modality::PT => ModalitySchema {
            raw_tags: &[GEOMETRY_TAGS, PT_TAGS],
            computed: PT_COMPUTED,
        },
        Modality::SEG => ModalitySchema {
            raw_tags: &[SEG_TAGS],
            computed: SEG_COMPUTED,
        },
        Modality::RTSTRUCT => ModalitySchema {
            raw_tags: &[RTSTRUCT_TAGS],
            computed: RTSTRUCT_COMPUTED,
        },
        Modality::RTDOSE => ModalitySchema {
            raw_tags: &[RTDOSE_TAGS],
            computed: RTDOSE_COMPUTED,
        },
        Modality::RTPLAN => ModalitySchema {
            raw_tags: &[RTPLAN_TAGS],
            computed: RTPLAN_COMPUTED,
        },
        Modality::SR => ModalitySchema {
            raw_tags: &[SR_TAGS],
            computed: SR_COMPUTED,
        },
        Modality::Other(_) => ModalitySchema {
            raw_tags: &[],
            computed: &[],
        },
    }
}

/// 元数据提取器
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    /// 从已打开的对象提取元数据；缺失的标签与无法计算的字段直接省略
    pub fn extract(&self, obj: &InMemDicomObject, modality: &Modality) -> BTreeMap<String, TagValue> {
        let schema = schema_for(modality);
        let mut fields = BTreeMap::new();

        let raw_tags = std::iter::once(BASE_TAGS).chain(schema.raw_tags.iter().copied());
        for (name, tag) in raw_tags.flatten() {
            if let Some(value) = get_value(obj, *tag) {
                fields.insert((*name).to_string(), value);
            }
        }

        for computed in BASE_COMPUTED.iter().chain(schema.computed) {
            if let Some(value) = (computed.compute)(obj) {
                fields.insert(computed.name.to_string(), value);
            }
        }

        fields
    }

    /// 打开文件（不读取像素数据）并提取元数据
    pub fn extract_file(&self, path: &Path, modality: &Modality) -> Result<BTreeMap<String, TagValue>> {
        let obj = DicomParser::open(path)?;
        let fields = self.extract(&obj, modality);
        debug!(
            "提取完成 {} ({}): {} 个字段",
            path.display(),
            modality,
            fields.len()
        );
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::value::DataSetSequence;
    use dicom::core::{dicom_value, DataElement, PrimitiveValue, VR};
    use dicom::object::FileMetaTableBuilder;

    fn ct_object() -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("P001")),
            DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3")),
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4")),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
            DataElement::new(tags::STUDY_DATE, VR::DA, PrimitiveValue::from("20210405")),
            DataElement::new(tags::STUDY_TIME, VR::TM, PrimitiveValue::from("083000")),
            DataElement::new(tags::KVP, VR::DS, PrimitiveValue::from("120")),
            DataElement::new(tags::PIXEL_SPACING, VR::DS, dicom_value!(Strs, ["0.97", "0.97"])),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(512_u16)),
        ])
    }

    #[test]
    fn test_schema_tables_per_modality() {
        let names = |modality: Modality| -> Vec<&'static str> {
            schema_for(&modality)
                .raw_tags
                .iter()
                .flat_map(|table| table.iter().map(|(name, _)| *name))
                .collect()
        };

        let ct = names(Modality::CT);
        assert!(ct.contains(&"SliceThickness"));
        assert!(ct.contains(&"KVP"));
        let mr = names(Modality::MR);
        assert!(mr.contains(&"PixelSpacing"));
        assert!(mr.contains(&"EchoTime"));
        assert!(!mr.contains(&"KVP"));
        assert!(names(Modality::RTSTRUCT).contains(&"StructureSetLabel"));
        assert!(names(Modality::parse("US")).is_empty());
        assert_eq!(schema_for(&Modality::PT).computed.len(), PT_COMPUTED.len());
    }

    #[test]
    fn test_ct_extraction() {
        let fields = MetadataExtractor::new().extract(&ct_object(), &Modality::CT);

        assert_eq!(fields.get("PatientID"), Some(&TagValue::Text("P001".into())));
        assert_eq!(fields.get("KVP"), Some(&TagValue::Float(120.0)));
        assert_eq!(fields.get("Rows"), Some(&TagValue::Int(512)));
        assert_eq!(fields.get("PixelSpacing"), Some(&TagValue::Floats(vec![0.97, 0.97])));
        assert!(matches!(fields.get("StudyDateTime"), Some(TagValue::DateTime(_))));
        // 缺失的标签与计算字段被省略
        assert!(!fields.contains_key("ConvolutionKernel"));
        assert!(!fields.contains_key("AcquisitionDateTime"));
        assert!(!fields.contains_key("SeriesDateTime"));
    }

    #[test]
    fn test_unknown_modality_falls_back_to_base_tags() {
        let fields = MetadataExtractor::new().extract(&ct_object(), &Modality::parse("US"));

        assert!(fields.contains_key("PatientID"));
        assert!(fields.contains_key("SeriesInstanceUID"));
        assert!(fields.contains_key("StudyDateTime"));
        assert!(!fields.contains_key("KVP"));
        assert!(!fields.contains_key("Rows"));
    }

    #[test]
    fn test_empty_object_yields_no_fields() {
        let empty = InMemDicomObject::new_empty();
        for modality in [Modality::CT, Modality::RTSTRUCT, Modality::SEG, Modality::Other("XA".into())] {
            assert!(MetadataExtractor::new().extract(&empty, &modality).is_empty());
        }
    }

    #[test]
    fn test_rtstruct_extraction() {
        let obj = InMemDicomObject::from_element_iter([
            DataElement::new(tags::STRUCTURE_SET_LABEL, VR::SH, PrimitiveValue::from("RS1")),
            DataElement::new(tags::STRUCTURE_SET_DATE, VR::DA, PrimitiveValue::from("20210405")),
            DataElement::new(
                tags::STRUCTURE_SET_ROI_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(vec![InMemDicomObject::from_element_iter([
                    DataElement::new(tags::ROI_NAME, VR::LO, PrimitiveValue::from("GTV")),
                ])]),
            ),
        ]);

        let fields = MetadataExtractor::new().extract(&obj, &Modality::RTSTRUCT);
        assert_eq!(fields.get("StructureSetLabel"), Some(&TagValue::Text("RS1".into())));
        assert_eq!(fields.get("ROINames"), Some(&TagValue::Texts(vec!["GTV".into()])));
        assert_eq!(fields.get("NumberOfROIs"), Some(&TagValue::Int(1)));
        // 只有日期时退回 Date
        assert!(matches!(fields.get("StructureSetDateTime"), Some(TagValue::Date(_))));
    }

    #[test]
    fn test_extract_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ct.dcm");
        let mut obj = ct_object();
        obj.put(DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.2")));
        obj.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4.1")));
        obj.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax("1.2.840.10008.1.2.1")
                .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.2")
                .media_storage_sop_instance_uid("1.2.3.4.1"),
        )
        .unwrap()
        .write_to_file(&path)
        .unwrap();

        let fields = MetadataExtractor::new().extract_file(&path, &Modality::CT).unwrap();
        assert_eq!(fields.get("SeriesInstanceUID"), Some(&TagValue::Text("1.2.3.4".into())));
        assert_eq!(
            fields.get("SOPClassUID"),
            Some(&TagValue::Text("1.2.840.10008.5.1.4.1.1.2".into()))
        );
    }
}
