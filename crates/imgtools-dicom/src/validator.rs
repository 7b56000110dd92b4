//! DICOM头信息验证模块
//!
//! 在分组之前检查每个文件头是否具备建立序列索引所需的标识

use crate::parser::FileHeader;
use imgtools_core::utils::is_valid_dicom_uid;
use imgtools_core::Modality;
use tracing::debug;

/// 文件头验证器
#[derive(Debug, Default)]
pub struct HeaderValidator;

impl HeaderValidator {
    pub fn new() -> Self {
        Self
    }

    /// 验证文件头
    pub fn validate(&self, header: &FileHeader) -> ValidationResult {
        let mut result = ValidationResult::new();

        self.validate_required_uids(header, &mut result);
        self.validate_modality(header, &mut result);

        if result.has_warnings() {
            debug!(
                "文件头验证警告 {}: {}",
                header.path.display(),
                result.warnings.join("; ")
            );
        }

        result
    }

    /// 验证必需的UID
    fn validate_required_uids(&self, header: &FileHeader, result: &mut ValidationResult) {
        let required_uids = [
            ("SeriesInstanceUID", header.series_instance_uid.as_ref()),
            ("SOPInstanceUID", header.sop_instance_uid.as_ref()),
        ];

        for (name, uid) in required_uids {
            match uid {
                Some(value) if !is_valid_dicom_uid(value) => {
                    // 许多历史数据的UID不完全合规，只记录警告
                    result.add_warning(format!("{} 格式不规范: {}", name, value));
                }
                Some(_) => {}
                None => result.add_error(format!("{} 缺失", name)),
            }
        }

        if header.study_instance_uid.is_none() {
            result.add_warning("StudyInstanceUID 缺失".to_string());
        }
        if header.patient_id.is_none() {
            result.add_warning("PatientID 缺失".to_string());
        }
    }

    /// 验证模态
    fn validate_modality(&self, header: &FileHeader, result: &mut ValidationResult) {
        match header.modality.as_deref().map(Modality::parse) {
            Some(Modality::Other(code)) => {
                result.add_warning(format!("不支持的模态，将使用通用提取: {}", code));
            }
            Some(_) => {}
            None => result.add_warning("Modality 缺失".to_string()),
        }
    }
}

/// 验证结果
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// 验证错误列表
    pub errors: Vec<String>,
    /// 验证警告列表
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// 是否通过验证（允许有警告）
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// 获取验证报告摘要
    pub fn get_summary(&self) -> String {
        if self.is_valid() {
            if self.has_warnings() {
                format!("验证通过，但有 {} 个警告", self.warnings.len())
            } else {
                "验证完全通过".to_string()
            }
        } else {
            format!(
                "验证失败：{}",
                self.errors.join("; ")
            )
        }
    }
}
