//! 核心数据模型定义

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 默认子序列编号
pub const DEFAULT_SUB_SERIES: &str = "1";

/// 精简索引表的列顺序
pub const INDEX_COLUMNS: [&str; 9] = [
    "PatientID",
    "StudyInstanceUID",
    "SeriesInstanceUID",
    "SubSeries",
    "Modality",
    "ReferencedModality",
    "ReferencedSeriesUID",
    "instances",
    "folder",
];

/// 序列模态
///
/// 封闭枚举，未知模态落入 `Other` 分支。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Modality {
    CT,
    MR,
    PT,
    SEG,
    RTSTRUCT,
    RTDOSE,
    RTPLAN,
    SR,
    Other(String),
}

impl Modality {
    /// 解析模态代码（忽略大小写与首尾空白）
    pub fn parse(code: &str) -> Self {
        let code = code.trim().to_ascii_uppercase();
        match code.as_str() {
            "CT" => Modality::CT,
            "MR" => Modality::MR,
            "PT" => Modality::PT,
            "SEG" => Modality::SEG,
            "RTSTRUCT" => Modality::RTSTRUCT,
            "RTDOSE" => Modality::RTDOSE,
            "RTPLAN" => Modality::RTPLAN,
            "SR" => Modality::SR,
            _ => Modality::Other(code),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Modality::CT => "CT",
            Modality::MR => "MR",
            Modality::PT => "PT",
            Modality::SEG => "SEG",
            Modality::RTSTRUCT => "RTSTRUCT",
            Modality::RTDOSE => "RTDOSE",
            Modality::RTPLAN => "RTPLAN",
            Modality::SR => "SR",
            Modality::Other(code) => code,
        }
    }

    /// 是否为影像模态 (CT/MR/PT)
    pub fn is_image(&self) -> bool {
        matches!(self, Modality::CT | Modality::MR | Modality::PT)
    }

    /// 是否可能引用其他序列
    pub fn can_reference(&self) -> bool {
        matches!(
            self,
            Modality::RTSTRUCT | Modality::RTDOSE | Modality::RTPLAN | Modality::SEG
        )
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Modality {
    fn from(code: String) -> Self {
        Modality::parse(&code)
    }
}

impl From<&str> for Modality {
    fn from(code: &str) -> Self {
        Modality::parse(code)
    }
}

impl From<Modality> for String {
    fn from(modality: Modality) -> Self {
        modality.as_str().to_string()
    }
}

/// 提取出的标签值
///
/// 日期在可解析时归一化为 `Date`/`DateTime`，否则保留原始字符串。
/// JSON 中带类型标记（`{"type": "Date", "value": "2021-03-04"}`），重新读取时类型不变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum TagValue {
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Text(String),
    Texts(Vec<String>),
}

impl TagValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TagValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            TagValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: fmt::Display>(items: &[T]) -> String {
            items
                .iter()
                .map(|item| item.to_string())
                .collect::<Vec<_>>()
                .join("|")
        }

        match self {
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Float(v) => write!(f, "{}", v),
            TagValue::Ints(values) => f.write_str(&join(values)),
            TagValue::Floats(values) => f.write_str(&join(values)),
            TagValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            TagValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            TagValue::Text(s) => f.write_str(s),
            TagValue::Texts(values) => f.write_str(&values.join("|")),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Text(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Float(value)
    }
}

/// 序列标识：SeriesInstanceUID + SubSeries
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub series_uid: String,
    pub sub_series: String,
}

impl SeriesKey {
    pub fn new(series_uid: impl Into<String>, sub_series: impl Into<String>) -> Self {
        Self {
            series_uid: series_uid.into(),
            sub_series: sub_series.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sub_series == DEFAULT_SUB_SERIES {
            f.write_str(&self.series_uid)
        } else {
            write!(f, "{}#{}", self.series_uid, self.sub_series)
        }
    }
}

/// 完整元数据表中的一行（每个序列一行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    #[serde(rename = "PatientID")]
    pub patient_id: String,
    #[serde(rename = "StudyInstanceUID")]
    pub study_instance_uid: String,
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: String,
    #[serde(rename = "SubSeries")]
    pub sub_series: String,
    #[serde(rename = "Modality")]
    pub modality: Modality,
    /// 相对于爬取根目录的序列目录
    pub folder: String,
    /// 文件数
    pub instances: usize,
    #[serde(rename = "ReferencedModality", default, skip_serializing_if = "Option::is_none")]
    pub referenced_modality: Option<Modality>,
    #[serde(rename = "ReferencedSeriesUID", default, skip_serializing_if = "Option::is_none")]
    pub referenced_series_uid: Option<String>,
    /// 旧式引用解析到多个序列
    #[serde(rename = "ReferenceAmbiguous", default)]
    pub reference_ambiguous: bool,
    #[serde(rename = "ReferenceCandidates", default, skip_serializing_if = "Vec::is_empty")]
    pub reference_candidates: Vec<String>,
    /// 新式引用指向的序列不在本次爬取中，仅保留在完整表
    #[serde(rename = "UnresolvedReference", default, skip_serializing_if = "Option::is_none")]
    pub unresolved_reference: Option<String>,
    /// 提取失败时的错误信息（仅在 flag 策略下出现）
    #[serde(rename = "ExtractionError", default, skip_serializing_if = "Option::is_none")]
    pub extraction_error: Option<String>,
    /// 模态相关的标签与计算字段
    #[serde(default)]
    pub tags: BTreeMap<String, TagValue>,
}

impl SeriesRecord {
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(&self.series_instance_uid, &self.sub_series)
    }

    /// 持久化前的确定性排序键
    pub fn sort_key(&self) -> (&str, &str, &str, &str) {
        (
            &self.patient_id,
            &self.study_instance_uid,
            &self.series_instance_uid,
            &self.sub_series,
        )
    }

    /// 投影为精简索引行
    pub fn to_index_entry(&self) -> IndexEntry {
        IndexEntry {
            patient_id: self.patient_id.clone(),
            study_instance_uid: self.study_instance_uid.clone(),
            series_instance_uid: self.series_instance_uid.clone(),
            sub_series: self.sub_series.clone(),
            modality: self.modality.clone(),
            referenced_modality: self.referenced_modality.clone(),
            referenced_series_uid: self.referenced_series_uid.clone(),
            instances: self.instances,
            folder: self.folder.clone(),
        }
    }
}

/// 精简索引行，森林构建的输入
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(rename = "PatientID")]
    pub patient_id: String,
    #[serde(rename = "StudyInstanceUID")]
    pub study_instance_uid: String,
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: String,
    #[serde(rename = "SubSeries")]
    pub sub_series: String,
    #[serde(rename = "Modality")]
    pub modality: Modality,
    #[serde(rename = "ReferencedModality")]
    pub referenced_modality: Option<Modality>,
    #[serde(rename = "ReferencedSeriesUID")]
    pub referenced_series_uid: Option<String>,
    pub instances: usize,
    pub folder: String,
}

impl IndexEntry {
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(&self.series_instance_uid, &self.sub_series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_parse() {
        assert_eq!(Modality::parse("ct"), Modality::CT);
        assert_eq!(Modality::parse(" RTSTRUCT "), Modality::RTSTRUCT);
        assert_eq!(Modality::parse("us"), Modality::Other("US".to_string()));
        assert!(Modality::PT.is_image());
        assert!(Modality::SEG.can_reference());
        assert!(!Modality::SR.can_reference());
    }

    #[test]
    fn test_tag_value_json() {
        let date = NaiveDate::from_ymd_opt(2021, 3, 4).unwrap();
        let values = vec![
            TagValue::Int(3),
            TagValue::Float(0.5),
            TagValue::Floats(vec![0.5, 0.75]),
            TagValue::Date(date),
            TagValue::DateTime(date.and_hms_opt(10, 20, 30).unwrap()),
            TagValue::Text("20211399".to_string()),
            TagValue::Texts(vec!["GTV".to_string(), "PTV".to_string()]),
        ];
        let json = serde_json::to_string(&values).unwrap();
        let back: Vec<TagValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_tag_value_json_keeps_variant() {
        // 形似日期的文本、整数值的浮点数、空列表都不会被改判为其他类型
        let values = vec![
            TagValue::Text("2021-03-04".to_string()),
            TagValue::Text("2021-03-04T10:20:30".to_string()),
            TagValue::Float(120.0),
            TagValue::Floats(Vec::new()),
            TagValue::Texts(Vec::new()),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert!(json.starts_with(r#"[{"type":"Text","value":"2021-03-04"}"#));
        let back: Vec<TagValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_tag_value_display() {
        assert_eq!(TagValue::Texts(vec!["A".into(), "B".into()]).to_string(), "A|B");
        let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        assert_eq!(TagValue::Date(date).to_string(), "2020-01-02");
    }

    #[test]
    fn test_series_key_display() {
        assert_eq!(SeriesKey::new("1.2.3", "1").to_string(), "1.2.3");
        assert_eq!(SeriesKey::new("1.2.3", "2").to_string(), "1.2.3#2");
    }
}
