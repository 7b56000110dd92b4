//! 通用工具函数

use crate::models::TagValue;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::path::Path;

/// 验证DICOM UID格式
pub fn is_valid_dicom_uid(uid: &str) -> bool {
    !uid.is_empty()
        && uid.len() <= 64
        && uid.chars().all(|c| c.is_ascii_digit() || c == '.')
        && !uid.starts_with('.')
        && !uid.ends_with('.')
        && !uid.contains("..")
}

/// 解析DICOM日期 (DA)
///
/// 支持 `YYYYMMDD` 以及旧标准的 `YYYY.MM.DD`。
pub fn parse_dicom_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    match value.len() {
        8 => NaiveDate::parse_from_str(value, "%Y%m%d").ok(),
        10 => NaiveDate::parse_from_str(value, "%Y.%m.%d").ok(),
        _ => None,
    }
}

/// 解析DICOM时间 (TM)
///
/// 支持 `HH`、`HHMM`、`HHMMSS` 与 `HHMMSS.FFFFFF`，以及旧标准的冒号分隔格式。
pub fn parse_dicom_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim().replace(':', "");
    let (main, fraction) = match value.split_once('.') {
        Some((main, fraction)) => (main, Some(fraction)),
        None => (value.as_str(), None),
    };

    if !main.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let field = |range: std::ops::Range<usize>| -> Option<u32> { main.get(range)?.parse().ok() };
    let (hour, minute, second) = match main.len() {
        2 => (field(0..2)?, 0, 0),
        4 => (field(0..2)?, field(2..4)?, 0),
        6 => (field(0..2)?, field(2..4)?, field(4..6)?),
        _ => return None,
    };

    let micros = match fraction {
        Some(f) if f.is_empty() || f.len() > 6 || !f.chars().all(|c| c.is_ascii_digit()) => {
            return None
        }
        Some(f) => format!("{:0<6}", f).parse::<u32>().ok()?,
        None => 0,
    };

    NaiveTime::from_hms_micro_opt(hour, minute, second, micros)
}

/// 解析DICOM日期时间 (DT)，忽略时区偏移
pub fn parse_dicom_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    let value = value
        .find(|c: char| c == '+' || c == '-')
        .map(|offset| &value[..offset])
        .unwrap_or(value);

    if value.len() < 8 {
        return None;
    }
    let date = parse_dicom_date(value.get(..8)?)?;
    let rest = &value[8..];
    if rest.is_empty() {
        return date.and_hms_opt(0, 0, 0);
    }
    parse_dicom_time(rest).map(|time| date.and_time(time))
}

/// 合并分离的日期与时间标签
///
/// 两者都可解析时返回 `DateTime`；只有日期且可解析时返回 `Date`；
/// 其余情况原样保留为字符串。两者都缺失时返回 `None`。
pub fn combine_date_time(date: Option<&str>, time: Option<&str>) -> Option<TagValue> {
    let date = date.map(str::trim).filter(|d| !d.is_empty());
    let time = time.map(str::trim).filter(|t| !t.is_empty());

    match (date, time) {
        (Some(d), Some(t)) => match (parse_dicom_date(d), parse_dicom_time(t)) {
            (Some(date), Some(time)) => Some(TagValue::DateTime(date.and_time(time))),
            _ => Some(TagValue::Text(format!("{} {}", d, t))),
        },
        (Some(d), None) => Some(
            parse_dicom_date(d)
                .map(TagValue::Date)
                .unwrap_or_else(|| TagValue::Text(d.to_string())),
        ),
        (None, Some(t)) => Some(TagValue::Text(t.to_string())),
        (None, None) => None,
    }
}

/// 计算相对于根目录的路径，统一使用 `/` 分隔
pub fn relative_folder(root: &Path, folder: &Path) -> String {
    let relative = folder.strip_prefix(root).unwrap_or(folder);
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
