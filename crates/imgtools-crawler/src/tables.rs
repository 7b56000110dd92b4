//! 完整元数据表与索引表的组装和序列化

use imgtools_core::{table, ImgtoolsError, IndexEntry, Result, SeriesRecord};
use std::collections::BTreeSet;
use std::io::{Read, Write};

/// 完整表 CSV 的固定列
const RECORD_COLUMNS: [&str; 13] = [
    "PatientID",
    "StudyInstanceUID",
    "SeriesInstanceUID",
    "SubSeries",
    "Modality",
    "ReferencedModality",
    "ReferencedSeriesUID",
    "ReferenceAmbiguous",
    "ReferenceCandidates",
    "UnresolvedReference",
    "ExtractionError",
    "instances",
    "folder",
];

/// 按 (PatientID, StudyInstanceUID, SeriesInstanceUID, SubSeries) 排序
pub fn sort_records(records: &mut [SeriesRecord]) {
    records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// 投影出精简索引表
pub fn index_entries(records: &[SeriesRecord]) -> Vec<IndexEntry> {
    records.iter().map(SeriesRecord::to_index_entry).collect()
}

pub fn write_metadata_json<W: Write>(mut writer: W, records: &[SeriesRecord]) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.write_all(b"\n")?;
    Ok(())
}

pub fn read_metadata_json<R: Read>(reader: R) -> Result<Vec<SeriesRecord>> {
    Ok(serde_json::from_reader(reader)?)
}

/// 展平的完整表：固定列在前，其余标签列按名称排序，列表值以 `|` 连接
pub fn write_metadata_csv<W: Write>(writer: W, records: &[SeriesRecord]) -> Result<()> {
    let tag_columns: BTreeSet<&str> = records
        .iter()
        .flat_map(|record| record.tags.keys().map(String::as_str))
        .filter(|name| !RECORD_COLUMNS.contains(name))
        .collect();

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(RECORD_COLUMNS.iter().copied().chain(tag_columns.iter().copied()))
        .map_err(ImgtoolsError::from)?;

    for record in records {
        let mut row: Vec<String> = vec![
            record.patient_id.clone(),
            record.study_instance_uid.clone(),
            record.series_instance_uid.clone(),
            record.sub_series.clone(),
            record.modality.to_string(),
            record
                .referenced_modality
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            record.referenced_series_uid.clone().unwrap_or_default(),
            record.reference_ambiguous.to_string(),
            record.reference_candidates.join("|"),
            record.unresolved_reference.clone().unwrap_or_default(),
            record.extraction_error.clone().unwrap_or_default(),
            record.instances.to_string(),
            record.folder.clone(),
        ];
        row.extend(tag_columns.iter().map(|name| {
            record
                .tags
                .get(*name)
                .map(ToString::to_string)
                .unwrap_or_default()
        }));
        wtr.write_record(&row).map_err(ImgtoolsError::from)?;
    }

    wtr.flush()?;
    Ok(())
}

/// 渲染持久化所需的三份内容：(metadata.json, metadata.csv, index.csv)
pub fn render_tables(records: &[SeriesRecord]) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let mut json = Vec::new();
    write_metadata_json(&mut json, records)?;

    let mut csv = Vec::new();
    write_metadata_csv(&mut csv, records)?;

    let mut index = Vec::new();
    table::write_index(&mut index, &index_entries(records))?;

    Ok((json, csv, index))
}
