//! 精简索引表的 CSV 读写
//!
//! 列顺序与 [`INDEX_COLUMNS`] 一致，空字段表示缺失的引用。

use crate::error::{ImgtoolsError, Result};
use crate::models::{IndexEntry, INDEX_COLUMNS};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

impl From<csv::Error> for ImgtoolsError {
    fn from(err: csv::Error) -> Self {
        ImgtoolsError::Table(err.to_string())
    }
}

/// 写出索引表
pub fn write_index<W: Write>(writer: W, entries: &[IndexEntry]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(INDEX_COLUMNS)?;
    for entry in entries {
        wtr.serialize(entry)?;
    }
    wtr.flush()?;
    Ok(())
}

/// 读取索引表，并校验表头
pub fn read_index<R: Read>(reader: R) -> Result<Vec<IndexEntry>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    if !headers.iter().eq(INDEX_COLUMNS.iter().copied()) {
        return Err(ImgtoolsError::Table(format!(
            "索引表列不匹配: {}",
            headers.iter().collect::<Vec<_>>().join(",")
        )));
    }

    rdr.deserialize()
        .map(|row| row.map_err(ImgtoolsError::from))
        .collect()
}

/// 从文件读取索引表
pub fn read_index_file(path: &Path) -> Result<Vec<IndexEntry>> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ImgtoolsError::NotFound(format!("索引文件不存在: {}", path.display()))
        } else {
            ImgtoolsError::Io(e)
        }
    })?;
    read_index(file)
}
