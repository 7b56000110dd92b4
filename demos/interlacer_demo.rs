//! Interlacer 演示程序
//!
//! 用内存中的索引表构建序列森林，演示树形打印、模态链查询与依赖校验

use imgtools::{Interlacer, IndexEntry, Modality, QueryOptions};
use tracing::{info, warn};

fn entry(patient: &str, uid: &str, modality: Modality, reference: Option<&str>) -> IndexEntry {
    IndexEntry {
        patient_id: patient.to_string(),
        study_instance_uid: format!("{}.study", patient),
        series_instance_uid: uid.to_string(),
        sub_series: "1".to_string(),
        modality,
        referenced_modality: None,
        referenced_series_uid: reference.map(str::to_string),
        instances: 1,
        folder: format!("{}/{}", patient, uid),
    }
}

fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt().with_env_filter("info").init();

    let index = vec![
        entry("HN-001", "CT-1", Modality::CT, None),
        entry("HN-001", "RT-1", Modality::RTSTRUCT, Some("CT-1")),
        entry("HN-001", "PLAN-1", Modality::RTPLAN, Some("RT-1")),
        entry("HN-001", "DOSE-1", Modality::RTDOSE, Some("CT-1")),
        entry("HN-002", "MR-1", Modality::MR, None),
        entry("HN-002", "SEG-1", Modality::SEG, Some("MR-1")),
        entry("HN-003", "PT-1", Modality::PT, None),
        entry("HN-003", "RT-9", Modality::RTSTRUCT, Some("NOT-CRAWLED")),
    ];

    let interlacer = Interlacer::new(index)?;
    println!("{}", interlacer.render_tree());
    println!("{}\n", interlacer.stats());

    for chain in ["CT,RTSTRUCT", "CT,RTDOSE", "MR,SEG", "SEG", "*"] {
        let samples = interlacer.query(chain)?;
        info!("查询 {:?}: {} 个样本", chain, samples.len());
        for sample in &samples {
            println!("  {}", sample);
        }
    }

    let grouped = interlacer.query_with("*", QueryOptions { group_by_root: true })?;
    info!("按根合并后 {} 个样本", grouped.len());

    for chain in ["RTSTRUCT,RTDOSE", "PT,SEG", "CT,,SEG"] {
        match interlacer.query(chain) {
            Ok(_) => warn!("查询 {:?} 本应被拒绝", chain),
            Err(e) => println!("拒绝 {:?}: {}", chain, e),
        }
    }

    println!("\n{}", interlacer.render_dot());
    Ok(())
}
