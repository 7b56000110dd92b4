//! 森林的文本与图形输出
//!
//! 所有渲染只读森林，不做任何修改。

use crate::forest::Forest;
use crate::node::{NodeId, SeriesNode};
use imgtools_core::Result;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::info;

fn label(node: &SeriesNode) -> String {
    format!("{}:{} ({} 个实例)", node.modality(), node.key(), node.entry.instances)
}

/// 控制台树形文本，按患者分组
pub fn render_tree(forest: &Forest) -> String {
    let mut out = String::new();
    let mut current_patient: Option<&str> = None;

    for root in forest.roots() {
        let node = forest.node(*root);
        if current_patient != Some(node.patient_id()) {
            if current_patient.is_some() {
                out.push('\n');
            }
            let _ = writeln!(out, "患者 {}", node.patient_id());
            current_patient = Some(node.patient_id());
        }
        render_subtree(forest, *root, "", true, &mut out);
    }
    out
}

fn render_subtree(forest: &Forest, id: NodeId, prefix: &str, last: bool, out: &mut String) {
    let node = forest.node(id);
    let connector = if last { "└── " } else { "├── " };
    let _ = writeln!(out, "{}{}{}", prefix, connector, label(node));

    let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
    for (i, child) in node.children.iter().enumerate() {
        render_subtree(forest, *child, &child_prefix, i + 1 == node.children.len(), out);
    }
}

fn escape_dot(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Graphviz DOT 格式
pub fn render_dot(forest: &Forest) -> String {
    let mut out = String::from("digraph interlacer {\n    rankdir=LR;\n    node [shape=box];\n");
    for id in forest.preorder() {
        let node = forest.node(id);
        let _ = writeln!(
            out,
            "    n{} [label=\"{}\\n{}\\n{}\"];",
            id,
            escape_dot(node.modality().as_str()),
            escape_dot(&node.key().to_string()),
            escape_dot(node.patient_id()),
        );
    }
    for id in forest.preorder() {
        for child in &forest.node(id).children {
            let _ = writeln!(out, "    n{} -> n{};", id, child);
        }
    }
    out.push_str("}\n");
    out
}

/// vis-network 所需的节点与边数据
pub fn graph_data(forest: &Forest) -> Value {
    let order = forest.preorder();
    let nodes: Vec<Value> = order
        .iter()
        .map(|id| {
            let node = forest.node(*id);
            json!({
                "id": id,
                "label": format!("{}\n{}", node.modality(), node.key()),
                "group": node.modality().as_str(),
                "title": format!(
                    "PatientID: {}\nStudyInstanceUID: {}\nfolder: {}\ninstances: {}",
                    node.patient_id(),
                    node.entry.study_instance_uid,
                    node.entry.folder,
                    node.entry.instances
                ),
            })
        })
        .collect();
    let edges: Vec<Value> = order
        .iter()
        .flat_map(|id| {
            forest
                .node(*id)
                .children
                .iter()
                .map(move |child| json!({ "from": id, "to": child }))
        })
        .collect();
    json!({ "nodes": nodes, "edges": edges })
}

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>imgtools interlacer</title>
<script src="https://unpkg.com/vis-network/standalone/umd/vis-network.min.js"></script>
<style>html, body, #graph { width: 100%; height: 100%; margin: 0; }</style>
</head>
<body>
<div id="graph"></div>
<script>
const data = __GRAPH_DATA__;
new vis.Network(document.getElementById("graph"), {
  nodes: new vis.DataSet(data.nodes),
  edges: new vis.DataSet(data.edges),
}, {
  layout: { hierarchical: { direction: "LR", sortMethod: "directed" } },
  edges: { arrows: "to" },
  nodes: { shape: "box" },
});
</script>
</body>
</html>
"#;

/// 自包含的交互式 HTML 页面
pub fn render_html(forest: &Forest) -> Result<String> {
    // 转义 `<`，数据中的 `</script>` 不会提前结束脚本块
    let data = serde_json::to_string(&graph_data(forest))?.replace('<', "\\u003c");
    Ok(HTML_TEMPLATE.replace("__GRAPH_DATA__", &data))
}

pub fn write_html_graph(forest: &Forest, path: &Path) -> Result<()> {
    let html = render_html(forest)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, html)?;
    info!("关系图已写入 {}", path.display());
    Ok(())
}
