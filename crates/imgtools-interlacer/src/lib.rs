//! # imgtools Interlacer
//!
//! 由精简索引表构建序列森林（引用边、环检测），响应带依赖校验的模态链查询，
//! 并输出树形文本、Graphviz 与交互式 HTML 关系图。

pub mod forest;
pub mod interlacer;
pub mod node;
pub mod query;
pub mod render;

pub use forest::Forest;
pub use interlacer::{ForestStats, Interlacer};
pub use node::{Branch, NodeId, SeriesNode, SeriesRef};
pub use query::{Chain, QueryOptions};
