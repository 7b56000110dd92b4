//! # DICOM读取与元数据提取模块
//!
//! 提供轻量文件头读取、数据元素转换、文件头验证、按模态的元数据提取，
//! 以及派生对象的引用线索收集。

pub mod computed;
pub mod extractor;
pub mod parser;
pub mod references;
pub mod validator;

pub use extractor::{schema_for, ComputedField, MetadataExtractor, ModalitySchema};
pub use parser::{DicomParser, FileHeader};
pub use references::{collect_reference_hints, ReferenceHints};
pub use validator::{HeaderValidator, ValidationResult};
