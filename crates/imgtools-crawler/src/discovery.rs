//! 文件发现

use imgtools_core::{ImgtoolsError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// 旁路目录名，遍历时跳过
pub const SIDECAR_DIR_NAME: &str = ".imgtools";

/// 文件发现结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// 扩展名匹配的非空文件，按路径排序
    pub files: Vec<PathBuf>,
    /// 无法遍历的目录或无法读取属性的文件及原因
    pub unreadable: Vec<(PathBuf, String)>,
}

/// 递归列出根目录下扩展名匹配的文件（不区分大小写）
///
/// 跳过符号链接、空文件与旁路目录。遍历出错的路径记入 `unreadable`，不中断其余部分。
pub fn discover_files(root: &Path, extensions: &[String]) -> Result<Discovery> {
    if !root.is_dir() {
        return Err(ImgtoolsError::NotFound(format!(
            "目录不存在: {}",
            root.display()
        )));
    }

    let extensions: Vec<String> = extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect();

    let mut discovery = Discovery::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_sidecar(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("遍历目录出错: {}", err);
                let path = err.path().unwrap_or(root).to_path_buf();
                discovery.unreadable.push((path, err.to_string()));
                continue;
            }
        };

        if !entry.file_type().is_file() || !matches_extension(entry.path(), &extensions) {
            continue;
        }

        match entry.metadata() {
            Ok(metadata) if metadata.len() > 0 => discovery.files.push(entry.into_path()),
            Ok(_) => debug!("跳过空文件: {}", entry.path().display()),
            Err(err) => {
                warn!("无法读取文件属性 {}: {}", entry.path().display(), err);
                discovery
                    .unreadable
                    .push((entry.path().to_path_buf(), err.to_string()));
            }
        }
    }

    discovery.files.sort();
    discovery.unreadable.sort();
    debug!(
        "在 {} 下发现 {} 个文件 ({} 个路径无法读取)",
        root.display(),
        discovery.files.len(),
        discovery.unreadable.len()
    );
    Ok(discovery)
}

fn is_sidecar(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && entry.file_name() == SIDECAR_DIR_NAME
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            extensions.iter().any(|allowed| *allowed == ext)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/nested")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join(SIDECAR_DIR_NAME)).unwrap();

        fs::write(root.join("b/nested/2.DCM"), b"x").unwrap();
        fs::write(root.join("a/1.dcm"), b"x").unwrap();
        fs::write(root.join("a/empty.dcm"), b"").unwrap();
        fs::write(root.join("a/notes.txt"), b"x").unwrap();
        fs::write(root.join(SIDECAR_DIR_NAME).join("cached.dcm"), b"x").unwrap();

        let discovery = discover_files(root, &["dcm".to_string()]).unwrap();
        assert_eq!(discovery.files, vec![root.join("a/1.dcm"), root.join("b/nested/2.DCM")]);
        assert!(discovery.unreadable.is_empty());
    }

    #[test]
    fn test_extension_list_normalised() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.IMA"), b"x").unwrap();
        let discovery = discover_files(dir.path(), &[".ima".to_string()]).unwrap();
        assert_eq!(discovery.files.len(), 1);
    }

    #[test]
    fn test_missing_root() {
        let err = discover_files(Path::new("/nonexistent/root"), &["dcm".to_string()]).unwrap_err();
        assert!(matches!(err, ImgtoolsError::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("locked")).unwrap();
        fs::write(root.join("locked/1.dcm"), b"x").unwrap();
        fs::write(root.join("ok.dcm"), b"x").unwrap();
        fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o000)).unwrap();

        // 特权用户不受目录权限限制
        let privileged = fs::read_dir(root.join("locked")).is_ok();
        let discovery = discover_files(root, &["dcm".to_string()]);
        fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();
        let discovery = discovery.unwrap();
        if privileged {
            return;
        }

        assert_eq!(discovery.files, vec![root.join("ok.dcm")]);
        assert_eq!(discovery.unreadable.len(), 1);
        assert_eq!(discovery.unreadable[0].0, root.join("locked"));
    }
}
