//! 旁路索引目录
//!
//! 默认位置为 `<根目录的父目录>/.imgtools/<根目录名>/`。写入在独占锁文件的保护下进行，
//! 每个文件先写入临时文件再重命名，读取方不会看到写了一半的表。

use crate::discovery::SIDECAR_DIR_NAME;
use crate::tables::{read_metadata_json, render_tables};
use imgtools_core::config::IndexSettings;
use imgtools_core::{table, ImgtoolsError, IndexEntry, Result, SeriesRecord};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

pub const METADATA_JSON: &str = "metadata.json";
pub const METADATA_CSV: &str = "metadata.csv";
pub const INDEX_CSV: &str = "index.csv";
pub const LOCK_FILE: &str = ".lock";

/// 旁路目录中的各文件路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarPaths {
    pub dir: PathBuf,
    pub metadata_json: PathBuf,
    pub metadata_csv: PathBuf,
    pub index_csv: PathBuf,
    pub lock: PathBuf,
}

impl SidecarPaths {
    pub fn in_dir(dir: PathBuf) -> Self {
        Self {
            metadata_json: dir.join(METADATA_JSON),
            metadata_csv: dir.join(METADATA_CSV),
            index_csv: dir.join(INDEX_CSV),
            lock: dir.join(LOCK_FILE),
            dir,
        }
    }

    /// 根据爬取根目录推导旁路目录；`override_dir` 存在时直接使用
    pub fn for_root(root: &Path, override_dir: Option<&Path>) -> Result<Self> {
        if let Some(dir) = override_dir {
            return Ok(Self::in_dir(dir.to_path_buf()));
        }

        let root = root.canonicalize().map_err(|e| {
            ImgtoolsError::NotFound(format!("无法定位目录 {}: {}", root.display(), e))
        })?;
        let name = root.file_name().ok_or_else(|| {
            ImgtoolsError::Validation(format!("无法为 {} 推导索引目录", root.display()))
        })?;
        let parent = root.parent().unwrap_or(&root);

        Ok(Self::in_dir(parent.join(SIDECAR_DIR_NAME).join(name)))
    }
}

/// 索引目录的独占锁，离开作用域时释放
#[derive(Debug)]
pub struct IndexLock {
    path: PathBuf,
}

/// 获取锁时的等待参数
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub timeout: Duration,
    pub retry: Duration,
    /// 锁文件超过该时长未更新即视为残留
    pub stale_after: Duration,
}

impl LockOptions {
    pub fn from_settings(settings: &IndexSettings) -> Self {
        Self {
            timeout: settings.lock_timeout(),
            retry: settings.lock_retry(),
            stale_after: settings.stale_lock_after(),
        }
    }
}

impl IndexLock {
    /// 以 create-new 方式创建锁文件，被占用时按间隔重试直到超时。
    /// 持有进程已退出或锁文件过旧时接管残留锁。
    pub fn acquire(path: &Path, options: LockOptions) -> Result<Self> {
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(file) => {
                    let lock = Self {
                        path: path.to_path_buf(),
                    };
                    // 写入失败时 lock 被丢弃，锁文件随之删除
                    write_holder(file)?;
                    debug!("获取索引锁: {}", path.display());
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(reason) = stale_reason(path, options.stale_after) {
                        if take_over(path, options.stale_after, &reason)? {
                            continue;
                        }
                    }
                    let waited = started.elapsed();
                    if waited >= options.timeout {
                        warn!("等待索引锁超时: {}", path.display());
                        return Err(ImgtoolsError::LockTimeout {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    thread::sleep(options.retry.min(options.timeout - waited));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn write_holder(mut file: File) -> Result<()> {
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;
    Ok(())
}

/// 已有锁文件是否为残留：记录的进程已不存在，或超过 `stale_after` 未更新
fn stale_reason(path: &Path, stale_after: Duration) -> Option<String> {
    let holder = fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok());
    if let Some(pid) = holder {
        if !process_alive(pid) {
            return Some(format!("持有进程 {} 已退出", pid));
        }
    }

    let age = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())?;
    (age > stale_after).then(|| format!("{} 秒未更新", age.as_secs()))
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// 无法探测进程时只依据修改时间判断
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// 把残留锁移到私有路径后再确认一次，避免删除其他进程刚刚创建的新锁。
/// 返回 true 表示锁位置已空出，可以重新尝试创建。
fn take_over(path: &Path, stale_after: Duration, reason: &str) -> Result<bool> {
    let claimed = path.with_file_name(format!(
        "{}.stale.{}",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        std::process::id()
    ));
    match fs::rename(path, &claimed) {
        Ok(()) => {}
        // 其他进程已先一步接管
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    }

    if stale_reason(&claimed, stale_after).is_none() {
        // 移走的是新锁：放回原处，原处已被占用时不覆盖
        if let Err(e) = fs::hard_link(&claimed, path) {
            warn!("无法归还索引锁 {}: {}", path.display(), e);
        }
        fs::remove_file(&claimed)?;
        return Ok(false);
    }

    fs::remove_file(&claimed)?;
    warn!("接管残留索引锁 {} ({})", path.display(), reason);
    Ok(true)
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("释放索引锁失败 {}: {}", self.path.display(), e);
        }
    }
}

/// 先写临时文件再重命名
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ImgtoolsError::Internal(format!("无效的输出路径: {}", path.display())))?;
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let mut file = File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

/// 旁路索引的读写
#[derive(Debug, Clone)]
pub struct Sidecar {
    paths: SidecarPaths,
    lock: LockOptions,
}

impl Sidecar {
    pub fn new(paths: SidecarPaths, settings: &IndexSettings) -> Self {
        Self {
            paths,
            lock: LockOptions::from_settings(settings),
        }
    }

    pub fn paths(&self) -> &SidecarPaths {
        &self.paths
    }

    /// 读取上次爬取的完整表，不存在时返回 `None`
    pub fn load_records(&self) -> Result<Option<Vec<SeriesRecord>>> {
        match File::open(&self.paths.metadata_json) {
            Ok(file) => read_metadata_json(file).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_index(&self) -> Result<Vec<IndexEntry>> {
        table::read_index_file(&self.paths.index_csv)
    }

    /// 在锁保护下写出三张表
    pub fn persist(&self, records: &[SeriesRecord]) -> Result<()> {
        let (json, csv, index) = render_tables(records)?;

        fs::create_dir_all(&self.paths.dir)?;
        let _lock = IndexLock::acquire(&self.paths.lock, self.lock)?;

        write_atomic(&self.paths.metadata_json, &json)?;
        write_atomic(&self.paths.metadata_csv, &csv)?;
        write_atomic(&self.paths.index_csv, &index)?;

        info!("索引已写入 {} ({} 个序列)", self.paths.dir.display(), records.len());
        Ok(())
    }
}
