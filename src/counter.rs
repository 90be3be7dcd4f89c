use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::debug;
use thiserror::Error;

use crate::utils::atomic_write;

#[derive(Debug, Error)]
pub enum CounterStoreError {
    /// 文件内容无法解析，不会被覆盖
    #[error("下载统计文件 {} 已损坏: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("IO 错误: {0}")]
    Io(#[from] io::Error),
    #[error("{0} 的下载次数已达上限")]
    Overflow(String),
}

pub type CounterResult<T> = Result<T, CounterStoreError>;

/// 以 JSON 文件保存的下载计数
///
/// 同一进程内的所有写入经过同一把锁，读取不加锁。每次写入都替换整个文件，
/// 所以持锁线程崩溃不会留下写了一半的数据，锁中毒后继续使用。
pub struct DownloadCounter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DownloadCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 将文件的下载次数加一，返回新的次数
    pub fn increment(&self, file_id: &str) -> CounterResult<u64> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut stats = self.load()?;
        let count = stats.entry(file_id.to_string()).or_insert(0);
        *count = count
            .checked_add(1)
            .ok_or_else(|| CounterStoreError::Overflow(file_id.to_string()))?;
        let count = *count;

        let bytes = serde_json::to_vec_pretty(&stats).map_err(io::Error::other)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_write(&self.path, |w| w.write_all(&bytes))?;

        debug!("{file_id} 下载次数: {count}");
        Ok(count)
    }

    /// 读取全部下载次数，文件不存在时返回空表
    pub fn read_all(&self) -> CounterResult<BTreeMap<String, u64>> {
        self.load()
    }

    fn load(&self) -> CounterResult<BTreeMap<String, u64>> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| CounterStoreError::Corrupt { path: self.path.clone(), source }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_increment() {
        let dir = tempfile::tempdir().unwrap();
        let counter = DownloadCounter::new(dir.path().join("download_stats.json"));
        assert!(counter.read_all().unwrap().is_empty());

        assert_eq!(counter.increment("a.h5").unwrap(), 1);
        assert_eq!(counter.increment("a.h5").unwrap(), 2);
        assert_eq!(counter.increment("b.nc").unwrap(), 1);

        let stats = counter.read_all().unwrap();
        assert_eq!(stats["a.h5"], 2);
        assert_eq!(stats["b.nc"], 1);
    }

    #[test]
    fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_stats.json");
        let counter = DownloadCounter::new(&path);
        counter.increment("a.h5").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\n  \"a.h5\": 1\n}");
    }

    #[test]
    fn test_existing_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_stats.json");
        fs::write(&path, r#"{"a.h5": 41}"#).unwrap();
        let counter = DownloadCounter::new(&path);
        assert_eq!(counter.increment("a.h5").unwrap(), 42);
    }

    #[test]
    fn test_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let counter = DownloadCounter::new(dir.path().join("data/stats.json"));
        assert_eq!(counter.increment("x").unwrap(), 1);
    }

    #[test]
    fn test_corrupt_store_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_stats.json");
        fs::write(&path, "{broken").unwrap();
        let counter = DownloadCounter::new(&path);

        assert!(matches!(counter.increment("a.h5"), Err(CounterStoreError::Corrupt { .. })));
        assert!(matches!(counter.read_all(), Err(CounterStoreError::Corrupt { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{broken");
    }

    #[test]
    fn test_concurrent_increments() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(DownloadCounter::new(dir.path().join("download_stats.json")));

        let handles = (0..8)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    (0..25).map(|_| counter.increment("a.h5").unwrap()).collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        let mut seen = handles.into_iter().flat_map(|h| h.join().unwrap()).collect::<Vec<_>>();
        seen.sort_unstable();

        assert_eq!(seen, (1..=200).collect::<Vec<_>>());
        assert_eq!(counter.read_all().unwrap()["a.h5"], 200);
    }

    #[test]
    fn test_poisoned_lock_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(DownloadCounter::new(dir.path().join("download_stats.json")));
        let c = counter.clone();
        let _ = thread::spawn(move || {
            let _guard = c.lock.lock().unwrap();
            panic!("持锁时崩溃");
        })
        .join();
        assert_eq!(counter.increment("a.h5").unwrap(), 1);
        assert_eq!(counter.increment("a.h5").unwrap(), 2);
    }

    #[test]
    fn test_overflow_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_stats.json");
        let full = format!("{{\"a.h5\": {}}}", u64::MAX);
        fs::write(&path, &full).unwrap();
        let counter = DownloadCounter::new(&path);

        assert!(matches!(counter.increment("a.h5"), Err(CounterStoreError::Overflow(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), full);
        assert_eq!(counter.increment("b.nc").unwrap(), 1);
    }
}
