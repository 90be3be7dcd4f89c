use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// 原子地写入文件
///
/// 先写入同目录下的临时文件并 fsync，再重命名覆盖目标文件。写入失败时删除临时文件，目标文件保持不变。
/// 重命名成功后新内容即已生效，之后的目录 fsync 失败只记录警告。
pub fn atomic_write<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    atomic_write_with(path, write, sync_dir)
}

fn atomic_write_with<F, S>(path: &Path, write: F, sync: S) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
    S: FnOnce(&Path) -> io::Result<()>,
{
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "路径没有文件名"))?;
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".tmp.{}.{seq}", std::process::id()));
    let tmp_path = path.with_file_name(tmp_name);

    let result = (|| {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        write(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        std::fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
        return result;
    }

    if let Some(parent) = path.parent() {
        if let Err(e) = sync(parent) {
            warn!("{} 已替换，但同步目录失败: {e}", path.display());
        }
    }
    Ok(())
}

/// fsync 目录，让重命名操作落盘
#[cfg(unix)]
pub fn sync_dir(path: &Path) -> io::Result<()> {
    let path = if path.as_os_str().is_empty() { Path::new(".") } else { path };
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
pub fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        atomic_write(&path, |w| w.write_all(b"old")).unwrap();
        atomic_write(&path, |w| w.write_all(b"new")).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_atomic_write_failure_keeps_old() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        atomic_write(&path, |w| w.write_all(b"old")).unwrap();
        let err = atomic_write(&path, |w| {
            w.write_all(b"half")?;
            Err(io::Error::other("boom"))
        });
        assert!(err.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_atomic_write_sync_failure_after_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CURRENT");
        atomic_write(&path, |w| w.write_all(b"gen-1")).unwrap();
        let result = atomic_write_with(
            &path,
            |w| w.write_all(b"gen-2"),
            |_| Err(io::Error::other("fsync failed")),
        );
        assert!(result.is_ok());
        assert_eq!(std::fs::read(&path).unwrap(), b"gen-2");
    }

    #[test]
    fn test_atomic_write_concurrent_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::thread::scope(|s| {
            for i in 0..8 {
                let path = &path;
                s.spawn(move || {
                    for _ in 0..20 {
                        atomic_write(path, |w| write!(w, "{i:0>64}")).unwrap();
                    }
                });
            }
        });
        assert_eq!(std::fs::read(&path).unwrap().len(), 64);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
