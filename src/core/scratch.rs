//! 每次下载使用的临时目录，离开作用域即删除

use scopeguard::ScopeGuard;
use std::io;
use std::path::{Path, PathBuf};

/// 在 `root` 下创建唯一的临时目录，返回的 guard 在任何退出路径上都会删除它
pub fn scratch_dir(root: &Path) -> io::Result<ScopeGuard<PathBuf, impl FnOnce(PathBuf)>> {
    let path = root.join(uuid::Uuid::new_v4().simple().to_string());
    std::fs::create_dir_all(&path)?;
    Ok(scopeguard::guard(path, |path| {
        if let Err(e) = std::fs::remove_dir_all(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("删除临时目录失败 {:?}: {}", path, e);
            }
        }
    }))
}

/// 目录内所有文件的总字节数
pub fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let kept;
        {
            let dir = scratch_dir(root.path()).unwrap();
            std::fs::write(dir.join("a.twbx"), b"12345").unwrap();
            assert_eq!(dir_size(&dir), 5);
            kept = dir.clone();
        }
        assert!(!kept.exists());
        assert!(root.path().exists());
    }
}
