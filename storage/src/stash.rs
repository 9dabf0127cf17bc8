use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 媒体中转目录
///
/// 下载的媒体在上传到目标后立即删除；运行开始与结束时整体清空，
/// 不在两次运行之间保留任何文件。
#[derive(Debug, Clone)]
pub struct MediaStash {
    dir: PathBuf,
}

impl MediaStash {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 创建目录并清掉上次运行残留的文件
    pub fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("无法创建媒体目录: {:?}", self.dir))?;
        let removed = self.clear()?;
        if removed > 0 {
            debug!("已清理残留媒体文件: {} 个", removed);
        }
        Ok(())
    }

    /// 删除目录下的所有文件，返回删除数量；单个文件删除失败只记录日志
    pub fn clear(&self) -> Result<usize> {
        if !self.dir.is_dir() {
            return Ok(0);
        }

        let mut removed = 0;
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("无法读取媒体目录: {:?}", self.dir))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("删除媒体文件失败: {:?} error={}", path, e),
            }
        }
        Ok(removed)
    }

    pub fn discard(&self, file: &Path) {
        if !file.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_file(file) {
            warn!("删除媒体文件失败: {:?} error={}", file, e);
        }
    }
}
