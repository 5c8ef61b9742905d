//! 基于文件的目录锁
//!
//! 同一输出目录同一时刻只允许一个编译器进程写入。锁是建议性的，
//! 遵守同样约定的其他进程也会被互斥。所有平台都使用 `File::lock`。

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dexopt_error::{CompilerError, DexOptError, DexOptResult};

const MAX_LOCK_ATTEMPTS: u32 = 3;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);

/// 目录锁，Drop 时释放
#[derive(Debug)]
pub struct DirectoryLock {
    file: Option<File>,
    path: PathBuf,
}

impl DirectoryLock {
    /// 阻塞获取 `lock_path` 上的独占锁，必要时创建锁文件
    pub fn acquire(lock_path: &Path) -> DexOptResult<Self> {
        let lock_failed = |e: io::Error| {
            DexOptError::compiler(CompilerError::LockFailed(
                lock_path.display().to_string(),
                e.to_string(),
            ))
        };

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(lock_failed)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)
            .map_err(lock_failed)?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match file.lock() {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if attempts < MAX_LOCK_ATTEMPTS => {
                    tracing::warn!(lock = %lock_path.display(), attempts, "lock attempt failed: {e}");
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(e) => return Err(lock_failed(e)),
            }
        }

        tracing::debug!(lock = %lock_path.display(), "directory lock acquired");
        Ok(Self {
            file: Some(file),
            path: lock_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 显式释放锁，返回释放时的错误
    pub fn release(mut self) -> io::Result<()> {
        match self.file.take() {
            Some(file) => file.unlock(),
            None => Ok(()),
        }
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take()
            && let Err(e) = file.unlock()
        {
            tracing::warn!(lock = %self.path.display(), "release lock error: {e}");
        }
    }
}
