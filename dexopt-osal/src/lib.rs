//! dexopt-osal: 操作系统抽象层
//!
//! 提供 OS 版本探测、输入文件校验、目录锁、子进程输出排空以及可注入的休眠能力

use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{Child, Command, Output};
use std::time::Duration;

use dexopt_error::{DexOptError, DexOptResult};

pub mod drain;
pub mod lock;
pub mod platform;

pub use drain::StreamDrain;
pub use lock::DirectoryLock;
pub use platform::OsVersion;

// ============================================================================
// 平台检测
// ============================================================================

/// 宿主机指令集名称（与 AOT 编译器 `--instruction-set` 的取值一致）
pub fn host_isa() -> &'static str {
    #[cfg(target_arch = "aarch64")]
    {
        return "arm64";
    }
    #[cfg(target_arch = "arm")]
    {
        return "arm";
    }
    #[cfg(target_arch = "x86_64")]
    {
        return "x86_64";
    }
    #[cfg(target_arch = "x86")]
    {
        return "x86";
    }
    #[cfg(target_arch = "riscv64")]
    {
        return "riscv64";
    }
    #[allow(unreachable_code)]
    "unknown"
}

// ============================================================================
// 文件校验
// ============================================================================

/// 校验输入文件：存在、是普通文件、非空、可读
///
/// 成功时返回文件长度。
pub fn check_legal_file(path: &Path) -> DexOptResult<u64> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return Err(DexOptError::input_not_found(path)),
    };
    if !metadata.is_file() {
        return Err(DexOptError::input_not_found(path));
    }
    if metadata.len() == 0 {
        return Err(DexOptError::input_empty(path));
    }
    File::open(path).map_err(|e| DexOptError::input_unreadable(path, e))?;
    Ok(metadata.len())
}

/// 文件长度，文件不存在时为 0
pub fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

// ============================================================================
// 子进程
// ============================================================================

const SPAWN_ATTEMPTS: u32 = 3;

/// 启动子进程，遇到 ETXTBSY 时短暂重试
///
/// 刚写完的可执行文件在其他线程 fork 期间仍可能被占用。
pub fn spawn_with_retry(cmd: &mut Command) -> io::Result<Child> {
    retry_text_busy(|| cmd.spawn())
}

/// 运行子进程并收集输出，遇到 ETXTBSY 时短暂重试
pub fn output_with_retry(cmd: &mut Command) -> io::Result<Output> {
    retry_text_busy(|| cmd.output())
}

fn retry_text_busy<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut attempts = 0u32;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) => {
                #[cfg(unix)]
                let should_retry = err.raw_os_error() == Some(libc::ETXTBSY);
                #[cfg(not(unix))]
                let should_retry = false;

                if should_retry && attempts < SPAWN_ATTEMPTS {
                    attempts += 1;
                    std::thread::sleep(Duration::from_millis(10 * attempts as u64));
                    continue;
                }
                return Err(err);
            }
        }
    }
}

// ============================================================================
// 休眠
// ============================================================================

/// 可注入的休眠能力，轮询等待都通过它阻塞
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// 直接阻塞当前线程
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ============================================================================
// 测试
// ============================================================================
