//! 单元生命周期通知

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use dexopt_error::DexOptError;

use crate::unit::CompilationUnit;

/// 接收批次中每个单元的开始、成功与失败通知
///
/// 只有通过校验的单元才会收到 `on_start`。调度器处理到的每个单元
/// 随后恰好收到 `on_success` 或 `on_failed` 之一。
pub trait OptimizeCallback {
    fn on_start(&self, unit: &CompilationUnit, optimized_dir: &Path);

    fn on_success(&self, unit: &CompilationUnit, optimized_dir: &Path, optimized_file: &Path);

    fn on_failed(&self, unit: &CompilationUnit, optimized_dir: &Path, error: &DexOptError);
}

/// 通过 `tracing` 输出并统计结果
#[derive(Debug, Default)]
pub struct LoggingCallback {
    started: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl LoggingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

impl OptimizeCallback for LoggingCallback {
    fn on_start(&self, unit: &CompilationUnit, optimized_dir: &Path) {
        self.started.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            unit = %unit.path().display(),
            dir = %optimized_dir.display(),
            len = unit.len(),
            "start to optimize"
        );
    }

    fn on_success(&self, unit: &CompilationUnit, _optimized_dir: &Path, optimized_file: &Path) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            unit = %unit.path().display(),
            optimized = %optimized_file.display(),
            "success to optimize"
        );
    }

    fn on_failed(&self, unit: &CompilationUnit, _optimized_dir: &Path, error: &DexOptError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            unit = %unit.path().display(),
            category = error.category(),
            "fail to optimize: {error}"
        );
    }
}
