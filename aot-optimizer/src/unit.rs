//! 编译单元与单批次请求

use std::path::{Path, PathBuf};

use dexopt_osal::{file_len, host_isa};

/// 调用方传入的一个 dex/jar/apk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationUnit {
    path: PathBuf,
    len: u64,
}

impl CompilationUnit {
    /// 从磁盘读取长度，文件不存在时为 0
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let len = file_len(&path);
        Self { path, len }
    }

    pub fn with_len(path: impl Into<PathBuf>, len: u64) -> Self {
        Self {
            path: path.into(),
            len,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// 一次 `optimize_all` 调用共享的只读设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizationRequest {
    pub target_dir: PathBuf,
    pub interpret_mode: bool,
    pub use_dlc: bool,
    pub target_isa: Option<String>,
}

impl OptimizationRequest {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            interpret_mode: false,
            use_dlc: false,
            target_isa: None,
        }
    }

    pub fn interpret_mode(mut self, enabled: bool) -> Self {
        self.interpret_mode = enabled;
        self
    }

    pub fn use_dlc(mut self, enabled: bool) -> Self {
        self.use_dlc = enabled;
        self
    }

    pub fn target_isa(mut self, isa: Option<String>) -> Self {
        self.target_isa = isa;
        self
    }

    /// 请求的 ISA，未指定时使用宿主 ISA
    pub fn isa(&self) -> &str {
        self.target_isa.as_deref().unwrap_or_else(|| host_isa())
    }
}

/// 处理顺序：从大到小，大小相同时保持输入顺序
pub fn schedule_order(units: &[CompilationUnit]) -> Vec<&CompilationUnit> {
    let mut ordered: Vec<&CompilationUnit> = units.iter().collect();
    // sort_by 是稳定排序
    ordered.sort_by(|lhs, rhs| rhs.len.cmp(&lhs.len));
    ordered
}
