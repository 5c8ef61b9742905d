//! 优化产物的落盘位置

use std::path::{Path, PathBuf};

use dexopt_osal::OsVersion;

use crate::strategy::V_NEW;

pub const DEX_SUFFIX: &str = ".dex";
pub const ODEX_SUFFIX: &str = ".odex";
pub const VDEX_SUFFIX: &str = ".vdex";

/// 把单元映射到优化产物路径，必须是输入的纯函数
pub trait PathResolver: Send + Sync {
    fn optimized_path(&self, unit: &Path, target_dir: &Path, isa: &str) -> PathBuf;
}

/// 运行时布局：API 26 起为 `<parent>/oat/<isa>/<stem>.odex`，
/// 之前为 `<target_dir>/<stem>.dex`
#[derive(Debug, Clone, Copy)]
pub struct OatPathResolver {
    version: OsVersion,
}

impl OatPathResolver {
    pub fn new(version: OsVersion) -> Self {
        Self { version }
    }
}

impl PathResolver for OatPathResolver {
    fn optimized_path(&self, unit: &Path, target_dir: &Path, isa: &str) -> PathBuf {
        let file_name = unit
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.version.sdk_int >= V_NEW {
            let stem = match file_name.rfind('.') {
                Some(index) if index > 0 => &file_name[..index],
                _ => file_name.as_str(),
            };
            let parent = unit.parent().unwrap_or_else(|| Path::new(""));
            return parent
                .join("oat")
                .join(isa)
                .join(format!("{stem}{ODEX_SUFFIX}"));
        }

        let file_name = if file_name.ends_with(DEX_SUFFIX) {
            file_name
        } else {
            match file_name.rfind('.') {
                Some(index) => format!("{}{DEX_SUFFIX}", &file_name[..index]),
                None => format!("{file_name}{DEX_SUFFIX}"),
            }
        };
        target_dir.join(file_name)
    }
}

/// `.odex` 旁边的伴随产物；路径不以 `.odex` 结尾时为 `None`
pub fn companion_path(optimized: &Path) -> Option<PathBuf> {
    let text = optimized.to_str()?;
    let index = text.rfind(ODEX_SUFFIX)?;
    Some(PathBuf::from(format!("{}{VDEX_SUFFIX}", &text[..index])))
}
