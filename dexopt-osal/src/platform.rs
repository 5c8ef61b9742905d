//! 平台版本探测
//!
//! 优化策略完全由目标系统的 API 级别决定，这里负责读取它。

use std::fmt;
use std::process::Command;

use dexopt_error::{ConfigError, DexOptError, DexOptResult};

const SDK_PROP: &str = "ro.build.version.sdk";
const PREVIEW_SDK_PROP: &str = "ro.build.version.preview_sdk";

/// 目标系统版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsVersion {
    /// 正式 API 级别
    pub sdk_int: u32,
    /// 预览版本号，正式版为 0
    pub preview_sdk_int: u32,
}

impl OsVersion {
    pub const fn new(sdk_int: u32, preview_sdk_int: u32) -> Self {
        Self {
            sdk_int,
            preview_sdk_int,
        }
    }

    /// 正式版
    pub const fn release(sdk_int: u32) -> Self {
        Self::new(sdk_int, 0)
    }

    /// 预览版（下一个 API 级别的开发者预览）
    pub const fn preview(sdk_int: u32) -> Self {
        Self::new(sdk_int, 1)
    }

    pub fn is_preview(&self) -> bool {
        self.preview_sdk_int != 0
    }

    /// 是否达到 `level`，预览版视为已经达到 `level`（当 sdk_int == level - 1）
    pub fn at_least_or_preview(&self, level: u32) -> bool {
        self.sdk_int >= level || (level.checked_sub(1) == Some(self.sdk_int) && self.is_preview())
    }

    /// 通过 `getprop` 读取当前设备的版本
    pub fn detect() -> DexOptResult<Self> {
        let sdk_int = read_prop(SDK_PROP)?
            .parse::<u32>()
            .map_err(|e| DexOptError::config(ConfigError::InvalidValue(SDK_PROP.into(), e.to_string())))?;
        // 旧系统没有 preview_sdk 属性
        let preview_sdk_int = read_prop(PREVIEW_SDK_PROP)
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        tracing::debug!(sdk_int, preview_sdk_int, "detected os version");
        Ok(Self::new(sdk_int, preview_sdk_int))
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_preview() {
            write!(f, "API {} (preview {})", self.sdk_int, self.preview_sdk_int)
        } else {
            write!(f, "API {}", self.sdk_int)
        }
    }
}

fn read_prop(name: &str) -> DexOptResult<String> {
    let output = crate::output_with_retry(Command::new("getprop").arg(name)).map_err(|e| {
        DexOptError::config(ConfigError::MissingRequired(format!(
            "{name} (getprop unavailable: {e})"
        )))
    })?;
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || value.is_empty() {
        return Err(DexOptError::config(ConfigError::MissingRequired(name.into())));
    }
    Ok(value)
}
