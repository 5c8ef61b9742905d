//! 优化器配置
//!
//! 所有字段都有默认值，TOML 文件只需要写出要覆盖的部分。

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dexopt_error::{ConfigError, DexOptError, DexOptResult};
use dexopt_osal::OsVersion;

use crate::strategy::DeviceProfile;
use crate::waiter::RetryPolicy;

/// 优化器配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// 外部 AOT 编译器
    pub compiler: CompilerConfig,
    /// 按需触发后台编译后的等待策略
    pub on_demand: OnDemandConfig,
    /// 伴随产物（vdex）的等待策略
    pub companion: CompanionConfig,
    /// 系统编译服务
    pub service: ServiceConfig,
    /// 设备信息覆盖
    pub device: DeviceConfig,
}

/// 外部 AOT 编译器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// 编译器可执行文件
    pub program: String,
    /// 放在编译器参数之前的启动参数（例如通过解释器启动包装脚本）
    pub launcher_args: Vec<String>,
    /// 追加在标准参数之后的参数
    pub extra_args: Vec<String>,
    /// 输出目录中的锁文件名
    pub lock_file_name: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "dex2oat".to_string(),
            launcher_args: Vec::new(),
            extra_args: Vec::new(),
            lock_file_name: "interpret.lock".to_string(),
        }
    }
}

/// 按需产物最多等待的次数
pub const MAX_ON_DEMAND_ATTEMPTS: u32 = 100;

/// 按需后台编译等待配置（固定间隔，超时为硬失败）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnDemandConfig {
    /// 最大等待次数
    pub max_attempts: u32,
    /// 每次等待间隔（毫秒）
    pub delay_ms: u64,
    /// 超时是否使该单元失败
    pub fatal_on_timeout: bool,
}

impl Default for OnDemandConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 5000,
            fatal_on_timeout: true,
        }
    }
}

impl OnDemandConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::FixedDelay {
            max_attempts: self.max_attempts,
            delay: Duration::from_millis(self.delay_ms),
        }
    }
}

/// 伴随产物等待配置（指数退避，超时只记录日志）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// 依次使用的等待间隔（毫秒）
    pub delays_ms: Vec<u64>,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            delays_ms: vec![1000, 2000, 4000, 8000, 16000, 32000],
        }
    }
}

impl CompanionConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::Backoff {
            delays: self
                .delays_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        }
    }
}

/// 系统编译服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// 服务名
    pub name: String,
    /// 请求编译的应用包名
    pub package_name: String,
    /// 发送 shell 命令的程序
    pub shell_program: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "package".to_string(),
            package_name: String::new(),
            shell_program: "cmd".to_string(),
        }
    }
}

/// 设备信息覆盖，未设置时在运行时探测
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub sdk_int: Option<u32>,
    pub preview_sdk_int: Option<u32>,
    /// 热切换的替代运行时处于活动状态时跳过所有优化
    pub alternate_runtime_active: bool,
}

impl DeviceConfig {
    /// 合并覆盖值与探测结果
    pub fn resolve(&self) -> DexOptResult<DeviceProfile> {
        let version = match self.sdk_int {
            Some(sdk_int) => OsVersion::new(sdk_int, self.preview_sdk_int.unwrap_or(0)),
            None => {
                let detected = OsVersion::detect()?;
                match self.preview_sdk_int {
                    Some(preview) => OsVersion::new(detected.sdk_int, preview),
                    None => detected,
                }
            }
        };
        Ok(DeviceProfile {
            version,
            alternate_runtime_active: self.alternate_runtime_active,
        })
    }
}

impl OptimizerConfig {
    pub fn from_toml_str(text: &str) -> DexOptResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| DexOptError::config(ConfigError::ParseError(e.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> DexOptResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DexOptError::config(ConfigError::FileAccessError(format!("{}: {e}", path.display())))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> DexOptResult<()> {
        let invalid = |key: &str, value: String| {
            Err(DexOptError::config(ConfigError::InvalidValue(key.to_string(), value)))
        };
        if self.compiler.program.trim().is_empty() {
            return invalid("compiler.program", self.compiler.program.clone());
        }
        if self.compiler.lock_file_name.is_empty()
            || self.compiler.lock_file_name.contains(std::path::MAIN_SEPARATOR)
        {
            return invalid("compiler.lock_file_name", self.compiler.lock_file_name.clone());
        }
        if self.service.name.trim().is_empty() {
            return invalid("service.name", self.service.name.clone());
        }
        if self.on_demand.max_attempts > MAX_ON_DEMAND_ATTEMPTS {
            return invalid("on_demand.max_attempts", self.on_demand.max_attempts.to_string());
        }
        if self.companion.delays_ms.is_empty() {
            return invalid("companion.delays_ms", "[]".to_string());
        }
        Ok(())
    }
}
