//! 优化策略表
//!
//! 每个单元选择哪条优化路径只取决于设备版本和调用方的模式开关。
//! 规则按顺序匹配，第一条命中的规则生效。

use dexopt_osal::OsVersion;

/// 从该版本起运行时自己负责编译，需要通过新的类加载器触发（预览版为前一版本）
pub const V_NEW: u32 = 26;
/// 该版本起 fallback 加载明显变慢，需要主动请求后台编译
pub const ON_DEMAND_MIN_SDK: u32 = 29;
/// 该版本起 vdex 会在更晚的时候才出现（预览版为前一版本）
pub const COMPANION_WAIT_SDK: u32 = 31;
/// 该版本起需要规避重复类问题
pub const CLASSPATH_FIX_SDK: u32 = 24;

/// 设备侧决定策略的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub version: OsVersion,
    /// 热切换的替代运行时处于活动状态
    pub alternate_runtime_active: bool,
}

impl DeviceProfile {
    pub fn new(version: OsVersion) -> Self {
        Self {
            version,
            alternate_runtime_active: false,
        }
    }
}

/// 单元的优化路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// 什么也不做，直接成功
    Skip,
    /// 以解释模式调用外部编译器
    Interpret,
    /// 注入新类加载器，然后按需请求后台编译
    InjectAndTrigger {
        /// 是否请求后台编译并等待 odex
        on_demand: bool,
        /// 是否额外等待 vdex 出现
        companion_wait: bool,
    },
    /// 交给系统的基础 dex 加载接口
    LegacyLoad,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Skip => "skip",
            Strategy::Interpret => "interpret",
            Strategy::InjectAndTrigger { .. } => "inject-and-trigger",
            Strategy::LegacyLoad => "legacy-load",
        }
    }
}

/// 编译器过滤器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerFilter {
    Quicken,
    InterpretOnly,
    SpeedProfile,
}

impl CompilerFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompilerFilter::Quicken => "quicken",
            CompilerFilter::InterpretOnly => "interpret-only",
            CompilerFilter::SpeedProfile => "speed-profile",
        }
    }

    /// 解释模式下外部编译器使用的过滤器
    pub fn for_interpret(version: OsVersion) -> Self {
        if version.sdk_int >= V_NEW {
            CompilerFilter::Quicken
        } else {
            CompilerFilter::InterpretOnly
        }
    }
}

struct Rule {
    name: &'static str,
    matches: fn(&DeviceProfile, bool) -> bool,
    strategy: fn(&DeviceProfile) -> Strategy,
}

const STRATEGY_TABLE: &[Rule] = &[
    Rule {
        name: "alternate-runtime",
        matches: |device, _| device.alternate_runtime_active,
        strategy: |_| Strategy::Skip,
    },
    Rule {
        name: "interpret-mode",
        matches: |_, interpret_mode| interpret_mode,
        strategy: |_| Strategy::Interpret,
    },
    Rule {
        name: "runtime-compile",
        matches: |device, _| device.version.at_least_or_preview(V_NEW),
        strategy: |device| Strategy::InjectAndTrigger {
            on_demand: device.version.sdk_int >= ON_DEMAND_MIN_SDK,
            companion_wait: device.version.at_least_or_preview(COMPANION_WAIT_SDK),
        },
    },
    Rule {
        name: "legacy",
        matches: |_, _| true,
        strategy: |_| Strategy::LegacyLoad,
    },
];

/// 为一个单元选择策略
pub fn select_strategy(device: &DeviceProfile, interpret_mode: bool) -> Strategy {
    for rule in STRATEGY_TABLE {
        if (rule.matches)(device, interpret_mode) {
            let strategy = (rule.strategy)(device);
            tracing::debug!(rule = rule.name, strategy = strategy.name(), version = %device.version, "strategy selected");
            return strategy;
        }
    }
    Strategy::LegacyLoad
}
