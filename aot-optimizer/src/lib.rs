//! aot-optimizer: 动态加载 dex 单元的预编译调度
//!
//! 按单元长度降序依次优化，根据系统版本在解释模式编译、注入加载器并请求后台编译、
//! 以及旧系统的基础加载之间选择策略。外部编译器在输出目录锁下运行，
//! 系统异步生成的产物通过有限重试轮询确认。

pub mod callback;
pub mod compiler;
pub mod config;
pub mod loader;
pub mod paths;
pub mod scheduler;
pub mod strategy;
pub mod unit;
pub mod waiter;
mod worker;

pub use callback::{LoggingCallback, OptimizeCallback};
pub use compiler::SubprocessCompiler;
pub use config::OptimizerConfig;
pub use loader::{CompiledImage, DexLoader, InjectionRequest, LoaderHandle, LoaderInjector, SubprocessLoader};
pub use paths::{OatPathResolver, PathResolver, companion_path};
pub use scheduler::{BatchReport, DexOptimizer, DexOptimizerBuilder};
pub use strategy::{CompilerFilter, DeviceProfile, Strategy, select_strategy};
pub use unit::{CompilationUnit, OptimizationRequest, schedule_order};
pub use waiter::{ArtifactWaiter, PollOutcome, RetryPolicy};
pub use worker::WorkerState;
