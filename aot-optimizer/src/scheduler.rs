//! 批量调度
//!
//! 按长度降序逐个驱动 worker，遇到第一个失败的单元立即停止。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use dexopt_error::DexOptResult;
use dexopt_osal::{Sleeper, ThreadSleeper};
use dexopt_service::{BackgroundCompile, ProcessIdentity, ServiceTrigger, ShellServiceLocator};

use crate::callback::OptimizeCallback;
use crate::compiler::SubprocessCompiler;
use crate::config::OptimizerConfig;
use crate::loader::{DexLoader, LoaderHandle, LoaderInjector, SubprocessLoader};
use crate::paths::{OatPathResolver, PathResolver};
use crate::strategy::DeviceProfile;
use crate::unit::{CompilationUnit, OptimizationRequest, schedule_order};
use crate::waiter::ArtifactWaiter;
use crate::worker::{OptimizeWorker, WorkerContext};

/// 一次批量优化的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// 已交给 worker 的单元数（包括失败的那个）
    pub processed: usize,
    pub succeeded: usize,
    /// 使批次中止的单元
    pub failed_unit: Option<PathBuf>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed_unit.is_none()
    }
}

/// 优化器
///
/// 长生命周期对象：持有服务触发器、等待策略以及注入产生的加载器。
/// 加载器句柄只追加、从不清空，直到优化器本身被释放。
pub struct DexOptimizer {
    config: OptimizerConfig,
    device: DeviceProfile,
    compiler: SubprocessCompiler,
    waiter: ArtifactWaiter,
    trigger: Option<Arc<dyn BackgroundCompile>>,
    injector: Arc<dyn LoaderInjector>,
    dex_loader: Arc<dyn DexLoader>,
    resolver: Arc<dyn PathResolver>,
    retained_loaders: Mutex<Vec<LoaderHandle>>,
}

impl DexOptimizer {
    pub fn builder(config: OptimizerConfig) -> DexOptimizerBuilder {
        DexOptimizerBuilder::new(config)
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceProfile {
        &self.device
    }

    /// 注入后被保留的加载器数量
    pub fn retained_loader_count(&self) -> usize {
        self.retained_loaders.lock().len()
    }

    /// 优化所有单元，全部成功才返回 `true`
    pub fn optimize_all(
        &self,
        units: &[CompilationUnit],
        target_dir: &Path,
        interpret_mode: bool,
        use_dlc: bool,
        target_isa: Option<&str>,
        callback: &dyn OptimizeCallback,
    ) -> bool {
        self.optimize_all_with_report(units, target_dir, interpret_mode, use_dlc, target_isa, callback)
            .is_success()
    }

    pub fn optimize_all_with_report(
        &self,
        units: &[CompilationUnit],
        target_dir: &Path,
        interpret_mode: bool,
        use_dlc: bool,
        target_isa: Option<&str>,
        callback: &dyn OptimizeCallback,
    ) -> BatchReport {
        let request = OptimizationRequest::new(target_dir)
            .interpret_mode(interpret_mode)
            .use_dlc(use_dlc)
            .target_isa(target_isa.map(str::to_string));
        self.optimize(units, &request, callback)
    }

    /// 按请求优化一批单元
    pub fn optimize(
        &self,
        units: &[CompilationUnit],
        request: &OptimizationRequest,
        callback: &dyn OptimizeCallback,
    ) -> BatchReport {
        let ctx = WorkerContext {
            device: &self.device,
            compiler: &self.compiler,
            waiter: &self.waiter,
            trigger: self.trigger.as_deref(),
            injector: self.injector.as_ref(),
            dex_loader: self.dex_loader.as_ref(),
            resolver: self.resolver.as_ref(),
            retained_loaders: &self.retained_loaders,
            fatal_on_timeout: self.config.on_demand.fatal_on_timeout,
        };

        tracing::info!(
            units = units.len(),
            dir = %request.target_dir.display(),
            interpret = request.interpret_mode,
            isa = request.isa(),
            version = %self.device.version,
            "optimizing batch"
        );

        let mut report = BatchReport::default();
        for unit in schedule_order(units) {
            report.processed += 1;
            let mut worker = OptimizeWorker::new(&ctx, unit, request, callback);
            let succeeded = worker.run();
            tracing::debug!(unit = %unit.path().display(), state = ?worker.state(), "worker returned");
            if !succeeded {
                tracing::warn!(unit = %unit.path().display(), "batch stopped at failed unit");
                report.failed_unit = Some(unit.path().to_path_buf());
                return report;
            }
            report.succeeded += 1;
        }
        report
    }
}

/// [`DexOptimizer`] 构建器，未提供的协作者使用默认实现
pub struct DexOptimizerBuilder {
    config: OptimizerConfig,
    device: Option<DeviceProfile>,
    sleeper: Option<Arc<dyn Sleeper>>,
    trigger: Option<Arc<dyn BackgroundCompile>>,
    injector: Option<Arc<dyn LoaderInjector>>,
    dex_loader: Option<Arc<dyn DexLoader>>,
    resolver: Option<Arc<dyn PathResolver>>,
}

impl DexOptimizerBuilder {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            device: None,
            sleeper: None,
            trigger: None,
            injector: None,
            dex_loader: None,
            resolver: None,
        }
    }

    /// 覆盖设备信息（默认由配置与运行时探测得到）
    pub fn device(mut self, device: DeviceProfile) -> Self {
        self.device = Some(device);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn background_compile(mut self, trigger: Arc<dyn BackgroundCompile>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn loader_injector(mut self, injector: Arc<dyn LoaderInjector>) -> Self {
        self.injector = Some(injector);
        self
    }

    pub fn dex_loader(mut self, loader: Arc<dyn DexLoader>) -> Self {
        self.dex_loader = Some(loader);
        self
    }

    pub fn path_resolver(mut self, resolver: Arc<dyn PathResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> DexOptResult<DexOptimizer> {
        let config = self.config;
        config.validate()?;

        let device = match self.device {
            Some(device) => device,
            None => config.device.resolve()?,
        };
        let compiler = SubprocessCompiler::new(config.compiler.clone());
        let waiter = ArtifactWaiter::new(
            self.sleeper.unwrap_or_else(|| Arc::new(ThreadSleeper)),
            config.on_demand.policy(),
            config.companion.policy(),
        );

        // 没有包名时无法构造默认触发器，需要时由 worker 报配置错误
        let trigger = self.trigger.or_else(|| {
            if config.service.package_name.is_empty() {
                return None;
            }
            let locator = ShellServiceLocator::new(config.service.shell_program.clone());
            let trigger: Arc<dyn BackgroundCompile> = Arc::new(ServiceTrigger::new(
                Arc::new(locator),
                Arc::new(ProcessIdentity),
                config.service.name.clone(),
                config.service.package_name.clone(),
            ));
            Some(trigger)
        });

        let default_loader = || {
            Arc::new(SubprocessLoader::new(compiler.clone(), device.version))
        };
        let injector: Arc<dyn LoaderInjector> = match self.injector {
            Some(injector) => injector,
            None => default_loader(),
        };
        let dex_loader: Arc<dyn DexLoader> = match self.dex_loader {
            Some(loader) => loader,
            None => default_loader(),
        };
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(OatPathResolver::new(device.version)));

        tracing::debug!(version = %device.version, alternate = device.alternate_runtime_active, "optimizer ready");
        Ok(DexOptimizer {
            config,
            device,
            compiler,
            waiter,
            trigger,
            injector,
            dex_loader,
            resolver,
            retained_loaders: Mutex::new(Vec::new()),
        })
    }
}
