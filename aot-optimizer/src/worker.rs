//! 单个编译单元的优化状态机
//!
//! `Init → Validating → Started → Running(strategy) → Succeeded | Failed`。
//! 策略返回的任何错误都在这里被截获、记录并通过回调上报，不会越过 worker 边界。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use parking_lot::Mutex;

use dexopt_error::{ConfigError, DexOptError, DexOptResult, utils};
use dexopt_osal::check_legal_file;
use dexopt_service::BackgroundCompile;

use crate::callback::OptimizeCallback;
use crate::compiler::SubprocessCompiler;
use crate::loader::{DexLoader, InjectionRequest, LoaderHandle, LoaderInjector};
use crate::paths::{PathResolver, companion_path};
use crate::strategy::{CompilerFilter, DeviceProfile, Strategy, select_strategy};
use crate::unit::{CompilationUnit, OptimizationRequest};
use crate::waiter::ArtifactWaiter;

/// Worker 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Validating,
    Started,
    Running(Strategy),
    Succeeded,
    Failed,
}

/// 由调度器持有、在所有 worker 之间共享的协作者
pub(crate) struct WorkerContext<'a> {
    pub device: &'a DeviceProfile,
    pub compiler: &'a SubprocessCompiler,
    pub waiter: &'a ArtifactWaiter,
    pub trigger: Option<&'a dyn BackgroundCompile>,
    pub injector: &'a dyn LoaderInjector,
    pub dex_loader: &'a dyn DexLoader,
    pub resolver: &'a dyn PathResolver,
    /// 注入产生的加载器，只追加不替换
    pub retained_loaders: &'a Mutex<Vec<LoaderHandle>>,
    pub fatal_on_timeout: bool,
}

/// 单元优化器
pub(crate) struct OptimizeWorker<'a> {
    ctx: &'a WorkerContext<'a>,
    unit: &'a CompilationUnit,
    request: &'a OptimizationRequest,
    callback: &'a dyn OptimizeCallback,
    state: WorkerState,
}

impl<'a> OptimizeWorker<'a> {
    pub fn new(
        ctx: &'a WorkerContext<'a>,
        unit: &'a CompilationUnit,
        request: &'a OptimizationRequest,
        callback: &'a dyn OptimizeCallback,
    ) -> Self {
        Self {
            ctx,
            unit,
            request,
            callback,
            state: WorkerState::Init,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn enter(&mut self, state: WorkerState) {
        tracing::debug!(unit = %self.unit.path().display(), from = ?self.state, to = ?state, "worker transition");
        self.state = state;
    }

    /// 运行状态机，成功返回 `true`
    pub fn run(&mut self) -> bool {
        let request = self.request;
        let dir = request.target_dir.as_path();

        self.enter(WorkerState::Validating);
        if let Err(e) = check_legal_file(self.unit.path()) {
            utils::log_error(&e, self.unit.path());
            self.callback.on_failed(self.unit, dir, &e);
            self.enter(WorkerState::Failed);
            return false;
        }

        self.enter(WorkerState::Started);
        self.callback.on_start(self.unit, dir);

        let optimized_path = self
            .ctx
            .resolver
            .optimized_path(self.unit.path(), dir, request.isa());
        let strategy = select_strategy(self.ctx.device, request.interpret_mode);
        self.enter(WorkerState::Running(strategy));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(strategy, &optimized_path)))
            .unwrap_or_else(|payload| Err(panic_error(payload.as_ref())));
        match outcome {
            Ok(()) => {
                self.callback.on_success(self.unit, dir, &optimized_path);
                self.enter(WorkerState::Succeeded);
                true
            }
            Err(e) => {
                tracing::error!(unit = %self.unit.path().display(), strategy = strategy.name(), "Failed to optimize dex");
                utils::log_error(&e, self.unit.path());
                self.callback.on_failed(self.unit, dir, &e);
                self.enter(WorkerState::Failed);
                false
            }
        }
    }

    fn execute(&self, strategy: Strategy, optimized_path: &Path) -> DexOptResult<()> {
        let dex_path = self.unit.path();
        let version = self.ctx.device.version;
        match strategy {
            Strategy::Skip => {
                tracing::info!(unit = %dex_path.display(), "alternate runtime active, skip optimizing");
                Ok(())
            }
            Strategy::Interpret => self.ctx.compiler.compile(
                version,
                dex_path,
                optimized_path,
                self.request.isa(),
                CompilerFilter::for_interpret(version),
            ),
            Strategy::InjectAndTrigger {
                on_demand,
                companion_wait,
            } => {
                let handle = self.ctx.injector.inject(&InjectionRequest {
                    dex_path: dex_path.to_path_buf(),
                    optimized_dir: self.request.target_dir.clone(),
                    optimized_path: optimized_path.to_path_buf(),
                    isa: self.request.isa().to_string(),
                    use_dlc: self.request.use_dlc,
                })?;
                self.ctx.retained_loaders.lock().push(handle);

                if on_demand {
                    self.trigger_on_demand(optimized_path)?;
                } else {
                    tracing::warn!(version = %version, "[+] Not API 29+ device, skip fixing.");
                }

                if companion_wait {
                    match companion_path(optimized_path) {
                        Some(vdex) => {
                            self.ctx.waiter.wait_for_companion(&vdex);
                        }
                        None => tracing::warn!(
                            optimized = %optimized_path.display(),
                            "optimized path has no odex suffix, skip waiting for vdex"
                        ),
                    }
                }
                Ok(())
            }
            Strategy::LegacyLoad => {
                self.ctx
                    .dex_loader
                    .load_dex(dex_path, optimized_path, self.request.isa())
            }
        }
    }

    fn trigger_on_demand(&self, optimized_path: &Path) -> DexOptResult<()> {
        tracing::info!(unit = %self.unit.path().display(), "[+] Hit target device, do fix logic now.");
        let trigger = self.ctx.trigger.ok_or_else(|| {
            DexOptError::config(ConfigError::MissingRequired("service.package_name".into()))
        })?;
        match self.ctx.waiter.trigger_and_wait(trigger, optimized_path) {
            Err(e) if !self.ctx.fatal_on_timeout => {
                tracing::warn!(unit = %self.unit.path().display(), "ignoring on-demand dexopt failure: {e}");
                Ok(())
            }
            result => result,
        }
    }
}

/// 协作者 panic 时转成普通失败，经回调上报
fn panic_error(payload: &(dyn Any + Send)) -> DexOptError {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");
    DexOptError::internal(format!("optimizer collaborator panicked: {detail}"))
}
