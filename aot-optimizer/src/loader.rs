//! 类加载器注入
//!
//! 把运行时的类加载器指向优化产物属于平台能力；worker 只需要一个返回不透明句柄的
//! 注入调用，以及旧系统上的基础 dex 加载接口。

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dexopt_error::{DexOptError, DexOptResult};
use dexopt_osal::OsVersion;

use crate::compiler::SubprocessCompiler;
use crate::strategy::CompilerFilter;

/// 注入产生的不透明加载器，由优化器持有
pub type LoaderHandle = Arc<dyn Any + Send + Sync>;

/// 注入一个单元所需的全部信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionRequest {
    pub dex_path: PathBuf,
    pub optimized_dir: PathBuf,
    pub optimized_path: PathBuf,
    pub isa: String,
    pub use_dlc: bool,
}

/// 基于单元创建新的类加载器，由运行时完成编译
pub trait LoaderInjector: Send + Sync {
    fn inject(&self, request: &InjectionRequest) -> DexOptResult<LoaderHandle>;
}

/// 运行时编译出现之前的系统提供的基础 dex 加载接口
pub trait DexLoader: Send + Sync {
    fn load_dex(&self, dex_path: &Path, optimized_path: &Path, isa: &str) -> DexOptResult<()>;
}

/// [`SubprocessLoader`] 返回的句柄：单元被编译到的镜像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledImage {
    pub dex_path: PathBuf,
    pub image_path: PathBuf,
    pub use_dlc: bool,
}

/// 没有托管运行时的宿主上的注入器与加载器，两种操作都调用外部编译器
#[derive(Clone)]
pub struct SubprocessLoader {
    compiler: SubprocessCompiler,
    version: OsVersion,
    filter: CompilerFilter,
}

impl SubprocessLoader {
    /// 过滤器默认按系统版本选择（`quicken` 或 `interpret-only`）
    pub fn new(compiler: SubprocessCompiler, version: OsVersion) -> Self {
        Self {
            compiler,
            version,
            filter: CompilerFilter::for_interpret(version),
        }
    }

    pub fn with_filter(mut self, filter: CompilerFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn filter(&self) -> CompilerFilter {
        self.filter
    }

    fn compile(&self, dex_path: &Path, image_path: &Path, isa: &str) -> DexOptResult<()> {
        self.compiler
            .compile(self.version, dex_path, image_path, isa, self.filter)?;
        // 编译器正常退出却没有产物时无法加载
        if !image_path.is_file() {
            return Err(DexOptError::loader(format!(
                "compiler produced no image at {}",
                image_path.display()
            )));
        }
        Ok(())
    }
}

impl LoaderInjector for SubprocessLoader {
    fn inject(&self, request: &InjectionRequest) -> DexOptResult<LoaderHandle> {
        tracing::info!(
            dex = %request.dex_path.display(),
            dlc = request.use_dlc,
            "injecting loader over compiled image"
        );
        self.compile(&request.dex_path, &request.optimized_path, &request.isa)?;
        Ok(Arc::new(CompiledImage {
            dex_path: request.dex_path.clone(),
            image_path: request.optimized_path.clone(),
            use_dlc: request.use_dlc,
        }))
    }
}

impl DexLoader for SubprocessLoader {
    fn load_dex(&self, dex_path: &Path, optimized_path: &Path, isa: &str) -> DexOptResult<()> {
        self.compile(dex_path, optimized_path, isa)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;

    /// 写出 `--oat-file` 指向的文件后退出
    const WRITES_IMAGE: &str =
        r#"for a; do case "$a" in --oat-file=*) : > "${a#--oat-file=}";; esac; done"#;

    fn loader(launcher: &[&str], version: OsVersion) -> SubprocessLoader {
        let compiler = SubprocessCompiler::new(CompilerConfig {
            program: "sh".to_string(),
            launcher_args: launcher.iter().map(|s| s.to_string()).collect(),
            ..CompilerConfig::default()
        });
        SubprocessLoader::new(compiler, version)
    }

    fn request(dir: &Path) -> InjectionRequest {
        InjectionRequest {
            dex_path: dir.join("classes.dex"),
            optimized_dir: dir.join("odex"),
            optimized_path: dir.join("oat/arm64/classes.odex"),
            isa: "arm64".into(),
            use_dlc: true,
        }
    }

    #[test]
    fn test_default_filter_follows_version() {
        let release = |sdk| loader(&[], OsVersion::release(sdk)).filter();
        assert_eq!(release(23), CompilerFilter::InterpretOnly);
        assert_eq!(release(29), CompilerFilter::Quicken);
        assert_eq!(
            loader(&[], OsVersion::preview(25)).filter(),
            CompilerFilter::InterpretOnly
        );
    }

    #[test]
    fn test_inject_returns_compiled_image() {
        let dir = tempfile::tempdir().unwrap();
        let request = request(dir.path());
        let handle = loader(&["-c", WRITES_IMAGE, "dex2oat"], OsVersion::release(29))
            .inject(&request)
            .unwrap();
        let image = handle.downcast_ref::<CompiledImage>().unwrap();
        assert_eq!(image.image_path, request.optimized_path);
        assert!(image.use_dlc);
        assert!(dir.path().join("oat/arm64/interpret.lock").exists());
    }

    #[test]
    fn test_inject_propagates_compiler_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = loader(&["-c", "exit 1"], OsVersion::release(29))
            .inject(&request(dir.path()))
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
    }

    #[test]
    fn test_missing_image_is_loader_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = loader(&["-c", "exit 0"], OsVersion::release(29))
            .inject(&request(dir.path()))
            .unwrap_err();
        assert_eq!(err.category(), "loader");
    }

    #[test]
    fn test_load_dex_compiles() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(&["-c", WRITES_IMAGE, "dex2oat"], OsVersion::release(23));
        loader
            .load_dex(&dir.path().join("a.dex"), &dir.path().join("odex/a.dex"), "arm")
            .unwrap();
        assert!(dir.path().join("odex/a.dex").is_file());
    }
}
