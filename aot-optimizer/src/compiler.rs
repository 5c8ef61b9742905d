//! 外部 AOT 编译器调用
//!
//! 在输出目录锁的保护下启动编译器子进程，排空其输出并等待退出。

use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use dexopt_error::{CompilerError, DexOptError, DexOptResult};
use dexopt_osal::{DirectoryLock, OsVersion, StreamDrain, spawn_with_retry};

use crate::config::CompilerConfig;
use crate::strategy::{CLASSPATH_FIX_SDK, CompilerFilter};

/// 子进程编译器
#[derive(Clone)]
pub struct SubprocessCompiler {
    config: CompilerConfig,
    drain: &'static StreamDrain,
}

impl SubprocessCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            config,
            drain: StreamDrain::global(),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// 组装编译器参数（不含程序名与启动参数）
    pub fn build_args(
        &self,
        version: OsVersion,
        dex_path: &Path,
        oat_path: &Path,
        isa: &str,
        filter: CompilerFilter,
    ) -> Vec<String> {
        let mut args = Vec::with_capacity(8 + self.config.extra_args.len());
        // 7.1.1 起的重复类问题
        if version.sdk_int >= CLASSPATH_FIX_SDK {
            args.extend(["--runtime-arg", "-classpath", "--runtime-arg", "&"].map(String::from));
        }
        args.push(format!("--dex-file={}", dex_path.display()));
        args.push(format!("--oat-file={}", oat_path.display()));
        args.push(format!("--instruction-set={isa}"));
        args.push(format!("--compiler-filter={}", filter.as_str()));
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    /// 编译一个单元；同一输出目录上的编译互斥
    pub fn compile(
        &self,
        version: OsVersion,
        dex_path: &Path,
        oat_path: &Path,
        isa: &str,
        filter: CompilerFilter,
    ) -> DexOptResult<()> {
        let out_dir = oat_path.parent().ok_or_else(|| DexOptError::Io {
            message: format!("{} has no parent directory", oat_path.display()),
        })?;
        if !oat_path.exists() {
            std::fs::create_dir_all(out_dir)?;
        }

        let lock = DirectoryLock::acquire(&out_dir.join(&self.config.lock_file_name))?;
        let args = self.build_args(version, dex_path, oat_path, isa, filter);
        let result = self.run(&args);
        if let Err(e) = lock.release() {
            tracing::warn!(dir = %out_dir.display(), "release interpret lock error: {e}");
        }

        match &result {
            Ok(()) => tracing::info!(dex = %dex_path.display(), oat = %oat_path.display(), "compiler finished"),
            Err(e) => tracing::error!(dex = %dex_path.display(), "compiler failed: {e}"),
        }
        result
    }

    fn run(&self, args: &[String]) -> DexOptResult<()> {
        let (reader, writer) = io::pipe()?;
        let mut child = {
            let mut cmd = Command::new(&self.config.program);
            cmd.args(&self.config.launcher_args)
                .args(args)
                .stdin(Stdio::null())
                .stdout(writer.try_clone()?)
                .stderr(writer);
            tracing::debug!(program = %self.config.program, ?args, "spawning compiler");
            // cmd 离开作用域时父进程持有的写端随之关闭，排空线程才能读到 EOF
            spawn_with_retry(&mut cmd).map_err(|e| {
                DexOptError::compiler(CompilerError::SpawnFailed(
                    self.config.program.clone(),
                    e.to_string(),
                ))
            })?
        };

        // stdout 与 stderr 已合并到同一个管道
        self.drain.consume(Some(reader));

        let status = child.wait()?;
        check_status(status)
    }
}

fn check_status(status: ExitStatus) -> DexOptResult<()> {
    if status.success() {
        return Ok(());
    }
    let error = match status.code() {
        Some(code) => CompilerError::NonZeroExit(code),
        // 没有退出码说明进程被信号终止
        None => CompilerError::Interrupted(status.to_string()),
    };
    Err(DexOptError::compiler(error))
}
