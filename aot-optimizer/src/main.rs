//! aot-optimizer 命令行

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use aot_optimizer::{CompilationUnit, DexOptimizer, LoggingCallback, OptimizerConfig};

#[derive(Debug, Parser)]
#[command(name = "aot-optimizer", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Compile with the external compiler in interpret mode
    #[arg(long)]
    interpret: bool,

    /// Allow dynamically-loaded-component style injection
    #[arg(long)]
    use_dlc: bool,

    /// Target instruction set (defaults to the host's)
    #[arg(long)]
    isa: Option<String>,

    /// Override the detected SDK level
    #[arg(long)]
    sdk: Option<u32>,

    /// Override the detected preview SDK level
    #[arg(long)]
    preview_sdk: Option<u32>,

    /// Package name sent with background compile requests
    #[arg(long)]
    package: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory for optimized output
    #[arg(long)]
    out: PathBuf,

    /// Units to optimize
    #[arg(required = true)]
    units: Vec<PathBuf>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> Result<OptimizerConfig> {
    let mut config = match &cli.config {
        Some(path) => OptimizerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => OptimizerConfig::default(),
    };
    if let Some(sdk) = cli.sdk {
        config.device.sdk_int = Some(sdk);
    }
    if let Some(preview) = cli.preview_sdk {
        config.device.preview_sdk_int = Some(preview);
    }
    if let Some(package) = &cli.package {
        config.service.package_name = package.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<bool> {
    let config = load_config(cli)?;
    let optimizer = DexOptimizer::builder(config)
        .build()
        .context("building optimizer")?;

    let units: Vec<CompilationUnit> = cli.units.iter().map(CompilationUnit::new).collect();
    let callback = LoggingCallback::new();
    let report = optimizer.optimize_all_with_report(
        &units,
        &cli.out,
        cli.interpret,
        cli.use_dlc,
        cli.isa.as_deref(),
        &callback,
    );

    tracing::info!(
        processed = report.processed,
        succeeded = report.succeeded,
        failed = callback.failed(),
        retained_loaders = optimizer.retained_loader_count(),
        "batch finished"
    );
    if let Some(unit) = &report.failed_unit {
        tracing::error!(unit = %unit.display(), "optimization aborted");
    }
    Ok(report.is_success())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
