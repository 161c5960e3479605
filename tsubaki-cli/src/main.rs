//! Tsubaki CLI - コマンドラインインターフェース
//!
//! ユーザーブレークポイント付きでプロセスをトレースし、発火したらgdbに引き渡す

use anyhow::Result;
use clap::Parser;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tsubaki_core::{BreakpointRegistry, Tracer, TracerConfig, TriggerError, DEFAULT_TRACED_FUNCTIONS};

/// Tsubaki - process tracer with user breakpoints
#[derive(Parser)]
#[command(name = "tsubaki")]
#[command(version = "0.1.0")]
#[command(about = "Trace a process and hand it to gdb when a user breakpoint fires", long_about = None)]
struct Cli {
    /// User breakpoint, e.g. "addr=main+0x10 3", "oid=7", "segfault", "entry"
    #[arg(short = 'b', long = "break", value_name = "SPEC")]
    breakpoints: Vec<String>,

    /// Function whose calls are counted as traced operations
    #[arg(short = 't', long = "trace", value_name = "FUNC")]
    traced_functions: Vec<String>,

    /// Debugger executed when a breakpoint fires
    #[arg(long, env = "TSUBAKI_GDB", default_value = "/usr/bin/gdb")]
    gdb_path: PathBuf,

    /// Attach to an existing process instead of launching one
    #[arg(short = 'p', long = "attach", value_name = "PID", conflicts_with = "program")]
    pid: Option<i32>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the executable binary
    #[arg(required_unless_present = "pid")]
    program: Option<PathBuf>,

    /// Arguments to pass to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            if let Some(trigger) = e.downcast_ref::<TriggerError>() {
                error!("internal error: {}. Please report this along with your command line arguments.", trigger);
            } else {
                error!("{:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

/// ログ出力を初期化する（RUST_LOGが優先）
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let registry = match build_registry(&cli.breakpoints) {
        Ok(registry) => registry,
        Err(e) => {
            // 構文エラーはトレース開始前に終了する
            eprintln!("invalid user breakpoint syntax\n{}\n", e.render());
            return Ok(1);
        }
    };
    info!("Loaded {} user breakpoint(s)", registry.len());

    check_debugger(&cli.gdb_path)?;

    let config = TracerConfig {
        gdb_path: cli.gdb_path,
        traced_functions: if cli.traced_functions.is_empty() {
            DEFAULT_TRACED_FUNCTIONS.iter().map(|s| s.to_string()).collect()
        } else {
            cli.traced_functions
        },
    };

    let mut tracer = match (cli.pid, cli.program) {
        (Some(pid), _) => Tracer::attach(pid, registry, config)?,
        (None, Some(program)) => Tracer::spawn(&program, &cli.args, registry, config)?,
        (None, None) => anyhow::bail!("either a program or --attach <PID> is required"),
    };

    tracer.run()
}

/// コマンドラインと環境変数 TSUBAKI_BREAK からレジストリを構築する
fn build_registry(specs: &[String]) -> Result<BreakpointRegistry, tsubaki_core::SyntaxError> {
    let from_env = std::env::var("TSUBAKI_BREAK").ok().filter(|s| !s.trim().is_empty());
    BreakpointRegistry::from_specs(specs.iter().map(String::as_str).chain(from_env.as_deref()))
}

/// デバッガが実行可能か、トレース開始前に確認する
fn check_debugger(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow::anyhow!("cannot find debugger {}: {}", path.display(), e))?;
    if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
        anyhow::bail!("debugger {} is not executable", path.display());
    }
    Ok(())
}
