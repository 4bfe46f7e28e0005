use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::executor::block_on;
use std::io::Write;
use tracing::{info, warn};

use sclang_runtime::config::{self, RuntimeConfig};
use sclang_runtime::logging;
use sclang_runtime::process_manager::PROCESS_MANAGER;
use sclang_runtime::stdin_commands::{self, CommandResponse, IncomingLine};
use sclang_runtime::Runtime;

#[derive(Parser)]
#[command(name = "sclang-runtime")]
#[command(version)]
#[command(about = "Evaluate SuperCollider code through a supervised sclang process", long_about = None)]
struct Cli {
    /// Path to the sclang executable
    #[arg(long, global = true)]
    sclang_path: Option<String>,

    /// Boot timeout in milliseconds
    #[arg(long, global = true)]
    boot_timeout: Option<u64>,

    /// Evaluation timeout in milliseconds
    #[arg(long, global = true)]
    exec_timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Read JSONL commands on stdin and answer on stdout (default)
    Serve,
    /// Boot, evaluate one snippet, print the result and quit
    Eval {
        /// SuperCollider source to evaluate
        code: String,
    },
}

impl Cli {
    /// Flags win over the config file and environment
    fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            sclang_path: self.sclang_path.clone(),
            boot_timeout_ms: self.boot_timeout,
            exec_timeout_ms: self.exec_timeout,
            ..Default::default()
        }
        .merge_missing(config::load_config())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init();

    let orphans = PROCESS_MANAGER.cleanup_orphans();
    if orphans > 0 {
        warn!(count = orphans, "Killed interpreters left over from a previous run");
    }

    let runtime = Runtime::new(cli.runtime_config());
    let outcome = match &cli.command {
        Some(Command::Eval { code }) => eval(&runtime, code),
        Some(Command::Serve) | None => serve(&runtime),
    };

    block_on(runtime.quit());
    PROCESS_MANAGER.kill_all_processes();
    outcome
}

fn eval(runtime: &Runtime, code: &str) -> Result<()> {
    block_on(async {
        runtime
            .boot()
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message()))
            .context("boot failed")?;
        let value = runtime
            .execute(code)
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message()))?;
        println!("{}", value);
        Ok::<(), anyhow::Error>(())
    })
}

fn serve(runtime: &Runtime) -> Result<()> {
    info!(log_file = %logging::log_path().display(), "Serving JSONL commands on stdin");
    let commands = stdin_commands::start_stdin_listener();
    let stdout = std::io::stdout();

    block_on(async {
        while let Ok(incoming) = commands.recv().await {
            let response = match incoming {
                IncomingLine::Command(command) => {
                    stdin_commands::dispatch(runtime, command).await
                }
                IncomingLine::Invalid { line, error } => {
                    CommandResponse::invalid(&line, &error, runtime.state())
                }
            };
            let json = serde_json::to_string(&response).context("serialize response")?;
            let mut out = stdout.lock();
            writeln!(out, "{}", json).context("write response")?;
            out.flush().context("flush stdout")?;
        }
        info!("stdin closed, shutting down");
        Ok::<(), anyhow::Error>(())
    })
}
