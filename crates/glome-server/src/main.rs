//! glome - replicated broadcast and grow-only counter node
//!
//! Speaks line-delimited JSON on stdin/stdout. Logs go to stderr.

use clap::{Parser, ValueEnum};
use glome_core::Program;
use glome_server::{Runtime, config};
use std::path::PathBuf;
use std::thread;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// glome CLI arguments
#[derive(Parser, Debug)]
#[command(name = "glome")]
#[command(about = "Replicated broadcast and grow-only counter node", long_about = None)]
struct Args {
    /// Program to run: echo, unique-ids, broadcast-simple, broadcast,
    /// broadcast-batched or g-counter
    #[arg(long, short = 'p')]
    program: Program,

    /// TOML config file (defaults to $GLOME_CONFIG when set)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.log_format);

    let worker_threads = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .clamp(2, 8);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .thread_name("glome-worker")
        .enable_all()
        .build()?;

    let config = config::load(args.config.as_deref())?;
    tracing::info!("Starting {} ({} worker threads)", args.program, worker_threads);

    rt.block_on(Runtime::new(args.program, config).run())?;
    Ok(())
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            "glome=debug".into()
        } else {
            "glome=info".into()
        }
    });

    // stdout carries the protocol
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init(),
    }
}
