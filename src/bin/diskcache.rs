//! cacheprog disk cache binary
//!
//! Serves the cache helper protocol on stdin/stdout, storing entries in a
//! local directory.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use cacheprog::{Config, DiskStore, Server};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// Build cache helper backed by a local directory
#[derive(Parser, Debug)]
#[command(name = "cacheprog-diskcache")]
#[command(about = "Build toolchain cache helper backed by a local directory")]
#[command(version)]
struct Args {
    /// Cache directory
    #[arg(long)]
    cache_dir: String,

    /// Age after which cache entries expire, e.g. "72h" (0 = never)
    #[arg(short = 'x', long, value_parser = humantime::parse_duration, default_value = "0s")]
    max_age: Duration,

    /// Maximum number of concurrent requests (0 = number of CPUs)
    #[arg(short = 'c', long, default_value = "0")]
    concurrency: usize,

    /// Enable verbose logging and print metrics on exit
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // stdout carries the protocol; logs go to stderr
    let default_filter = if args.verbose {
        "info,cacheprog=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("cacheprog v{}", cacheprog::VERSION);
    tracing::info!("Cache directory: {}", args.cache_dir);

    let config = Config::builder()
        .cache_dir(&args.cache_dir)
        .max_age(args.max_age)
        .max_requests(args.concurrency)
        .log_requests(args.verbose)
        .build();

    let store = match DiskStore::from_config(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Create cache dir: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let server = Server::new(config, store);
    let result = server.run_stdio();
    if let Err(e) = &result {
        tracing::error!("Server exited with error: {}", e);
    }

    if args.verbose {
        match serde_json::to_string_pretty(&server.metrics().snapshot()) {
            Ok(json) => eprintln!("{}", json),
            Err(e) => tracing::warn!("Encode metrics: {}", e),
        }
    }

    if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
