// SPDX-License-Identifier: MIT
// dispatchd: poll-driven connection dispatch daemon
//
// - Accepts TCP connections on one listening socket.
// - Hands each connection to a bounded worker pool as a job.
// - Tears subsystems down in priority order on SIGINT/SIGTERM.

use anyhow::Result;
use clap::Parser;
use log::info;

use dispatchd::server::{Server, ServerConfig};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Number of worker threads
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Maximum number of queued connection jobs
    #[arg(long = "queue-capacity", default_value_t = 100)]
    queue_capacity: usize,

    /// Poll timeout in milliseconds; negative blocks indefinitely
    #[arg(long = "poll-timeout", default_value_t = 1000, allow_hyphen_values = true)]
    poll_timeout_ms: i32,
}

fn validate_args(args: &Args) -> Result<(), String> {
    if args.workers == 0 {
        return Err("--workers must be at least 1".into());
    }
    if args.queue_capacity == 0 {
        return Err("--queue-capacity must be at least 1".into());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    let config = ServerConfig {
        bind_addr: args.bind,
        port: args.port,
        workers: args.workers,
        queue_capacity: args.queue_capacity,
        poll_timeout_ms: args.poll_timeout_ms,
        ..ServerConfig::default()
    };

    info!("Starting dispatchd");
    let server = Server::bootstrap(config)?;
    let result = server.run();

    info!("Stopping dispatchd");
    server.shutdown();
    result
}
