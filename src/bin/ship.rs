#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use shiplink::ship::bootstrap::{self, BootstrapArgs};
use shiplink::runtime;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ship", about = "Local-side HTTP/HTTPS forwarding proxy")]
struct Cli {
    /// Path to a TOML or JSON config file; built-in defaults apply if absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Offshore hostname to dial.
    #[arg(long, env = "OFFSHORE_HOST")]
    offshore_host: Option<String>,

    /// Offshore port to dial.
    #[arg(long, env = "OFFSHORE_PORT")]
    offshore_port: Option<u16>,

    /// Port the local ingress proxy listens on.
    #[arg(long, env = "LISTEN_PORT")]
    listen_port: Option<u16>,

    /// DEBUG|INFO|WARNING|ERROR.
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Capacity of the bounded submission queue (REDESIGN FLAG 3).
    #[arg(long, env = "QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = runtime::get_container_cpu_limit();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(bootstrap::run(BootstrapArgs {
        config_path: cli.config,
        offshore_host: cli.offshore_host,
        offshore_port: cli.offshore_port,
        listen_port: cli.listen_port,
        log_level: cli.log_level,
        queue_capacity: cli.queue_capacity,
    }))
}
