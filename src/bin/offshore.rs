#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use shiplink::offshore::bootstrap::{self, BootstrapArgs};
use shiplink::runtime;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "offshore", about = "Remote-side origin fetcher for the shiplink proxy")]
struct Cli {
    /// Path to a TOML or JSON config file; built-in defaults apply if absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address for the ship link listener.
    #[arg(long, env = "OFFSHORE_HOST")]
    bind_host: Option<String>,

    /// Bind port for the ship link listener.
    #[arg(long, env = "OFFSHORE_PORT")]
    bind_port: Option<u16>,

    /// Disable TLS certificate verification on origin fetches (SPEC_FULL.md
    /// Open Question 2). Off by default; opt in explicitly.
    #[arg(long, env = "OFFSHORE_INSECURE_TLS")]
    insecure_skip_tls_verify: bool,
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
        bind_host: cli.bind_host,
        bind_port: cli.bind_port,
        insecure_skip_tls_verify: cli.insecure_skip_tls_verify,
    }))
}
