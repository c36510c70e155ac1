use crate::config::ShipConfig;
use crate::metrics::Metrics;
use crate::ship::{ingress, link::Link, multiplexer};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// CLI arguments forwarded from `main()`. The `Some` overrides win over both
/// the config file and the environment, matching spec.md §6's CLI/env table.
#[derive(Default)]
pub struct BootstrapArgs {
    pub config_path: Option<std::path::PathBuf>,
    pub offshore_host: Option<String>,
    pub offshore_port: Option<u16>,
    pub listen_port: Option<u16>,
    pub log_level: Option<String>,
    pub queue_capacity: Option<usize>,
}

/// Ship lifecycle: init → connect → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    let mut config = ShipConfig::load(args.config_path.as_deref())?;
    if let Some(v) = args.offshore_host {
        config.offshore_host = v;
    }
    if let Some(v) = args.offshore_port {
        config.offshore_port = v;
    }
    if let Some(v) = args.listen_port {
        config.listen_port = v;
    }
    if let Some(v) = args.log_level {
        config.log_level = v;
    }
    if let Some(v) = args.queue_capacity {
        config.queue_capacity = v;
    }
    config.validate()?;
    crate::server::init_tracing(&config.log_level);

    let metrics = Metrics::install();

    let link = Arc::new(Link::new(
        config.offshore_host.clone(),
        config.offshore_port,
        config.max_reconnect_attempts,
        config.max_frame_bytes,
    ));

    tracing::info!(host = %link.host(), port = link.port(), "dialling offshore link");
    link.ensure_connected().await?;

    let (handle, receiver) = multiplexer::channel(config.queue_capacity);
    let shutdown = Arc::new(Notify::new());

    let worker_handle = tokio::spawn({
        let link = link.clone();
        let shutdown = shutdown.clone();
        multiplexer::run_worker(link, receiver, shutdown)
    });

    let admin_addr: std::net::SocketAddr = ([0, 0, 0, 0], config.admin_port).into();
    let admin_handle = tokio::spawn({
        let metrics = metrics.clone();
        let shutdown = shutdown.clone();
        async move { crate::server::run_admin_server(admin_addr, metrics, shutdown).await }
    });

    let ingress_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        let submission_timeout = Duration::from_secs(config.submission_timeout_secs);
        ingress::run(config.listen_port, handle, submission_timeout, shutdown)
    });

    tracing::info!(listen_port = config.listen_port, "ship ready");

    crate::server::wait_for_shutdown(&shutdown).await;

    tracing::info!("ship: draining");
    if let Err(e) = ingress_handle.await {
        tracing::error!(error = %e, "ingress task panicked");
    }
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "multiplexer worker task panicked");
    }
    admin_handle.abort();
    link.invalidate().await;

    tracing::info!("ship: shutdown complete");
    Ok(())
}
