use crate::config::OffshoreConfig;
use crate::metrics::Metrics;
use crate::offshore::egress;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// CLI arguments forwarded from `main()`. The `Some` overrides win over both
/// the config file and the environment, matching spec.md §6's CLI/env table.
#[derive(Default)]
pub struct BootstrapArgs {
    pub config_path: Option<std::path::PathBuf>,
    pub bind_host: Option<String>,
    pub bind_port: Option<u16>,
    pub insecure_skip_tls_verify: bool,
}

/// Offshore lifecycle: init → build origin client → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    let mut config = OffshoreConfig::load(args.config_path.as_deref())?;
    if let Some(v) = args.bind_host {
        config.bind_host = v;
    }
    if let Some(v) = args.bind_port {
        config.bind_port = v;
    }
    if args.insecure_skip_tls_verify {
        config.insecure_skip_tls_verify = true;
    }
    config.validate()?;
    crate::server::init_tracing(&config.log_level);

    let metrics = Metrics::install();

    if config.insecure_skip_tls_verify {
        tracing::warn!("origin TLS certificate verification is DISABLED (insecure_skip_tls_verify)");
    }

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
        .timeout(Duration::from_secs(config.origin_timeout_secs))
        .build()?;

    let shutdown = Arc::new(Notify::new());

    let bind_addr: std::net::SocketAddr = format!("{}:{}", config.bind_host, config.bind_port).parse()?;
    let egress_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        let origin_timeout = Duration::from_secs(config.origin_timeout_secs);
        let max_frame_bytes = config.max_frame_bytes;
        egress::run(bind_addr, client, origin_timeout, max_frame_bytes, shutdown)
    });

    let admin_addr: std::net::SocketAddr = ([0, 0, 0, 0], config.admin_port).into();
    let admin_handle = tokio::spawn({
        let metrics = metrics.clone();
        let shutdown = shutdown.clone();
        async move { crate::server::run_admin_server(admin_addr, metrics, shutdown).await }
    });

    tracing::info!(%bind_addr, "offshore ready");

    crate::server::wait_for_shutdown(&shutdown).await;

    tracing::info!("offshore: draining");
    if let Err(e) = egress_handle.await {
        tracing::error!(error = %e, "egress task panicked");
    }
    admin_handle.abort();

    tracing::info!("offshore: shutdown complete");
    Ok(())
}
