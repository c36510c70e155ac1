//! Ambient process plumbing shared by both binaries: structured logging
//! setup, the minimal admin HTTP server (`/healthz`, `/metrics`), and the
//! signal-driven shutdown coordinator. Neither binary keeps this state in a
//! global/static — it is built once in `bootstrap::run` and threaded through
//! explicitly (REDESIGN FLAG 1).

pub mod admin;

use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber: JSON lines over a non-blocking
/// writer, filtered by `log_level` unless `RUST_LOG` is set. Call once,
/// at the very top of each binary's `main`.
pub fn init_tracing(log_level: &str) {
    let (non_blocking, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_lowercase()));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    // The non-blocking writer's worker thread must outlive `main`; this
    // process never uninstalls the subscriber, so leaking the guard is fine.
    std::mem::forget(guard);
}

/// Wait for SIGINT or SIGTERM, then notify `shutdown`'s waiters. Both
/// binaries race this against their own accept loops.
pub async fn wait_for_shutdown(shutdown: &Arc<tokio::sync::Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}

/// Run the minimal admin server: `/healthz` and `/metrics`. Shared by ship
/// and offshore — neither needs anything richer than this.
pub async fn run_admin_server(
    bind_addr: std::net::SocketAddr,
    metrics: crate::metrics::Metrics,
    shutdown: Arc<tokio::sync::Notify>,
) -> anyhow::Result<()> {
    use hyper::service::service_fn;
    use hyper::Request;
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use hyper_util::server::conn::auto;
    use tokio::net::TcpListener;

    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "admin server listening");

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                tracing::info!("admin server: shutting down");
                break;
            }
        };

        let (stream, _) = match accepted {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "admin server: accept failed");
                continue;
            }
        };

        let metrics = metrics.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<hyper::body::Incoming>| {
                let metrics = metrics.clone();
                async move { admin::handle_admin(req, metrics) }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    tracing::error!(error = %e, "admin server: connection error");
                }
            }
        });
    }

    Ok(())
}
