use crate::offshore::request;
use crate::offshore::tunnel::{self, TunnelRegistry};
use crate::protocol::{self, read_frame, write_frame, FrameType};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// Accepts the ship's single long-lived link connection and services
/// whatever frames arrive on it. Hermes' gateway egress accepts many short
/// downstream connections; this egress accepts one connection per ship and
/// keeps it open for the process lifetime, reconnecting only when the ship
/// tears its end down (spec.md §4.2, §4.6).
pub async fn run(
    bind_addr: SocketAddr,
    client: reqwest::Client,
    origin_timeout: Duration,
    max_frame_bytes: u32,
    shutdown: Arc<Notify>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "egress listener bound");

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                tracing::info!("egress: stop accepting new links");
                break;
            }
        };

        let (stream, peer) = match accepted {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "egress: accept failed");
                continue;
            }
        };

        let _ = stream.set_nodelay(true);
        tracing::info!(%peer, "ship link accepted");

        let client = client.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_link(stream, client, origin_timeout, max_frame_bytes, shutdown).await {
                tracing::debug!(%peer, error = %e, "egress: link ended with error");
            }
            tracing::info!(%peer, "ship link closed");
        });
    }

    Ok(())
}

/// Services one ship link: reads frames in a loop, answering REQUEST with a
/// RESPONSE and demultiplexing TUNNEL_DATA/TUNNEL_CLOSE by correlation id.
/// A CONNECT REQUEST only occupies this loop for the dial + establishing
/// handshake (`tunnel::establish` spawns the ongoing relay and returns), so
/// one open tunnel never blocks the rest of the link's traffic — the same
/// non-monopolizing design as `ship::link` (SPEC_FULL.md §D.1).
async fn handle_link(
    stream: TcpStream,
    client: reqwest::Client,
    origin_timeout: Duration,
    max_frame_bytes: u32,
    shutdown: Arc<Notify>,
) -> anyhow::Result<()> {
    let (mut read_half, write_half) = stream.into_split();
    let writer = Arc::new(tokio::sync::Mutex::new(write_half));
    let tunnels: TunnelRegistry = Arc::new(StdMutex::new(HashMap::new()));
    let mut next_tunnel_id: u32 = 0;

    loop {
        let frame = tokio::select! {
            result = read_frame(&mut read_half, max_frame_bytes) => result,
            _ = shutdown.notified() => {
                tracing::info!("egress: shutdown observed, closing link");
                return Ok(());
            }
        };

        let (frame_type, payload) = match frame {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "egress: link read ended");
                return Ok(());
            }
        };

        match frame_type {
            FrameType::Request => {
                if let Some(target) = connect_target(&payload) {
                    let tunnel_id = next_tunnel_id;
                    next_tunnel_id += 1;
                    tunnel::establish(&target, tunnel_id, writer.clone(), tunnels.clone()).await;
                    continue;
                }

                let response = request::process_request(&payload, &client, origin_timeout).await;
                let mut w = writer.lock().await;
                if let Err(e) = write_frame(&mut w, FrameType::Response, &response).await {
                    tracing::warn!(error = %e, "egress: failed to write response frame");
                    return Ok(());
                }
            }
            FrameType::TunnelData => match protocol::tunnel::untag(&payload) {
                Some((id, data)) => tunnel::dispatch_data(&tunnels, id, data).await,
                None => {
                    tracing::error!("egress: malformed TUNNEL_DATA tag, tearing down link");
                    return Ok(());
                }
            },
            FrameType::TunnelClose => match protocol::tunnel::untag(&payload) {
                Some((id, _)) => {
                    tunnels.lock().unwrap().remove(&id);
                }
                None => {
                    tracing::error!("egress: malformed TUNNEL_CLOSE tag, tearing down link");
                    return Ok(());
                }
            },
            other => {
                tracing::error!(frame_type = %other, "egress: unexpected frame type on link, tearing down");
                return Ok(());
            }
        }
    }
}

/// Returns the `host:port` authority if `raw` is a CONNECT request line,
/// without fully parsing the rest of the request.
fn connect_target(raw: &[u8]) -> Option<String> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    let _ = req.parse(raw).ok()?;
    let method = req.method?;
    if !method.eq_ignore_ascii_case("CONNECT") {
        return None;
    }
    req.path.map(|p| p.to_string())
}
