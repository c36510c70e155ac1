use crate::protocol::{self, read_frame, write_frame, FrameType};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

const RELAY_BUFFER_BYTES: usize = 16 * 1024;
const TUNNEL_CHANNEL_CAPACITY: usize = 64;

pub type TunnelRegistry = Arc<StdMutex<HashMap<u32, mpsc::Sender<Bytes>>>>;
pub type ShipWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Handles one CONNECT REQUEST: dials the real origin, writes the
/// establishing RESPONSE frame back onto the ship link, and — only if the
/// dial succeeded — registers the tunnel under `tunnel_id` and spawns the
/// background relay that forwards bytes in both directions as tagged
/// `TUNNEL_DATA` frames (spec.md §4.6, SPEC_FULL.md Open Question 1).
///
/// Unlike the original design this does not consume the ship socket: the
/// establishing handshake and the tunnel's ongoing traffic share `writer`
/// with every other REQUEST/RESPONSE exchange and any other open tunnel, so
/// one long-lived tunnel never blocks the rest of the link (spec.md §1,
/// §8.3, §9).
pub async fn establish(target: &str, tunnel_id: u32, writer: ShipWriter, tunnels: TunnelRegistry) {
    let origin = match TcpStream::connect(target).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%target, error = %e, "tunnel: origin dial failed");
            metrics::counter!("shiplink_origin_errors_total").increment(1);
            let body = b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
            let mut w = writer.lock().await;
            let _ = write_frame(&mut w, FrameType::Response, body).await;
            return;
        }
    };
    let _ = origin.set_nodelay(true);

    {
        let mut w = writer.lock().await;
        if write_frame(&mut w, FrameType::Response, b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await
            .is_err()
        {
            tracing::warn!(%target, "tunnel: failed to write establishing response");
            return;
        }
    }

    let (tx, rx) = mpsc::channel::<Bytes>(TUNNEL_CHANNEL_CAPACITY);
    tunnels.lock().unwrap().insert(tunnel_id, tx);

    metrics::gauge!("shiplink_tunnels_active").increment(1.0);
    metrics::counter!("shiplink_tunnels_opened_total").increment(1);
    tracing::info!(%target, tunnel_id, "tunnel established");

    let (origin_read, origin_write) = origin.into_split();
    tokio::spawn(run_tunnel_session(
        tunnel_id,
        target.to_string(),
        origin_read,
        origin_write,
        rx,
        writer,
        tunnels,
    ));
}

/// Looks up `tunnel_id` in the registry and forwards a `TUNNEL_DATA` chunk
/// read off the ship link into that tunnel's browser-to-origin channel.
pub async fn dispatch_data(tunnels: &StdMutex<HashMap<u32, mpsc::Sender<Bytes>>>, id: u32, data: Bytes) {
    let sender = { tunnels.lock().unwrap().get(&id).cloned() };
    match sender {
        Some(sender) => {
            let _ = sender.send(data).await;
        }
        None => tracing::debug!(tunnel_id = id, "tunnel: TUNNEL_DATA for unknown/closed tunnel"),
    }
}

async fn run_tunnel_session(
    tunnel_id: u32,
    target: String,
    origin_read: OwnedReadHalf,
    origin_write: OwnedWriteHalf,
    from_ship: mpsc::Receiver<Bytes>,
    writer: ShipWriter,
    tunnels: TunnelRegistry,
) {
    let to_origin = tokio::spawn(relay_ship_to_origin(from_ship, origin_write));
    let to_ship = tokio::spawn(relay_origin_to_ship(origin_read, writer, tunnel_id));

    tokio::select! {
        _ = to_origin => { to_ship.abort(); }
        _ = to_ship => { to_origin.abort(); }
    }

    tunnels.lock().unwrap().remove(&tunnel_id);
    metrics::gauge!("shiplink_tunnels_active").decrement(1.0);
    tracing::info!(%target, tunnel_id, "tunnel closed");
}

async fn relay_ship_to_origin(mut from_ship: mpsc::Receiver<Bytes>, mut origin_write: OwnedWriteHalf) {
    while let Some(chunk) = from_ship.recv().await {
        if origin_write.write_all(&chunk).await.is_err() {
            break;
        }
    }
    let _ = origin_write.shutdown().await;
}

async fn relay_origin_to_ship(mut origin_read: OwnedReadHalf, writer: ShipWriter, tunnel_id: u32) {
    let mut buf = vec![0u8; RELAY_BUFFER_BYTES];
    loop {
        match origin_read.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                metrics::counter!("shiplink_tunnel_bytes_total").increment(n as u64);
                let tagged = protocol::tunnel::tag(tunnel_id, &buf[..n]);
                let mut w = writer.lock().await;
                if write_frame(&mut w, FrameType::TunnelData, &tagged).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    let tagged = protocol::tunnel::tag(tunnel_id, &[]);
    let mut w = writer.lock().await;
    let _ = write_frame(&mut w, FrameType::TunnelClose, &tagged).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_frame, DEFAULT_MAX_FRAME_BYTES};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn establish_relays_bytes_both_directions_and_cleans_up() {
        let origin_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let origin_addr = origin_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = origin_listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            loop {
                match sock.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let upper = buf[..n].to_ascii_uppercase();
                        if sock.write_all(&upper).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // A loopback pair stands in for the ship link's socket: `establish`
        // writes RESPONSE/TUNNEL_DATA/TUNNEL_CLOSE frames onto one end, and
        // the test reads them off the other.
        let ship_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let ship_addr = ship_listener.local_addr().unwrap();
        let connect_task = tokio::spawn(TcpStream::connect(ship_addr));
        let (offshore_side, _) = ship_listener.accept().await.unwrap();
        let mut ship_test_end = connect_task.await.unwrap().unwrap();

        let (_unused_read, write_half) = offshore_side.into_split();
        let writer: ShipWriter = Arc::new(Mutex::new(write_half));
        let tunnels: TunnelRegistry = Arc::new(StdMutex::new(HashMap::new()));

        establish(&origin_addr.to_string(), 7, writer.clone(), tunnels.clone()).await;

        let (ty, payload) = read_frame(&mut ship_test_end, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        assert_eq!(ty, FrameType::Response);
        assert_eq!(&payload[..], b"HTTP/1.1 200 Connection Established\r\n\r\n");

        let sender = tunnels
            .lock()
            .unwrap()
            .get(&7)
            .cloned()
            .expect("tunnel registered after establish");
        sender.send(Bytes::from_static(b"hello")).await.unwrap();

        let (ty, payload) = read_frame(&mut ship_test_end, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        assert_eq!(ty, FrameType::TunnelData);
        let (id, data) = protocol::tunnel::untag(&payload).unwrap();
        assert_eq!(id, 7);
        assert_eq!(&data[..], b"HELLO");

        drop(sender);
        tunnels.lock().unwrap().remove(&7);

        let (ty, payload) = read_frame(&mut ship_test_end, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        assert_eq!(ty, FrameType::TunnelClose);
        let (id, _) = protocol::tunnel::untag(&payload).unwrap();
        assert_eq!(id, 7);
    }

    #[tokio::test]
    async fn establish_writes_bad_gateway_when_origin_dial_fails() {
        let ship_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let ship_addr = ship_listener.local_addr().unwrap();
        let connect_task = tokio::spawn(TcpStream::connect(ship_addr));
        let (offshore_side, _) = ship_listener.accept().await.unwrap();
        let mut ship_test_end = connect_task.await.unwrap().unwrap();

        let (_unused_read, write_half) = offshore_side.into_split();
        let writer: ShipWriter = Arc::new(Mutex::new(write_half));
        let tunnels: TunnelRegistry = Arc::new(StdMutex::new(HashMap::new()));

        // Port 0 on a connected socket never accepts; pick an address with
        // nothing listening instead to force a dial failure deterministically.
        let dead_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let dead_addr = dead_listener.local_addr().unwrap();
        drop(dead_listener);

        establish(&dead_addr.to_string(), 3, writer.clone(), tunnels.clone()).await;

        let (ty, payload) = read_frame(&mut ship_test_end, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        assert_eq!(ty, FrameType::Response);
        assert!(payload.starts_with(b"HTTP/1.1 502"));
        assert!(tunnels.lock().unwrap().get(&3).is_none());
    }
}
