//! Exercises CONNECT tunnels end to end against a fake offshore that
//! answers the establishing handshake and echoes tunnel bytes uppercased,
//! proving frames round-trip in both directions and that an open tunnel
//! does not block other submissions on the same link.

use bytes::Bytes;
use shiplink::protocol::{self, read_frame, write_frame, FrameType, DEFAULT_MAX_FRAME_BYTES};
use shiplink::ship::{ingress, multiplexer, Link, Submission};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

/// A fake offshore that answers CONNECT with the establishing response and
/// echoes every subsequent `TUNNEL_DATA` chunk uppercased under the same
/// correlation id; plain (non-CONNECT) REQUEST frames get the same
/// uppercase-echo treatment as `tests/multiplexer.rs`'s fake offshore.
async fn spawn_fake_offshore() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        loop {
            match read_frame(&mut socket, DEFAULT_MAX_FRAME_BYTES).await {
                Ok((FrameType::Request, payload)) => {
                    let response: Bytes = if payload.starts_with(b"CONNECT") {
                        Bytes::from_static(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                    } else {
                        Bytes::from(payload.to_ascii_uppercase())
                    };
                    if write_frame(&mut socket, FrameType::Response, &response).await.is_err() {
                        break;
                    }
                }
                Ok((FrameType::TunnelData, payload)) => {
                    let Some((id, data)) = protocol::tunnel::untag(&payload) else { break };
                    let tagged = protocol::tunnel::tag(id, &data.to_ascii_uppercase());
                    if write_frame(&mut socket, FrameType::TunnelData, &tagged).await.is_err() {
                        break;
                    }
                }
                Ok((FrameType::TunnelClose, _)) => continue,
                _ => break,
            }
        }
    });

    port
}

#[tokio::test]
async fn tunnel_round_trips_and_does_not_block_other_submissions() {
    let port = spawn_fake_offshore().await;
    let link = Arc::new(Link::new("127.0.0.1".to_string(), port, 5, DEFAULT_MAX_FRAME_BYTES));
    link.ensure_connected().await.unwrap();

    let (handle, receiver) = multiplexer::channel(16);
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let worker = tokio::spawn(multiplexer::run_worker(link.clone(), receiver, shutdown.clone()));

    let (from_browser_tx, from_browser_rx) = mpsc::channel::<Bytes>(16);
    let (to_browser_tx, mut to_browser_rx) = mpsc::channel::<Bytes>(16);

    handle
        .submit(Submission::Connect {
            id: "tunnel-1".to_string(),
            target: "example.com:443".to_string(),
            request_bytes: Bytes::from_static(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n"),
            from_browser: from_browser_rx,
            to_browser: to_browser_tx,
        })
        .unwrap();

    let establish = to_browser_rx.recv().await.expect("establishing response");
    assert_eq!(&establish[..], b"HTTP/1.1 200 Connection Established\r\n\r\n");

    // While the tunnel is open, a plain exchange submitted on the same link
    // must still complete — proving the tunnel isn't monopolizing the
    // worker or the link for its lifetime.
    let (resp_tx, resp_rx) = oneshot::channel();
    handle
        .submit(Submission::Exchange {
            id: "concurrent".to_string(),
            method: "GET".to_string(),
            target: "http://example.com/".to_string(),
            request_bytes: Bytes::from_static(b"ping"),
            respond_to: resp_tx,
        })
        .unwrap();
    let response = tokio::time::timeout(Duration::from_secs(5), resp_rx)
        .await
        .expect("exchange did not complete while tunnel was open")
        .unwrap()
        .unwrap();
    assert_eq!(&response[..], b"PING");

    from_browser_tx.send(Bytes::from_static(b"hello")).await.unwrap();
    let echoed = tokio::time::timeout(Duration::from_secs(5), to_browser_rx.recv())
        .await
        .expect("tunnel data did not arrive")
        .expect("tunnel channel closed early");
    assert_eq!(&echoed[..], b"HELLO");

    drop(from_browser_tx);
    shutdown.notify_waiters();
    worker.await.unwrap();
}

#[tokio::test]
async fn connect_through_ingress_relays_bytes_end_to_end() {
    let offshore_port = spawn_fake_offshore().await;
    let link = Arc::new(Link::new("127.0.0.1".to_string(), offshore_port, 5, DEFAULT_MAX_FRAME_BYTES));
    link.ensure_connected().await.unwrap();

    let (handle, receiver) = multiplexer::channel(16);
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let worker = tokio::spawn(multiplexer::run_worker(link.clone(), receiver, shutdown.clone()));

    let ingress_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let ingress_port = ingress_listener.local_addr().unwrap().port();
    drop(ingress_listener);
    let ingress_shutdown = shutdown.clone();
    let ingress_task = tokio::spawn(ingress::run(
        ingress_port,
        handle,
        Duration::from_secs(5),
        ingress_shutdown,
    ));

    // Give the listener a moment to bind before the browser connects.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut browser = TcpStream::connect(("127.0.0.1", ingress_port)).await.unwrap();
    browser
        .write_all(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
        .await
        .unwrap();

    let mut establish_buf = vec![0u8; 128];
    let n = browser.read(&mut establish_buf).await.unwrap();
    assert_eq!(&establish_buf[..n], b"HTTP/1.1 200 Connection Established\r\n\r\n");

    browser.write_all(b"relay me").await.unwrap();
    let mut echo_buf = vec![0u8; 64];
    let n = browser.read(&mut echo_buf).await.unwrap();
    assert_eq!(&echo_buf[..n], b"RELAY ME");

    drop(browser);
    shutdown.notify_waiters();
    ingress_task.abort();
    worker.await.unwrap();
}
