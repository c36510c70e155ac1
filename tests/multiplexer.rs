//! Exercises the ship-side submission path against a fake offshore: a bare
//! `TcpListener` that speaks the framed protocol but has no real origin
//! behind it. No Docker, no real offshore process required.

use bytes::Bytes;
use shiplink::protocol::{read_frame, write_frame, FrameType, DEFAULT_MAX_FRAME_BYTES};
use shiplink::ship::{multiplexer, Link, Submission};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Spawns a fake offshore that answers every REQUEST frame with a RESPONSE
/// frame containing the same payload, uppercased — enough to prove FIFO
/// pairing without needing a real HTTP origin.
async fn spawn_fake_offshore() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        loop {
            match read_frame(&mut socket, DEFAULT_MAX_FRAME_BYTES).await {
                Ok((FrameType::Request, payload)) => {
                    let upper = payload.to_ascii_uppercase();
                    if write_frame(&mut socket, FrameType::Response, &upper).await.is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }
    });

    port
}

#[tokio::test]
async fn exchanges_complete_in_submission_order() {
    let port = spawn_fake_offshore().await;
    let link = Arc::new(Link::new("127.0.0.1".to_string(), port, 5, DEFAULT_MAX_FRAME_BYTES));
    link.ensure_connected().await.unwrap();

    let (handle, receiver) = multiplexer::channel(16);
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let worker = tokio::spawn(multiplexer::run_worker(link.clone(), receiver, shutdown.clone()));

    let mut receivers = Vec::new();
    for payload in ["first", "second", "third"] {
        let (tx, rx) = oneshot::channel();
        handle
            .submit(Submission::Exchange {
                id: payload.to_string(),
                method: "GET".to_string(),
                target: "http://example.com/".to_string(),
                request_bytes: Bytes::from(payload),
                respond_to: tx,
            })
            .unwrap();
        receivers.push((payload, rx));
    }

    for (payload, rx) in receivers {
        let response = rx.await.unwrap().unwrap();
        assert_eq!(response, Bytes::from(payload.to_ascii_uppercase()));
    }

    shutdown.notify_waiters();
    worker.await.unwrap();
}

#[tokio::test]
async fn full_queue_rejects_new_submissions_immediately() {
    let (handle, _receiver) = multiplexer::channel(1);

    let (tx1, _rx1) = oneshot::channel();
    handle
        .submit(Submission::Exchange {
            id: "a".to_string(),
            method: "GET".to_string(),
            target: "http://example.com/a".to_string(),
            request_bytes: Bytes::from_static(b"a"),
            respond_to: tx1,
        })
        .expect("first submission fits in the queue");

    let (tx2, _rx2) = oneshot::channel();
    let err = handle
        .submit(Submission::Exchange {
            id: "b".to_string(),
            method: "GET".to_string(),
            target: "http://example.com/b".to_string(),
            request_bytes: Bytes::from_static(b"b"),
            respond_to: tx2,
        })
        .expect_err("second submission should be rejected while the queue is full and undrained");

    assert_eq!(err, shiplink::error::SubmissionError::QueueFull);
}
