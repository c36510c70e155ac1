use crate::error::SubmissionError;
use crate::ship::link::Link;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// One browser-originated exchange awaiting its turn on the link, or a
/// CONNECT request that will become a tunnel once established. `method` and
/// `target` are carried through purely for the single access-log line the
/// worker emits once the exchange completes (SPEC_FULL.md §B.2) — they have
/// no wire significance, the same way `id` doesn't.
pub enum Submission {
    Exchange {
        id: String,
        method: String,
        target: String,
        request_bytes: Bytes,
        respond_to: oneshot::Sender<Result<Bytes, SubmissionError>>,
    },
    Connect {
        id: String,
        target: String,
        request_bytes: Bytes,
        /// Bytes read from the browser, to be relayed onto the link as
        /// `TUNNEL_DATA` frames once the tunnel is established. Dropping
        /// the sender half (browser socket closed) signals `TUNNEL_CLOSE`.
        from_browser: mpsc::Receiver<Bytes>,
        /// The establishing RESPONSE payload arrives as this channel's
        /// first message; every message after that is a `TUNNEL_DATA`
        /// chunk relayed back from the link.
        to_browser: mpsc::Sender<Bytes>,
    },
}

impl Submission {
    fn id(&self) -> &str {
        match self {
            Submission::Exchange { id, .. } => id,
            Submission::Connect { id, .. } => id,
        }
    }
}

/// The bounded, multi-producer single-consumer handle ingress tasks submit
/// through. `submit()` never blocks: a full queue is reported immediately
/// (REDESIGN FLAG 3) so the ingress listener can answer `503` instead of
/// growing memory without bound.
#[derive(Clone)]
pub struct MultiplexerHandle {
    sender: mpsc::Sender<Submission>,
}

impl MultiplexerHandle {
    pub fn submit(&self, submission: Submission) -> Result<(), SubmissionError> {
        let result = self.sender.try_send(submission).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                metrics::counter!("shiplink_submissions_rejected_total").increment(1);
                SubmissionError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => SubmissionError::LinkUnavailable,
        });
        metrics::gauge!("shiplink_queue_depth").set((self.sender.max_capacity() - self.sender.capacity()) as f64);
        result
    }
}

/// Builds the bounded channel and returns the producer-facing handle plus
/// the receiver the worker loop drains.
pub fn channel(capacity: usize) -> (MultiplexerHandle, mpsc::Receiver<Submission>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (MultiplexerHandle { sender }, receiver)
}

/// The single long-running task that drains submissions in strict FIFO
/// order and is the only party that ever writes a REQUEST frame or waits on
/// a RESPONSE (ordering alone pairs the two, per spec.md §4.3 — no
/// correlation IDs needed there). A CONNECT submission only occupies the
/// worker for its establishing handshake: `Link::open_tunnel` returns as
/// soon as the tunnel is registered, so the worker moves straight on to the
/// next submission instead of blocking for the tunnel's lifetime. The
/// tunnel's own traffic is demultiplexed by correlation id on the link
/// itself (SPEC_FULL.md §D.1), not the worker loop.
pub async fn run_worker(link: Arc<Link>, mut receiver: mpsc::Receiver<Submission>, shutdown: Arc<tokio::sync::Notify>) {
    loop {
        let submission = tokio::select! {
            biased;
            _ = shutdown.notified() => {
                tracing::info!("multiplexer: shutdown observed, worker exiting");
                break;
            }
            next = receiver.recv() => match next {
                Some(s) => s,
                None => {
                    tracing::info!("multiplexer: submission channel closed, worker exiting");
                    break;
                }
            },
        };

        let id = submission.id().to_string();
        let started = Instant::now();
        metrics::counter!("shiplink_submissions_total").increment(1);
        metrics::gauge!("shiplink_queue_depth").set(receiver.len() as f64);

        match submission {
            Submission::Exchange { method, target, request_bytes, respond_to, .. } => {
                let outcome = link.perform_exchange(&request_bytes).await;
                log_access(&id, &method, &target, started, &outcome);
                let _ = respond_to.send(outcome);
            }
            Submission::Connect { target, request_bytes, from_browser, to_browser, .. } => {
                // Logs only the establishing handshake's outcome/latency; the
                // tunnel's own close is logged separately once its traffic
                // finishes (ship::link's relay task), since that can happen
                // long after the worker has moved on to other submissions.
                let outcome = link.open_tunnel(&request_bytes, from_browser, to_browser).await;
                log_tunnel_access(&id, &target, started, &outcome);
            }
        }
    }
}

/// One `tracing::info!` "access" line per completed exchange: method,
/// target, the real response status (parsed from the RESPONSE payload's
/// status line) or the failure outcome, and latency (SPEC_FULL.md §B.2,
/// grounded on `hermes-gateway`'s `phase_log`).
fn log_access(id: &str, method: &str, target: &str, started: Instant, outcome: &Result<Bytes, SubmissionError>) {
    let elapsed = started.elapsed();
    metrics::histogram!("shiplink_exchange_duration_seconds").record(elapsed.as_secs_f64());
    match outcome {
        Ok(payload) => {
            let status = parse_status_line(payload);
            tracing::info!(
                id = %id,
                method = %method,
                target = %target,
                status = status.unwrap_or(0),
                bytes = payload.len(),
                latency_ms = elapsed.as_millis() as u64,
                "access"
            );
        }
        Err(e) => {
            tracing::warn!(
                id = %id,
                method = %method,
                target = %target,
                outcome = %e,
                latency_ms = elapsed.as_millis() as u64,
                "access"
            );
        }
    }
}

fn log_tunnel_access(id: &str, target: &str, started: Instant, outcome: &Result<(), SubmissionError>) {
    let elapsed = started.elapsed();
    metrics::histogram!("shiplink_exchange_duration_seconds").record(elapsed.as_secs_f64());
    match outcome {
        Ok(()) => tracing::info!(
            id = %id,
            method = "CONNECT",
            target = %target,
            latency_ms = elapsed.as_millis() as u64,
            "access"
        ),
        Err(e) => tracing::warn!(
            id = %id,
            method = "CONNECT",
            target = %target,
            outcome = %e,
            latency_ms = elapsed.as_millis() as u64,
            "access"
        ),
    }
}

/// Extracts the numeric status code from a RESPONSE payload's status line
/// (`HTTP/1.1 200 OK\r\n...`) purely for the access log — the body is never
/// otherwise parsed on the ship side.
fn parse_status_line(payload: &[u8]) -> Option<u16> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut resp = httparse::Response::new(&mut headers);
    let _ = resp.parse(payload).ok()?;
    resp.code
}
