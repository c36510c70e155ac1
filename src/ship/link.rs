use crate::error::{LinkError, SubmissionError};
use crate::protocol::{self, read_frame, write_frame, FrameError, FrameType};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Disconnected,
    Connected,
    Reconnecting,
}

struct LinkInner {
    write_half: Option<OwnedWriteHalf>,
    state: LinkState,
    attempt: u32,
    reader_task: Option<JoinHandle<()>>,
    next_tunnel_id: u32,
}

/// Demultiplexes frames the link's single reader task observes: a RESPONSE
/// always belongs to whichever exchange is currently awaiting one (only one
/// is ever outstanding, since the worker processes submissions one at a
/// time), while `TUNNEL_DATA`/`TUNNEL_CLOSE` frames are routed by the
/// correlation id `protocol::tunnel` tags them with, so an open tunnel's
/// traffic never has to wait for the worker to get back around to it.
struct Dispatch {
    pending_response: StdMutex<Option<oneshot::Sender<Bytes>>>,
    tunnels: StdMutex<HashMap<u32, mpsc::Sender<Bytes>>>,
}

impl Dispatch {
    fn new() -> Self {
        Self {
            pending_response: StdMutex::new(None),
            tunnels: StdMutex::new(HashMap::new()),
        }
    }

    fn set_pending(&self, tx: oneshot::Sender<Bytes>) {
        *self.pending_response.lock().unwrap() = Some(tx);
    }

    fn deliver_response(&self, payload: Bytes) {
        match self.pending_response.lock().unwrap().take() {
            Some(tx) => {
                let _ = tx.send(payload);
            }
            None => tracing::warn!("link reader: RESPONSE frame with no pending exchange, dropping"),
        }
    }

    fn register_tunnel(&self, id: u32, sender: mpsc::Sender<Bytes>) {
        self.tunnels.lock().unwrap().insert(id, sender);
    }

    fn deregister_tunnel(&self, id: u32) {
        self.tunnels.lock().unwrap().remove(&id);
    }

    async fn deliver_tunnel_data(&self, id: u32, data: Bytes) {
        let sender = { self.tunnels.lock().unwrap().get(&id).cloned() };
        match sender {
            Some(sender) => {
                if sender.send(data).await.is_err() {
                    self.deregister_tunnel(id);
                }
            }
            None => tracing::debug!(tunnel_id = id, "link reader: TUNNEL_DATA for unknown/closed tunnel"),
        }
    }

    /// The link just died: fail whoever is waiting on a response and drop
    /// every tunnel sender so the corresponding browser-side receivers
    /// observe closure instead of hanging forever.
    fn fail_all(&self) {
        self.pending_response.lock().unwrap().take();
        self.tunnels.lock().unwrap().clear();
    }
}

struct LinkShared {
    inner: Mutex<LinkInner>,
    dispatch: Dispatch,
}

/// Owns the single TCP connection to the offshore node. A tokio mutex guards
/// the write half and the `{Disconnected, Connected, Reconnecting}` state
/// machine so a state transition can never be observed mid-flight; reads are
/// owned exclusively by one background task per connection (`reader_loop`)
/// that demultiplexes incoming frames through `Dispatch` instead of each
/// caller doing its own read. This is what lets a CONNECT tunnel's ongoing
/// traffic interleave with other submissions rather than hold the link for
/// its full lifetime (spec.md §1, §8.3, §9).
pub struct Link {
    host: String,
    port: u16,
    max_reconnect_attempts: u32,
    max_frame_bytes: u32,
    shared: Arc<LinkShared>,
}

impl Link {
    pub fn new(host: impl Into<String>, port: u16, max_reconnect_attempts: u32, max_frame_bytes: u32) -> Self {
        Self {
            host: host.into(),
            port,
            max_reconnect_attempts,
            max_frame_bytes,
            shared: Arc::new(LinkShared {
                inner: Mutex::new(LinkInner {
                    write_half: None,
                    state: LinkState::Disconnected,
                    attempt: 0,
                    reader_task: None,
                    next_tunnel_id: 0,
                }),
                dispatch: Dispatch::new(),
            }),
        }
    }

    /// Idempotent. Dials with exponential backoff (`min(2^attempt, 10)s`) up
    /// to `max_reconnect_attempts` times, resetting the attempt counter on
    /// success and spawning a fresh reader task bound to the new socket.
    pub async fn ensure_connected(&self) -> Result<(), LinkError> {
        let mut inner = self.shared.inner.lock().await;
        self.dial_locked(&mut inner).await
    }

    async fn dial_locked(&self, inner: &mut LinkInner) -> Result<(), LinkError> {
        if inner.state == LinkState::Connected && inner.write_half.is_some() {
            return Ok(());
        }
        inner.state = LinkState::Reconnecting;

        loop {
            match TcpStream::connect((self.host.as_str(), self.port)).await {
                Ok(socket) => {
                    if let Err(e) = socket.set_nodelay(true) {
                        tracing::warn!(error = %e, "failed to set TCP_NODELAY on link socket");
                    }
                    let (read_half, write_half) = socket.into_split();
                    inner.write_half = Some(write_half);
                    inner.state = LinkState::Connected;
                    inner.attempt = 0;
                    inner.next_tunnel_id = 0;
                    if let Some(old) = inner.reader_task.take() {
                        old.abort();
                    }
                    inner.reader_task = Some(tokio::spawn(reader_loop(
                        read_half,
                        self.shared.clone(),
                        self.max_frame_bytes,
                    )));
                    metrics::gauge!("shiplink_link_connected").set(1.0);
                    tracing::info!(host = %self.host, port = self.port, "link connected");
                    return Ok(());
                }
                Err(source) => {
                    metrics::counter!("shiplink_reconnect_attempts_total").increment(1);
                    if inner.attempt >= self.max_reconnect_attempts {
                        inner.state = LinkState::Disconnected;
                        metrics::counter!("shiplink_reconnect_exhausted_total").increment(1);
                        tracing::error!(
                            attempts = inner.attempt,
                            error = %source,
                            "link reconnect exhausted"
                        );
                        return Err(LinkError::ReconnectExhausted {
                            attempts: inner.attempt,
                            source,
                        });
                    }
                    let backoff = Duration::from_secs(2u64.pow(inner.attempt).min(10));
                    tracing::warn!(
                        attempt = inner.attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %source,
                        "link dial failed, backing off"
                    );
                    inner.attempt += 1;
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Closes the current socket and transitions to `DISCONNECTED`. Safe to
    /// call concurrently and repeatedly.
    pub async fn invalidate(&self) {
        let mut inner = self.shared.inner.lock().await;
        invalidate_locked(&mut inner, &self.shared.dispatch);
    }

    /// Runs one full REQUEST/RESPONSE exchange (spec.md §4.3 worker steps
    /// 2-5). The write is serialized through the link's write half briefly;
    /// the response is delivered by the reader task via `Dispatch`, so this
    /// only ever blocks on its own response, never on anyone else's.
    pub async fn perform_exchange(&self, request_bytes: &[u8]) -> Result<Bytes, SubmissionError> {
        self.ensure_connected().await.map_err(|e| {
            tracing::warn!(error = %e, "exchange: link unavailable");
            SubmissionError::LinkUnavailable
        })?;

        let (tx, rx) = oneshot::channel();
        self.shared.dispatch.set_pending(tx);

        if self.write_request(request_bytes).await.is_err() {
            self.invalidate().await;
            if self.ensure_connected().await.is_err() {
                return Err(SubmissionError::SendFailed);
            }
            let (tx, rx) = oneshot::channel();
            self.shared.dispatch.set_pending(tx);
            if self.write_request(request_bytes).await.is_err() {
                return Err(SubmissionError::SendFailed);
            }
            metrics::counter!("shiplink_frames_sent_total").increment(1);
            return rx.await.map(Self::count_response).map_err(|_| {
                tracing::error!("exchange: link broken while awaiting response");
                SubmissionError::InvalidResponse
            });
        }
        metrics::counter!("shiplink_frames_sent_total").increment(1);

        rx.await.map(Self::count_response).map_err(|_| {
            tracing::error!("exchange: link broken while awaiting response");
            SubmissionError::InvalidResponse
        })
    }

    fn count_response(payload: Bytes) -> Bytes {
        metrics::counter!("shiplink_frames_received_total").increment(1);
        payload
    }

    async fn write_request(&self, request_bytes: &[u8]) -> Result<(), FrameError> {
        self.write_frame_locked(FrameType::Request, request_bytes).await
    }

    async fn write_frame_locked(&self, frame_type: FrameType, payload: &[u8]) -> Result<(), FrameError> {
        let mut inner = self.shared.inner.lock().await;
        let write_half = inner.write_half.as_mut().ok_or(FrameError::Eof)?;
        write_frame(write_half, frame_type, payload).await
    }

    /// Establishes a CONNECT tunnel: the handshake itself runs through
    /// `perform_exchange` like any other exchange (so it is still ordered
    /// FIFO with other submissions), but once the offshore side answers with
    /// the `200 Connection Established` RESPONSE this returns immediately
    /// instead of blocking for the tunnel's lifetime. The tunnel is
    /// registered under a fresh correlation id and a background task takes
    /// over relaying `from_browser` onto the link as tagged `TUNNEL_DATA`
    /// frames; the link's reader task demultiplexes the return traffic
    /// straight into `to_browser` (SPEC_FULL.md §D.1).
    pub async fn open_tunnel(
        &self,
        request_bytes: &[u8],
        from_browser: mpsc::Receiver<Bytes>,
        to_browser: mpsc::Sender<Bytes>,
    ) -> Result<(), SubmissionError> {
        let establish = self.perform_exchange(request_bytes).await?;
        let established = establish.starts_with(b"HTTP/1.1 200");

        if to_browser.send(establish).await.is_err() {
            // Browser already gave up; the establishing exchange itself
            // still succeeded on the wire, so there is nothing left to tear
            // down beyond letting the offshore side notice it has no reader.
            return Ok(());
        }

        if !established {
            // Offshore couldn't dial the real origin and answered with a
            // synthetic error response instead of establishing; it never
            // registered a tunnel id on its side, so neither do we.
            return Ok(());
        }

        let tunnel_id = {
            let mut inner = self.shared.inner.lock().await;
            let id = inner.next_tunnel_id;
            inner.next_tunnel_id += 1;
            id
        };

        self.shared.dispatch.register_tunnel(tunnel_id, to_browser);
        metrics::gauge!("shiplink_tunnels_active").increment(1.0);
        metrics::counter!("shiplink_tunnels_opened_total").increment(1);
        tracing::info!(tunnel_id, "tunnel established");

        tokio::spawn(relay_browser_to_link(self.shared.clone(), tunnel_id, from_browser));

        Ok(())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

fn invalidate_locked(inner: &mut LinkInner, dispatch: &Dispatch) {
    if let Some(task) = inner.reader_task.take() {
        task.abort();
    }
    inner.write_half = None;
    inner.state = LinkState::Disconnected;
    inner.next_tunnel_id = 0;
    dispatch.fail_all();
    metrics::gauge!("shiplink_link_connected").set(0.0);
}

async fn write_frame_via(shared: &LinkShared, frame_type: FrameType, payload: &[u8]) -> Result<(), FrameError> {
    let mut inner = shared.inner.lock().await;
    let write_half = inner.write_half.as_mut().ok_or(FrameError::Eof)?;
    write_frame(write_half, frame_type, payload).await
}

/// The single task that owns reading from the link socket, for as long as it
/// stays connected. Dispatches RESPONSE frames to whichever exchange is
/// waiting and TUNNEL_DATA/TUNNEL_CLOSE frames to the tunnel their
/// correlation id names, so none of those callers ever reads the socket
/// themselves.
async fn reader_loop(mut read_half: OwnedReadHalf, shared: Arc<LinkShared>, max_frame_bytes: u32) {
    loop {
        match read_frame(&mut read_half, max_frame_bytes).await {
            Ok((FrameType::Response, payload)) => shared.dispatch.deliver_response(payload),
            Ok((FrameType::TunnelData, payload)) => match protocol::tunnel::untag(&payload) {
                Some((id, data)) => {
                    metrics::counter!("shiplink_tunnel_bytes_total").increment(data.len() as u64);
                    shared.dispatch.deliver_tunnel_data(id, data).await;
                }
                None => {
                    tracing::error!("link reader: malformed TUNNEL_DATA frame, tearing down");
                    break;
                }
            },
            Ok((FrameType::TunnelClose, payload)) => match protocol::tunnel::untag(&payload) {
                Some((id, _)) => shared.dispatch.deregister_tunnel(id),
                None => {
                    tracing::error!("link reader: malformed TUNNEL_CLOSE frame, tearing down");
                    break;
                }
            },
            Ok((other, _)) => {
                tracing::error!(frame_type = %other, "link reader: unexpected frame type, tearing down");
                break;
            }
            Err(e) => {
                tracing::debug!(error = %e, "link reader: read ended");
                break;
            }
        }
    }

    let mut inner = shared.inner.lock().await;
    // The reader task is the one exiting; don't abort our own handle.
    inner.reader_task = None;
    inner.write_half = None;
    inner.state = LinkState::Disconnected;
    inner.next_tunnel_id = 0;
    shared.dispatch.fail_all();
    metrics::gauge!("shiplink_link_connected").set(0.0);
}

/// Drains bytes the browser sent, writing each chunk onto the link as a
/// tagged `TUNNEL_DATA` frame, until the browser side closes (or a write
/// fails), then sends a final tagged `TUNNEL_CLOSE` and deregisters the
/// tunnel. This is the only background task a tunnel needs on the ship
/// side — the opposite direction is handled inline by `reader_loop`.
async fn relay_browser_to_link(shared: Arc<LinkShared>, tunnel_id: u32, mut from_browser: mpsc::Receiver<Bytes>) {
    while let Some(chunk) = from_browser.recv().await {
        metrics::counter!("shiplink_tunnel_bytes_total").increment(chunk.len() as u64);
        let tagged = protocol::tunnel::tag(tunnel_id, &chunk);
        if write_frame_via(&shared, FrameType::TunnelData, &tagged).await.is_err() {
            break;
        }
    }
    let _ = write_frame_via(&shared, FrameType::TunnelClose, &protocol::tunnel::tag(tunnel_id, &[])).await;
    shared.dispatch.deregister_tunnel(tunnel_id);
    metrics::gauge!("shiplink_tunnels_active").decrement(1.0);
    tracing::info!(tunnel_id, "tunnel closed");
}
