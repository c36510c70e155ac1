use crate::error::SubmissionError;
use crate::ship::multiplexer::{MultiplexerHandle, Submission};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
const TUNNEL_CHANNEL_CAPACITY: usize = 64;

/// The only methods this proxy forwards (spec.md §4.4 step 1), matching the
/// original's `BaseHTTPRequestHandler`, which only ever registers `do_`
/// handlers for these eight verbs and answers anything else with 501.
const SUPPORTED_METHODS: [&str; 8] = ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "CONNECT"];

/// Accepts browser proxy connections on `listen_port` and hands each one a
/// dedicated task; none of these tasks ever touches the offshore socket
/// directly (spec.md §4.4).
pub async fn run(
    listen_port: u16,
    multiplexer: MultiplexerHandle,
    submission_timeout: Duration,
    shutdown: Arc<tokio::sync::Notify>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], listen_port).into();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "ingress listener bound");

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                tracing::info!("ingress: stop accepting new connections");
                break;
            }
        };

        let (stream, peer) = match accepted {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "ingress: accept failed");
                continue;
            }
        };

        metrics::counter!("shiplink_ingress_connections_total").increment(1);
        let multiplexer = multiplexer.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, multiplexer, submission_timeout).await {
                tracing::debug!(%peer, error = %e, "ingress: connection ended with error");
            }
        });
    }

    Ok(())
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    multiplexer: MultiplexerHandle,
    submission_timeout: Duration,
) -> anyhow::Result<()> {
    let id = format!("{peer}-{}", timestamp_ms());

    let parsed = match read_request(&mut stream).await {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "ingress: malformed request");
            write_status(&mut stream, 400, "Bad Request").await?;
            return Ok(());
        }
    };

    if !SUPPORTED_METHODS.contains(&parsed.method.as_str()) {
        tracing::debug!(%peer, method = %parsed.method, "ingress: unsupported method");
        write_status(&mut stream, 501, "Not Implemented").await?;
        return Ok(());
    }

    if parsed.method.eq_ignore_ascii_case("CONNECT") {
        return handle_connect(stream, id, parsed.target, parsed.raw, multiplexer, submission_timeout).await;
    }

    let (tx, rx) = oneshot::channel();
    let submit_result = multiplexer.submit(Submission::Exchange {
        id: id.clone(),
        method: parsed.method,
        target: parsed.target,
        request_bytes: Bytes::from(parsed.raw),
        respond_to: tx,
    });

    if let Err(e) = submit_result {
        write_error_for(&mut stream, e).await?;
        return Ok(());
    }

    match tokio::time::timeout(submission_timeout, rx).await {
        Ok(Ok(Ok(response_bytes))) => {
            stream.write_all(&response_bytes).await?;
            stream.flush().await?;
        }
        Ok(Ok(Err(e))) => write_error_for(&mut stream, e).await?,
        Ok(Err(_recv_error)) => write_status(&mut stream, 500, "Internal Server Error").await?,
        Err(_timeout) => write_status(&mut stream, 504, "Gateway Timeout").await?,
    }

    Ok(())
}

async fn handle_connect(
    mut stream: TcpStream,
    id: String,
    target: String,
    raw_request: Vec<u8>,
    multiplexer: MultiplexerHandle,
    submission_timeout: Duration,
) -> anyhow::Result<()> {
    let (browser_tx, browser_rx) = mpsc::channel::<Bytes>(TUNNEL_CHANNEL_CAPACITY);
    let (link_tx, mut link_rx) = mpsc::channel::<Bytes>(TUNNEL_CHANNEL_CAPACITY);

    let submit_result = multiplexer.submit(Submission::Connect {
        id: id.clone(),
        target,
        request_bytes: Bytes::from(raw_request),
        from_browser: browser_rx,
        to_browser: link_tx,
    });

    if let Err(e) = submit_result {
        write_error_for(&mut stream, e).await?;
        return Ok(());
    }

    let establish = match tokio::time::timeout(submission_timeout, link_rx.recv()).await {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            write_status(&mut stream, 502, "Bad Gateway").await?;
            return Ok(());
        }
        Err(_timeout) => {
            write_status(&mut stream, 504, "Gateway Timeout").await?;
            return Ok(());
        }
    };

    stream.write_all(&establish).await?;
    stream.flush().await?;

    let (mut browser_read, mut browser_write) = stream.into_split();

    let reader = tokio::spawn(async move {
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            match browser_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if browser_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(chunk) = link_rx.recv().await {
            if browser_write.write_all(&chunk).await.is_err() {
                break;
            }
        }
        let _ = browser_write.shutdown().await;
    });

    tokio::select! {
        _ = reader => { writer.abort(); }
        _ = writer => { /* reader task will end once the browser closes too */ }
    }

    Ok(())
}

struct ParsedRequest {
    method: String,
    target: String,
    raw: Vec<u8>,
}

/// Reads and parses the request line/headers, then reassembles the exact
/// raw bytes (request line + header block + body, bounded by
/// `Content-Length`) as the browser issued them (spec.md §4.4 step 2).
async fn read_request(stream: &mut TcpStream) -> anyhow::Result<ParsedRequest> {
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut tmp = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            anyhow::bail!("connection closed before request headers completed");
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.len() > MAX_HEADER_BYTES {
            anyhow::bail!("request headers too large");
        }
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = buf[..header_end].to_vec();
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(&head)? {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => anyhow::bail!("incomplete request headers"),
    }

    let method = req.method.ok_or_else(|| anyhow::anyhow!("missing method"))?.to_string();
    let target = req.path.ok_or_else(|| anyhow::anyhow!("missing target"))?.to_string();

    if method.eq_ignore_ascii_case("CONNECT") {
        return Ok(ParsedRequest { method, target, raw: buf });
    }

    let content_length = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    if content_length > MAX_BODY_BYTES {
        anyhow::bail!("request body too large: {content_length} bytes");
    }

    let mut body_so_far = buf.len() - header_end;
    while body_so_far < content_length {
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            anyhow::bail!("connection closed while reading request body");
        }
        buf.extend_from_slice(&tmp[..n]);
        body_so_far += n;
    }
    buf.truncate(header_end + content_length);

    Ok(ParsedRequest { method, target, raw: buf })
}

async fn write_error_for(stream: &mut TcpStream, err: SubmissionError) -> anyhow::Result<()> {
    let (status, reason) = match err {
        SubmissionError::LinkUnavailable => (502, "Bad Gateway"),
        SubmissionError::SendFailed => (502, "Bad Gateway"),
        SubmissionError::InvalidResponse => (502, "Bad Gateway"),
        SubmissionError::QueueFull => (503, "Service Unavailable"),
    };
    write_status(stream, status, reason).await
}

async fn write_status(stream: &mut TcpStream, status: u16, reason: &str) -> anyhow::Result<()> {
    let body = format!("{status} {reason}\n");
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Millisecond timestamp used purely to build a human-readable, log-only
/// submission id (`peer-timestamp_ms`), matching the original's
/// `f"{peer}-{timestamp_ms}"` correlation id (SPEC_FULL.md §B.1).
fn timestamp_ms() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0)
}
