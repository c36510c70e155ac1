use crate::error::ProcessError;
use bytes::Bytes;
use std::time::Duration;

/// Decomposed view of a received REQUEST payload (spec.md §3 "Parsed
/// request"). Headers are an ordered list, not a map, so duplicate headers
/// (`Set-Cookie`, `Via`, ...) survive for forwarding — SPEC_FULL.md Open
/// Question 4. Call sites that need one logical value scan for the last
/// matching entry, which gives last-value-wins semantics without
/// discarding the rest.
struct ParsedRequest {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

fn header_value_last<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter().rev().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
}

fn is_hop_by_hop(name: &str) -> bool {
    name.eq_ignore_ascii_case("proxy-connection") || name.eq_ignore_ascii_case("proxy-authorization")
}

fn parse_request(raw: &[u8]) -> Result<ParsedRequest, ProcessError> {
    let mut header_slots = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut header_slots);
    let header_end = match req.parse(raw) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Err(ProcessError::MalformedRequest("incomplete request headers".into())),
        Err(e) => return Err(ProcessError::MalformedRequest(e.to_string())),
    };

    let method = req.method.ok_or_else(|| ProcessError::MalformedRequest("missing method".into()))?.to_string();
    let target = req.path.ok_or_else(|| ProcessError::MalformedRequest("missing target".into()))?.to_string();

    let headers: Vec<(String, String)> = req
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();

    let body = Bytes::copy_from_slice(&raw[header_end..]);

    Ok(ParsedRequest { method, target, headers, body })
}

/// Normalizes a proxy request-target into an absolute URL (spec.md §4.6
/// step 3): already-absolute targets pass through, origin-form (`/...`) is
/// illegal for a proxy request, anything else falls back to an assumed
/// `http://` scheme.
fn normalize_target(target: &str) -> Result<String, ProcessError> {
    if target.starts_with("http://") || target.starts_with("https://") {
        return Ok(target.to_string());
    }
    if target.starts_with('/') {
        return Err(ProcessError::IllegalTarget(format!("origin-form target not allowed in proxy request: {target}")));
    }
    Ok(format!("http://{target}"))
}

/// Processes one REQUEST payload end to end and always produces response
/// bytes — origin-side failures are synthesized as HTTP responses, never
/// surfaced as a transport error, so the ship's multiplexer always gets a
/// RESPONSE frame for the REQUEST it sent (spec.md §4.6, §7). Emits exactly
/// one `tracing::info!`/`tracing::warn!` "access" line per call, carrying
/// method, target, the produced status, and latency (SPEC_FULL.md §B.2,
/// grounded on `hermes-gateway`'s `phase_log`).
pub async fn process_request(raw: &[u8], client: &reqwest::Client, origin_timeout: Duration) -> Bytes {
    let started = std::time::Instant::now();

    let parsed = match parse_request(raw) {
        Ok(p) => p,
        Err(e) => {
            metrics::counter!("shiplink_origin_errors_total").increment(1);
            let response = synthetic_response(400, "Bad Request", &e.to_string());
            log_access(&started, "?", "?", 400, &e.to_string());
            return response;
        }
    };

    let absolute = match normalize_target(&parsed.target) {
        Ok(u) => u,
        Err(e) => {
            metrics::counter!("shiplink_origin_errors_total").increment(1);
            let response = synthetic_response(400, "Bad Request", &e.to_string());
            log_access(&started, &parsed.method, &parsed.target, 400, &e.to_string());
            return response;
        }
    };

    let url = match url::Url::parse(&absolute) {
        Ok(u) => u,
        Err(e) => {
            metrics::counter!("shiplink_origin_errors_total").increment(1);
            let message = format!("invalid target url: {e}");
            let response = synthetic_response(400, "Bad Request", &message);
            log_access(&started, &parsed.method, &parsed.target, 400, &message);
            return response;
        }
    };

    let method = match reqwest::Method::from_bytes(parsed.method.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            metrics::counter!("shiplink_origin_errors_total").increment(1);
            let message = format!("unsupported method: {}", parsed.method);
            let response = synthetic_response(400, "Bad Request", &message);
            log_access(&started, &parsed.method, &parsed.target, 400, &message);
            return response;
        }
    };

    let mut builder = client.request(method, url).timeout(origin_timeout);
    for (name, value) in &parsed.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        builder = builder.header(name, value);
    }
    if header_value_last(&parsed.headers, "content-length").is_none() && !parsed.body.is_empty() {
        builder = builder.header("content-length", parsed.body.len().to_string());
    }
    builder = builder.body(parsed.body.to_vec());

    metrics::counter!("shiplink_egress_requests_total").increment(1);

    match builder.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let out = reassemble_response(response).await;
            log_access(&started, &parsed.method, &parsed.target, status, "");
            out
        }
        Err(e) => {
            metrics::counter!("shiplink_origin_errors_total").increment(1);
            let (status, response) = if e.is_timeout() {
                (504, synthetic_response(504, "Gateway Timeout", "origin request timed out"))
            } else {
                (502, synthetic_response(502, "Bad Gateway", &e.to_string()))
            };
            log_access(&started, &parsed.method, &parsed.target, status, &e.to_string());
            response
        }
    }
}

/// One access-log line per exchange: INFO for a clean status, WARN when
/// `error` is non-empty (malformed request or origin failure). `error` is
/// empty on the success path so the line stays a plain access record rather
/// than duplicating the warn calls already made further up the call chain.
fn log_access(started: &std::time::Instant, method: &str, target: &str, status: u16, error: &str) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if error.is_empty() {
        tracing::info!(method = %method, target = %target, status, elapsed_ms, "access");
    } else {
        tracing::warn!(method = %method, target = %target, status, elapsed_ms, error = %error, "access");
    }
}

async fn reassemble_response(response: reqwest::Response) -> Bytes {
    let status = response.status();
    let reason = status.canonical_reason().unwrap_or("");
    let headers = response.headers().clone();
    let body = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "offshore: failed to read origin response body");
            return synthetic_response(502, "Bad Gateway", "failed to read origin response body");
        }
    };

    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(format!("HTTP/1.1 {} {reason}\r\n", status.as_u16()).as_bytes());
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n");
    for (name, value) in headers.iter() {
        let lower = name.as_str();
        if lower.eq_ignore_ascii_case("connection")
            || lower.eq_ignore_ascii_case("transfer-encoding")
            || lower.eq_ignore_ascii_case("content-length")
        {
            continue;
        }
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&body);
    Bytes::from(out)
}

fn synthetic_response(status: u16, reason: &str, message: &str) -> Bytes {
    let body = format!("{message}\n");
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    Bytes::from(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_target_absolute_passthrough() {
        assert_eq!(normalize_target("http://example.com/a").unwrap(), "http://example.com/a");
        assert_eq!(normalize_target("https://example.com/a").unwrap(), "https://example.com/a");
    }

    #[test]
    fn test_normalize_target_origin_form_rejected() {
        assert!(normalize_target("/a/b").is_err());
    }

    #[test]
    fn test_normalize_target_bare_authority_falls_back_to_http() {
        assert_eq!(normalize_target("example.com:8080").unwrap(), "http://example.com:8080");
    }

    #[test]
    fn test_parse_request_preserves_duplicate_headers() {
        let raw = b"GET http://x/y HTTP/1.1\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n";
        let parsed = parse_request(raw).unwrap();
        let cookies: Vec<&str> = parsed
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_header_value_last_wins() {
        let headers = vec![("Host".to_string(), "a".to_string()), ("Host".to_string(), "b".to_string())];
        assert_eq!(header_value_last(&headers, "host"), Some("b"));
    }

    #[test]
    fn test_parse_request_with_body() {
        let raw = b"POST http://x/y HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let parsed = parse_request(raw).unwrap();
        assert_eq!(parsed.method, "POST");
        assert_eq!(&parsed.body[..], b"hello");
    }

    #[test]
    fn test_malformed_request_rejected() {
        assert!(parse_request(b"not a request at all").is_err());
    }
}
