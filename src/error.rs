use std::fmt;

/// Errors raised by the link manager while dialling or maintaining the
/// single offshore connection.
#[derive(Debug)]
pub enum LinkError {
    /// Reconnection exhausted `max_reconnect_attempts` without success.
    ReconnectExhausted { attempts: u32, source: std::io::Error },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::ReconnectExhausted { attempts, source } => {
                write!(f, "reconnect exhausted after {attempts} attempts: {source}")
            }
        }
    }
}

impl std::error::Error for LinkError {}

/// Outcome of a single worker exchange, matching spec.md §7's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionError {
    /// `ensure_connected()` could not establish the link.
    LinkUnavailable,
    /// The REQUEST frame could not be written even after one reconnect+retry.
    SendFailed,
    /// The link returned something other than a well-formed RESPONSE frame.
    InvalidResponse,
    /// The bounded submission queue was full (REDESIGN FLAG 3).
    QueueFull,
}

impl fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionError::LinkUnavailable => "link unavailable",
            SubmissionError::SendFailed => "send failed",
            SubmissionError::InvalidResponse => "invalid response",
            SubmissionError::QueueFull => "submission queue full",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for SubmissionError {}

/// Errors raised while decoding a raw HTTP request/response payload
/// offshore (spec.md §4.6).
#[derive(Debug)]
pub enum ProcessError {
    MalformedRequest(String),
    IllegalTarget(String),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::MalformedRequest(msg) => write!(f, "malformed request: {msg}"),
            ProcessError::IllegalTarget(msg) => write!(f, "illegal target: {msg}"),
        }
    }
}

impl std::error::Error for ProcessError {}
