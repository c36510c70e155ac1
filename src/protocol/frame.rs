use bytes::Bytes;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default ceiling on a single frame's payload: 64 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Wire type tag. `Request`/`Response` are the original protocol;
/// `TunnelData`/`TunnelClose` extend it to carry a real CONNECT tunnel
/// (see DESIGN.md, Open Question 1) without disturbing the 5-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Request,
    Response,
    TunnelData,
    TunnelClose,
}

impl FrameType {
    fn to_byte(self) -> u8 {
        match self {
            FrameType::Request => 0,
            FrameType::Response => 1,
            FrameType::TunnelData => 2,
            FrameType::TunnelClose => 3,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(FrameType::Request),
            1 => Some(FrameType::Response),
            2 => Some(FrameType::TunnelData),
            3 => Some(FrameType::TunnelClose),
            _ => None,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameType::Request => "REQUEST",
            FrameType::Response => "RESPONSE",
            FrameType::TunnelData => "TUNNEL_DATA",
            FrameType::TunnelClose => "TUNNEL_CLOSE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
pub enum FrameError {
    /// Clean end of stream before or between frames.
    Eof,
    /// `payload_length` exceeded the configured maximum, or an unknown type
    /// byte was seen. The stream must be torn down — there is no way to
    /// resynchronize a length-prefixed stream once alignment is suspect.
    Protocol(String),
    Io(std::io::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Eof => write!(f, "end of stream"),
            FrameError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            FrameError::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Eof
        } else {
            FrameError::Io(e)
        }
    }
}

/// Write one frame as a single logical send: 5-byte header then payload.
/// Callers must guarantee no other write is interleaved on `stream` for the
/// duration of this call — the multiplexer's link mutex is what provides
/// that guarantee in practice.
pub async fn write_frame<W>(stream: &mut W, frame_type: FrameType, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let mut header = [0u8; 5];
    header[..4].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    header[4] = frame_type.to_byte();

    stream.write_all(&header).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one frame. Retries partial reads internally; a premature EOF at any
/// point (including mid-header) is reported as `FrameError::Eof`.
pub async fn read_frame<R>(stream: &mut R, max_payload_bytes: u32) -> Result<(FrameType, Bytes), FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Eof
        } else {
            FrameError::Io(e)
        }
    })?;

    let payload_length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if payload_length > max_payload_bytes {
        return Err(FrameError::Protocol(format!(
            "payload_length {payload_length} exceeds max {max_payload_bytes}"
        )));
    }

    let frame_type = FrameType::from_byte(header[4])
        .ok_or_else(|| FrameError::Protocol(format!("unknown frame type byte {}", header[4])))?;

    let mut payload = vec![0u8; payload_length as usize];
    stream.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Eof
        } else {
            FrameError::Io(e)
        }
    })?;

    Ok((frame_type, Bytes::from(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_request() {
        let mut buf: Vec<u8> = Vec::new();
        write_frame(&mut buf, FrameType::Request, b"GET / HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let (ty, payload) = read_frame(&mut cursor, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        assert_eq!(ty, FrameType::Request);
        assert_eq!(&payload[..], b"GET / HTTP/1.1\r\n\r\n");
    }

    #[tokio::test]
    async fn round_trip_empty_payload() {
        let mut buf: Vec<u8> = Vec::new();
        write_frame(&mut buf, FrameType::TunnelClose, b"").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let (ty, payload) = read_frame(&mut cursor, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        assert_eq!(ty, FrameType::TunnelClose);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn oversized_payload_is_protocol_error() {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.push(0);
        buf.extend_from_slice(&vec![0u8; 100]);

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor, 50).await.unwrap_err();
        assert!(matches!(err, FrameError::Protocol(_)));
    }

    #[tokio::test]
    async fn premature_eof_mid_payload_is_eof() {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.push(0);
        buf.extend_from_slice(b"short");

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor, DEFAULT_MAX_FRAME_BYTES).await.unwrap_err();
        assert!(matches!(err, FrameError::Eof));
    }

    #[tokio::test]
    async fn unknown_type_byte_is_protocol_error() {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.push(9);

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor, DEFAULT_MAX_FRAME_BYTES).await.unwrap_err();
        assert!(matches!(err, FrameError::Protocol(_)));
    }

    #[tokio::test]
    async fn binary_safe_payload_with_embedded_nul_and_crlf() {
        let payload = b"POST /x HTTP/1.1\r\nHost: y\r\n\r\n\x00\x01garbled\r\n\r\nmore";
        let mut buf: Vec<u8> = Vec::new();
        write_frame(&mut buf, FrameType::Response, payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let (ty, got) = read_frame(&mut cursor, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        assert_eq!(ty, FrameType::Response);
        assert_eq!(&got[..], &payload[..]);
    }
}
