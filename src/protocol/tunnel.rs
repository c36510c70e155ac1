//! Correlation tagging for `TunnelData`/`TunnelClose` payloads.
//!
//! A CONNECT tunnel's establishing REQUEST/RESPONSE still goes through the
//! link exactly like any other exchange (so frame ordering alone pairs it up,
//! same as spec.md §4.3), but once established its ongoing bytes must not
//! monopolize the link: several tunnels, and plain exchanges, can all be in
//! flight at once over the one physical connection. Each side assigns the
//! next tunnel a `u32` id at the moment it establishes (both sides' counters
//! stay in lockstep because establishment itself is still strictly ordered on
//! the wire), and every `TUNNEL_DATA`/`TUNNEL_CLOSE` payload is prefixed with
//! that id so the reader on either end can demultiplex to the right tunnel
//! instead of blocking on it.

use bytes::{BufMut, Bytes, BytesMut};

/// Prepends `tunnel_id` (big-endian) to `payload`.
pub fn tag(tunnel_id: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(tunnel_id);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Splits a tagged payload back into its tunnel id and data. `None` if the
/// payload is too short to carry the 4-byte id, which indicates either a
/// protocol violation or a peer still running the pre-tagging wire format.
pub fn untag(payload: &Bytes) -> Option<(u32, Bytes)> {
    if payload.len() < 4 {
        return None;
    }
    let id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Some((id, payload.slice(4..)))
}
