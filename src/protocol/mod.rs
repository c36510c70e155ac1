//! The framed binary protocol shared by the ship and offshore processes.
//!
//! `[ 4 bytes payload_length (BE u32) ][ 1 byte type ][ payload ]` — see
//! spec.md §6 for the wire layout and SPEC_FULL.md Open Question 1 for the
//! `TunnelData`/`TunnelClose` extension used by real CONNECT tunneling.

mod frame;
pub mod tunnel;

pub use frame::{read_frame, write_frame, FrameError, FrameType, DEFAULT_MAX_FRAME_BYTES};
