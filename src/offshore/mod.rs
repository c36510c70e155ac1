//! The offshore process: accepts the ship's link, dispatches each REQUEST
//! frame to the real origin, and relays CONNECT tunnels.

pub mod bootstrap;
pub mod egress;
pub mod request;
pub mod tunnel;
