//! Shared library behind the `ship` and `offshore` binaries: the wire
//! protocol, config, metrics, ambient server plumbing, and the two process
//! roles themselves.

pub mod config;
pub mod error;
pub mod metrics;
pub mod offshore;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod ship;
