//! The ship process: ingress HTTP listener, submission multiplexer, and the
//! link manager that owns the single connection to offshore.

pub mod bootstrap;
pub mod ingress;
pub mod link;
pub mod multiplexer;

pub use link::Link;
pub use multiplexer::{MultiplexerHandle, Submission};
