use serde::{Deserialize, Serialize};

/// Configuration for the ship process: the local ingress proxy, the link to
/// the offshore node, and the submission queue sitting between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipConfig {
    #[serde(default = "default_offshore_host")]
    pub offshore_host: String,

    #[serde(default = "default_offshore_port")]
    pub offshore_port: u16,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Capacity of the bounded submission queue between ingress tasks and
    /// the multiplexer worker.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Ceiling a submitter waits for its completion signal before the
    /// ingress listener synthesizes a 504.
    #[serde(default = "default_submission_timeout_secs")]
    pub submission_timeout_secs: u64,

    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// Ceiling on a single frame's payload read from the offshore link.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u32,
}

impl Default for ShipConfig {
    fn default() -> Self {
        Self {
            offshore_host: default_offshore_host(),
            offshore_port: default_offshore_port(),
            listen_port: default_listen_port(),
            log_level: default_log_level(),
            queue_capacity: default_queue_capacity(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            submission_timeout_secs: default_submission_timeout_secs(),
            admin_port: default_admin_port(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_offshore_host() -> String {
    "localhost".to_string()
}

fn default_offshore_port() -> u16 {
    9999
}

fn default_listen_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_submission_timeout_secs() -> u64 {
    60
}

fn default_admin_port() -> u16 {
    9100
}

/// Configuration for the offshore process: the egress listener that accepts
/// the ship's link, and the behavior of the origin fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffshoreConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    #[serde(default = "default_offshore_port")]
    pub bind_port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Timeout for a single origin HTTP round-trip.
    #[serde(default = "default_origin_timeout_secs")]
    pub origin_timeout_secs: u64,

    /// Off by default: verification is *on* unless explicitly disabled.
    /// Open Question 2 — the original's blanket disablement is not carried
    /// forward as the default.
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u32,
}

impl Default for OffshoreConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            bind_port: default_offshore_port(),
            log_level: default_log_level(),
            origin_timeout_secs: default_origin_timeout_secs(),
            insecure_skip_tls_verify: false,
            admin_port: default_admin_port(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_origin_timeout_secs() -> u64 {
    30
}

fn default_max_frame_bytes() -> u32 {
    crate::protocol::DEFAULT_MAX_FRAME_BYTES
}
