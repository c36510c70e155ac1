pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl ShipConfig {
    /// Load from an optional file, then apply environment overrides, then
    /// validate. Missing file is not an error — the ship starts with
    /// built-in defaults for local/dev use.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = load_from_file::<Self>(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OFFSHORE_HOST") {
            self.offshore_host = v;
        }
        if let Ok(v) = std::env::var("OFFSHORE_PORT") {
            if let Ok(n) = v.parse() {
                self.offshore_port = n;
            }
        }
        if let Ok(v) = std::env::var("LISTEN_PORT") {
            if let Ok(n) = v.parse() {
                self.listen_port = n;
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("QUEUE_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.queue_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("ADMIN_PORT") {
            if let Ok(n) = v.parse() {
                self.admin_port = n;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.offshore_host.is_empty() {
            anyhow::bail!("offshore_host cannot be empty");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        if self.max_reconnect_attempts == 0 {
            anyhow::bail!("max_reconnect_attempts must be at least 1");
        }
        Ok(())
    }
}

impl OffshoreConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = load_from_file::<Self>(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OFFSHORE_HOST") {
            self.bind_host = v;
        }
        if let Ok(v) = std::env::var("OFFSHORE_PORT") {
            if let Ok(n) = v.parse() {
                self.bind_port = n;
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("OFFSHORE_INSECURE_TLS") {
            self.insecure_skip_tls_verify = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("ADMIN_PORT") {
            if let Ok(n) = v.parse() {
                self.admin_port = n;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind_host.is_empty() {
            anyhow::bail!("bind_host cannot be empty");
        }
        if self.origin_timeout_secs == 0 {
            anyhow::bail!("origin_timeout_secs must be at least 1");
        }
        Ok(())
    }
}

fn load_from_file<T>(path: Option<&Path>) -> Result<T>
where
    T: Default + serde::de::DeserializeOwned,
{
    let Some(path) = path else {
        return Ok(T::default());
    };
    if !path.exists() {
        tracing::info!("config file not found at {}, using defaults", path.display());
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)?;
    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content)?,
        Some("json") => serde_json::from_str(&content)?,
        Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
        None => anyhow::bail!("config file has no extension, use .toml or .json"),
    };
    Ok(config)
}
