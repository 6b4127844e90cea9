//! Optional file-backed overrides for the handful of tunables that are
//! reasonable to change without a rebuild. CLI flags always win over the
//! file; the file itself is entirely optional.

use nat_core::constants::{OPERATION_TIMEOUT, PORT, SERVER_WORKERS};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    port: Option<u16>,
    server_workers: Option<usize>,
    operation_timeout_secs: Option<u64>,
}

/// Resolved server configuration after merging defaults, an optional TOML
/// file, and CLI overrides (in that increasing order of precedence).
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub port: u16,
    pub server_workers: usize,
    pub operation_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: PORT,
            server_workers: SERVER_WORKERS,
            operation_timeout: OPERATION_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Load a TOML file at `path`, if given, layering it over the protocol
    /// defaults. A missing `--config` flag is not an error: the defaults are
    /// used as-is.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        let Some(path) = path else {
            return Ok(config);
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        let file: FileConfig = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?;

        if let Some(port) = file.port {
            config.port = port;
        }
        if let Some(workers) = file.server_workers {
            config.server_workers = workers;
        }
        if let Some(secs) = file.operation_timeout_secs {
            config.operation_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Apply CLI overrides on top of whatever the file (or defaults)
    /// produced. `None` means "not specified on the command line".
    pub fn apply_cli_overrides(&mut self, port: Option<u16>, server_workers: Option<usize>) {
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(workers) = server_workers {
            self.server_workers = workers;
        }
    }
}
