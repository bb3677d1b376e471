use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

/// Names a YAML file to load before environment overrides.
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

/// Overrides `listen_addr`.
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `host:port` for the TCP listener.
    pub listen_addr: String,
    /// Also accept connections on this Unix socket.
    pub unix_socket: Option<PathBuf>,
    /// Directory served by the binary.
    pub htdocs: Option<PathBuf>,
    pub idle_reap_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            unix_socket: None,
            htdocs: None,
            idle_reap_secs: 10,
        }
    }
}

impl Config {
    /// Defaults, then the file named by `COURIER_CONFIG`, then `LISTEN`.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        if let Ok(listen_addr) = std::env::var(LISTEN_ENV) {
            cfg.listen_addr = listen_addr;
        }
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn idle_reap_interval(&self) -> Duration {
        Duration::from_secs(self.idle_reap_secs.max(1))
    }

    /// Splits `listen_addr` at its last colon.
    pub fn listen_host_port(&self) -> anyhow::Result<(&str, u16)> {
        let (host, port) = self
            .listen_addr
            .rsplit_once(':')
            .with_context(|| format!("listen address {:?} has no port", self.listen_addr))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = port
            .parse()
            .with_context(|| format!("invalid port in listen address {:?}", self.listen_addr))?;
        Ok((host, port))
    }
}
