//! Configuration model.
//!
//! The config file is a single JSON object shared by both ends; each side
//! reads the keys that concern it and validates its own shape. Command-line
//! flags override file values field by field; `server_password` supersedes
//! the scalar server settings on the local, `port_password` supersedes them
//! on the remote.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default remote idle timeout when the config gives none.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// `server` accepts a single host or a list of hosts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServerList {
    /// One host.
    One(String),
    /// Several hosts sharing the same password.
    Many(Vec<String>),
}

impl ServerList {
    /// The configured hosts in order.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            ServerList::One(s) => vec![s.clone()],
            ServerList::Many(v) => v.clone(),
        }
    }
}

/// The JSON config document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Remote host(s); local side only.
    #[serde(default)]
    pub server: Option<ServerList>,
    /// Default remote port; local side only.
    #[serde(default)]
    pub server_port: Option<u16>,
    /// SOCKS5 listening port; local side only.
    #[serde(default)]
    pub local_port: Option<u16>,
    /// Shared secret for the single-password case.
    #[serde(default)]
    pub password: Option<String>,
    /// Remote idle timeout in seconds; 0 disables the deadline.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// host:port -> password map; supersedes the scalar server settings.
    #[serde(default)]
    pub server_password: Option<HashMap<String, String>>,
    /// port -> password map for the multi-tenant remote.
    #[serde(default)]
    pub port_password: Option<HashMap<String, String>>,
    /// Persist derived tables to `table.cache` on the remote.
    #[serde(default)]
    pub cache_enctable: bool,
}

/// Command-line overrides; `None` leaves the file value alone.
#[derive(Debug, Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub server_port: Option<u16>,
    pub local_port: Option<u16>,
    pub password: Option<String>,
    pub timeout: Option<u64>,
}

/// True when `addr` ends with an explicit `:port`.
pub fn has_port(addr: &str) -> bool {
    matches!(addr.rsplit_once(':'), Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok())
}

impl Config {
    /// Parse the config file at `path`.
    ///
    /// A file that exists but does not parse is a fatal config error; a
    /// missing file is the caller's concern (the binaries fall back to
    /// flag-only operation).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// Apply command-line overrides on top of the file values.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(server) = overrides.server {
            self.server = Some(ServerList::One(server));
        }
        if let Some(port) = overrides.server_port {
            self.server_port = Some(port);
        }
        if let Some(port) = overrides.local_port {
            self.local_port = Some(port);
        }
        if let Some(password) = overrides.password {
            self.password = Some(password);
        }
        if let Some(timeout) = overrides.timeout {
            self.timeout = Some(timeout);
        }
    }

    /// The remote idle deadline, if one applies.
    pub fn idle_timeout(&self) -> Option<std::time::Duration> {
        match self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS) {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }

    /// Check the fields the local side needs.
    pub fn validate_local(&self) -> Result<()> {
        if self.local_port.is_none() {
            return Err(Error::config("must specify local_port"));
        }
        match &self.server_password {
            Some(map) if !map.is_empty() => {
                if self.password.is_some() || self.server.is_some() || self.server_port.is_some() {
                    tracing::info!(
                        "server_password given, ignoring server, server_port and password"
                    );
                }
                for addr in map.keys() {
                    if !has_port(addr) {
                        return Err(Error::config(format!(
                            "no port for server {addr}, specify it as {addr}:port"
                        )));
                    }
                }
                Ok(())
            }
            _ => {
                if self.server.as_ref().map_or(true, |s| s.to_vec().is_empty()) {
                    return Err(Error::config("must specify server address"));
                }
                if self.password.as_deref().unwrap_or("").is_empty() {
                    return Err(Error::config("must specify password"));
                }
                if self.server_port.is_none()
                    && self
                        .server
                        .as_ref()
                        .is_some_and(|s| s.to_vec().iter().any(|a| !has_port(a)))
                {
                    return Err(Error::config("must specify server_port"));
                }
                Ok(())
            }
        }
    }

    /// The port -> password map the remote serves.
    ///
    /// `port_password` wins when present; otherwise the scalar
    /// (`server_port`, `password`) pair forms a single-tenant map.
    pub fn port_map(&self) -> Result<HashMap<u16, String>> {
        if let Some(map) = &self.port_password {
            if map.is_empty() {
                return Err(Error::config("port_password is empty"));
            }
            if self.password.is_some() || self.server_port.is_some() {
                tracing::info!("port_password given, ignoring server_port and password");
            }
            let mut ports = HashMap::with_capacity(map.len());
            for (port, password) in map {
                let port: u16 = port
                    .parse()
                    .map_err(|_| Error::config(format!("invalid port {port}")))?;
                ports.insert(port, password.clone());
            }
            return Ok(ports);
        }

        let port = self
            .server_port
            .ok_or_else(|| Error::config("must specify server_port"))?;
        let password = match self.password.as_deref() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => return Err(Error::config("must specify password")),
        };
        Ok(HashMap::from([(port, password)]))
    }
}
