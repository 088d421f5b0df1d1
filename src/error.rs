//! Error types for the tunnel.

use thiserror::Error;

/// Result type alias for tunnel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving a session or starting up.
#[derive(Error, Debug)]
pub enum Error {
    /// SOCKS version byte was not 0x05
    #[error("socks version not supported")]
    UnsupportedVersion,

    /// SOCKS command other than CONNECT
    #[error("socks command not supported")]
    UnsupportedCommand,

    /// Address tag other than IPv4 (0x01) or domain (0x03)
    #[error("socks address type not supported")]
    UnsupportedAddressType,

    /// Client sent bytes past the end of the method-negotiation message
    #[error("socks authentication got extra data")]
    AuthExtraData,

    /// Client sent bytes past the end of the CONNECT request
    #[error("socks request got extra data")]
    RequestExtraData,

    /// Transport I/O error
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound connect failure
    #[error("failed to dial {addr}: {source}")]
    Dial {
        /// The address that refused us
        addr: String,
        /// The underlying connect error
        source: std::io::Error,
    },

    /// Every server in the pool refused the connection
    #[error("all configured servers failed")]
    AllServersFailed,

    /// Configuration error (startup only, fatal)
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new dial error.
    pub fn dial(addr: impl Into<String>, source: std::io::Error) -> Self {
        Error::Dial {
            addr: addr.into(),
            source,
        }
    }

    /// Check if this error should end the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}
