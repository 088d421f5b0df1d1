//! # Table-cipher tunnel
//!
//! A two-ended encrypted tunneling proxy. The local end accepts SOCKS5
//! sessions on a loopback port and forwards each one, table-substituted, to
//! a remote end that dials the real target and relays bytes both ways.
//!
//! ## Architecture Overview
//!
//! ```text
//! client ──SOCKS5──▶ local ──substituted stream──▶ remote ──TCP──▶ target
//!                     │                              │
//!                     │ server pool                  │ one listener per
//!                     │ (round robin + failover)     │ password, hot reload
//! ```
//!
//! The wire protocol is deliberately simple: a password-derived 256-byte
//! substitution permutation applied per byte in each direction, with the
//! target address header as the very first bytes of the stream. There is no
//! framing, no IV, and no integrity protection; this cipher generation is
//! confidentiality-only by design.
//!
//! ## Module map
//!
//! - [`crypto`]: table derivation and the on-disk table cache
//! - [`protocol`]: address header codec, cipher stream, SOCKS5, relay
//! - [`local`]: server pool and the SOCKS5-facing session handler
//! - [`remote`]: multi-port dispatcher and the tunnel-facing session handler
//! - [`config`]: JSON configuration and command-line override merging

#![warn(rust_2018_idioms)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod local;
pub mod protocol;
pub mod remote;

pub use config::Config;
pub use crypto::{EncryptTable, TableCache};
pub use error::{Error, Result};
pub use protocol::{Address, CipherStream};
