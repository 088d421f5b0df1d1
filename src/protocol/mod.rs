//! Wire protocol shared by the local and remote ends.
//!
//! The tunnel carries a byte-for-byte table-substituted stream: the target
//! address header first, payload bytes immediately after. No framing, no
//! authentication tag. The SOCKS5 front-end lives here too because its
//! request bytes from the address tag through the port are forwarded
//! verbatim as that header.

pub mod address;
pub mod relay;
pub mod socks5;
pub mod stream;

pub use address::Address;
pub use stream::CipherStream;
