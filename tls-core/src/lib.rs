//! Canonical message codec, cipher-suite table, PRF, key derivation, and
//! handshake transcript — the wire-format half of the engine (§4.3, §4.5).
//!
//! Nothing in this crate touches a socket or a timer; it is pure data and
//! pure functions, so it has no opinion about how the caller drives I/O.

pub mod error;
pub mod key;
pub mod msgs;
pub mod prf;
pub mod suites;
pub mod transcript;
