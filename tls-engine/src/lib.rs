//! The handshake driver: record layer, fragment aggregator, and the
//! dispatch-table state machine that ties them to a `CryptoProvider` and a
//! `Timer` (§4, §5, §9).

pub mod aggregator;
pub mod connection;
pub mod error;
pub mod record;
pub mod state;

pub use connection::{CertificateLabels, Config, Connection, ConnectionCallbacks, PskConfig, Role};
pub use error::EngineError;
pub use record::Variant;
