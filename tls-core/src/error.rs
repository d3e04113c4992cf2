use thiserror::Error;

/// Failures from the message codec boundary (§4.3 of the design).
///
/// These never touch the network themselves; callers map them onto the
/// alert taxonomy (`DecodeError` in almost every case — see `tls-engine`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
  #[error("buffer exhausted while decoding")]
  UnexpectedEof,

  #[error("trailing bytes left after decoding a fixed-size container")]
  TrailingData,

  #[error("field value out of range: {0}")]
  InvalidValue(String),

  #[error("duplicate entry in a set-typed field: {0}")]
  DuplicateEntry(String),

  #[error("field exceeds its maximum size: {0}")]
  SizeExceeded(String),

  #[error("unsupported protocol version")]
  UnsupportedVersion,
}
