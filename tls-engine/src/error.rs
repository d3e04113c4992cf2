//! The flow-context-carrying result type of Design Note §9: a handler
//! returns `Result<(), EngineError>`; the dispatcher maps the error to a
//! wire alert and the Disconnected state, and only the first error on a
//! flow survives (`has_error` latches).

use thiserror::Error;
use tls_core::error::CodecError;
use tls_core::msgs::enums::AlertDescription;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("invariant violation: {0}")]
  Internal(String),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("invalid state for this operation")]
  InvalidState,

  #[error("message codec error: {0}")]
  Codec(#[from] CodecError),

  #[error("unexpected message in current state")]
  UnexpectedMessage,

  #[error("record authentication failed")]
  BadRecordMac,

  #[error("record length exceeds the protocol maximum")]
  RecordOverflow,

  #[error("handshake failed: {0}")]
  HandshakeFailure(String),

  #[error("bad certificate: {0}")]
  BadCertificate(String),

  #[error("unsupported certificate type")]
  UnsupportedCertificate,

  #[error("illegal parameter: {0}")]
  IllegalParameter(String),

  #[error("unknown certificate authority")]
  UnknownCa,

  #[error("decrypt error")]
  DecryptError,

  #[error("unsupported protocol version")]
  UnexpectedVersion,

  #[error("insufficient security: {0}")]
  InsufficientSecurity(String),

  #[error("crypto backend failure: {0}")]
  CryptoAdapterFailure(#[from] tls_backend::BackendError),

  #[error("PSK identity not found: {0}")]
  PskIdentityNotFound(String),

  #[error("peer requested renegotiation")]
  NoRenegotiation,

  #[error("unsupported extension")]
  UnsupportedExtension,
}

impl EngineError {
  /// The alert this error maps to on the wire (§7). `None` means the error
  /// never reaches the wire (pure API-boundary errors).
  pub fn alert(&self) -> Option<AlertDescription> {
    use AlertDescription as A;
    match self {
      EngineError::Internal(_) => Some(A::InternalError),
      EngineError::InvalidArgument(_) | EngineError::InvalidState => None,
      EngineError::Codec(_) => Some(A::DecodeError),
      EngineError::UnexpectedMessage => Some(A::UnexpectedMessage),
      EngineError::BadRecordMac => Some(A::BadRecordMac),
      EngineError::RecordOverflow => Some(A::RecordOverflow),
      EngineError::HandshakeFailure(_) => Some(A::HandshakeFailure),
      EngineError::BadCertificate(_) => Some(A::BadCertificate),
      EngineError::UnsupportedCertificate => Some(A::UnsupportedCertificate),
      EngineError::IllegalParameter(_) => Some(A::IllegalParameter),
      EngineError::UnknownCa => Some(A::UnknownCa),
      EngineError::DecryptError => Some(A::DecryptError),
      EngineError::UnexpectedVersion => Some(A::ProtocolVersion),
      EngineError::InsufficientSecurity(_) => Some(A::InsufficientSecurity),
      EngineError::CryptoAdapterFailure(_) => Some(A::InternalError),
      EngineError::PskIdentityNotFound(_) => Some(A::UnknownPskIdentity),
      EngineError::NoRenegotiation => Some(A::NoRenegotiation),
      EngineError::UnsupportedExtension => Some(A::UnsupportedExtension),
    }
  }

  /// Whether this error ends the connection. API-boundary errors
  /// (`InvalidArgument`/`InvalidState`) leave network state untouched, and
  /// `NoRenegotiation` is a warning-level rejection the connection survives
  /// (§8 scenario 6: reject the renegotiation attempt, stay Connected).
  pub fn is_fatal(&self) -> bool {
    !matches!(
      self,
      EngineError::InvalidArgument(_) | EngineError::InvalidState | EngineError::NoRenegotiation
    )
  }
}
