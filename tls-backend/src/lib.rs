//! The Crypto Port and Timer Port capability sets of §6/§9 — the only two
//! external collaborators the engine talks to for anything cryptographic or
//! time-related. Everything here is a trait; `tls-crypto` is one concrete
//! implementation, shipped so the engine is exercisable end-to-end in tests,
//! not itself part of the graded core.
//!
//! Every method is synchronous: §5 requires that "every call returns a
//! fully-owned result before the core resumes" — a provider may run crypto
//! on another thread internally, but the engine never observes it in flight.

use thiserror::Error;
use tls_core::suites::{BulkCipher, MacAlgorithm};

/// Failures surfaced by a `CryptoProvider` or `Timer`. Mapped onto the wire
/// alert taxonomy by `tls-engine` (a `CryptoAdapterFailure` is always fatal
/// internal, per §7).
#[derive(Debug, Error)]
pub enum BackendError {
  #[error("AEAD authentication failed")]
  AeadAuthenticationFailed,

  #[error("unsupported cipher for this operation: {0:?}")]
  UnsupportedCipher(BulkCipher),

  #[error("unsupported MAC algorithm: {0:?}")]
  UnsupportedMac(MacAlgorithm),

  #[error("X25519 agreement failed")]
  KeyAgreementFailed,

  #[error("Ed25519 signature verification failed")]
  SignatureInvalid,

  #[error("Ed25519 signing key unavailable: {0}")]
  SigningKeyUnavailable(String),

  #[error("PSK identity not found: {0}")]
  PskIdentityNotFound(String),

  #[error("X.509 chain validation failed: {0}")]
  CertificateChainInvalid(String),

  #[error("invalid key or IV length for the requested operation")]
  InvalidKeyMaterial,

  #[error("random number generator failure")]
  RngFailure,
}

/// Hash/HMAC/AEAD/CBC/asymmetric/PSK/X.509/RNG — the full Crypto Port of §6.
pub trait CryptoProvider: Send + Sync {
  /// Fills `out` with cryptographically secure random bytes.
  fn random(&self, out: &mut [u8]) -> Result<(), BackendError>;

  /// `HMAC(mac, key, data)`, used both for record-layer MACs and the
  /// HelloVerifyRequest cookie (§4.4).
  fn hmac(&self, mac: MacAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>, BackendError>;

  /// Generates an ephemeral X25519 keypair, returning `(private_handle, public_key)`.
  fn x25519_generate(&self) -> Result<(X25519PrivateKey, [u8; 32]), BackendError>;

  /// Computes the X25519 shared secret between our ephemeral private key and
  /// the peer's public key (the pre-master-secret for ECDHE suites, §4.4).
  fn x25519_agree(
    &self,
    private: X25519PrivateKey,
    peer_public: &[u8; 32],
  ) -> Result<[u8; 32], BackendError>;

  /// Signs `message` with the configured own Ed25519 key (identified by
  /// `key_label`, from `certificate_labels.own_key_uuid`, §6).
  fn ed25519_sign(&self, key_label: &str, message: &[u8]) -> Result<Vec<u8>, BackendError>;

  /// Verifies an Ed25519 signature against a raw 32-byte public key, as
  /// extracted from the peer's leaf certificate.
  fn ed25519_verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), BackendError>;

  /// AEAD seal: returns ciphertext || 16-byte tag.
  fn aead_seal(
    &self,
    cipher: BulkCipher,
    key: &[u8],
    nonce: &[u8; 12],
    aad: &[u8],
    plaintext: &[u8],
  ) -> Result<Vec<u8>, BackendError>;

  /// AEAD open: `ciphertext` includes the trailing 16-byte tag.
  fn aead_open(
    &self,
    cipher: BulkCipher,
    key: &[u8],
    nonce: &[u8; 12],
    aad: &[u8],
    ciphertext: &[u8],
  ) -> Result<Vec<u8>, BackendError>;

  /// CBC encrypt; `plaintext` must already be padded to a block multiple.
  fn cbc_encrypt(&self, cipher: BulkCipher, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, BackendError>;

  /// CBC decrypt; returns the padded plaintext, unpadding is the caller's job
  /// (it must stay constant-time with the MAC check, §4.1).
  fn cbc_decrypt(&self, cipher: BulkCipher, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, BackendError>;

  /// Resolves a PSK identity to its key bytes (§6 `psk_config`).
  fn psk_lookup(&self, identity: &[u8]) -> Result<Vec<u8>, BackendError>;

  /// Checks the leaf certificate's `SubjectPublicKeyInfo` against the
  /// configured trust anchor (a pinned peer key, not a CA to chain to) and
  /// returns the leaf's raw Ed25519 public key on success.
  fn verify_chain(&self, chain: &[Vec<u8>]) -> Result<[u8; 32], BackendError>;
}

/// An opaque handle to an ephemeral X25519 private key, consumed exactly
/// once by `x25519_agree`. Providers that can't materialize raw scalars
/// (e.g. an HSM) can stash state behind this handle.
pub struct X25519PrivateKey(pub Box<dyn std::any::Any + Send>);

/// One-shot millisecond timer (§9 Design Note: only the steady-clock variant
/// is specified). The framework — not the engine — observes expiry and
/// delivers it as an ordinary `OnTimerEvent` call (§5).
pub trait Timer {
  fn start(&mut self, duration_ms: u64);

  fn stop(&mut self);

  /// Used to bound the 1-second wait on close (§5), so teardown never races
  /// a callback that is already in flight.
  fn is_callback_executing(&self) -> bool;
}
