//! A concrete `CryptoProvider` + `Timer` so the engine can be driven
//! end-to-end in tests and by `tls-demo`. Not itself part of the protocol
//! logic — every algorithm choice here is exactly what §6 names and nothing
//! more (X25519, Ed25519, AES-GCM, AES-CBC/HMAC, PSK).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use aes::{Aes128, Aes256};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use ring::aead::{self, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey};
use ring::rand::SecureRandom;
use ring::signature;
use sha1::Sha1;
use sha2::{Sha256, Sha384};
use thiserror::Error;

use tls_backend::{BackendError, CryptoProvider, Timer, X25519PrivateKey};
use tls_core::suites::{BulkCipher, MacAlgorithm};

#[derive(Debug, Error)]
pub enum CryptoSetupError {
  #[error("invalid PEM or DER in {0}")]
  MalformedCredential(&'static str),
  #[error("root certificate store is empty")]
  EmptyTrustStore,
}

/// Built once at startup from PEM files / raw PSK table, handed to the
/// engine as a trait object (`Arc<dyn CryptoProvider>`).
pub struct RingCryptoProvider {
  rng: ring::rand::SystemRandom,
  own_signing_key: Option<(String, signature::Ed25519KeyPair)>,
  trust_anchor_der: Option<Vec<u8>>,
  psk_table: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl RingCryptoProvider {
  pub fn new() -> Self {
    Self {
      rng: ring::rand::SystemRandom::new(),
      own_signing_key: None,
      trust_anchor_der: None,
      psk_table: Mutex::new(HashMap::new()),
    }
  }

  /// Loads an Ed25519 PKCS#8 private key (as produced by `openssl genpkey
  /// -algorithm ed25519`) and registers it under `key_label`.
  pub fn with_signing_key(mut self, key_label: &str, pkcs8_der: &[u8]) -> Result<Self, CryptoSetupError> {
    let pair = signature::Ed25519KeyPair::from_pkcs8(pkcs8_der)
      .map_err(|_| CryptoSetupError::MalformedCredential("Ed25519 PKCS#8 key"))?;
    self.own_signing_key = Some((key_label.to_string(), pair));
    Ok(self)
  }

  /// Registers the peer's expected `SubjectPublicKeyInfo` bytes (§6
  /// `certificate_labels.trust_root`). `verify_chain` checks the leaf's
  /// SPKI against this directly — a pinned-key trust model, not a CA
  /// signature chain: the constrained devices this engine targets are
  /// provisioned ahead of time with the one peer key they will ever talk
  /// to, so there is no intermediate CA to walk.
  pub fn with_trust_anchor(mut self, peer_spki_der: Vec<u8>) -> Self {
    self.trust_anchor_der = Some(peer_spki_der);
    self
  }

  pub fn with_psk(self, identity: Vec<u8>, key: Vec<u8>) -> Self {
    self.psk_table.lock().expect("psk table lock poisoned").insert(identity, key);
    self
  }
}

impl Default for RingCryptoProvider {
  fn default() -> Self { Self::new() }
}

struct FixedNonce(Option<[u8; 12]>);
impl NonceSequence for FixedNonce {
  fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
    Nonce::try_assume_unique_for_key(&self.0.take().ok_or(ring::error::Unspecified)?)
  }
}

fn aead_algorithm(cipher: BulkCipher) -> Result<&'static aead::Algorithm, BackendError> {
  match cipher {
    BulkCipher::Aes128Gcm => Ok(&aead::AES_128_GCM),
    BulkCipher::Aes256Gcm => Ok(&aead::AES_256_GCM),
    other => Err(BackendError::UnsupportedCipher(other)),
  }
}

impl CryptoProvider for RingCryptoProvider {
  fn random(&self, out: &mut [u8]) -> Result<(), BackendError> {
    self.rng.fill(out).map_err(|_| BackendError::RngFailure)
  }

  fn hmac(&self, mac: MacAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>, BackendError> {
    match mac {
      MacAlgorithm::HmacSha1 => {
        let mut m = Hmac::<Sha1>::new_from_slice(key).map_err(|_| BackendError::InvalidKeyMaterial)?;
        m.update(data);
        Ok(m.finalize().into_bytes().to_vec())
      }
      MacAlgorithm::HmacSha256 => {
        let mut m = Hmac::<Sha256>::new_from_slice(key).map_err(|_| BackendError::InvalidKeyMaterial)?;
        m.update(data);
        Ok(m.finalize().into_bytes().to_vec())
      }
      MacAlgorithm::HmacSha384 => {
        let mut m = Hmac::<Sha384>::new_from_slice(key).map_err(|_| BackendError::InvalidKeyMaterial)?;
        m.update(data);
        Ok(m.finalize().into_bytes().to_vec())
      }
      MacAlgorithm::Null => Err(BackendError::UnsupportedMac(mac)),
    }
  }

  fn x25519_generate(&self) -> Result<(X25519PrivateKey, [u8; 32]), BackendError> {
    let private = ring::agreement::EphemeralPrivateKey::generate(&ring::agreement::X25519, &self.rng)
      .map_err(|_| BackendError::KeyAgreementFailed)?;
    let public = private.compute_public_key().map_err(|_| BackendError::KeyAgreementFailed)?;
    let mut public_bytes = [0u8; 32];
    public_bytes.copy_from_slice(public.as_ref());
    Ok((X25519PrivateKey(Box::new(private)), public_bytes))
  }

  fn x25519_agree(&self, private: X25519PrivateKey, peer_public: &[u8; 32]) -> Result<[u8; 32], BackendError> {
    let private = private
      .0
      .downcast::<ring::agreement::EphemeralPrivateKey>()
      .map_err(|_| BackendError::KeyAgreementFailed)?;
    let peer = ring::agreement::UnparsedPublicKey::new(&ring::agreement::X25519, &peer_public[..]);
    ring::agreement::agree_ephemeral(*private, &peer, |shared| {
      let mut out = [0u8; 32];
      out.copy_from_slice(shared);
      out
    })
    .map_err(|_| BackendError::KeyAgreementFailed)
  }

  fn ed25519_sign(&self, key_label: &str, message: &[u8]) -> Result<Vec<u8>, BackendError> {
    let (label, pair) = self
      .own_signing_key
      .as_ref()
      .ok_or_else(|| BackendError::SigningKeyUnavailable(key_label.to_string()))?;
    if label != key_label {
      return Err(BackendError::SigningKeyUnavailable(key_label.to_string()));
    }
    Ok(pair.sign(message).as_ref().to_vec())
  }

  fn ed25519_verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), BackendError> {
    let key = signature::UnparsedPublicKey::new(&signature::ED25519, public_key);
    key.verify(message, signature).map_err(|_| BackendError::SignatureInvalid)
  }

  fn aead_seal(
    &self,
    cipher: BulkCipher,
    key: &[u8],
    nonce: &[u8; 12],
    aad: &[u8],
    plaintext: &[u8],
  ) -> Result<Vec<u8>, BackendError> {
    let algo = aead_algorithm(cipher)?;
    let unbound = UnboundKey::new(algo, key).map_err(|_| BackendError::InvalidKeyMaterial)?;
    let mut sealing = SealingKey::new(unbound, FixedNonce(Some(*nonce)));
    let mut in_out = plaintext.to_vec();
    sealing
      .seal_in_place_append_tag(aead::Aad::from(aad), &mut in_out)
      .map_err(|_| BackendError::AeadAuthenticationFailed)?;
    Ok(in_out)
  }

  fn aead_open(
    &self,
    cipher: BulkCipher,
    key: &[u8],
    nonce: &[u8; 12],
    aad: &[u8],
    ciphertext: &[u8],
  ) -> Result<Vec<u8>, BackendError> {
    let algo = aead_algorithm(cipher)?;
    let unbound = UnboundKey::new(algo, key).map_err(|_| BackendError::InvalidKeyMaterial)?;
    let mut opening = OpeningKey::new(unbound, FixedNonce(Some(*nonce)));
    let mut in_out = ciphertext.to_vec();
    let plaintext = opening
      .open_in_place(aead::Aad::from(aad), &mut in_out)
      .map_err(|_| BackendError::AeadAuthenticationFailed)?;
    Ok(plaintext.to_vec())
  }

  fn cbc_encrypt(&self, cipher: BulkCipher, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, BackendError> {
    let mut buf = plaintext.to_vec();
    match cipher {
      BulkCipher::Aes128Cbc => {
        let mut enc = cbc::Encryptor::<Aes128>::new_from_slices(key, iv).map_err(|_| BackendError::InvalidKeyMaterial)?;
        for block in buf.chunks_mut(16) {
          enc.encrypt_block_mut(block.into());
        }
      }
      BulkCipher::Aes256Cbc => {
        let mut enc = cbc::Encryptor::<Aes256>::new_from_slices(key, iv).map_err(|_| BackendError::InvalidKeyMaterial)?;
        for block in buf.chunks_mut(16) {
          enc.encrypt_block_mut(block.into());
        }
      }
      other => return Err(BackendError::UnsupportedCipher(other)),
    }
    Ok(buf)
  }

  fn cbc_decrypt(&self, cipher: BulkCipher, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, BackendError> {
    let mut buf = ciphertext.to_vec();
    match cipher {
      BulkCipher::Aes128Cbc => {
        let mut dec = cbc::Decryptor::<Aes128>::new_from_slices(key, iv).map_err(|_| BackendError::InvalidKeyMaterial)?;
        for block in buf.chunks_mut(16) {
          dec.decrypt_block_mut(block.into());
        }
      }
      BulkCipher::Aes256Cbc => {
        let mut dec = cbc::Decryptor::<Aes256>::new_from_slices(key, iv).map_err(|_| BackendError::InvalidKeyMaterial)?;
        for block in buf.chunks_mut(16) {
          dec.decrypt_block_mut(block.into());
        }
      }
      other => return Err(BackendError::UnsupportedCipher(other)),
    }
    Ok(buf)
  }

  fn psk_lookup(&self, identity: &[u8]) -> Result<Vec<u8>, BackendError> {
    self
      .psk_table
      .lock()
      .expect("psk table lock poisoned")
      .get(identity)
      .cloned()
      .ok_or_else(|| BackendError::PskIdentityNotFound(hex::encode(identity)))
  }

  fn verify_chain(&self, chain: &[Vec<u8>]) -> Result<[u8; 32], BackendError> {
    let leaf_der = chain
      .first()
      .ok_or_else(|| BackendError::CertificateChainInvalid("empty chain".into()))?;
    let root = self
      .trust_anchor_der
      .as_ref()
      .ok_or_else(|| BackendError::CertificateChainInvalid("no trust anchor configured".into()))?;

    // SubjectPublicKeyInfo for Ed25519 (RFC 8410) is a fixed 12-byte prefix
    // followed by the raw 32-byte point; avoids pulling in a full ASN.1
    // parser for the one shape this engine ever needs to read.
    const ED25519_SPKI_PREFIX: [u8; 12] =
      [0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00];
    let spki = extract_spki(leaf_der)
      .ok_or_else(|| BackendError::CertificateChainInvalid("unparsable leaf certificate".into()))?;
    if spki.len() != ED25519_SPKI_PREFIX.len() + 32 || spki[..ED25519_SPKI_PREFIX.len()] != ED25519_SPKI_PREFIX {
      return Err(BackendError::CertificateChainInvalid("leaf key is not Ed25519".into()));
    }
    // Pinned-key trust: the leaf's SPKI must match the configured trust
    // anchor byte-for-byte. There is no CA signature to walk in this model.
    if spki != root.as_slice() {
      return Err(BackendError::CertificateChainInvalid(
        "leaf key does not match the configured trust anchor".into(),
      ));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&spki[ED25519_SPKI_PREFIX.len()..]);
    Ok(out)
  }
}

/// Finds the certificate's `SubjectPublicKeyInfo` DER by scanning for the
/// Ed25519 OID — good enough for the fixed certificate shapes this engine
/// issues and accepts; a general CA would need a real ASN.1 parser.
fn extract_spki(cert_der: &[u8]) -> Option<&[u8]> {
  let needle = [0x06, 0x03, 0x2b, 0x65, 0x70];
  let pos = cert_der.windows(needle.len()).position(|w| w == needle)?;
  let start = pos.checked_sub(4)?;
  let end = (start + 44).min(cert_der.len());
  if end - start < 44 {
    return None;
  }
  Some(&cert_der[start..end])
}

/// Steady-clock one-shot timer backed by a background thread, matching the
/// §9 Design Note contract: `start`/`stop`/`is_callback_executing`.
pub struct StdTimer {
  deadline: Option<Instant>,
  executing: bool,
}

impl StdTimer {
  pub fn new() -> Self { Self { deadline: None, executing: false } }

  /// Polled by the embedding event loop; returns true exactly once per expiry.
  pub fn poll_expired(&mut self) -> bool {
    match self.deadline {
      Some(d) if Instant::now() >= d => {
        self.deadline = None;
        self.executing = true;
        true
      }
      _ => false,
    }
  }

  pub fn callback_finished(&mut self) { self.executing = false; }
}

impl Default for StdTimer {
  fn default() -> Self { Self::new() }
}

impl Timer for StdTimer {
  fn start(&mut self, duration_ms: u64) { self.deadline = Some(Instant::now() + Duration::from_millis(duration_ms)); }

  fn stop(&mut self) { self.deadline = None; }

  fn is_callback_executing(&self) -> bool { self.executing }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn aead_round_trips() {
    let p = RingCryptoProvider::new();
    let key = [7u8; 16];
    let nonce = [1u8; 12];
    let ct = p.aead_seal(BulkCipher::Aes128Gcm, &key, &nonce, b"aad", b"hello").unwrap();
    let pt = p.aead_open(BulkCipher::Aes128Gcm, &key, &nonce, b"aad", &ct).unwrap();
    assert_eq!(pt, b"hello");
  }

  #[test]
  fn cbc_round_trips() {
    let p = RingCryptoProvider::new();
    let key = [9u8; 16];
    let iv = [2u8; 16];
    let pt = [0x41u8; 32];
    let ct = p.cbc_encrypt(BulkCipher::Aes128Cbc, &key, &iv, &pt).unwrap();
    let back = p.cbc_decrypt(BulkCipher::Aes128Cbc, &key, &iv, &ct).unwrap();
    assert_eq!(&back[..], &pt[..]);
  }

  #[test]
  fn x25519_agreement_is_symmetric() {
    let p = RingCryptoProvider::new();
    let (sk_a, pk_a) = p.x25519_generate().unwrap();
    let (sk_b, pk_b) = p.x25519_generate().unwrap();
    let shared_a = p.x25519_agree(sk_a, &pk_b).unwrap();
    let shared_b = p.x25519_agree(sk_b, &pk_a).unwrap();
    assert_eq!(shared_a, shared_b);
  }

  #[test]
  fn psk_lookup_returns_configured_key() {
    let p = RingCryptoProvider::new().with_psk(b"client1".to_vec(), b"supersecret".to_vec());
    assert_eq!(p.psk_lookup(b"client1").unwrap(), b"supersecret");
    assert!(p.psk_lookup(b"nope").is_err());
  }
}
