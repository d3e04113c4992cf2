//! The record layer (§4.1): per-direction cipher state, sequence discipline,
//! and DTLS anti-replay. `Connection` owns one `RecordLayer`; everything here
//! is agnostic to which handshake state produced the keys it's handed.

use subtle::ConstantTimeEq;

use tls_backend::CryptoProvider;
use tls_core::key::{Entity, SecurityParameters};
use tls_core::msgs::enums::{ContentType, ProtocolVersion};
use tls_core::msgs::message::RecordSequence;
use tls_core::suites::{BulkCipher, MacAlgorithm};

use crate::error::EngineError;

/// TLS's bound is 2^64-3; DTLS's is tightened to 2^48-3 (Design Note §9,
/// Open Question: take the stricter of the two upstream limits).
const TLS_SEQUENCE_HARD_BOUND: u64 = u64::MAX - 2;
const DTLS_SEQUENCE_HARD_BOUND: u64 = (1u64 << 48) - 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
  Tls,
  Dtls,
}

/// Per-direction key material plus the epoch/sequence counter that advances
/// under it. One lives for `write`, one for `read`.
#[derive(Debug, Clone)]
struct DirectionState {
  params: SecurityParameters,
  epoch: u16,
  sequence: u64,
}

impl DirectionState {
  fn initial(entity: Entity) -> Self {
    Self { params: SecurityParameters::initial(entity), epoch: 0, sequence: 0 }
  }

  fn mac_key<'a>(&'a self, local: Entity) -> &'a [u8] {
    match local {
      Entity::Client => &self.params.keys.client_write_mac_key,
      Entity::Server => &self.params.keys.server_write_mac_key,
    }
  }

  fn write_key<'a>(&'a self, local: Entity) -> &'a [u8] {
    match local {
      Entity::Client => &self.params.keys.client_write_key,
      Entity::Server => &self.params.keys.server_write_key,
    }
  }

  fn write_iv<'a>(&'a self, local: Entity) -> &'a [u8] {
    match local {
      Entity::Client => &self.params.keys.client_write_iv,
      Entity::Server => &self.params.keys.server_write_iv,
    }
  }
}

/// A 64-bit sliding window of received DTLS sequence numbers at the current
/// epoch (§4.1). Reset whenever the read side pivots epoch.
#[derive(Debug, Clone, Default)]
struct AntiReplayWindow {
  highest_seen: Option<u64>,
  bitmap: u64,
}

impl AntiReplayWindow {
  fn reset(&mut self) {
    self.highest_seen = None;
    self.bitmap = 0;
  }

  /// `true` if `seq` is new (not a duplicate, not below the window floor).
  fn check(&self, seq: u64) -> bool {
    match self.highest_seen {
      None => true,
      Some(highest) => {
        if seq > highest {
          true
        } else {
          let diff = highest - seq;
          diff < 64 && (self.bitmap & (1 << diff)) == 0
        }
      }
    }
  }

  /// Slides the window forward after a record has passed authentication.
  /// Never called for a record that failed authentication (§4.1 invariant).
  fn accept(&mut self, seq: u64) {
    match self.highest_seen {
      None => {
        self.highest_seen = Some(seq);
        self.bitmap = 1;
      }
      Some(highest) if seq > highest => {
        let shift = seq - highest;
        self.bitmap = if shift >= 64 { 1 } else { (self.bitmap << shift) | 1 };
        self.highest_seen = Some(seq);
      }
      Some(highest) => {
        let diff = highest - seq;
        if diff < 64 {
          self.bitmap |= 1 << diff;
        }
      }
    }
  }
}

/// Outcome of unprotecting a received record. DTLS records that should be
/// silently dropped (epoch mismatch, replay) are `Dropped`, not an error —
/// per §4.1 they must never reach the application or alert machinery.
pub enum Unprotected {
  Plaintext(Vec<u8>),
  Dropped,
}

pub struct RecordLayer {
  variant: Variant,
  entity: Entity,
  write: DirectionState,
  read: DirectionState,
  pending_write: Option<SecurityParameters>,
  pending_read: Option<SecurityParameters>,
  replay_window: AntiReplayWindow,
}

impl RecordLayer {
  pub fn new(variant: Variant, entity: Entity) -> Self {
    Self {
      variant,
      entity,
      write: DirectionState::initial(entity),
      read: DirectionState::initial(entity),
      pending_write: None,
      pending_read: None,
      replay_window: AntiReplayWindow::default(),
    }
  }

  /// Stages freshly derived `SecurityParameters` for the next
  /// ChangeCipherSpec pivot (§4.5 Security Parameters Builder output).
  pub fn stage_next(&mut self, params: SecurityParameters) {
    self.pending_write = Some(params.clone());
    self.pending_read = Some(params);
  }

  /// Pivots the write direction to `next`, epoch+1, sequence 0. Triggered by
  /// sending ChangeCipherSpec.
  pub fn activate_pending_write(&mut self) -> Result<(), EngineError> {
    let params = self.pending_write.take().ok_or(EngineError::InvalidState)?;
    let next_epoch = self.write.epoch.checked_add(1).ok_or_else(|| {
      EngineError::InsufficientSecurity("epoch counter exhausted".into())
    })?;
    self.write = DirectionState { params, epoch: next_epoch, sequence: 0 };
    Ok(())
  }

  /// Pivots the read direction to `next`, epoch+1, sequence 0, and resets
  /// the anti-replay window. Triggered by receiving ChangeCipherSpec.
  pub fn activate_pending_read(&mut self) -> Result<(), EngineError> {
    let params = self.pending_read.take().ok_or(EngineError::InvalidState)?;
    let next_epoch = self.read.epoch.checked_add(1).ok_or_else(|| {
      EngineError::InsufficientSecurity("epoch counter exhausted".into())
    })?;
    self.read = DirectionState { params, epoch: next_epoch, sequence: 0 };
    self.replay_window.reset();
    Ok(())
  }

  pub fn write_epoch(&self) -> u16 { self.write.epoch }

  pub fn read_epoch(&self) -> u16 { self.read.epoch }

  /// Protects one fragment (already split to <= 2^14 bytes by the caller)
  /// for `typ`, returning the sequence it was sent under and the ciphertext
  /// body (record header framing is the caller's job — it differs TLS/DTLS).
  pub fn protect(
    &mut self,
    crypto: &dyn CryptoProvider,
    typ: ContentType,
    version: ProtocolVersion,
    plaintext: &[u8],
  ) -> Result<(RecordSequence, Vec<u8>), EngineError> {
    let bound = if self.variant == Variant::Dtls { DTLS_SEQUENCE_HARD_BOUND } else { TLS_SEQUENCE_HARD_BOUND };
    if self.write.sequence > bound {
      return Err(EngineError::InsufficientSecurity("write sequence number exhausted".into()));
    }
    let seq = RecordSequence { epoch: self.write.epoch, sequence: self.write.sequence };
    let mac_input_seq = if self.variant == Variant::Dtls { seq.as_mac_input_dtls() } else { seq.as_mac_input_tls() };

    let suite = self.write.params.suite;
    let body = match suite.cipher {
      BulkCipher::Null if suite.mac == MacAlgorithm::Null => plaintext.to_vec(),
      BulkCipher::Null => {
        let mac = mac_over(crypto, suite.mac, self.write.mac_key(self.entity), &mac_input_seq, typ, version, plaintext)?;
        let mut out = plaintext.to_vec();
        out.extend_from_slice(&mac);
        out
      }
      BulkCipher::Aes128Gcm | BulkCipher::Aes256Gcm => {
        let mut explicit_iv = [0u8; 8];
        crypto.random(&mut explicit_iv)?;
        let nonce = gcm_nonce(self.write.write_iv(self.entity), &explicit_iv);
        let aad = aead_aad(&mac_input_seq, typ, version, plaintext.len());
        let ciphertext = crypto.aead_seal(suite.cipher, self.write.write_key(self.entity), &nonce, &aad, plaintext)?;
        let mut out = Vec::with_capacity(8 + ciphertext.len());
        out.extend_from_slice(&explicit_iv);
        out.extend_from_slice(&ciphertext);
        out
      }
      BulkCipher::Aes128Cbc | BulkCipher::Aes256Cbc => {
        let mac = mac_over(crypto, suite.mac, self.write.mac_key(self.entity), &mac_input_seq, typ, version, plaintext)?;
        let mut padded = plaintext.to_vec();
        padded.extend_from_slice(&mac);
        pkcs7_pad(&mut padded);
        let mut record_iv = vec![0u8; 16];
        crypto.random(&mut record_iv)?;
        let ciphertext = crypto.cbc_encrypt(suite.cipher, self.write.write_key(self.entity), &record_iv, &padded)?;
        let mut out = record_iv;
        out.extend_from_slice(&ciphertext);
        out
      }
    };

    self.write.sequence += 1;
    Ok((seq, body))
  }

  /// Unprotects one received record body. `seq` is `RecordSequence::zero()`
  /// for TLS (the counter is implicit); for DTLS it's the wire epoch/sequence.
  pub fn unprotect(
    &mut self,
    crypto: &dyn CryptoProvider,
    typ: ContentType,
    version: ProtocolVersion,
    seq: RecordSequence,
    ciphertext: &[u8],
  ) -> Result<Unprotected, EngineError> {
    let sequence = if self.variant == Variant::Dtls {
      if seq.epoch != self.read.epoch {
        return Ok(Unprotected::Dropped);
      }
      if !self.replay_window.check(seq.sequence) {
        return Ok(Unprotected::Dropped);
      }
      seq.sequence
    } else {
      let s = self.read.sequence;
      self.read.sequence += 1;
      s
    };
    let bound = if self.variant == Variant::Dtls { DTLS_SEQUENCE_HARD_BOUND } else { TLS_SEQUENCE_HARD_BOUND };
    if sequence > bound {
      return Err(EngineError::InsufficientSecurity("read sequence number exhausted".into()));
    }
    let full_seq = RecordSequence { epoch: self.read.epoch, sequence };
    let mac_input_seq = if self.variant == Variant::Dtls { full_seq.as_mac_input_dtls() } else { full_seq.as_mac_input_tls() };

    // Reading uses the peer's write keys: whoever sent this record encrypted
    // it under their own write_key/write_iv/mac_key, not ours.
    let peer = self.entity.peer();
    let suite = self.read.params.suite;
    let plaintext = match suite.cipher {
      BulkCipher::Null if suite.mac == MacAlgorithm::Null => ciphertext.to_vec(),
      BulkCipher::Null => {
        let mac_len = mac_len_for(suite.mac);
        if ciphertext.len() < mac_len {
          return Err(EngineError::BadRecordMac);
        }
        let (payload, tag) = ciphertext.split_at(ciphertext.len() - mac_len);
        let expected = mac_over(crypto, suite.mac, self.read.mac_key(peer), &mac_input_seq, typ, version, payload)?;
        if expected.ct_eq(tag).unwrap_u8() != 1 {
          return Err(EngineError::BadRecordMac);
        }
        payload.to_vec()
      }
      BulkCipher::Aes128Gcm | BulkCipher::Aes256Gcm => {
        if ciphertext.len() < 8 {
          return Err(EngineError::BadRecordMac);
        }
        let (explicit_iv, body) = ciphertext.split_at(8);
        let nonce = gcm_nonce(self.read.write_iv(peer), explicit_iv);
        let plaintext_len = body.len().saturating_sub(16);
        let aad = aead_aad(&mac_input_seq, typ, version, plaintext_len);
        crypto
          .aead_open(suite.cipher, self.read.write_key(peer), &nonce, &aad, body)
          .map_err(|_| EngineError::BadRecordMac)?
      }
      BulkCipher::Aes128Cbc | BulkCipher::Aes256Cbc => {
        if ciphertext.len() < 32 {
          return Err(EngineError::BadRecordMac);
        }
        let (iv, body) = ciphertext.split_at(16);
        let padded = crypto
          .cbc_decrypt(suite.cipher, self.read.write_key(peer), iv, body)
          .map_err(|_| EngineError::BadRecordMac)?;
        let unpadded = pkcs7_unpad(&padded).ok_or(EngineError::BadRecordMac)?;
        let mac_len = mac_len_for(suite.mac);
        if unpadded.len() < mac_len {
          return Err(EngineError::BadRecordMac);
        }
        let (payload, tag) = unpadded.split_at(unpadded.len() - mac_len);
        let expected = mac_over(crypto, suite.mac, self.read.mac_key(peer), &mac_input_seq, typ, version, payload)?;
        if expected.ct_eq(tag).unwrap_u8() != 1 {
          return Err(EngineError::BadRecordMac);
        }
        payload.to_vec()
      }
    };

    if self.variant == Variant::Dtls {
      self.replay_window.accept(sequence);
    }
    Ok(Unprotected::Plaintext(plaintext))
  }
}

fn mac_len_for(mac: MacAlgorithm) -> usize {
  match mac {
    MacAlgorithm::Null => 0,
    MacAlgorithm::HmacSha1 => 20,
    MacAlgorithm::HmacSha256 => 32,
    MacAlgorithm::HmacSha384 => 48,
  }
}

fn mac_over(
  crypto: &dyn CryptoProvider,
  mac: MacAlgorithm,
  key: &[u8],
  seq: &[u8; 8],
  typ: ContentType,
  version: ProtocolVersion,
  plaintext: &[u8],
) -> Result<Vec<u8>, EngineError> {
  let mut input = Vec::with_capacity(8 + 1 + 2 + 2 + plaintext.len());
  input.extend_from_slice(seq);
  input.push(typ.as_repr());
  input.push(version.major);
  input.push(version.minor);
  input.extend_from_slice(&(plaintext.len() as u16).to_be_bytes());
  input.extend_from_slice(plaintext);
  Ok(crypto.hmac(mac, key, &input)?)
}

fn aead_aad(seq: &[u8; 8], typ: ContentType, version: ProtocolVersion, plaintext_len: usize) -> Vec<u8> {
  let mut aad = Vec::with_capacity(13);
  aad.extend_from_slice(seq);
  aad.push(typ.as_repr());
  aad.push(version.major);
  aad.push(version.minor);
  aad.extend_from_slice(&(plaintext_len as u16).to_be_bytes());
  aad
}

fn gcm_nonce(fixed_iv: &[u8], explicit_iv: &[u8]) -> [u8; 12] {
  let mut nonce = [0u8; 12];
  nonce[..4].copy_from_slice(fixed_iv);
  nonce[4..].copy_from_slice(explicit_iv);
  nonce
}

/// TLS's PKCS#7-style padding: every padding byte, including the final one,
/// is set to the pad length (RFC 5246 §6.2.3.2), so padding + length byte is
/// at least one full byte and at most 256.
fn pkcs7_pad(data: &mut Vec<u8>) {
  let block_len = 16;
  let pad_len = block_len - (data.len() % block_len);
  let pad_value = (pad_len - 1) as u8;
  data.extend(std::iter::repeat(pad_value).take(pad_len));
}

fn pkcs7_unpad(data: &[u8]) -> Option<Vec<u8>> {
  let &pad_value = data.last()?;
  let pad_len = pad_value as usize + 1;
  if pad_len > data.len() {
    return None;
  }
  let (payload, padding) = data.split_at(data.len() - pad_len);
  if padding.iter().all(|&b| b == pad_value) {
    Some(payload.to_vec())
  } else {
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tls_core::suites::{by_suite, CipherSuite};
  use tls_crypto::RingCryptoProvider;

  fn paired_params(suite: CipherSuite) -> (SecurityParameters, SecurityParameters) {
    let mut client = SecurityParameters::initial(Entity::Client);
    client.suite = by_suite(suite);
    client.client_random = tls_core::msgs::handshake::Random([1; 32]);
    client.server_random = tls_core::msgs::handshake::Random([2; 32]);
    client.derive_master_secret(&[9u8; 32]);
    client.derive_keys();
    let server = client.clone();
    (client, server)
  }

  #[test]
  fn aead_record_round_trips_and_advances_sequence() {
    let crypto = RingCryptoProvider::new();
    let (client_params, server_params) = paired_params(CipherSuite::EcdheEcdsaWithAes128GcmSha256);
    let mut client = RecordLayer::new(Variant::Tls, Entity::Client);
    client.stage_next(client_params);
    client.activate_pending_write().unwrap();
    let mut server = RecordLayer::new(Variant::Tls, Entity::Server);
    server.stage_next(server_params);
    server.activate_pending_read().unwrap();

    let (seq, body) = client.protect(&crypto, ContentType::ApplicationData, ProtocolVersion::TLS1_2, b"hello").unwrap();
    assert_eq!(seq.sequence, 0);
    match server.unprotect(&crypto, ContentType::ApplicationData, ProtocolVersion::TLS1_2, RecordSequence::zero(), &body).unwrap() {
      Unprotected::Plaintext(p) => assert_eq!(p, b"hello"),
      Unprotected::Dropped => panic!("should not drop"),
    }
    let (seq2, _) = client.protect(&crypto, ContentType::ApplicationData, ProtocolVersion::TLS1_2, b"again").unwrap();
    assert_eq!(seq2.sequence, 1);
  }

  #[test]
  fn cbc_record_detects_tamper() {
    let crypto = RingCryptoProvider::new();
    let (client_params, server_params) = paired_params(CipherSuite::EcdheEcdsaWithAes128CbcSha256);
    let mut client = RecordLayer::new(Variant::Tls, Entity::Client);
    client.stage_next(client_params);
    client.activate_pending_write().unwrap();
    let mut server = RecordLayer::new(Variant::Tls, Entity::Server);
    server.stage_next(server_params);
    server.activate_pending_read().unwrap();

    let (_, mut body) = client.protect(&crypto, ContentType::ApplicationData, ProtocolVersion::TLS1_2, b"hello").unwrap();
    *body.last_mut().unwrap() ^= 0xFF;
    let result = server.unprotect(&crypto, ContentType::ApplicationData, ProtocolVersion::TLS1_2, RecordSequence::zero(), &body);
    assert!(matches!(result, Err(EngineError::BadRecordMac)));
  }

  #[test]
  fn dtls_anti_replay_rejects_duplicate_and_old_sequence_numbers() {
    let mut window = AntiReplayWindow::default();
    window.accept(10);
    assert!(!window.check(10)); // duplicate
    assert!(window.check(11)); // new, ahead of the window
    window.accept(100);
    assert!(!window.check(30)); // more than 64 behind the new highest
    assert!(window.check(80)); // within the window, not yet seen
    window.accept(80);
    assert!(!window.check(80)); // now a duplicate
  }

  #[test]
  fn dtls_epoch_mismatch_is_silently_dropped() {
    let crypto = RingCryptoProvider::new();
    let (client_params, server_params) = paired_params(CipherSuite::PskWithAes128GcmSha256);
    let mut client = RecordLayer::new(Variant::Dtls, Entity::Client);
    client.stage_next(client_params);
    client.activate_pending_write().unwrap();
    let mut server = RecordLayer::new(Variant::Dtls, Entity::Server);
    server.stage_next(server_params);
    server.activate_pending_read().unwrap();

    let (seq, body) = client.protect(&crypto, ContentType::ApplicationData, ProtocolVersion::DTLS1_2, b"hi").unwrap();
    let wrong_epoch = RecordSequence { epoch: seq.epoch + 1, sequence: seq.sequence };
    let result = server.unprotect(&crypto, ContentType::ApplicationData, ProtocolVersion::DTLS1_2, wrong_epoch, &body).unwrap();
    assert!(matches!(result, Unprotected::Dropped));
  }
}
