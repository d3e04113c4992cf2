//! The fixed cipher-suite table of §6. No runtime plug-in of suites — the
//! table below is the entire universe this engine understands.

use crate::msgs::enums::NamedGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
  NullWithNullNull,
  PskWithNullSha256,
  PskWithAes128GcmSha256,
  EcdheEcdsaWithNullSha1,
  EcdheEcdsaWithAes128GcmSha256,
  EcdheEcdsaWithAes256GcmSha384,
  EcdheEcdsaWithAes128CbcSha256,
  EcdheEcdsaWithAes256CbcSha384,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyExchange {
  None,
  Psk,
  EcdheX25519,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Authentication {
  None,
  Psk,
  Ed25519,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkCipher {
  Null,
  Aes128Gcm,
  Aes256Gcm,
  Aes128Cbc,
  Aes256Cbc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacAlgorithm {
  Null,
  HmacSha1,
  HmacSha256,
  HmacSha384,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrfHash {
  Sha256,
  Sha384,
}

/// Every length a `SecurityParameters` needs to size its key material, keyed
/// by cipher suite. Pure data, looked up once at negotiation time.
#[derive(Debug, Clone, Copy)]
pub struct SuiteParams {
  pub id: u16,
  pub suite: CipherSuite,
  pub kex: KeyExchange,
  pub auth: Authentication,
  pub cipher: BulkCipher,
  pub mac: MacAlgorithm,
  pub enc_key_len: usize,
  pub fixed_iv_len: usize,
  pub record_iv_len: usize,
  pub mac_key_len: usize,
  pub prf_hash: PrfHash,
}

impl SuiteParams {
  pub fn is_aead(&self) -> bool {
    matches!(self.cipher, BulkCipher::Aes128Gcm | BulkCipher::Aes256Gcm)
  }

  pub fn group(&self) -> Option<NamedGroup> {
    matches!(self.kex, KeyExchange::EcdheX25519).then_some(NamedGroup::X25519)
  }
}

pub const ALL_SUITES: &[SuiteParams] = &[
  SuiteParams {
    id: 0x0000,
    suite: CipherSuite::NullWithNullNull,
    kex: KeyExchange::None,
    auth: Authentication::None,
    cipher: BulkCipher::Null,
    mac: MacAlgorithm::Null,
    enc_key_len: 0,
    fixed_iv_len: 0,
    record_iv_len: 0,
    mac_key_len: 0,
    prf_hash: PrfHash::Sha256,
  },
  SuiteParams {
    id: 0x00B0,
    suite: CipherSuite::PskWithNullSha256,
    kex: KeyExchange::Psk,
    auth: Authentication::Psk,
    cipher: BulkCipher::Null,
    mac: MacAlgorithm::HmacSha256,
    enc_key_len: 0,
    fixed_iv_len: 0,
    record_iv_len: 0,
    mac_key_len: 32,
    prf_hash: PrfHash::Sha256,
  },
  SuiteParams {
    id: 0x00A8,
    suite: CipherSuite::PskWithAes128GcmSha256,
    kex: KeyExchange::Psk,
    auth: Authentication::Psk,
    cipher: BulkCipher::Aes128Gcm,
    mac: MacAlgorithm::Null,
    enc_key_len: 16,
    fixed_iv_len: 4,
    record_iv_len: 8,
    mac_key_len: 0,
    prf_hash: PrfHash::Sha256,
  },
  SuiteParams {
    id: 0xC006,
    suite: CipherSuite::EcdheEcdsaWithNullSha1,
    kex: KeyExchange::EcdheX25519,
    auth: Authentication::Ed25519,
    cipher: BulkCipher::Null,
    mac: MacAlgorithm::HmacSha1,
    enc_key_len: 0,
    fixed_iv_len: 0,
    record_iv_len: 0,
    mac_key_len: 20,
    prf_hash: PrfHash::Sha256,
  },
  SuiteParams {
    id: 0xC02B,
    suite: CipherSuite::EcdheEcdsaWithAes128GcmSha256,
    kex: KeyExchange::EcdheX25519,
    auth: Authentication::Ed25519,
    cipher: BulkCipher::Aes128Gcm,
    mac: MacAlgorithm::Null,
    enc_key_len: 16,
    fixed_iv_len: 4,
    record_iv_len: 8,
    mac_key_len: 0,
    prf_hash: PrfHash::Sha256,
  },
  SuiteParams {
    id: 0xC02C,
    suite: CipherSuite::EcdheEcdsaWithAes256GcmSha384,
    kex: KeyExchange::EcdheX25519,
    auth: Authentication::Ed25519,
    cipher: BulkCipher::Aes256Gcm,
    mac: MacAlgorithm::Null,
    enc_key_len: 32,
    fixed_iv_len: 4,
    record_iv_len: 8,
    mac_key_len: 0,
    prf_hash: PrfHash::Sha384,
  },
  SuiteParams {
    id: 0xC023,
    suite: CipherSuite::EcdheEcdsaWithAes128CbcSha256,
    kex: KeyExchange::EcdheX25519,
    auth: Authentication::Ed25519,
    cipher: BulkCipher::Aes128Cbc,
    mac: MacAlgorithm::HmacSha256,
    enc_key_len: 16,
    fixed_iv_len: 0,
    record_iv_len: 16,
    mac_key_len: 32,
    prf_hash: PrfHash::Sha256,
  },
  SuiteParams {
    id: 0xC024,
    suite: CipherSuite::EcdheEcdsaWithAes256CbcSha384,
    kex: KeyExchange::EcdheX25519,
    auth: Authentication::Ed25519,
    cipher: BulkCipher::Aes256Cbc,
    mac: MacAlgorithm::HmacSha384,
    enc_key_len: 32,
    fixed_iv_len: 0,
    record_iv_len: 16,
    mac_key_len: 48,
    prf_hash: PrfHash::Sha384,
  },
];

pub fn by_id(id: u16) -> Option<&'static SuiteParams> { ALL_SUITES.iter().find(|s| s.id == id) }

pub fn by_suite(suite: CipherSuite) -> &'static SuiteParams {
  ALL_SUITES.iter().find(|s| s.suite == suite).expect("every CipherSuite variant has a table entry")
}
