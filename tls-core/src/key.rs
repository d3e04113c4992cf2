//! `SecurityParameters` (§3) and the pure key-block split of §4.5.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::msgs::handshake::Random;
use crate::prf::prf;
use crate::suites::{PrfHash, SuiteParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
  Client,
  Server,
}

impl Entity {
  pub fn peer(self) -> Entity {
    match self {
      Entity::Client => Entity::Server,
      Entity::Server => Entity::Client,
    }
  }
}

/// The 48-byte TLS master secret. Opaque so callers can't accidentally log
/// or copy it without going through `expose`; zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret(pub [u8; 48]);

impl MasterSecret {
  pub fn expose(&self) -> &[u8; 48] { &self.0 }
}

impl std::fmt::Debug for MasterSecret {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "MasterSecret(..)") }
}

/// The six directional values produced by splitting the key block (§4.5).
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct DirectionalKeys {
  pub client_write_mac_key: Vec<u8>,
  pub server_write_mac_key: Vec<u8>,
  pub client_write_key: Vec<u8>,
  pub server_write_key: Vec<u8>,
  pub client_write_iv: Vec<u8>,
  pub server_write_iv: Vec<u8>,
}

impl std::fmt::Debug for DirectionalKeys {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "DirectionalKeys(..)") }
}

/// Two of these live per `Connection`: `current` (always consistent) and
/// `next` (built incrementally during a handshake, possibly partial).
#[derive(Debug, Clone)]
pub struct SecurityParameters {
  pub entity: Entity,
  pub suite: &'static SuiteParams,
  pub client_random: Random,
  pub server_random: Random,
  pub master_secret: Option<MasterSecret>,
  pub keys: DirectionalKeys,
}

impl SecurityParameters {
  /// The all-null placeholder installed before any negotiation has happened.
  pub fn initial(entity: Entity) -> Self {
    Self {
      entity,
      suite: crate::suites::by_suite(crate::suites::CipherSuite::NullWithNullNull),
      client_random: Random([0; 32]),
      server_random: Random([0; 32]),
      master_secret: None,
      keys: DirectionalKeys::default(),
    }
  }

  /// `master_secret = PRF(pre_master, "master secret", client_random || server_random)` (§4.4).
  pub fn derive_master_secret(&mut self, pre_master_secret: &[u8]) {
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(&self.client_random.0);
    seed.extend_from_slice(&self.server_random.0);
    let mut out = [0u8; 48];
    prf(self.suite.prf_hash, pre_master_secret, b"master secret", &seed, &mut out);
    self.master_secret = Some(MasterSecret(out));
  }

  /// `key_block = PRF(master_secret, "key expansion", server_random || client_random)`,
  /// split left-to-right per §4.5 into the six directional values.
  pub fn derive_keys(&mut self) {
    let master_secret = self.master_secret.clone().expect("master secret must be derived first");
    let total_len = 2 * (self.suite.mac_key_len + self.suite.enc_key_len + self.suite.fixed_iv_len);

    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(&self.server_random.0);
    seed.extend_from_slice(&self.client_random.0);

    let mut key_block = vec![0u8; total_len];
    prf(self.suite.prf_hash, master_secret.expose(), b"key expansion", &seed, &mut key_block);

    let mac_len = self.suite.mac_key_len;
    let key_len = self.suite.enc_key_len;
    let iv_len = self.suite.fixed_iv_len;
    let mut cursor = 0;

    let mut take = |len: usize| {
      let slice = key_block[cursor..cursor + len].to_vec();
      cursor += len;
      slice
    };

    self.keys = DirectionalKeys {
      client_write_mac_key: take(mac_len),
      server_write_mac_key: take(mac_len),
      client_write_key: take(key_len),
      server_write_key: take(key_len),
      client_write_iv: take(iv_len),
      server_write_iv: take(iv_len),
    };

    key_block.zeroize();
  }

  pub fn prf_hash(&self) -> PrfHash { self.suite.prf_hash }
}

/// Builds the PSK pre-master-secret shape of §4.4:
/// `uint16(len(psk)) || zeros(len(psk)) || uint16(len(psk)) || psk`.
pub fn psk_pre_master_secret(psk: &[u8]) -> Vec<u8> {
  let len = psk.len() as u16;
  let mut out = Vec::with_capacity(4 + 2 * psk.len());
  out.extend_from_slice(&len.to_be_bytes());
  out.extend(std::iter::repeat(0u8).take(psk.len()));
  out.extend_from_slice(&len.to_be_bytes());
  out.extend_from_slice(psk);
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::suites::{by_suite, CipherSuite};

  #[test]
  fn psk_pms_has_expected_shape() {
    let pms = psk_pre_master_secret(&[0xAB; 16]);
    assert_eq!(pms.len(), 4 + 32);
    assert_eq!(&pms[0..2], &16u16.to_be_bytes());
    assert_eq!(&pms[2..18], &[0u8; 16]);
    assert_eq!(&pms[18..20], &16u16.to_be_bytes());
    assert_eq!(&pms[20..36], &[0xAB; 16]);
  }

  #[test]
  fn key_derivation_splits_to_exact_lengths() {
    let mut params = SecurityParameters::initial(Entity::Client);
    params.suite = by_suite(CipherSuite::EcdheEcdsaWithAes128GcmSha256);
    params.derive_master_secret(&[7u8; 32]);
    params.derive_keys();
    assert_eq!(params.keys.client_write_key.len(), 16);
    assert_eq!(params.keys.server_write_key.len(), 16);
    assert_eq!(params.keys.client_write_iv.len(), 4);
    assert_eq!(params.keys.client_write_mac_key.len(), 0);
  }
}
