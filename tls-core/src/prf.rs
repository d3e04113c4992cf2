//! RFC 5246 §5 PRF: `P_hash(secret, seed) = HMAC(secret, A(1) + seed) + HMAC(secret, A(2) + seed) + ...`
//! where `A(0) = seed`, `A(i) = HMAC(secret, A(i-1))`.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};

use crate::suites::PrfHash;

fn p_hash<M: Mac + Clone>(mac: M, seed: &[u8], out: &mut [u8]) {
  let mut a = {
    let mut m = mac.clone();
    m.update(seed);
    m.finalize().into_bytes()
  };

  let mut written = 0;
  while written < out.len() {
    let mut m = mac.clone();
    m.update(&a);
    m.update(seed);
    let chunk = m.finalize().into_bytes();

    let take = chunk.len().min(out.len() - written);
    out[written..written + take].copy_from_slice(&chunk[..take]);
    written += take;

    let mut m = mac.clone();
    m.update(&a);
    a = m.finalize().into_bytes();
  }
}

/// Computes `PRF(secret, label, seed)`, truncated/extended to `out.len()`.
pub fn prf(hash: PrfHash, secret: &[u8], label: &[u8], seed: &[u8], out: &mut [u8]) {
  let mut full_seed = Vec::with_capacity(label.len() + seed.len());
  full_seed.extend_from_slice(label);
  full_seed.extend_from_slice(seed);

  match hash {
    PrfHash::Sha256 => {
      let mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts any key length");
      p_hash(mac, &full_seed, out);
    },
    PrfHash::Sha384 => {
      let mac = Hmac::<Sha384>::new_from_slice(secret).expect("HMAC accepts any key length");
      p_hash(mac, &full_seed, out);
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn p_hash_is_deterministic_and_extends_to_arbitrary_length() {
    let mut a = [0u8; 77];
    let mut b = [0u8; 77];
    prf(PrfHash::Sha256, b"secret", b"label", b"seed", &mut a);
    prf(PrfHash::Sha256, b"secret", b"label", b"seed", &mut b);
    assert_eq!(a, b);
  }

  #[test]
  fn different_labels_produce_different_output() {
    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    prf(PrfHash::Sha256, b"secret", b"client finished", b"seed", &mut a);
    prf(PrfHash::Sha256, b"secret", b"server finished", b"seed", &mut b);
    assert_ne!(a, b);
  }
}
