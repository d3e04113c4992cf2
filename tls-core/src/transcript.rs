//! The handshake transcript (`MessageManager` in the distilled spec, §3):
//! the ordered log of every message contributing to `Finished.verify_data`.

use sha2::{Digest, Sha256, Sha384};

use crate::suites::PrfHash;

/// Concatenation of canonical wire bytes for every message that counts
/// towards the transcript hash, in order. HelloRequest, HelloVerifyRequest,
/// ChangeCipherSpec, and alerts are never appended (§3 invariant).
#[derive(Debug, Clone, Default)]
pub struct Transcript {
  log: Vec<u8>,
  /// Length of `log` when CertificateVerify's signing input was captured —
  /// the signed transcript excludes CertificateVerify and everything after
  /// it, per the Open Question resolved in Design Note §9.
  certificate_verify_cutoff: Option<usize>,
}

impl Transcript {
  pub fn new() -> Self { Self::default() }

  pub fn append(&mut self, wire_bytes: &[u8]) { self.log.extend_from_slice(wire_bytes); }

  /// Marks "everything so far" as the CertificateVerify signing input. Call
  /// this immediately before appending CertificateVerify itself.
  pub fn mark_certificate_verify_cutoff(&mut self) { self.certificate_verify_cutoff = Some(self.log.len()); }

  pub fn hash_for_certificate_verify(&self, prf_hash: PrfHash) -> Vec<u8> {
    let cutoff = self.certificate_verify_cutoff.unwrap_or(self.log.len());
    hash(prf_hash, &self.log[..cutoff])
  }

  /// The transcript hash as it stands right now — used for Finished.verify_data.
  pub fn hash(&self, prf_hash: PrfHash) -> Vec<u8> { hash(prf_hash, &self.log) }
}

fn hash(prf_hash: PrfHash, bytes: &[u8]) -> Vec<u8> {
  match prf_hash {
    PrfHash::Sha256 => Sha256::digest(bytes).to_vec(),
    PrfHash::Sha384 => Sha384::digest(bytes).to_vec(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transcript_hash_changes_as_messages_are_appended() {
    let mut t = Transcript::new();
    let h0 = t.hash(PrfHash::Sha256);
    t.append(b"client-hello-bytes");
    let h1 = t.hash(PrfHash::Sha256);
    assert_ne!(h0, h1);
  }

  #[test]
  fn certificate_verify_cutoff_excludes_later_messages() {
    let mut t = Transcript::new();
    t.append(b"client-hello");
    t.append(b"server-hello");
    t.mark_certificate_verify_cutoff();
    let expected = t.hash(PrfHash::Sha256);
    t.append(b"certificate-verify-itself");
    t.append(b"finished");
    assert_eq!(t.hash_for_certificate_verify(PrfHash::Sha256), expected);
  }
}
