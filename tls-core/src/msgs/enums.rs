//! Wire-level enumerations, bit-exact per RFC 5246 / 6347 / 4492 / 5289 / 5487.

use crate::error::CodecError;
use crate::msgs::codec::{Codec, Reader};

macro_rules! wire_enum {
  ($name:ident: $repr:ty { $($variant:ident = $value:expr),+ $(,)? }) => {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum $name {
      $($variant),+,
      Unknown($repr),
    }

    impl $name {
      pub fn as_repr(&self) -> $repr {
        match self {
          $(Self::$variant => $value,)+
          Self::Unknown(v) => *v,
        }
      }

      pub fn from_repr(v: $repr) -> Self {
        match v {
          $($value => Self::$variant,)+
          other => Self::Unknown(other),
        }
      }
    }
  };
}

wire_enum! { ContentType: u8 {
  ChangeCipherSpec = 20,
  Alert = 21,
  Handshake = 22,
  ApplicationData = 23,
}}

impl Codec for ContentType {
  fn encode(&self, bytes: &mut Vec<u8>) { bytes.push(self.as_repr()); }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> { Ok(Self::from_repr(r.take_u8()?)) }
}

wire_enum! { HandshakeType: u8 {
  HelloRequest = 0,
  ClientHello = 1,
  ServerHello = 2,
  HelloVerifyRequest = 3,
  Certificate = 11,
  ServerKeyExchange = 12,
  CertificateRequest = 13,
  ServerHelloDone = 14,
  CertificateVerify = 15,
  ClientKeyExchange = 16,
  Finished = 20,
}}

impl Codec for HandshakeType {
  fn encode(&self, bytes: &mut Vec<u8>) { bytes.push(self.as_repr()); }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> { Ok(Self::from_repr(r.take_u8()?)) }
}

wire_enum! { AlertLevel: u8 {
  Warning = 1,
  Fatal = 2,
}}

impl Codec for AlertLevel {
  fn encode(&self, bytes: &mut Vec<u8>) { bytes.push(self.as_repr()); }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> { Ok(Self::from_repr(r.take_u8()?)) }
}

wire_enum! { AlertDescription: u8 {
  CloseNotify = 0,
  UnexpectedMessage = 10,
  BadRecordMac = 20,
  DecryptionFailed = 21,
  RecordOverflow = 22,
  DecompressionFailure = 30,
  HandshakeFailure = 40,
  NoCertificate = 41,
  BadCertificate = 42,
  UnsupportedCertificate = 43,
  CertificateRevoked = 44,
  CertificateExpired = 45,
  CertificateUnknown = 46,
  IllegalParameter = 47,
  UnknownCa = 48,
  AccessDenied = 49,
  DecodeError = 50,
  DecryptError = 51,
  ProtocolVersion = 70,
  InsufficientSecurity = 71,
  InternalError = 80,
  UserCanceled = 90,
  NoRenegotiation = 100,
  UnsupportedExtension = 110,
  UnknownPskIdentity = 115,
}}

impl Codec for AlertDescription {
  fn encode(&self, bytes: &mut Vec<u8>) { bytes.push(self.as_repr()); }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> { Ok(Self::from_repr(r.take_u8()?)) }
}

/// TLS `ProtocolVersion`: `major.minor`, packed as one `u16` for comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
  pub major: u8,
  pub minor: u8,
}

impl ProtocolVersion {
  pub const TLS1_2: Self = Self { major: 3, minor: 3 };
  pub const DTLS1_0: Self = Self { major: 254, minor: 255 };
  pub const DTLS1_2: Self = Self { major: 254, minor: 253 };

  pub fn is_dtls(&self) -> bool { self.major == 254 }
}

impl Codec for ProtocolVersion {
  fn encode(&self, bytes: &mut Vec<u8>) {
    bytes.push(self.major);
    bytes.push(self.minor);
  }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    Ok(Self { major: r.take_u8()?, minor: r.take_u8()? })
  }
}

/// Only the compression method this engine will ever produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
  Null,
  Unknown(u8),
}

impl Codec for CompressionMethod {
  fn encode(&self, bytes: &mut Vec<u8>) {
    bytes.push(match self {
      Self::Null => 0,
      Self::Unknown(v) => *v,
    });
  }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    Ok(match r.take_u8()? {
      0 => Self::Null,
      v => Self::Unknown(v),
    })
  }
}

/// `supported_groups` entries — this engine only ever negotiates x25519.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedGroup {
  X25519,
  Unknown(u16),
}

impl NamedGroup {
  pub fn as_repr(&self) -> u16 {
    match self {
      Self::X25519 => 29,
      Self::Unknown(v) => *v,
    }
  }

  pub fn from_repr(v: u16) -> Self {
    match v {
      29 => Self::X25519,
      other => Self::Unknown(other),
    }
  }
}

impl Codec for NamedGroup {
  fn encode(&self, bytes: &mut Vec<u8>) { crate::msgs::codec::put_u16(self.as_repr(), bytes); }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> { Ok(Self::from_repr(r.take_u16()?)) }
}

/// `signature_algorithms` entries: (hash, signature) pairs, RFC 5246 §7.4.1.4.1.
/// This engine only speaks Ed25519; other values round-trip opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureScheme(pub u16);

impl SignatureScheme {
  /// Not an IANA-assigned codepoint (Ed25519 predates TLS 1.2 sigalgs); this
  /// engine uses it purely as an internal marker since signature_algorithms
  /// is otherwise advisory for the one scheme it implements.
  pub const ED25519: Self = Self(0x0807);
}

impl Codec for SignatureScheme {
  fn encode(&self, bytes: &mut Vec<u8>) { crate::msgs::codec::put_u16(self.0, bytes); }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> { Ok(Self(r.take_u16()?)) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionType {
  SupportedGroups,
  SignatureAlgorithms,
  EcPointFormats,
  Unknown(u16),
}

impl ExtensionType {
  pub fn as_repr(&self) -> u16 {
    match self {
      Self::SupportedGroups => 10,
      Self::EcPointFormats => 11,
      Self::SignatureAlgorithms => 13,
      Self::Unknown(v) => *v,
    }
  }

  pub fn from_repr(v: u16) -> Self {
    match v {
      10 => Self::SupportedGroups,
      11 => Self::EcPointFormats,
      13 => Self::SignatureAlgorithms,
      other => Self::Unknown(other),
    }
  }
}

impl Codec for ExtensionType {
  fn encode(&self, bytes: &mut Vec<u8>) { crate::msgs::codec::put_u16(self.as_repr(), bytes); }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> { Ok(Self::from_repr(r.take_u16()?)) }
}

/// EC point formats — only uncompressed is meaningful for x25519 key shares,
/// but the field is still negotiated per RFC 8422.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcPointFormat {
  Uncompressed,
  Unknown(u8),
}

impl Codec for EcPointFormat {
  fn encode(&self, bytes: &mut Vec<u8>) {
    bytes.push(match self {
      Self::Uncompressed => 0,
      Self::Unknown(v) => *v,
    });
  }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    Ok(match r.take_u8()? {
      0 => Self::Uncompressed,
      v => Self::Unknown(v),
    })
  }
}
