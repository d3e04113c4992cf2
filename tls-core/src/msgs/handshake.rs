//! Handshake message bodies and the small extension data model of §4.3/§6.
//!
//! Headers (the 4-byte TLS form and the 12-byte DTLS fragment form) are kept
//! separate from bodies in `HandshakeHeader` — the aggregator in `tls-engine`
//! needs to peek at a header before a body has fully arrived, and DTLS
//! fragment offset/length live purely at that layer.

use crate::error::CodecError;
use crate::msgs::codec::{encode_vec, encode_vec_u8, put_u16, put_u24, read_vec, Codec, Reader};
use crate::msgs::enums::{
  CompressionMethod, EcPointFormat, ExtensionType, HandshakeType, NamedGroup, ProtocolVersion,
  SignatureScheme,
};

pub const RANDOM_LEN: usize = 32;
pub const MAX_SESSION_ID_LEN: usize = 32;
pub const MAX_COOKIE_LEN: usize = 32;
pub const MAX_CIPHER_SUITES: usize = 10;
pub const VERIFY_DATA_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Random(pub [u8; RANDOM_LEN]);

impl Codec for Random {
  fn encode(&self, bytes: &mut Vec<u8>) { bytes.extend_from_slice(&self.0); }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    let mut buf = [0u8; RANDOM_LEN];
    buf.copy_from_slice(r.take(RANDOM_LEN)?);
    Ok(Self(buf))
  }
}

/// A length-prefixed opaque vector bounded by `max_len`, used for SessionID
/// and Cookie, both of which reject oversized input at decode time (§4.3/§8).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoundedOpaque {
  pub bytes: Vec<u8>,
  max_len: usize,
}

impl BoundedOpaque {
  pub fn new(bytes: Vec<u8>, max_len: usize) -> Result<Self, CodecError> {
    if bytes.len() > max_len {
      return Err(CodecError::SizeExceeded(format!("opaque field of {} bytes exceeds {}", bytes.len(), max_len)));
    }
    Ok(Self { bytes, max_len })
  }

  fn decode_with_max(r: &mut Reader, max_len: usize) -> Result<Self, CodecError> {
    let raw = r.take_vec(1)?;
    if raw.len() > max_len {
      return Err(CodecError::SizeExceeded(format!("opaque field of {} bytes exceeds {}", raw.len(), max_len)));
    }
    Ok(Self { bytes: raw.to_vec(), max_len })
  }
}

impl Codec for BoundedOpaque {
  fn encode(&self, bytes: &mut Vec<u8>) { encode_vec_u8(1, &self.bytes, bytes); }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> { Self::decode_with_max(r, MAX_SESSION_ID_LEN) }
}

pub fn decode_session_id(r: &mut Reader) -> Result<BoundedOpaque, CodecError> {
  BoundedOpaque::decode_with_max(r, MAX_SESSION_ID_LEN)
}

pub fn decode_cookie(r: &mut Reader) -> Result<BoundedOpaque, CodecError> {
  BoundedOpaque::decode_with_max(r, MAX_COOKIE_LEN)
}

pub fn session_id(bytes: Vec<u8>) -> Result<BoundedOpaque, CodecError> {
  BoundedOpaque::new(bytes, MAX_SESSION_ID_LEN)
}

pub fn cookie(bytes: Vec<u8>) -> Result<BoundedOpaque, CodecError> {
  BoundedOpaque::new(bytes, MAX_COOKIE_LEN)
}

// === Extensions ==============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientExtension {
  SupportedGroups(Vec<NamedGroup>),
  SignatureAlgorithms(Vec<SignatureScheme>),
  EcPointFormats(Vec<EcPointFormat>),
  Unknown { typ: ExtensionType, data: Vec<u8> },
}

impl ClientExtension {
  fn typ(&self) -> ExtensionType {
    match self {
      Self::SupportedGroups(_) => ExtensionType::SupportedGroups,
      Self::SignatureAlgorithms(_) => ExtensionType::SignatureAlgorithms,
      Self::EcPointFormats(_) => ExtensionType::EcPointFormats,
      Self::Unknown { typ, .. } => *typ,
    }
  }
}

impl Codec for ClientExtension {
  fn encode(&self, bytes: &mut Vec<u8>) {
    self.typ().encode(bytes);
    let mut body = Vec::new();
    match self {
      Self::SupportedGroups(groups) => encode_vec(2, groups, &mut body),
      Self::SignatureAlgorithms(schemes) => encode_vec(2, schemes, &mut body),
      Self::EcPointFormats(formats) => encode_vec(1, formats, &mut body),
      Self::Unknown { data, .. } => body.extend_from_slice(data),
    }
    encode_vec_u8(2, &body, bytes);
  }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    let typ = ExtensionType::decode(r)?;
    let data = r.take_vec(2)?;
    let mut body = Reader::init(data);
    let ext = match typ {
      ExtensionType::SupportedGroups => {
        let groups: Vec<NamedGroup> = read_vec(&mut body, 2)?;
        reject_duplicates(&groups, "supported_groups")?;
        Self::SupportedGroups(groups)
      },
      ExtensionType::SignatureAlgorithms => Self::SignatureAlgorithms(read_vec(&mut body, 2)?),
      ExtensionType::EcPointFormats => Self::EcPointFormats(read_vec(&mut body, 1)?),
      ExtensionType::Unknown(_) => Self::Unknown { typ, data: data.to_vec() },
    };
    body.expect_exhausted()?;
    Ok(ext)
  }
}

fn reject_duplicates<T: PartialEq + std::fmt::Debug>(items: &[T], field: &str) -> Result<(), CodecError> {
  for i in 0..items.len() {
    for j in (i + 1)..items.len() {
      if items[i] == items[j] {
        return Err(CodecError::DuplicateEntry(field.to_string()));
      }
    }
  }
  Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerExtension {
  EcPointFormats(Vec<EcPointFormat>),
  Unknown { typ: ExtensionType, data: Vec<u8> },
}

impl ServerExtension {
  fn typ(&self) -> ExtensionType {
    match self {
      Self::EcPointFormats(_) => ExtensionType::EcPointFormats,
      Self::Unknown { typ, .. } => *typ,
    }
  }
}

impl Codec for ServerExtension {
  fn encode(&self, bytes: &mut Vec<u8>) {
    self.typ().encode(bytes);
    let mut body = Vec::new();
    match self {
      Self::EcPointFormats(formats) => encode_vec(1, formats, &mut body),
      Self::Unknown { data, .. } => body.extend_from_slice(data),
    }
    encode_vec_u8(2, &body, bytes);
  }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    let typ = ExtensionType::decode(r)?;
    let data = r.take_vec(2)?;
    let mut body = Reader::init(data);
    let ext = match typ {
      ExtensionType::EcPointFormats => Self::EcPointFormats(read_vec(&mut body, 1)?),
      _ => Self::Unknown { typ, data: data.to_vec() },
    };
    body.expect_exhausted()?;
    Ok(ext)
  }
}

// === ClientHello / ServerHello ==============================================

/// Raw cipher-suite identifiers, as offered/selected on the wire (§6 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuiteId(pub u16);

impl Codec for CipherSuiteId {
  fn encode(&self, bytes: &mut Vec<u8>) { put_u16(self.0, bytes); }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> { Ok(Self(r.take_u16()?)) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloPayload {
  pub client_version: ProtocolVersion,
  pub random: Random,
  pub session_id: BoundedOpaque,
  /// Only present (and exactly one cookie field) for DTLS; empty for TLS.
  pub cookie: Option<BoundedOpaque>,
  pub cipher_suites: Vec<CipherSuiteId>,
  pub compression_methods: Vec<CompressionMethod>,
  pub extensions: Vec<ClientExtension>,
}

impl ClientHelloPayload {
  pub fn get_extension(&self, want: ExtensionType) -> Option<&ClientExtension> {
    self.extensions.iter().find(|e| match e {
      ClientExtension::Unknown { typ, .. } => *typ == want,
      other => other.typ() == want,
    })
  }

  /// Bytes contributed to the HelloVerifyRequest cookie MAC: everything
  /// except the cookie field itself (RFC 6347 §4.2.1).
  pub fn encode_for_cookie(&self) -> Vec<u8> {
    let mut out = Vec::new();
    self.client_version.encode(&mut out);
    self.random.encode(&mut out);
    self.session_id.encode(&mut out);
    encode_vec(2, &self.cipher_suites, &mut out);
    encode_vec(1, &self.compression_methods, &mut out);
    let mut ext_body = Vec::new();
    for e in &self.extensions {
      e.encode(&mut ext_body);
    }
    encode_vec_u8(2, &ext_body, &mut out);
    out
  }
}

impl Codec for ClientHelloPayload {
  fn encode(&self, bytes: &mut Vec<u8>) {
    self.client_version.encode(bytes);
    self.random.encode(bytes);
    self.session_id.encode(bytes);
    if let Some(cookie) = &self.cookie {
      cookie.encode(bytes);
    }
    // Constructing an over-long offer is a caller bug, not a wire error;
    // truncate defensively so `encode` never writes something `decode`
    // would reject (§4.3 contract).
    let cipher_suites = if self.cipher_suites.len() > MAX_CIPHER_SUITES {
      &self.cipher_suites[..MAX_CIPHER_SUITES]
    } else {
      &self.cipher_suites[..]
    };
    encode_vec(2, cipher_suites, bytes);
    encode_vec(1, &self.compression_methods, bytes);
    let mut ext_body = Vec::new();
    for e in &self.extensions {
      e.encode(&mut ext_body);
    }
    encode_vec_u8(2, &ext_body, bytes);
  }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    let client_version = ProtocolVersion::decode(r)?;
    let random = Random::decode(r)?;
    let session_id = decode_session_id(r)?;
    let cookie = if client_version.is_dtls() { Some(decode_cookie(r)?) } else { None };
    let cipher_suites: Vec<CipherSuiteId> = read_vec(r, 2)?;
    if cipher_suites.len() > MAX_CIPHER_SUITES {
      return Err(CodecError::SizeExceeded("cipher_suites exceeds local policy limit".into()));
    }
    let compression_methods: Vec<CompressionMethod> = read_vec(r, 1)?;
    let extensions: Vec<ClientExtension> = if r.any_left() {
      let data = r.take_vec(2)?;
      let mut sub = Reader::init(data);
      let mut out = Vec::new();
      while sub.any_left() {
        out.push(ClientExtension::decode(&mut sub)?);
      }
      out
    } else {
      Vec::new()
    };
    Ok(Self { client_version, random, session_id, cookie, cipher_suites, compression_methods, extensions })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHelloPayload {
  pub server_version: ProtocolVersion,
  pub random: Random,
  pub session_id: BoundedOpaque,
  pub cipher_suite: CipherSuiteId,
  pub compression_method: CompressionMethod,
  pub extensions: Vec<ServerExtension>,
}

impl Codec for ServerHelloPayload {
  fn encode(&self, bytes: &mut Vec<u8>) {
    self.server_version.encode(bytes);
    self.random.encode(bytes);
    self.session_id.encode(bytes);
    self.cipher_suite.encode(bytes);
    self.compression_method.encode(bytes);
    let mut ext_body = Vec::new();
    for e in &self.extensions {
      e.encode(&mut ext_body);
    }
    encode_vec_u8(2, &ext_body, bytes);
  }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    let server_version = ProtocolVersion::decode(r)?;
    let random = Random::decode(r)?;
    let session_id = decode_session_id(r)?;
    let cipher_suite = CipherSuiteId::decode(r)?;
    let compression_method = CompressionMethod::decode(r)?;
    let extensions: Vec<ServerExtension> = if r.any_left() {
      let data = r.take_vec(2)?;
      let mut sub = Reader::init(data);
      let mut out = Vec::new();
      while sub.any_left() {
        out.push(ServerExtension::decode(&mut sub)?);
      }
      out
    } else {
      Vec::new()
    };
    Ok(Self { server_version, random, session_id, cipher_suite, compression_method, extensions })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloVerifyRequestPayload {
  pub server_version: ProtocolVersion,
  pub cookie: BoundedOpaque,
}

impl Codec for HelloVerifyRequestPayload {
  fn encode(&self, bytes: &mut Vec<u8>) {
    self.server_version.encode(bytes);
    self.cookie.encode(bytes);
  }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    Ok(Self { server_version: ProtocolVersion::decode(r)?, cookie: decode_cookie(r)? })
  }
}

// === Certificate chain =======================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificatePayload(pub Vec<Vec<u8>>);

impl Codec for CertificatePayload {
  fn encode(&self, bytes: &mut Vec<u8>) {
    let mut body = Vec::new();
    for cert in &self.0 {
      encode_vec_u8(3, cert, &mut body);
    }
    encode_vec_u8(3, &body, bytes);
  }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    let data = r.take_vec(3)?;
    let mut sub = Reader::init(data);
    let mut certs = Vec::new();
    while sub.any_left() {
      certs.push(sub.take_vec(3)?.to_vec());
    }
    Ok(Self(certs))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequestPayload {
  pub certificate_types: Vec<u8>,
  pub supported_signature_algorithms: Vec<SignatureScheme>,
}

impl Codec for CertificateRequestPayload {
  fn encode(&self, bytes: &mut Vec<u8>) {
    encode_vec_u8(1, &self.certificate_types, bytes);
    encode_vec(2, &self.supported_signature_algorithms, bytes);
    put_u16(0, bytes); // certificate_authorities: always empty, not modeled
  }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    let certificate_types = r.take_vec(1)?.to_vec();
    let supported_signature_algorithms = read_vec(r, 2)?;
    let _authorities = r.take_vec(2)?;
    Ok(Self { certificate_types, supported_signature_algorithms })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerifyPayload {
  pub scheme: SignatureScheme,
  pub signature: Vec<u8>,
}

impl Codec for CertificateVerifyPayload {
  fn encode(&self, bytes: &mut Vec<u8>) {
    self.scheme.encode(bytes);
    encode_vec_u8(2, &self.signature, bytes);
  }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    Ok(Self { scheme: SignatureScheme::decode(r)?, signature: r.take_vec(2)?.to_vec() })
  }
}

// === Key exchange =============================================================

/// `ServerKeyExchange`. PSK suites send only an identity hint; ECDHE suites
/// send an ephemeral x25519 public key signed with the leaf's Ed25519 key
/// over `client_random || server_random || ECParams || public_key` (§4.4 step 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerKeyExchangePayload {
  Psk { identity_hint: Vec<u8> },
  Dh { named_group: NamedGroup, public_key: Vec<u8>, scheme: SignatureScheme, signature: Vec<u8> },
}

impl ServerKeyExchangePayload {
  /// The `ECParams` bytes covered by the signature: curve_type(1)=named_curve(3) || named_group(2).
  pub fn ec_params(named_group: NamedGroup) -> Vec<u8> {
    let mut out = vec![3u8]; // ECCurveType::named_curve
    named_group.encode(&mut out);
    out
  }

  pub fn encode(&self, bytes: &mut Vec<u8>) {
    match self {
      Self::Psk { identity_hint } => encode_vec_u8(2, identity_hint, bytes),
      Self::Dh { named_group, public_key, scheme, signature } => {
        bytes.extend_from_slice(&Self::ec_params(*named_group));
        encode_vec_u8(1, public_key, bytes);
        scheme.encode(bytes);
        encode_vec_u8(2, signature, bytes);
      },
    }
  }

  pub fn decode_psk(r: &mut Reader) -> Result<Self, CodecError> {
    Ok(Self::Psk { identity_hint: r.take_vec(2)?.to_vec() })
  }

  pub fn decode_dh(r: &mut Reader) -> Result<Self, CodecError> {
    let curve_type = r.take_u8()?;
    if curve_type != 3 {
      return Err(CodecError::InvalidValue("ServerKeyExchange curve_type must be named_curve".into()));
    }
    let named_group = NamedGroup::decode(r)?;
    let public_key = r.take_vec(1)?.to_vec();
    let scheme = SignatureScheme::decode(r)?;
    let signature = r.take_vec(2)?.to_vec();
    Ok(Self::Dh { named_group, public_key, scheme, signature })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerHelloDonePayload;

impl Codec for ServerHelloDonePayload {
  fn encode(&self, _bytes: &mut Vec<u8>) {}

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    r.expect_exhausted()?;
    Ok(Self)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientKeyExchangePayload {
  Psk { identity: Vec<u8> },
  Dh { public_key: Vec<u8> },
}

impl ClientKeyExchangePayload {
  pub fn encode(&self, bytes: &mut Vec<u8>) {
    match self {
      Self::Psk { identity } => encode_vec_u8(2, identity, bytes),
      Self::Dh { public_key } => encode_vec_u8(1, public_key, bytes),
    }
  }

  pub fn decode_psk(r: &mut Reader) -> Result<Self, CodecError> {
    Ok(Self::Psk { identity: r.take_vec(2)?.to_vec() })
  }

  pub fn decode_dh(r: &mut Reader) -> Result<Self, CodecError> {
    Ok(Self::Dh { public_key: r.take_vec(1)?.to_vec() })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedPayload {
  pub verify_data: Vec<u8>,
}

impl Codec for FinishedPayload {
  fn encode(&self, bytes: &mut Vec<u8>) { bytes.extend_from_slice(&self.verify_data); }

  fn decode(r: &mut Reader) -> Result<Self, CodecError> {
    Ok(Self { verify_data: r.take(VERIFY_DATA_LEN)?.to_vec() })
  }
}

// === Top-level message envelope =============================================

/// Which key-exchange flavor a message belongs to, needed because PSK and DH
/// bodies of `ServerKeyExchange`/`ClientKeyExchange` are not distinguishable
/// from their bytes alone — the negotiated cipher suite picks the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexFlavor {
  Psk,
  Dh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakePayload {
  ClientHello(ClientHelloPayload),
  ServerHello(ServerHelloPayload),
  HelloVerifyRequest(HelloVerifyRequestPayload),
  Certificate(CertificatePayload),
  CertificateRequest(CertificateRequestPayload),
  CertificateVerify(CertificateVerifyPayload),
  ServerKeyExchange(ServerKeyExchangePayload),
  ServerHelloDone(ServerHelloDonePayload),
  ClientKeyExchange(ClientKeyExchangePayload),
  Finished(FinishedPayload),
}

impl HandshakePayload {
  pub fn typ(&self) -> HandshakeType {
    match self {
      Self::ClientHello(_) => HandshakeType::ClientHello,
      Self::ServerHello(_) => HandshakeType::ServerHello,
      Self::HelloVerifyRequest(_) => HandshakeType::HelloVerifyRequest,
      Self::Certificate(_) => HandshakeType::Certificate,
      Self::CertificateRequest(_) => HandshakeType::CertificateRequest,
      Self::CertificateVerify(_) => HandshakeType::CertificateVerify,
      Self::ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
      Self::ServerHelloDone(_) => HandshakeType::ServerHelloDone,
      Self::ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
      Self::Finished(_) => HandshakeType::Finished,
    }
  }

  pub fn encode(&self, bytes: &mut Vec<u8>) {
    match self {
      Self::ClientHello(p) => p.encode(bytes),
      Self::ServerHello(p) => p.encode(bytes),
      Self::HelloVerifyRequest(p) => p.encode(bytes),
      Self::Certificate(p) => p.encode(bytes),
      Self::CertificateRequest(p) => p.encode(bytes),
      Self::CertificateVerify(p) => p.encode(bytes),
      Self::ServerKeyExchange(p) => p.encode(bytes),
      Self::ServerHelloDone(p) => p.encode(bytes),
      Self::ClientKeyExchange(p) => p.encode(bytes),
      Self::Finished(p) => p.encode(bytes),
    }
  }

  /// Decodes a reassembled body. `kex` disambiguates `ServerKeyExchange` and
  /// `ClientKeyExchange`, whose wire shape depends on the negotiated suite.
  pub fn decode(typ: HandshakeType, kex: Option<KexFlavor>, r: &mut Reader) -> Result<Self, CodecError> {
    let payload = match typ {
      HandshakeType::ClientHello => Self::ClientHello(ClientHelloPayload::decode(r)?),
      HandshakeType::ServerHello => Self::ServerHello(ServerHelloPayload::decode(r)?),
      HandshakeType::HelloVerifyRequest => Self::HelloVerifyRequest(HelloVerifyRequestPayload::decode(r)?),
      HandshakeType::Certificate => Self::Certificate(CertificatePayload::decode(r)?),
      HandshakeType::CertificateRequest => Self::CertificateRequest(CertificateRequestPayload::decode(r)?),
      HandshakeType::CertificateVerify => Self::CertificateVerify(CertificateVerifyPayload::decode(r)?),
      HandshakeType::ServerKeyExchange => {
        let kex = kex.ok_or_else(|| CodecError::InvalidValue("ServerKeyExchange needs a known kex flavor".into()))?;
        Self::ServerKeyExchange(match kex {
          KexFlavor::Psk => ServerKeyExchangePayload::decode_psk(r)?,
          KexFlavor::Dh => ServerKeyExchangePayload::decode_dh(r)?,
        })
      },
      HandshakeType::ServerHelloDone => Self::ServerHelloDone(ServerHelloDonePayload::decode(r)?),
      HandshakeType::ClientKeyExchange => {
        let kex = kex.ok_or_else(|| CodecError::InvalidValue("ClientKeyExchange needs a known kex flavor".into()))?;
        Self::ClientKeyExchange(match kex {
          KexFlavor::Psk => ClientKeyExchangePayload::decode_psk(r)?,
          KexFlavor::Dh => ClientKeyExchangePayload::decode_dh(r)?,
        })
      },
      HandshakeType::Finished => Self::Finished(FinishedPayload::decode(r)?),
      other => return Err(CodecError::InvalidValue(format!("unsupported handshake type {other:?}"))),
    };
    r.expect_exhausted()?;
    Ok(payload)
  }
}

/// The 4-byte TLS or 12-byte DTLS handshake header (§6), kept separate from
/// the body so the aggregator can peek at it before the body has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeHeader {
  pub typ: HandshakeType,
  pub length: u32,
  /// Meaningful on the wire only for DTLS; tracked internally for TLS too
  /// so the transcript and aggregator share one sequencing model (§3).
  pub message_seq: u16,
  pub fragment_offset: u32,
  pub fragment_length: u32,
}

impl HandshakeHeader {
  pub const TLS_LEN: usize = 4;
  pub const DTLS_LEN: usize = 12;

  pub fn whole(typ: HandshakeType, length: u32, message_seq: u16) -> Self {
    Self { typ, length, message_seq, fragment_offset: 0, fragment_length: length }
  }

  pub fn encode_tls(&self, bytes: &mut Vec<u8>) {
    self.typ.encode(bytes);
    put_u24(self.length, bytes);
  }

  pub fn encode_dtls(&self, bytes: &mut Vec<u8>) {
    self.typ.encode(bytes);
    put_u24(self.length, bytes);
    put_u16(self.message_seq, bytes);
    put_u24(self.fragment_offset, bytes);
    put_u24(self.fragment_length, bytes);
  }

  pub fn decode_tls(r: &mut Reader) -> Result<Self, CodecError> {
    let typ = HandshakeType::decode(r)?;
    let length = r.take_u24()?;
    Ok(Self::whole(typ, length, 0))
  }

  pub fn decode_dtls(r: &mut Reader) -> Result<Self, CodecError> {
    let typ = HandshakeType::decode(r)?;
    let length = r.take_u24()?;
    let message_seq = r.take_u16()?;
    let fragment_offset = r.take_u24()?;
    let fragment_length = r.take_u24()?;
    Ok(Self { typ, length, message_seq, fragment_offset, fragment_length })
  }
}

/// A fully reassembled handshake message, ready for the transcript and the
/// state machine. `message_seq` always reflects the logical handshake
/// ordering, synthesized for TLS and taken from the wire for DTLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
  pub message_seq: u16,
  pub payload: HandshakePayload,
}

impl HandshakeMessage {
  pub fn encode_tls(&self) -> Vec<u8> {
    let mut body = Vec::new();
    self.payload.encode(&mut body);
    let header = HandshakeHeader::whole(self.payload.typ(), body.len() as u32, self.message_seq);
    let mut out = Vec::new();
    header.encode_tls(&mut out);
    out.extend_from_slice(&body);
    out
  }

  pub fn encode_dtls(&self) -> Vec<u8> {
    let mut body = Vec::new();
    self.payload.encode(&mut body);
    let header = HandshakeHeader::whole(self.payload.typ(), body.len() as u32, self.message_seq);
    let mut out = Vec::new();
    header.encode_dtls(&mut out);
    out.extend_from_slice(&body);
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client_hello_with(cipher_suites: Vec<CipherSuiteId>) -> ClientHelloPayload {
    ClientHelloPayload {
      client_version: ProtocolVersion::TLS1_2,
      random: Random([0u8; RANDOM_LEN]),
      session_id: BoundedOpaque::new(Vec::new(), MAX_SESSION_ID_LEN).unwrap(),
      cookie: None,
      cipher_suites,
      compression_methods: vec![CompressionMethod::Null],
      extensions: Vec::new(),
    }
  }

  #[test]
  fn encode_truncates_an_over_long_cipher_suite_offer() {
    let suites: Vec<CipherSuiteId> = (0..MAX_CIPHER_SUITES as u16 + 5).map(CipherSuiteId).collect();
    let hello = client_hello_with(suites.clone());

    let mut bytes = Vec::new();
    hello.encode(&mut bytes);
    let decoded = ClientHelloPayload::decode(&mut Reader::init(&bytes)).expect("decode must accept the truncated offer");

    assert_eq!(decoded.cipher_suites.len(), MAX_CIPHER_SUITES);
    assert_eq!(decoded.cipher_suites, &suites[..MAX_CIPHER_SUITES]);
  }
}
