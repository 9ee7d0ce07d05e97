//! On-disk envelope layouts.
//!
//! Versioned (written):
//!   `MAGIC "LZ2\0" | salt (16) | nonce (24) | aad_len (u32 LE) | aad | ciphertext+tag`
//!
//! Legacy (read-only):
//!   `salt (16) | nonce (12) | aad_len (u32 LE) | aad | tag (32) | ciphertext`
//!
//! Version detection is by convention: the legacy layout has no magic field, so
//! a buffer whose first four bytes equal `MAGIC` is always read as versioned. A
//! legacy file whose random salt happened to begin with those bytes would be
//! misread; the chance is 2^-32 per file and the detection is kept as is so existing
//! legacy files stay readable.

use crate::crypto::{CryptoError, SALT_LEN};

pub const MAGIC: &[u8; 4] = b"LZ2\0";
pub const NONCE_LEN: usize = 24;
pub const LEGACY_NONCE_LEN: usize = 12;
pub const LEGACY_TAG_LEN: usize = 32;
const AAD_LEN_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Versioned,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEnvelope {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub aad: Vec<u8>,
    /// AEAD output; the tag sits at the tail.
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyEnvelope {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; LEGACY_NONCE_LEN],
    pub aad: Vec<u8>,
    pub tag: [u8; LEGACY_TAG_LEN],
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Versioned(VersionedEnvelope),
    Legacy(LegacyEnvelope),
}

impl Envelope {
    pub fn layout(&self) -> Layout {
        match self {
            Envelope::Versioned(_) => Layout::Versioned,
            Envelope::Legacy(_) => Layout::Legacy,
        }
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        match self {
            Envelope::Versioned(env) => &env.salt,
            Envelope::Legacy(env) => &env.salt,
        }
    }

    pub fn aad(&self) -> &[u8] {
        match self {
            Envelope::Versioned(env) => &env.aad,
            Envelope::Legacy(env) => &env.aad,
        }
    }
}

impl From<VersionedEnvelope> for Envelope {
    fn from(env: VersionedEnvelope) -> Self {
        Envelope::Versioned(env)
    }
}

pub fn encode(env: &VersionedEnvelope) -> Result<Vec<u8>, CryptoError> {
    if env.aad.is_empty() {
        return Err(malformed("refusing to encode empty AAD"));
    }
    if env.ciphertext.is_empty() {
        return Err(malformed("refusing to encode empty ciphertext"));
    }
    let aad_len = u32::try_from(env.aad.len()).map_err(|_| malformed("AAD too long"))?;

    let mut out = Vec::with_capacity(
        MAGIC.len() + SALT_LEN + NONCE_LEN + AAD_LEN_BYTES + env.aad.len() + env.ciphertext.len(),
    );
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&env.salt);
    out.extend_from_slice(&env.nonce);
    out.extend_from_slice(&aad_len.to_le_bytes());
    out.extend_from_slice(&env.aad);
    out.extend_from_slice(&env.ciphertext);
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, CryptoError> {
    match bytes.strip_prefix(MAGIC.as_slice()) {
        Some(rest) => decode_versioned(rest).map(Envelope::Versioned),
        None => decode_legacy(bytes).map(Envelope::Legacy),
    }
}

fn decode_versioned(bytes: &[u8]) -> Result<VersionedEnvelope, CryptoError> {
    let mut reader = Reader::new(bytes);
    let salt = reader.array::<SALT_LEN>("salt")?;
    let nonce = reader.array::<NONCE_LEN>("nonce")?;
    let aad = reader.aad()?;
    let ciphertext = reader.rest();
    if ciphertext.is_empty() {
        return Err(malformed("ciphertext is empty"));
    }
    Ok(VersionedEnvelope {
        salt,
        nonce,
        aad: aad.to_vec(),
        ciphertext: ciphertext.to_vec(),
    })
}

fn decode_legacy(bytes: &[u8]) -> Result<LegacyEnvelope, CryptoError> {
    let mut reader = Reader::new(bytes);
    let salt = reader.array::<SALT_LEN>("salt")?;
    let nonce = reader.array::<LEGACY_NONCE_LEN>("nonce")?;
    let aad = reader.aad()?;
    let tag = reader.array::<LEGACY_TAG_LEN>("tag")?;
    let ciphertext = reader.rest();
    if ciphertext.is_empty() {
        return Err(malformed("ciphertext is empty"));
    }
    Ok(LegacyEnvelope {
        salt,
        nonce,
        aad: aad.to_vec(),
        tag,
        ciphertext: ciphertext.to_vec(),
    })
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], CryptoError> {
        if self.buf.len() < len {
            return Err(CryptoError::MalformedEnvelope(format!(
                "truncated {field}: need {len} bytes, have {}",
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self, field: &str) -> Result<[u8; N], CryptoError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn aad(&mut self) -> Result<&'a [u8], CryptoError> {
        let len = u32::from_le_bytes(self.array::<AAD_LEN_BYTES>("aad length")?) as usize;
        if len == 0 {
            return Err(malformed("AAD is empty"));
        }
        if len > self.buf.len() {
            return Err(CryptoError::MalformedEnvelope(format!(
                "AAD length {len} exceeds remaining {} bytes",
                self.buf.len()
            )));
        }
        self.take(len, "aad")
    }

    fn rest(self) -> &'a [u8] {
        self.buf
    }
}

fn malformed(msg: &str) -> CryptoError {
    CryptoError::MalformedEnvelope(msg.to_string())
}
