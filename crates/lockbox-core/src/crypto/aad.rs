//! Associated data bound to every snapshot envelope.
//!
//! Format: `lockbox/snapshot/v2;alg=<tag>;k=v;...`
//!
//! The AAD names the envelope's purpose, the algorithm that sealed it and the
//! cost parameters needed to re-derive its key. It is authenticated but not
//! encrypted: editing it on disk makes decryption fail.

use std::str;

use super::kdf::KdfParams;
use super::CryptoError;

pub const PURPOSE: &str = "lockbox/snapshot/v2";

const TAG_PRIMARY: &str = "argon2id-xchacha20poly1305";
const TAG_FALLBACK: &str = "sha256iter-xchacha20-hmacsha256";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Argon2idXChaCha20Poly1305,
    Sha256IterXChaCha20HmacSha256,
}

impl Algorithm {
    pub fn tag(self) -> &'static str {
        match self {
            Algorithm::Argon2idXChaCha20Poly1305 => TAG_PRIMARY,
            Algorithm::Sha256IterXChaCha20HmacSha256 => TAG_FALLBACK,
        }
    }

    fn from_tag(tag: &str) -> Result<Self, CryptoError> {
        match tag {
            TAG_PRIMARY => Ok(Algorithm::Argon2idXChaCha20Poly1305),
            TAG_FALLBACK => Ok(Algorithm::Sha256IterXChaCha20HmacSha256),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AadInfo {
    pub algorithm: Algorithm,
    pub params: KdfParams,
}

pub fn build(algorithm: Algorithm, params: &KdfParams) -> Vec<u8> {
    let cost = match algorithm {
        Algorithm::Argon2idXChaCha20Poly1305 => format!(
            "t={};m={};p={}",
            params.time_cost, params.memory_cost_kib, params.parallelism
        ),
        Algorithm::Sha256IterXChaCha20HmacSha256 => format!("i={}", params.fallback_iterations),
    };
    format!("{PURPOSE};alg={};{cost}", algorithm.tag()).into_bytes()
}

pub fn parse(aad: &[u8]) -> Result<AadInfo, CryptoError> {
    let text = str::from_utf8(aad).map_err(|_| malformed("AAD is not UTF-8"))?;
    let mut parts = text.split(';');
    if parts.next() != Some(PURPOSE) {
        return Err(malformed("AAD purpose label not recognised"));
    }

    let mut algorithm = None;
    let mut params = KdfParams::default();
    for part in parts {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| malformed("AAD field without '='"))?;
        match key {
            "alg" => algorithm = Some(Algorithm::from_tag(value)?),
            "t" => params.time_cost = parse_u32(value)?,
            "m" => params.memory_cost_kib = parse_u32(value)?,
            "p" => params.parallelism = parse_u32(value)?,
            "i" => params.fallback_iterations = parse_u32(value)?,
            _ => return Err(malformed("unknown AAD field")),
        }
    }
    let algorithm = algorithm.ok_or_else(|| malformed("AAD has no algorithm tag"))?;
    params
        .validate()
        .map_err(|e| CryptoError::MalformedEnvelope(format!("AAD cost parameters: {e}")))?;
    Ok(AadInfo { algorithm, params })
}

/// Iteration count for a legacy envelope. Legacy AAD is free-form, so anything
/// that does not carry a usable `i=` at or below `max` falls back to the default.
pub fn legacy_iterations(aad: &[u8], max: u32) -> u32 {
    str::from_utf8(aad)
        .ok()
        .and_then(|text| {
            text.split(';')
                .filter_map(|part| part.strip_prefix("i="))
                .find_map(|v| v.parse::<u32>().ok())
        })
        .filter(|&i| i > 0 && i <= max)
        .unwrap_or(super::kdf::DEFAULT_FALLBACK_ITERATIONS)
}

fn parse_u32(value: &str) -> Result<u32, CryptoError> {
    value
        .parse()
        .map_err(|_| malformed("AAD cost parameter is not a number"))
}

fn malformed(msg: &str) -> CryptoError {
    CryptoError::MalformedEnvelope(msg.to_string())
}
