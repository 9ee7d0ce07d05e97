//! Password key derivation.
//!
//! `argon2id` is the primary, memory-hard derivation. `iterated_sha256` is the
//! fallback: a plain hash chain with no memory hardness, kept only so a build
//! without Argon2 can still open and write stores.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::{CryptoError, DerivedKey, KEY_LEN};

pub const SALT_LEN: usize = 16;

pub const DEFAULT_TIME_COST: u32 = 10;
pub const DEFAULT_MEMORY_COST_KIB: u32 = 65536; // 64 MiB
pub const DEFAULT_PARALLELISM: u32 = 1;
pub const DEFAULT_FALLBACK_ITERATIONS: u32 = 1000;

// Upper bounds for parameters read back from an envelope's AAD.
pub const MAX_TIME_COST: u32 = 16;
pub const MAX_MEMORY_COST_KIB: u32 = 1024 * 1024; // 1 GiB
pub const MAX_PARALLELISM: u32 = 16;
pub const MAX_FALLBACK_ITERATIONS: u32 = 10_000_000;

/// Envelope costs may exceed `max(configured, default)` by at most this factor.
pub const ENVELOPE_COST_FACTOR: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub time_cost: u32,
    pub memory_cost_kib: u32,
    pub parallelism: u32,
    pub fallback_iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            time_cost: DEFAULT_TIME_COST,
            memory_cost_kib: DEFAULT_MEMORY_COST_KIB,
            parallelism: DEFAULT_PARALLELISM,
            fallback_iterations: DEFAULT_FALLBACK_ITERATIONS,
        }
    }
}

impl KdfParams {
    /// Minimal cost settings. Only for tests and throwaway stores.
    pub fn fast_insecure() -> Self {
        Self {
            time_cost: 1,
            memory_cost_kib: 1024,
            parallelism: 1,
            fallback_iterations: 10,
        }
    }

    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.time_cost == 0 || self.time_cost > MAX_TIME_COST {
            return Err(CryptoError::InvalidParameters(format!(
                "time cost {} outside 1..={MAX_TIME_COST}",
                self.time_cost
            )));
        }
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(CryptoError::InvalidParameters(format!(
                "parallelism {} outside 1..={MAX_PARALLELISM}",
                self.parallelism
            )));
        }
        if self.memory_cost_kib < 8 * self.parallelism || self.memory_cost_kib > MAX_MEMORY_COST_KIB
        {
            return Err(CryptoError::InvalidParameters(format!(
                "memory cost {} KiB outside {}..={MAX_MEMORY_COST_KIB}",
                self.memory_cost_kib,
                8 * self.parallelism
            )));
        }
        if self.fallback_iterations == 0 || self.fallback_iterations > MAX_FALLBACK_ITERATIONS {
            return Err(CryptoError::InvalidParameters(format!(
                "fallback iterations {} outside 1..={MAX_FALLBACK_ITERATIONS}",
                self.fallback_iterations
            )));
        }
        Ok(())
    }

    /// Highest cost this configuration accepts from an envelope it opens.
    pub fn envelope_ceiling(&self) -> KdfParams {
        let defaults = KdfParams::default();
        let cap = |configured: u32, default: u32, max: u32| {
            configured
                .max(default)
                .saturating_mul(ENVELOPE_COST_FACTOR)
                .min(max)
        };
        KdfParams {
            time_cost: cap(self.time_cost, defaults.time_cost, MAX_TIME_COST),
            memory_cost_kib: cap(
                self.memory_cost_kib,
                defaults.memory_cost_kib,
                MAX_MEMORY_COST_KIB,
            ),
            parallelism: cap(self.parallelism, defaults.parallelism, MAX_PARALLELISM),
            fallback_iterations: cap(
                self.fallback_iterations,
                defaults.fallback_iterations,
                MAX_FALLBACK_ITERATIONS,
            ),
        }
    }

    /// Checked before any derivation: the AAD is only authenticated after the
    /// key has been derived with the costs it names.
    pub fn check_envelope_cost(&self, found: &KdfParams) -> Result<(), CryptoError> {
        let ceiling = self.envelope_ceiling();
        let checks = [
            ("time cost", found.time_cost, ceiling.time_cost),
            ("memory cost", found.memory_cost_kib, ceiling.memory_cost_kib),
            ("parallelism", found.parallelism, ceiling.parallelism),
            ("fallback iterations", found.fallback_iterations, ceiling.fallback_iterations),
        ];
        for (name, value, max) in checks {
            if value > max {
                return Err(CryptoError::MalformedEnvelope(format!(
                    "envelope {name} {value} exceeds accepted maximum {max}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(feature = "argon2")]
pub fn argon2id(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<DerivedKey, CryptoError> {
    use argon2::{Algorithm, Argon2, Params, Version};

    let argon_params = Params::new(
        params.memory_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| CryptoError::InvalidParameters(format!("argon2 params: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon
        .hash_password_into(password, salt, key.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(format!("argon2 derive: {e}")))?;
    Ok(key)
}

#[cfg(not(feature = "argon2"))]
pub fn argon2id(
    _password: &[u8],
    _salt: &[u8; SALT_LEN],
    _params: &KdfParams,
) -> Result<DerivedKey, CryptoError> {
    Err(CryptoError::BackendUnavailable(super::Backend::Primary))
}

/// `h0 = SHA256(salt || pw)`, `h_i = SHA256(h_{i-1} || salt || pw)`.
pub fn iterated_sha256(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    iterations: u32,
) -> Result<DerivedKey, CryptoError> {
    if iterations == 0 {
        return Err(CryptoError::InvalidParameters(
            "fallback iterations must be non-zero".to_string(),
        ));
    }
    let mut state = Zeroizing::new([0u8; KEY_LEN]);
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password);
    state.copy_from_slice(&hasher.finalize());
    for _ in 1..iterations {
        let mut hasher = Sha256::new();
        hasher.update(state.as_ref());
        hasher.update(salt);
        hasher.update(password);
        state.copy_from_slice(&hasher.finalize());
    }
    Ok(state)
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}
