//! Argon2id key derivation: password + caller-supplied salt -> 32-byte key.

use argon2::{Algorithm, Argon2, Params, Version};

use crate::error::{Error, ErrorContext, Result};

/// Memory cost (KiB), time cost (iterations), and parallelism for Argon2id.
/// Defaults follow the Argon2 crate's own recommended minimums, adjustable
/// by the caller at `open` time.
#[derive(Debug, Clone, Copy)]
pub struct KdfParams {
    pub memory_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        KdfParams {
            memory_cost_kib: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

/// Derives a 32-byte AES-256 key from `password` and `salt` using Argon2id.
pub fn derive_key(password: &[u8], salt: &[u8], params: KdfParams) -> Result<[u8; 32]> {
    let argon2_params = Params::new(
        params.memory_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| {
        Error::argument_error(format!("invalid Argon2id parameters: {e}"))
    })?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| {
            Error::crypto(
                format!("key derivation failed: {e}"),
                ErrorContext::new("derive page encryption key"),
            )
        })?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_derive_same_key() {
        let a = derive_key(b"hunter2", b"0123456789abcdef", KdfParams::default()).unwrap();
        let b = derive_key(b"hunter2", b"0123456789abcdef", KdfParams::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_salts_derive_different_keys() {
        let a = derive_key(b"hunter2", b"0123456789abcdef", KdfParams::default()).unwrap();
        let b = derive_key(b"hunter2", b"fedcba9876543210", KdfParams::default()).unwrap();
        assert_ne!(a, b);
    }
}
