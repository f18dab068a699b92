//! AES-256-GCM page transform. Each page's reserved trailer holds a 12-byte
//! nonce, a 16-byte tag, and a 4-byte format version (default trailer size
//! 32 bytes); AAD is the page number, big-endian, so a page cannot be
//! silently swapped with another page's ciphertext.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::{Error, ErrorContext, Result};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const VERSION_LEN: usize = 4;
pub const DEFAULT_TRAILER_LEN: usize = NONCE_LEN + TAG_LEN + VERSION_LEN;
const FORMAT_VERSION: u32 = 1;

pub struct PageCipher {
    cipher: Aes256Gcm,
    trailer_len: usize,
}

impl PageCipher {
    pub fn new(key: [u8; 32], trailer_len: usize) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        PageCipher { cipher, trailer_len }
    }

    fn aad(page_number: u32) -> [u8; 4] {
        page_number.to_be_bytes()
    }

    /// Encrypts `plaintext` (the page body, sans trailer), returning
    /// `ciphertext || nonce || tag || version`, sized to fill exactly
    /// `trailer_len` bytes past the ciphertext.
    pub fn encrypt(&self, page_number: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let aad = Self::aad(page_number);
        let sealed = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| {
                Error::crypto(
                    "page encryption failed",
                    ErrorContext::new("encrypt page").at_page(page_number),
                )
            })?;
        // `aes-gcm` appends the 16-byte tag to the ciphertext already.
        let ciphertext_len = sealed.len() - TAG_LEN;
        let mut out = Vec::with_capacity(plaintext.len() + self.trailer_len);
        out.extend_from_slice(&sealed[..ciphertext_len]);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed[ciphertext_len..]);
        out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        Ok(out)
    }

    /// Reverses `encrypt`: `sealed` is `ciphertext || nonce || tag ||
    /// version`. Fails with `SharcCrypto` on tag mismatch.
    pub fn decrypt(&self, page_number: u32, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < self.trailer_len {
            return Err(Error::corrupt_page(
                "page shorter than the encryption trailer",
                ErrorContext::new("decrypt page").at_page(page_number),
            ));
        }
        let ciphertext_len = sealed.len() - self.trailer_len;
        let ciphertext = &sealed[..ciphertext_len];
        let nonce_bytes = &sealed[ciphertext_len..ciphertext_len + NONCE_LEN];
        let tag = &sealed[ciphertext_len + NONCE_LEN..ciphertext_len + NONCE_LEN + TAG_LEN];

        let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        combined.extend_from_slice(ciphertext);
        combined.extend_from_slice(tag);

        let nonce = Nonce::from_slice(nonce_bytes);
        let aad = Self::aad(page_number);
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &combined,
                    aad: &aad,
                },
            )
            .map_err(|_| {
                Error::crypto(
                    "page authentication tag mismatch",
                    ErrorContext::new("decrypt page").at_page(page_number),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> PageCipher {
        PageCipher::new([7u8; 32], DEFAULT_TRAILER_LEN)
    }

    #[test]
    fn round_trips_a_page() {
        let c = cipher();
        let plaintext = vec![0xAB; 4096 - DEFAULT_TRAILER_LEN];
        let sealed = c.encrypt(5, &plaintext).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + DEFAULT_TRAILER_LEN);
        let opened = c.decrypt(5, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn wrong_page_number_as_aad_fails_to_decrypt() {
        let c = cipher();
        let plaintext = vec![0x11; 100];
        let sealed = c.encrypt(5, &plaintext).unwrap();
        assert!(c.decrypt(6, &sealed).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let c = cipher();
        let plaintext = vec![0x22; 100];
        let mut sealed = c.encrypt(9, &plaintext).unwrap();
        sealed[0] ^= 0xff;
        assert!(c.decrypt(9, &sealed).is_err());
    }

    #[test]
    fn fresh_nonce_each_call_changes_ciphertext() {
        let c = cipher();
        let plaintext = vec![0x33; 64];
        let a = c.encrypt(1, &plaintext).unwrap();
        let b = c.encrypt(1, &plaintext).unwrap();
        assert_ne!(a, b);
    }
}
