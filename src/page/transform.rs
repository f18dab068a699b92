//! Reversible per-page transforms layered on top of a `PageSource`.

use crate::crypto::page_cipher::PageCipher;
use crate::error::Result;

/// The database header's first 16 bytes (the magic string) are never
/// encrypted, so the file is always identifiable; everything else on page 1
/// and all of pages >= 2 pass through the transform.
const UNENCRYPTED_PREFIX: usize = 16;

/// A closed set of page transforms.
pub enum PageTransform {
    Identity,
    Decrypting(PageCipher),
}

impl PageTransform {
    /// Returns `raw_bytes` as the caller logically sees them. For
    /// `Identity` this is a zero-cost passthrough; for `Decrypting`, the
    /// unencrypted prefix is copied as-is and the remainder is decrypted.
    pub fn apply(&self, page_number: u32, raw_bytes: &[u8]) -> Result<Vec<u8>> {
        match self {
            PageTransform::Identity => Ok(raw_bytes.to_vec()),
            PageTransform::Decrypting(cipher) => {
                if page_number == 1 {
                    let mut out = raw_bytes[..UNENCRYPTED_PREFIX].to_vec();
                    out.extend(cipher.decrypt(page_number, &raw_bytes[UNENCRYPTED_PREFIX..])?);
                    Ok(out)
                } else {
                    cipher.decrypt(page_number, raw_bytes)
                }
            }
        }
    }

    /// Encodes `page_bytes` (as the caller sees them) back to the form that
    /// belongs on disk. Used by the writer when flushing a dirty page.
    pub fn unapply(&self, page_number: u32, page_bytes: &[u8]) -> Result<Vec<u8>> {
        match self {
            PageTransform::Identity => Ok(page_bytes.to_vec()),
            PageTransform::Decrypting(cipher) => {
                if page_number == 1 {
                    let mut out = page_bytes[..UNENCRYPTED_PREFIX].to_vec();
                    out.extend(cipher.encrypt(page_number, &page_bytes[UNENCRYPTED_PREFIX..])?);
                    Ok(out)
                } else {
                    cipher.encrypt(page_number, page_bytes)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_a_passthrough() {
        let bytes = vec![1, 2, 3, 4];
        let t = PageTransform::Identity;
        assert_eq!(t.apply(1, &bytes).unwrap(), bytes);
        assert_eq!(t.unapply(2, &bytes).unwrap(), bytes);
    }
}
