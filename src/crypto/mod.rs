//! Page encryption: Argon2id key derivation plus an
//! AES-256-GCM page transform with a per-page reserved trailer.

pub mod kdf;
pub mod page_cipher;

pub use kdf::{derive_key, KdfParams};
pub use page_cipher::PageCipher;
