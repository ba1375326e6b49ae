//! Payload ciphers.
//!
//! The archive layer encrypts the serialized payload as one opaque block.
//! Two implementations are provided:
//!
//! - [`XorCipher`] - repeating-key XOR obfuscation, compatible with saves
//!   produced by older builds. Keeps casual editing out, nothing more.
//! - [`AesGcmCipher`] - AES-256-GCM authenticated encryption. Output is
//!   `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use crate::error::{StorageError, StorageResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypts and decrypts archive payloads.
pub trait Cipher: Send + Sync {
    /// Short identifier used in logs and tooling.
    fn name(&self) -> &'static str;

    /// Encrypts `plaintext`.
    fn encrypt(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>>;

    /// Decrypts data produced by [`encrypt`](Self::encrypt).
    fn decrypt(&self, ciphertext: &[u8]) -> StorageResult<Vec<u8>>;
}

/// Repeating-key XOR.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct XorCipher {
    key: Vec<u8>,
}

impl XorCipher {
    /// Creates a cipher from a non-empty key.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` is empty.
    pub fn new(key: impl Into<Vec<u8>>) -> StorageResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(StorageError::InvalidKeySize {
                expected: 1,
                actual: 0,
            });
        }
        Ok(Self { key })
    }

    fn apply(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(self.key.iter().cycle())
            .map(|(byte, key)| byte ^ key)
            .collect()
    }
}

impl std::fmt::Debug for XorCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XorCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl Cipher for XorCipher {
    fn name(&self) -> &'static str {
        "xor"
    }

    fn encrypt(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        Ok(self.apply(plaintext))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> StorageResult<Vec<u8>> {
        Ok(self.apply(ciphertext))
    }
}

/// Encryption key for AES-256-GCM.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random encryption key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StorageError::InvalidKeySize {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Derives a key from a passphrase using HKDF-SHA256.
    ///
    /// HKDF is not a password hash. Use a high-entropy passphrase.
    ///
    /// # Errors
    ///
    /// Returns an error if HKDF expansion fails.
    pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> StorageResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"kvsave-archive-key-v1", &mut bytes)
            .map_err(|_| StorageError::cipher("HKDF expand failed"))?;
        Ok(Self { bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// AES-256-GCM with a random nonce per payload.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Creates a cipher with the given key.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let key_array = GenericArray::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key_array),
        }
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl Cipher for AesGcmCipher {
    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn encrypt(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| StorageError::cipher("encryption error"))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);
        Ok(result)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> StorageResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(StorageError::cipher("ciphertext too short"));
        }

        let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
        self.cipher
            .decrypt(nonce, &ciphertext[NONCE_SIZE..])
            .map_err(|_| StorageError::cipher("authentication failed"))
    }
}
