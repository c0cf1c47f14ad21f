/// Authenticated encryption for protected content at rest.
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// AES-256-GCM with a 128-bit nonce.
type ContentCipher = AesGcm<Aes256, U16>;

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const TAG_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    #[error("content encryption key is not configured")]
    KeyMissing,
    #[error("content encryption key must be {KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("content encryption key is not valid base64")]
    InvalidKeyEncoding,
    #[error("encryption failed")]
    EncryptionFailed,
    /// Tampered blob, wrong key, or malformed fields. Deliberately carries no detail.
    #[error("decryption failed")]
    DecryptionFailed,
}

/// Persisted form of one protected content item. All fields are base64.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBlob {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
}

/// Holds the process-wide content key. Build it once at startup and share by reference.
///
/// # Examples
///
/// ```rust
/// use x402_unlock::vault::ContentVault;
///
/// let vault = ContentVault::from_base64_key("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=").unwrap();
/// let blob = vault.seal("premium prompt").unwrap();
/// assert_eq!(vault.open(&blob).unwrap(), "premium prompt");
/// ```
#[derive(Clone)]
pub struct ContentVault {
    cipher: ContentCipher,
}

impl ContentVault {
    pub fn from_key_bytes(key: &[u8]) -> Result<Self, VaultError> {
        if key.len() != KEY_SIZE {
            return Err(VaultError::InvalidKeyLength(key.len()));
        }
        let cipher = ContentCipher::new_from_slice(key)
            .map_err(|_| VaultError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    pub fn from_base64_key(secret: &str) -> Result<Self, VaultError> {
        let key = STANDARD
            .decode(secret.trim())
            .map_err(|_| VaultError::InvalidKeyEncoding)?;
        Self::from_key_bytes(&key)
    }

    /// Fresh random key, base64 encoded, suitable for `CONTENT_ENCRYPTION_KEY`.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut key);
        STANDARD.encode(key)
    }

    /// Reports whether `secret` would yield a usable vault, without surfacing why not.
    pub fn key_configured(secret: Option<&str>) -> bool {
        secret.is_some_and(|s| Self::from_base64_key(s).is_ok())
    }

    pub fn seal(&self, plaintext: &str) -> Result<EncryptedBlob, VaultError> {
        let mut iv = [0u8; IV_SIZE];
        rand::rng().fill_bytes(&mut iv);
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| VaultError::EncryptionFailed)?;
        Ok(EncryptedBlob {
            ciphertext: STANDARD.encode(&buffer),
            iv: STANDARD.encode(iv),
            auth_tag: STANDARD.encode(tag),
        })
    }

    pub fn open(&self, blob: &EncryptedBlob) -> Result<String, VaultError> {
        let plaintext = self.open_bytes(blob);
        if plaintext.is_err() {
            error!("content blob failed authentication");
        }
        plaintext
    }

    fn open_bytes(&self, blob: &EncryptedBlob) -> Result<String, VaultError> {
        let iv = decode_field(&blob.iv, Some(IV_SIZE))?;
        let tag = decode_field(&blob.auth_tag, Some(TAG_SIZE))?;
        let mut buffer = decode_field(&blob.ciphertext, None)?;
        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(&tag),
            )
            .map_err(|_| VaultError::DecryptionFailed)?;
        String::from_utf8(buffer).map_err(|_| VaultError::DecryptionFailed)
    }
}

impl fmt::Debug for ContentVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentVault").finish_non_exhaustive()
    }
}

fn decode_field(value: &str, expected_len: Option<usize>) -> Result<Vec<u8>, VaultError> {
    let bytes = STANDARD
        .decode(value)
        .map_err(|_| VaultError::DecryptionFailed)?;
    match expected_len {
        Some(len) if bytes.len() != len => Err(VaultError::DecryptionFailed),
        _ => Ok(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> ContentVault {
        ContentVault::from_key_bytes(&[7u8; KEY_SIZE]).unwrap()
    }

    fn flip_bit(field: &str, byte: usize, bit: u8) -> String {
        let mut bytes = STANDARD.decode(field).unwrap();
        bytes[byte] ^= 1 << bit;
        STANDARD.encode(bytes)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let vault = vault();
        for text in ["", "a", "Write a haiku about {topic} in the style of {poet}", "日本語 ✓"] {
            let blob = vault.seal(text).unwrap();
            assert_eq!(vault.open(&blob).unwrap(), text);
        }
    }

    #[test]
    fn test_blob_field_sizes() {
        let blob = vault().seal("prompt").unwrap();
        assert_eq!(STANDARD.decode(&blob.iv).unwrap().len(), IV_SIZE);
        assert_eq!(STANDARD.decode(&blob.auth_tag).unwrap().len(), TAG_SIZE);
        assert_eq!(STANDARD.decode(&blob.ciphertext).unwrap().len(), "prompt".len());
    }

    #[test]
    fn test_same_plaintext_gets_fresh_nonce() {
        let vault = vault();
        let a = vault.seal("same text").unwrap();
        let b = vault.seal("same text").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_any_flipped_bit_fails() {
        let vault = vault();
        let blob = vault.seal("secret prompt text").unwrap();
        let ct_len = STANDARD.decode(&blob.ciphertext).unwrap().len();
        for byte in 0..ct_len {
            for bit in 0..8 {
                let mut tampered = blob.clone();
                tampered.ciphertext = flip_bit(&blob.ciphertext, byte, bit);
                assert_eq!(vault.open(&tampered), Err(VaultError::DecryptionFailed));
            }
        }
        for byte in 0..TAG_SIZE {
            for bit in 0..8 {
                let mut tampered = blob.clone();
                tampered.auth_tag = flip_bit(&blob.auth_tag, byte, bit);
                assert_eq!(vault.open(&tampered), Err(VaultError::DecryptionFailed));
            }
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = vault().seal("secret").unwrap();
        let other = ContentVault::from_key_bytes(&[8u8; KEY_SIZE]).unwrap();
        assert_eq!(other.open(&blob), Err(VaultError::DecryptionFailed));
    }

    #[test]
    fn test_malformed_fields_fail() {
        let vault = vault();
        let blob = vault.seal("secret").unwrap();

        let mut short_iv = blob.clone();
        short_iv.iv = STANDARD.encode([0u8; 12]);
        assert_eq!(vault.open(&short_iv), Err(VaultError::DecryptionFailed));

        let mut missing_tag = blob.clone();
        missing_tag.auth_tag = String::new();
        assert_eq!(vault.open(&missing_tag), Err(VaultError::DecryptionFailed));

        let mut not_base64 = blob;
        not_base64.ciphertext = "%%%".to_string();
        assert_eq!(vault.open(&not_base64), Err(VaultError::DecryptionFailed));
    }

    #[test]
    fn test_key_length_is_enforced() {
        let short = STANDARD.encode([1u8; 16]);
        assert_eq!(
            ContentVault::from_base64_key(&short).unwrap_err(),
            VaultError::InvalidKeyLength(16)
        );
        assert_eq!(
            ContentVault::from_base64_key("not base64!").unwrap_err(),
            VaultError::InvalidKeyEncoding
        );
    }

    #[test]
    fn test_key_configured() {
        assert!(ContentVault::key_configured(Some(&ContentVault::generate_key())));
        assert!(!ContentVault::key_configured(Some(&STANDARD.encode([1u8; 31]))));
        assert!(!ContentVault::key_configured(None));
    }

    #[test]
    fn test_debug_hides_key() {
        let rendered = format!("{:?}", vault());
        assert_eq!(rendered, "ContentVault { .. }");
    }
}
