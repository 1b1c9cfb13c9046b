//! Field-level encryption codec
//!
//! AES-256-CBC with PKCS#7 padding and a fresh random IV per call.
//! Tokens are `hex(iv) + ":" + hex(ciphertext)`.
//!
//! Keys are either raw 32-byte keys or derived from a deployment secret with
//! Argon2id and a per-deployment salt (see [`EncryptionKey::derive`]).

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::MemoryError;
use crate::Result;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Length of a derived or raw key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the CBC initialization vector in bytes.
pub const IV_LEN: usize = 16;

/// Minimum length of a deployment secret, in characters.
pub const MIN_SECRET_LEN: usize = 32;

/// Minimum length of a key-derivation salt, in bytes.
pub const MIN_SALT_LEN: usize = 16;

const BLOCK_LEN: usize = 16;

/// A validated 256-bit symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Wrap a raw key given as a slice; it must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            MemoryError::Config(format!(
                "encryption key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Derive a key from a deployment secret and salt using Argon2id.
    ///
    /// The secret must be at least 32 characters and the salt at least
    /// 16 bytes. The salt is per deployment and is not secret; store it in
    /// configuration next to the secret reference.
    pub fn derive(secret: &str, salt: &[u8]) -> Result<Self> {
        if secret.chars().count() < MIN_SECRET_LEN {
            return Err(MemoryError::Config(format!(
                "encryption secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        if salt.len() < MIN_SALT_LEN {
            return Err(MemoryError::Config(format!(
                "encryption salt must be at least {} bytes, got {}",
                MIN_SALT_LEN,
                salt.len()
            )));
        }

        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(secret.as_bytes(), salt, &mut key)
            .map_err(|e| MemoryError::Encryption(format!("key derivation failed: {e}")))?;
        Ok(Self(key))
    }

    /// Derive a key from a secret and a hex-encoded salt.
    pub fn derive_hex_salt(secret: &str, salt_hex: &str) -> Result<Self> {
        let salt = hex::decode(salt_hex.trim())
            .map_err(|e| MemoryError::Config(format!("encryption salt is not valid hex: {e}")))?;
        Self::derive(secret, &salt)
    }

    /// Parse a raw key given as 64 hex characters.
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| MemoryError::Config(format!("encryption key is not valid hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Generate a fresh random salt suitable for [`EncryptionKey::derive`].
    pub fn generate_salt() -> [u8; MIN_SALT_LEN] {
        let mut salt = [0u8; MIN_SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        salt
    }

    /// [`generate_salt`](Self::generate_salt), hex-encoded for configuration.
    pub fn generate_salt_hex() -> String {
        hex::encode(Self::generate_salt())
    }

    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Encrypt `plaintext` under `key`, returning a `iv:ciphertext` hex token.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<String> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| MemoryError::Encryption(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
}

/// Decrypt a token produced by [`encrypt`].
pub fn decrypt(token: &str, key: &EncryptionKey) -> Result<Vec<u8>> {
    let (iv_hex, ct_hex) = token
        .split_once(':')
        .ok_or_else(|| MemoryError::Decryption("token is missing the ':' separator".into()))?;

    let iv = hex::decode(iv_hex)
        .map_err(|e| MemoryError::Decryption(format!("invalid iv hex: {e}")))?;
    if iv.len() != IV_LEN {
        return Err(MemoryError::Decryption(format!(
            "iv must be {} bytes, got {}",
            IV_LEN,
            iv.len()
        )));
    }

    let ciphertext = hex::decode(ct_hex)
        .map_err(|e| MemoryError::Decryption(format!("invalid ciphertext hex: {e}")))?;
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(MemoryError::Decryption(format!(
            "ciphertext length {} is not a positive multiple of {}",
            ciphertext.len(),
            BLOCK_LEN
        )));
    }

    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| MemoryError::Decryption(e.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| MemoryError::Decryption("bad padding (wrong key?)".into()))
}

/// Symmetric codec bound to one key.
#[derive(Debug, Clone)]
pub struct EncryptionCodec {
    key: EncryptionKey,
}

impl EncryptionCodec {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    /// Build a codec from a deployment secret and hex salt.
    pub fn from_secret(secret: &str, salt_hex: &str) -> Result<Self> {
        Ok(Self::new(EncryptionKey::derive_hex_salt(secret, salt_hex)?))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        encrypt(plaintext, &self.key)
    }

    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>> {
        decrypt(token, &self.key)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<String> {
        self.encrypt(plaintext.as_bytes())
    }

    /// Decrypt into a UTF-8 string; non-UTF-8 output means the key did not match.
    pub fn decrypt_str(&self, token: &str) -> Result<String> {
        let bytes = self.decrypt(token)?;
        String::from_utf8(bytes)
            .map_err(|_| MemoryError::Decryption("plaintext is not valid UTF-8 (wrong key?)".into()))
    }

    /// Serialize `value` as JSON and encrypt it.
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let bytes = serde_json::to_vec(value)?;
        self.encrypt(&bytes)
    }

    /// Decrypt a token and parse the plaintext as JSON.
    pub fn decrypt_json<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let bytes = self.decrypt(token)?;
        serde_json::from_slice(&bytes).map_err(|e| MemoryError::Decryption(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "an-example-deployment-secret-of-40-chars!";

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_bytes([7u8; KEY_LEN])
    }

    #[test]
    fn test_round_trip() {
        let key = test_key();
        let long = "x".repeat(1000);
        for plaintext in ["", "hello", "the sky is blue", "ünïcødé ✓", long.as_str()] {
            let token = encrypt(plaintext.as_bytes(), &key).unwrap();
            let decrypted = decrypt(&token, &key).unwrap();
            assert_eq!(decrypted, plaintext.as_bytes());
        }
    }

    #[test]
    fn test_encrypt_is_non_deterministic() {
        let key = test_key();
        let a = encrypt(b"same plaintext", &key).unwrap();
        let b = encrypt(b"same plaintext", &key).unwrap();

        assert_ne!(a, b, "fresh IV per call must yield distinct tokens");
        assert_eq!(decrypt(&a, &key).unwrap(), b"same plaintext");
        assert_eq!(decrypt(&b, &key).unwrap(), b"same plaintext");
    }

    #[test]
    fn test_token_shape() {
        let token = encrypt(b"abc", &test_key()).unwrap();
        let (iv, ct) = token.split_once(':').unwrap();
        assert_eq!(iv.len(), IV_LEN * 2);
        assert_eq!(ct.len(), BLOCK_LEN * 2);
        assert!(token.chars().all(|c| c == ':' || c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let key = test_key();
        for token in [
            "",
            "no-separator",
            "zz:00",
            "00112233:00112233445566778899aabbccddeeff",
            "00112233445566778899aabbccddeeff:",
            "00112233445566778899aabbccddeeff:0011",
        ] {
            let err = decrypt(token, &key).unwrap_err();
            assert!(matches!(err, MemoryError::Decryption(_)), "{token:?} -> {err:?}");
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let codec = EncryptionCodec::new(test_key());
        let other = EncryptionCodec::new(EncryptionKey::from_bytes([9u8; KEY_LEN]));

        let token = codec.encrypt_str("confidential notes").unwrap();
        let err = other.decrypt_str(&token).unwrap_err();
        assert!(matches!(err, MemoryError::Decryption(_)));
    }

    #[test]
    fn test_json_helpers() {
        let codec = EncryptionCodec::new(test_key());
        let value = serde_json::json!({"plan": ["a", "b"], "budget": 3});
        let token = codec.encrypt_json(&value).unwrap();
        let back: serde_json::Value = codec.decrypt_json(&token).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_derive_is_stable_per_salt() {
        let salt = EncryptionKey::generate_salt();
        let k1 = EncryptionKey::derive(SECRET, &salt).unwrap();
        let k2 = EncryptionKey::derive(SECRET, &salt).unwrap();
        assert_eq!(k1, k2);

        let other_salt = EncryptionKey::generate_salt();
        let k3 = EncryptionKey::derive(SECRET, &other_salt).unwrap();
        assert_ne!(k1, k3);
    }

    #[test]
    fn test_derive_rejects_short_secret_and_salt() {
        let salt = EncryptionKey::generate_salt();
        assert!(matches!(
            EncryptionKey::derive("too-short", &salt),
            Err(MemoryError::Config(_))
        ));
        assert!(matches!(
            EncryptionKey::derive(SECRET, b"short"),
            Err(MemoryError::Config(_))
        ));
        assert!(matches!(
            EncryptionKey::derive_hex_salt(SECRET, "not-hex"),
            Err(MemoryError::Config(_))
        ));
    }

    #[test]
    fn test_from_slice_length() {
        assert!(EncryptionKey::from_slice(&[1u8; 32]).is_ok());
        assert!(matches!(
            EncryptionKey::from_slice(&[1u8; 16]),
            Err(MemoryError::Config(_))
        ));
    }

    #[test]
    fn test_from_hex() {
        let key = EncryptionKey::from_hex(&"ab".repeat(32)).unwrap();
        assert_eq!(key, EncryptionKey::from_bytes([0xab; 32]));
        assert!(EncryptionKey::from_hex("zz").is_err());
        assert_eq!(EncryptionKey::generate_salt_hex().len(), 32);
    }

    #[test]
    fn test_debug_hides_key() {
        assert_eq!(format!("{:?}", test_key()), "EncryptionKey(..)");
    }
}
