//! Shared at-rest encoding for conversation stores
//!
//! Both backends route every write and read through [`FieldSealer`] so they
//! agree on when content is encrypted, how data values are serialized, and
//! which errors surface.

use std::sync::Arc;

use crate::codec::EncryptionCodec;
use crate::error::MemoryError;
use crate::Result;

/// Applies the sensitive-flag policy on top of an optional codec.
#[derive(Debug, Clone, Default)]
pub struct FieldSealer {
    codec: Option<Arc<EncryptionCodec>>,
}

impl FieldSealer {
    pub fn new(codec: Option<Arc<EncryptionCodec>>) -> Self {
        Self { codec }
    }

    /// Sealer with no key: sensitive writes fail with `MemoryError::Config`.
    pub fn plaintext() -> Self {
        Self { codec: None }
    }

    pub fn has_key(&self) -> bool {
        self.codec.is_some()
    }

    /// Produce the stored form of `plaintext` and whether it is encrypted.
    pub fn seal(&self, plaintext: &str, sensitive: bool) -> Result<(String, bool)> {
        if !sensitive {
            return Ok((plaintext.to_string(), false));
        }
        let codec = self.codec.as_ref().ok_or_else(|| {
            MemoryError::Config(
                "content marked sensitive but no encryption key is configured".into(),
            )
        })?;
        Ok((codec.encrypt_str(plaintext)?, true))
    }

    /// Recover plaintext from its stored form.
    pub fn open(&self, stored: &str, encrypted: bool) -> Result<String> {
        if !encrypted {
            return Ok(stored.to_string());
        }
        let codec = self.codec.as_ref().ok_or_else(|| {
            MemoryError::Config("record is encrypted but no encryption key is configured".into())
        })?;
        codec.decrypt_str(stored)
    }

    /// Stored form of a data value. Strings are kept raw unless sealed, in
    /// which case the JSON text is encrypted so the exact value round-trips.
    pub fn seal_value(&self, value: &serde_json::Value, sensitive: bool) -> Result<(String, bool)> {
        let text = if sensitive {
            serde_json::to_string(value)?
        } else {
            encode_value(value)?
        };
        self.seal(&text, sensitive)
    }

    /// Recover a data value from its stored form.
    pub fn open_value(&self, stored: &str, encrypted: bool) -> Result<serde_json::Value> {
        let text = self.open(stored, encrypted)?;
        Ok(decode_value(text))
    }
}

/// Serialize a value for storage: strings raw, everything else as JSON.
pub fn encode_value(value: &serde_json::Value) -> Result<String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

/// Tolerant parse: JSON if it parses, otherwise the raw string.
pub fn decode_value(text: String) -> serde_json::Value {
    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncryptionKey;
    use serde_json::json;

    fn keyed() -> FieldSealer {
        FieldSealer::new(Some(Arc::new(EncryptionCodec::new(
            EncryptionKey::from_bytes([3u8; 32]),
        ))))
    }

    #[test]
    fn test_non_sensitive_is_plaintext() {
        let (stored, encrypted) = keyed().seal("hello", false).unwrap();
        assert_eq!(stored, "hello");
        assert!(!encrypted);
    }

    #[test]
    fn test_sensitive_is_encrypted_and_opens() {
        let sealer = keyed();
        let (stored, encrypted) = sealer.seal("secret", true).unwrap();
        assert!(encrypted);
        assert_ne!(stored, "secret");
        assert_eq!(sealer.open(&stored, true).unwrap(), "secret");
    }

    #[test]
    fn test_sensitive_without_key_is_config_error() {
        let err = FieldSealer::plaintext().seal("secret", true).unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[test]
    fn test_encrypted_record_without_key_is_config_error() {
        let (stored, _) = keyed().seal("secret", true).unwrap();
        let err = FieldSealer::plaintext().open(&stored, true).unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[test]
    fn test_value_encoding_is_tolerant() {
        assert_eq!(encode_value(&json!("raw text")).unwrap(), "raw text");
        assert_eq!(encode_value(&json!({"a": 1})).unwrap(), r#"{"a":1}"#);
        assert_eq!(decode_value("raw text".into()), json!("raw text"));
        assert_eq!(decode_value(r#"{"a":1}"#.into()), json!({"a": 1}));
        assert_eq!(decode_value("42".into()), json!(42));
    }

    #[test]
    fn test_sealed_string_value_round_trips_exactly() {
        let sealer = keyed();
        let (stored, encrypted) = sealer.seal_value(&json!("42"), true).unwrap();
        assert_eq!(sealer.open_value(&stored, encrypted).unwrap(), json!("42"));
    }
}
