//! Reversible encoding for profile fields that should not be stored as plain text.
//!
//! This is base64 over UTF-8, not encryption in the cryptographic sense. Anyone with
//! database access can decode the values.

use base64::{Engine as _, engine::general_purpose::STANDARD};

pub const DECRYPTION_ERROR_PLACEHOLDER: &str = "[Decryption Error]";

#[derive(Debug)]
pub enum DecodeError {
    Base64(base64::DecodeError),
    Utf8(std::string::FromUtf8Error),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Base64(err) => write!(f, "invalid base64 payload: {err}"),
            DecodeError::Utf8(err) => write!(f, "decoded payload is not UTF-8: {err}"),
        }
    }
}

impl std::error::Error for DecodeError {}

pub fn encrypt_text(plain: &str) -> String {
    STANDARD.encode(plain.as_bytes())
}

pub fn decrypt_text(encoded: &str) -> Result<String, DecodeError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(DecodeError::Base64)?;
    String::from_utf8(bytes).map_err(DecodeError::Utf8)
}

/// Decodes a stored value for display, substituting a placeholder on failure.
pub fn decrypt_or_placeholder(encoded: &str) -> String {
    decrypt_text(encoded).unwrap_or_else(|_| DECRYPTION_ERROR_PLACEHOLDER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_as_standard_base64() {
        assert_eq!(encrypt_text("12 Elm Street"), "MTIgRWxtIFN0cmVldA==");
    }

    #[test]
    fn decodes_unicode_addresses() {
        let encoded = encrypt_text("Straße 5, München");
        assert_eq!(decrypt_text(&encoded).unwrap(), "Straße 5, München");
    }

    #[test]
    fn empty_value_decodes_to_empty_address() {
        assert_eq!(decrypt_text("").unwrap(), "");
    }

    #[test]
    fn garbage_yields_placeholder() {
        assert_eq!(decrypt_or_placeholder("not base64!!"), DECRYPTION_ERROR_PLACEHOLDER);
        // valid base64, invalid UTF-8
        assert_eq!(decrypt_or_placeholder("/w=="), DECRYPTION_ERROR_PLACEHOLDER);
    }
}
