//! Key-material validation and signature verification.
//!
//! The server deliberately performs no message cryptography. That happens
//! exclusively on clients. This module contains only:
//!
//! - **Key material validation** — sanity checks on uploaded key blobs
//!   (correct base64 encoding, expected byte lengths for X25519 / Ed25519).
//! - **Detached signature verification** — used for the register
//!   challenge-response and for account-deletion proofs.
//! - **Fingerprints** — short hex prefixes of public keys, safe for logs.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Byte length of an Ed25519 public key.
const ED25519_PUBLIC_KEY_LEN: usize = 32;
/// Byte length of an X25519 public key.
const X25519_PUBLIC_KEY_LEN: usize = 32;
/// Byte length of an Ed25519 detached signature.
const ED25519_SIGNATURE_LEN: usize = 64;

/// Error returned when key material or a signature fails validation.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("{0} is not valid base64")]
    NotBase64(&'static str),
    #[error("{label} has wrong length: expected {expected} bytes, got {actual}")]
    WrongLength {
        label: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("not a valid Ed25519 public key")]
    InvalidKey,
    #[error("signature verification failed")]
    BadSignature,
}

/// Validate that a string is valid base64 and decodes to exactly
/// `expected_len` bytes.
pub fn validate_key_bytes(
    encoded: &str,
    expected_len: usize,
    label: &'static str,
) -> Result<Vec<u8>, KeyError> {
    let bytes = B64.decode(encoded).map_err(|_| KeyError::NotBase64(label))?;
    if bytes.len() != expected_len {
        return Err(KeyError::WrongLength {
            label,
            expected: expected_len,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Validate an X25519 encryption public key (32 bytes, base64-encoded).
pub fn validate_encryption_key(encoded: &str) -> Result<Vec<u8>, KeyError> {
    validate_key_bytes(encoded, X25519_PUBLIC_KEY_LEN, "encryption_key")
}

/// Validate and parse an Ed25519 signing public key (32 bytes, base64).
pub fn parse_signing_key(encoded: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = validate_key_bytes(encoded, ED25519_PUBLIC_KEY_LEN, "signing_key")?;
    let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| KeyError::InvalidKey)?;
    VerifyingKey::from_bytes(&arr).map_err(|_| KeyError::InvalidKey)
}

/// Verify an Ed25519 detached signature.
///
/// * `signing_key_base64` — base64-encoded 32-byte verifying key
/// * `sig_base64`         — base64-encoded 64-byte signature
/// * `message`            — original signed bytes
pub fn verify_signature(
    signing_key_base64: &str,
    sig_base64: &str,
    message: &[u8],
) -> Result<(), KeyError> {
    let verifying_key = parse_signing_key(signing_key_base64)?;

    let sig_bytes = validate_key_bytes(sig_base64, ED25519_SIGNATURE_LEN, "signature")
        .map_err(|_| KeyError::BadSignature)?;
    let arr: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::BadSignature)?;
    let signature = Signature::from_bytes(&arr);

    verifying_key
        .verify(message, &signature)
        .map_err(|_| KeyError::BadSignature)
}

/// Short hex fingerprint of a base64 public key, for log lines.
///
/// Returns the first 6 decoded bytes hex-encoded, or `"invalid"` when the
/// input does not decode.
pub fn fingerprint(key_base64: &str) -> String {
    match B64.decode(key_base64) {
        Ok(bytes) if bytes.len() >= 6 => hex::encode(&bytes[..6]),
        _ => "invalid".to_owned(),
    }
}

/// Encode arbitrary bytes to base64 (standard alphabet, padded).
pub fn to_base64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Decode base64 to bytes, returning `None` on failure.
pub fn from_base64(encoded: &str) -> Option<Vec<u8>> {
    B64.decode(encoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand_core::OsRng;

    #[test]
    fn round_trip_sign_verify() {
        let sk = SigningKey::generate(&mut OsRng);
        let pk_b64 = to_base64(sk.verifying_key().as_bytes());
        let msg = b"challenge bytes";
        let sig_b64 = to_base64(&sk.sign(msg).to_bytes());
        verify_signature(&pk_b64, &sig_b64, msg).expect("signature should verify");
    }

    #[test]
    fn flipped_bit_fails_verification() {
        let sk = SigningKey::generate(&mut OsRng);
        let pk_b64 = to_base64(sk.verifying_key().as_bytes());
        let msg = b"challenge bytes";
        let mut sig = sk.sign(msg).to_bytes();
        sig[0] ^= 0x01;
        assert!(verify_signature(&pk_b64, &to_base64(&sig), msg).is_err());
    }

    #[test]
    fn signature_does_not_transfer_to_other_message() {
        let sk = SigningKey::generate(&mut OsRng);
        let pk_b64 = to_base64(sk.verifying_key().as_bytes());
        let sig_b64 = to_base64(&sk.sign(b"yesterday's challenge").to_bytes());
        assert!(verify_signature(&pk_b64, &sig_b64, b"today's challenge").is_err());
    }

    #[test]
    fn rejects_wrong_length_keys() {
        let short = to_base64(&[0u8; 16]);
        assert!(validate_encryption_key(&short).is_err());
        assert!(parse_signing_key(&short).is_err());
        assert!(validate_encryption_key("not base64!!").is_err());
    }

    #[test]
    fn fingerprint_is_short_hex() {
        let key = to_base64(&[0xAB; 32]);
        assert_eq!(fingerprint(&key), "abababababab");
        assert_eq!(fingerprint("@@@"), "invalid");
    }
}
