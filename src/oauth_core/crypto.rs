//! Cryptographic helpers: identifiers, MAC signatures, secret hashing and
//! refresh payload encryption.

use std::fmt::Write as _;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use oauth2_lib::ende::aes;
use ring::{digest, hmac};
use subtle::ConstantTimeEq;

use super::types::MacAlgorithm;

/// Length of generated token identifiers.
pub const IDENTIFIER_LENGTH: usize = 40;

/// Length of generated MAC keys.
pub const MAC_KEY_LENGTH: usize = 32;

/// A fresh opaque token identifier (40 alphanumerics, ~238 bits).
pub fn generate_identifier() -> String {
    oauth2_lib::random_alphanumeric_string(IDENTIFIER_LENGTH)
}

pub fn generate_mac_key() -> String {
    oauth2_lib::random_alphanumeric_string(MAC_KEY_LENGTH)
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Computes the MAC value sent in the `mac` header param: base64 of the
/// lowercase hex HMAC digest of `canonical`.
pub fn mac_signature(algorithm: MacAlgorithm, canonical: &str, key: &str) -> String {
    let alg = match algorithm {
        MacAlgorithm::HmacSha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
        MacAlgorithm::HmacSha256 => hmac::HMAC_SHA256,
    };
    let key = hmac::Key::new(alg, key.as_bytes());
    let tag = hmac::sign(&key, canonical.as_bytes());
    STANDARD.encode(to_hex(tag.as_ref()))
}

/// Recomputes the MAC and compares it with `supplied` in constant time.
pub fn verify_mac_signature(
    algorithm: MacAlgorithm,
    canonical: &str,
    key: &str,
    supplied: &str,
) -> bool {
    let expected = mac_signature(algorithm, canonical, key);
    constant_time_eq(expected.as_bytes(), supplied.as_bytes())
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// SHA-256 hex digest used to store client secrets.
pub fn hash_secret(secret: &str) -> String {
    to_hex(digest::digest(&digest::SHA256, secret.as_bytes()).as_ref())
}

pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    constant_time_eq(hash_secret(secret).as_bytes(), stored_hash.as_bytes())
}

/// Encrypts an opaque payload with the server's encryption key.
pub fn encrypt_payload(plaintext: &str, encryption_key: &str) -> Result<String, String> {
    aes::encrypt(plaintext, encryption_key)
}

/// Reverses `encrypt_payload`. Fails on tampered or foreign input.
pub fn decrypt_payload(ciphertext: &str, encryption_key: &str) -> Result<String, String> {
    aes::decrypt(ciphertext, encryption_key)
}
