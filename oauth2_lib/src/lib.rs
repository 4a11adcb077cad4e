use rand::Rng;

#[cfg(feature = "url_encoding")]
pub mod url_encoding;

#[cfg(feature = "ende")]
pub mod ende;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generates a random string of `length` characters drawn from `[A-Za-z0-9]`.
///
/// Uses the thread-local CSPRNG, so the result is suitable for token
/// identifiers and key material.
pub fn random_alphanumeric_string(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ALPHANUMERIC[rng.random_range(0..ALPHANUMERIC.len())] as char)
        .collect()
}
