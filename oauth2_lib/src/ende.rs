pub mod aes {
    use aes_gcm::{
        Aes256Gcm, Nonce,
        aead::{Aead, KeyInit},
    };
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as BASE64};
    use hkdf::Hkdf;
    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use sha2::Sha256;

    const SALT_LEN: usize = 16;
    const NONCE_LEN: usize = 12;

    /// Salt, nonce and ciphertext (with the GCM tag appended) of one sealed value.
    pub struct EncryptedData {
        salt: [u8; SALT_LEN],
        nonce: [u8; NONCE_LEN],
        ciphertext: Vec<u8>,
    }

    impl EncryptedData {
        /// Frames the data as `salt || nonce || ciphertext`, base64url without padding.
        pub fn to_base64(&self) -> String {
            let mut framed = Vec::with_capacity(SALT_LEN + NONCE_LEN + self.ciphertext.len());
            framed.extend_from_slice(&self.salt);
            framed.extend_from_slice(&self.nonce);
            framed.extend_from_slice(&self.ciphertext);
            BASE64.encode(framed)
        }

        pub fn from_base64(serialized: &str) -> Result<Self, String> {
            let decoded = BASE64
                .decode(serialized)
                .map_err(|e| format!("Base64 decoding failed: {}", e))?;

            if decoded.len() < SALT_LEN + NONCE_LEN {
                return Err("Data too short to contain salt and nonce".to_string());
            }

            let mut salt = [0u8; SALT_LEN];
            let mut nonce = [0u8; NONCE_LEN];
            salt.copy_from_slice(&decoded[..SALT_LEN]);
            nonce.copy_from_slice(&decoded[SALT_LEN..SALT_LEN + NONCE_LEN]);

            Ok(EncryptedData {
                salt,
                nonce,
                ciphertext: decoded[SALT_LEN + NONCE_LEN..].to_vec(),
            })
        }
    }

    /// Derives a 256-bit key from the shared secret and a per-message salt.
    pub fn derive_key(secret: &str, salt: &[u8]) -> Result<[u8; 32], String> {
        let mut key = [0u8; 32];
        Hkdf::<Sha256>::new(Some(salt), secret.as_bytes())
            .expand(b"oauth2-ende", &mut key)
            .map_err(|e| format!("Key derivation failed: {}", e))?;
        Ok(key)
    }

    /// Seals `plaintext` with AES-256-GCM under a fresh salt and nonce.
    pub fn seal(plaintext: &[u8], secret: &str) -> Result<EncryptedData, String> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = OsRng;

        rng.try_fill_bytes(&mut salt)
            .map_err(|e| format!("Failed to fill salt: {}", e))?;
        rng.try_fill_bytes(&mut nonce)
            .map_err(|e| format!("Failed to fill nonce: {}", e))?;

        let key = derive_key(secret, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| format!("Key error: {}", e))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| format!("Encryption failed: {}", e))?;

        Ok(EncryptedData {
            salt,
            nonce,
            ciphertext,
        })
    }

    pub fn open(encrypted: &EncryptedData, secret: &str) -> Result<Vec<u8>, String> {
        let key = derive_key(secret, &encrypted.salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| format!("Key error: {}", e))?;
        cipher
            .decrypt(Nonce::from_slice(&encrypted.nonce), encrypted.ciphertext.as_ref())
            .map_err(|e| {
                format!(
                    "Decryption failed (likely wrong secret or tampered data): {}",
                    e
                )
            })
    }

    /// Encrypts a UTF-8 string and returns the base64url framed result.
    pub fn encrypt(plaintext: &str, secret: &str) -> Result<String, String> {
        seal(plaintext.as_bytes(), secret).map(|data| data.to_base64())
    }

    pub fn decrypt(serialized: &str, secret: &str) -> Result<String, String> {
        let data = EncryptedData::from_base64(serialized)?;
        let plaintext = open(&data, secret)?;
        String::from_utf8(plaintext)
            .map_err(|e| format!("Decryption resulted in invalid UTF-8: {}", e))
    }
}
