//! RS256 JWT signing and verification for access tokens.

use std::path::Path;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::{ConfigError, OAuthError};
use super::types::AccessToken;

/// Claims carried by an issued access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Issuing client.
    pub iss: String,
    /// Audience, the client the token was issued to.
    pub aud: String,
    /// Token identifier.
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_algorithm: Option<String>,
}

impl AccessTokenClaims {
    pub fn from_access_token(token: &AccessToken) -> Self {
        let iat = token.issued_at.timestamp();
        Self {
            iss: token.client.identifier.clone(),
            aud: token.client.identifier.clone(),
            jti: token.identifier.clone(),
            iat,
            nbf: iat,
            exp: token.expires_at.timestamp(),
            sub: token.user_id.clone(),
            scopes: token.scope_identifiers(),
            mac_key: token.mac.as_ref().map(|m| m.key.clone()),
            mac_algorithm: token.mac.as_ref().map(|m| m.algorithm.as_str().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JwtError {
    #[error("The JWT string is malformed")]
    Malformed,
    #[error("The JWT signature is invalid")]
    InvalidSignature,
    #[error("The JWT has expired")]
    Expired,
    #[error("The JWT is not yet valid")]
    NotYetValid,
    #[error("The JWT could not be verified: {0}")]
    Invalid(String),
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => JwtError::InvalidSignature,
            ErrorKind::ExpiredSignature => JwtError::Expired,
            ErrorKind::ImmatureSignature => JwtError::NotYetValid,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => JwtError::Malformed,
            other => JwtError::Invalid(format!("{:?}", other)),
        }
    }
}

pub(crate) fn read_key_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::KeyFile {
        path: path.display().to_string(),
        source,
    })
}

/// Signs access tokens with the server's RSA private key.
#[derive(Clone)]
pub struct JwtSigner {
    encoding_key: EncodingKey,
}

impl JwtSigner {
    /// Loads a PEM private key. Malformed or unusable keys are rejected here,
    /// not on the first request.
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, ConfigError> {
        let encoding_key = EncodingKey::from_rsa_pem(pem)
            .map_err(|e| ConfigError::InvalidKey(format!("private key: {}", e)))?;
        let signer = Self { encoding_key };
        signer
            .sign(&probe_claims())
            .map_err(|e| ConfigError::InvalidKey(format!("private key cannot sign: {}", e)))?;
        Ok(signer)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_rsa_pem(&read_key_file(path.as_ref())?)
    }

    pub fn sign(&self, claims: &AccessTokenClaims) -> Result<String, OAuthError> {
        encode(&Header::new(Algorithm::RS256), claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, token_id = %claims.jti, "Failed to sign access token");
            OAuthError::ServerError("Unable to sign the access token".to_string())
        })
    }

    /// Converts an issued access token to its JWT wire form.
    pub fn sign_access_token(&self, token: &AccessToken) -> Result<String, OAuthError> {
        self.sign(&AccessTokenClaims::from_access_token(token))
    }
}

impl std::fmt::Debug for JwtSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JwtSigner(RS256)")
    }
}

/// Verifies access tokens with the server's RSA public key.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
}

impl JwtVerifier {
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, ConfigError> {
        let decoding_key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| ConfigError::InvalidKey(format!("public key: {}", e)))?;
        Ok(Self { decoding_key })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_rsa_pem(&read_key_file(path.as_ref())?)
    }

    /// Checks that `signer` produces tokens this verifier accepts.
    pub fn check_pair(&self, signer: &JwtSigner) -> Result<(), ConfigError> {
        let token = signer
            .sign(&probe_claims())
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
        self.verify(&token)
            .map(|_| ())
            .map_err(|_| ConfigError::InvalidKey("public key does not match private key".into()))
    }

    /// Verifies signature, `exp` and `nbf` with no leeway. The audience is
    /// returned for the caller to compare.
    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "nbf", "aud"]);
        Ok(decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)?.claims)
    }

    /// Reads the claims without checking signature or time bounds.
    pub fn parse_unverified(token: &str) -> Result<AccessTokenClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        Ok(decode::<AccessTokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)?.claims)
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JwtVerifier(RS256)")
    }
}

fn probe_claims() -> AccessTokenClaims {
    let now = Utc::now().timestamp();
    AccessTokenClaims {
        iss: "probe".into(),
        aud: "probe".into(),
        jti: "probe".into(),
        iat: now,
        nbf: now,
        exp: now + 60,
        sub: None,
        scopes: vec![],
        mac_key: None,
        mac_algorithm: None,
    }
}
