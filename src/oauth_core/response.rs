//! Token endpoint response bodies: Bearer, MAC and revoke.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::crypto;
use super::error::OAuthError;
use super::jwt::JwtSigner;
use super::request::ServerResponse;
use super::types::{IssuedTokens, TokenKind};

/// Contents of the opaque refresh token handed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenPayload {
    pub client_id: String,
    pub refresh_token_id: String,
    pub access_token_id: String,
    pub scopes: Vec<String>,
    pub user_id: Option<String>,
    pub expire_time: i64,
}

impl RefreshTokenPayload {
    pub fn from_tokens(tokens: &IssuedTokens) -> Option<Self> {
        let refresh = tokens.refresh_token.as_ref()?;
        let access = &tokens.access_token;
        Some(Self {
            client_id: access.client.identifier.clone(),
            refresh_token_id: refresh.identifier.clone(),
            access_token_id: access.identifier.clone(),
            scopes: access.scope_identifiers(),
            user_id: access.user_id.clone(),
            expire_time: refresh.expires_at.timestamp(),
        })
    }

    pub fn encrypt(&self, encryption_key: &str) -> Result<String, OAuthError> {
        let json = serde_json::to_string(self)
            .map_err(|e| OAuthError::ServerError(format!("refresh payload encoding: {}", e)))?;
        crypto::encrypt_payload(&json, encryption_key)
            .map_err(|e| OAuthError::ServerError(format!("refresh payload encryption: {}", e)))
    }

    /// Decrypts and parses a refresh token. Any failure means the value is
    /// not a refresh token issued by this server.
    pub fn decrypt(token: &str, encryption_key: &str) -> Result<Self, String> {
        let json = crypto::decrypt_payload(token, encryption_key)?;
        serde_json::from_str(&json).map_err(|e| e.to_string())
    }
}

/// Builds the token response for the issuing client's token type.
pub fn token_response(
    tokens: &IssuedTokens,
    signer: &JwtSigner,
    encryption_key: &str,
) -> Result<ServerResponse, OAuthError> {
    let access = &tokens.access_token;
    let expires_in = (access.expires_at - Utc::now()).num_seconds().max(0);
    let jwt = signer.sign_access_token(access)?;

    let mut body = Map::new();
    match access.kind {
        TokenKind::Bearer => {
            body.insert("token_type".into(), json!("Bearer"));
            body.insert("expires_in".into(), json!(expires_in));
            body.insert("access_token".into(), json!(jwt));
        }
        TokenKind::Mac => {
            let mac = access.mac.as_ref().ok_or_else(|| {
                OAuthError::Logic("MAC access token issued without key material".into())
            })?;
            body.insert("token_type".into(), json!("mac"));
            body.insert("expires_in".into(), json!(expires_in));
            body.insert("access_token".into(), json!(jwt));
            body.insert("kid".into(), json!(access.identifier));
            body.insert("mac_key".into(), json!(mac.key));
            body.insert("mac_algorithm".into(), json!(mac.algorithm.as_str()));
        }
    }

    if let Some(payload) = RefreshTokenPayload::from_tokens(tokens) {
        body.insert("refresh_token".into(), json!(payload.encrypt(encryption_key)?));
    }

    Ok(ServerResponse::json(200, &Value::Object(body))
        .with_header("pragma", "no-cache")
        .with_header("cache-control", "no-store"))
}

/// Successful revocation: 200 with no body.
pub fn revoke_response() -> ServerResponse {
    ServerResponse::new(200)
        .with_header("pragma", "no-cache")
        .with_header("cache-control", "no-store")
}
