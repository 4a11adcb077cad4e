//! Error types for the authorization and resource servers.

use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use super::request::ServerResponse;

/// Errors surfaced to OAuth clients as structured JSON responses.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OAuthError {
    #[error(
        "The request is missing a required parameter, includes an invalid parameter value, includes a parameter more than once, or is otherwise malformed."
    )]
    InvalidRequest {
        parameter: String,
        hint: Option<String>,
    },
    #[error("Client authentication failed")]
    InvalidClient,
    #[error("The requested scope is invalid, unknown, or malformed")]
    InvalidScope(String),
    #[error("The user credentials were incorrect.")]
    InvalidCredentials,
    #[error("The resource owner or authorization server denied the request.")]
    AccessDenied(Option<String>),
    #[error("The refresh token is invalid.")]
    InvalidRefreshToken(Option<String>),
    #[error(
        "The provided authorization grant (e.g., authorization code, resource owner credentials) or refresh token is invalid, expired, revoked, does not match the redirection URI used in the authorization request, or was issued to another client."
    )]
    InvalidGrant(Option<String>),
    #[error("The authorization grant type is not supported by the authorization server.")]
    UnsupportedGrantType,
    #[error(
        "The authorization server encountered an unexpected condition which prevented it from fulfilling the request."
    )]
    ServerError(String),
    /// A broken internal invariant, e.g. refreshing an inactive token.
    #[error("{0}")]
    Logic(String),
    #[error(transparent)]
    Firebase(#[from] FirebaseError),
}

impl OAuthError {
    pub fn invalid_request(parameter: impl Into<String>) -> Self {
        OAuthError::InvalidRequest {
            parameter: parameter.into(),
            hint: None,
        }
    }

    pub fn access_denied(hint: impl Into<String>) -> Self {
        OAuthError::AccessDenied(Some(hint.into()))
    }

    pub fn invalid_refresh_token(hint: impl Into<String>) -> Self {
        OAuthError::InvalidRefreshToken(Some(hint.into()))
    }

    /// Machine-readable error code for the `error` field.
    pub fn error_type(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest { .. } => "invalid_request",
            OAuthError::InvalidClient => "invalid_client",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::InvalidCredentials => "invalid_credentials",
            OAuthError::AccessDenied(_) => "access_denied",
            OAuthError::InvalidRefreshToken(_) => "invalid_request",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnsupportedGrantType => "unsupported_grant_type",
            OAuthError::ServerError(_) | OAuthError::Logic(_) => "server_error",
            OAuthError::Firebase(e) => e.error_type(),
        }
    }

    /// Numeric error code.
    pub fn code(&self) -> u16 {
        match self {
            OAuthError::UnsupportedGrantType => 2,
            OAuthError::InvalidRequest { .. } => 3,
            OAuthError::InvalidClient => 4,
            OAuthError::InvalidScope(_) => 5,
            OAuthError::InvalidCredentials => 6,
            OAuthError::ServerError(_) | OAuthError::Logic(_) => 7,
            OAuthError::InvalidRefreshToken(_) => 8,
            OAuthError::AccessDenied(_) => 9,
            OAuthError::InvalidGrant(_) => 10,
            OAuthError::Firebase(e) => e.code(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            OAuthError::InvalidClient
            | OAuthError::AccessDenied(_)
            | OAuthError::InvalidRefreshToken(_) => 401,
            OAuthError::ServerError(_) | OAuthError::Logic(_) => 500,
            OAuthError::Firebase(e) => e.http_status(),
            _ => 400,
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            OAuthError::InvalidRequest { parameter, hint } => Some(
                hint.clone()
                    .unwrap_or_else(|| format!("Check the `{}` parameter", parameter)),
            ),
            OAuthError::InvalidScope(scope) => Some(format!("Check the `{}` scope", scope)),
            OAuthError::AccessDenied(hint)
            | OAuthError::InvalidRefreshToken(hint)
            | OAuthError::InvalidGrant(hint) => hint.clone(),
            OAuthError::UnsupportedGrantType => {
                Some("Check that all required parameters have been provided".to_string())
            }
            OAuthError::ServerError(hint) => Some(hint.clone()),
            _ => None,
        }
    }

    /// Server-side failures whose detail is hidden outside debug mode.
    pub fn is_server_error(&self) -> bool {
        self.http_status() >= 500
    }

    /// Message and hint joined into one line, e.g. for an HTTP exception body.
    pub fn full_message(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{} {}.", self, hint),
            None => self.to_string(),
        }
    }

    /// Builds the JSON error response. In production (`debug == false`)
    /// server errors carry no hint.
    pub fn to_response(&self, debug: bool) -> ServerResponse {
        let status = self.http_status();
        let code = self.error_type();
        if self.is_server_error() {
            error!(error = %self, hint = ?self.hint(), error_code = code, http_status = status, "OAuth server error occurred");
        } else {
            warn!(error = %self, error_code = code, http_status = status, "OAuth error occurred");
        }

        let description = match self {
            OAuthError::Logic(_) if !debug => OAuthError::ServerError(String::new()).to_string(),
            _ => self.to_string(),
        };
        let mut body = json!({ "error": code, "error_description": description });
        if let Some(hint) = self.hint().filter(|_| debug || !self.is_server_error()) {
            body["hint"] = json!(hint);
        }

        ServerResponse::json(status, &body)
            .with_header("cache-control", "no-store")
            .with_header("pragma", "no-cache")
    }
}

/// Failures reported by the federated identity lookup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FirebaseError {
    #[error("The user firebase JWT token is invalid.")]
    InvalidToken,
    #[error("User not found")]
    UserNotFound,
    #[error("The firebase signature is invalid.")]
    InvalidSignature,
    #[error("{0}")]
    TokenExpired(String),
    #[error("{0}")]
    IssuedInTheFuture(String),
    #[error("{0}")]
    UnknownKey(String),
    #[error("{0}")]
    RevokedIdToken(String),
    /// The identity backend itself failed.
    #[error("Firebase lookup failed: {0}")]
    Backend(String),
}

impl FirebaseError {
    pub fn error_type(&self) -> &'static str {
        match self {
            FirebaseError::InvalidToken => "invalid_token",
            FirebaseError::UserNotFound => "user_not_found",
            FirebaseError::InvalidSignature => "firebase_invalid_signature",
            FirebaseError::TokenExpired(_) | FirebaseError::IssuedInTheFuture(_) => {
                "firebase_token_expired"
            }
            FirebaseError::UnknownKey(_) => "firebase_unknown_key",
            FirebaseError::RevokedIdToken(_) => "firebase_revoked_id_token",
            FirebaseError::Backend(_) => "server_error",
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            FirebaseError::InvalidToken => 11,
            FirebaseError::UserNotFound => 12,
            FirebaseError::InvalidSignature => 13,
            FirebaseError::TokenExpired(_) => 14,
            FirebaseError::IssuedInTheFuture(_) => 15,
            FirebaseError::UnknownKey(_) => 16,
            FirebaseError::RevokedIdToken(_) => 17,
            FirebaseError::Backend(_) => 7,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            FirebaseError::UserNotFound => 404,
            FirebaseError::Backend(_) => 500,
            _ => 401,
        }
    }
}

/// Failures of a storage backend behind a repository.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("identifier `{0}` already exists")]
    UniqueViolation(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
    /// The write would break a token invariant.
    #[error("{0}")]
    InvariantViolation(String),
}

impl StorageError {
    /// Logs the failed operation and turns it into a `ServerError`.
    /// Invariant violations become `Logic` errors.
    pub fn into_server_error(self, operation: &str, entity_id: &str) -> OAuthError {
        error!(error = %self, operation, entity_id, "Storage operation failed");
        match self {
            StorageError::InvariantViolation(message) => OAuthError::Logic(message),
            _ => OAuthError::ServerError(format!("{} failed", operation)),
        }
    }
}

/// Fatal problems found while building a server.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No grant types enabled.")]
    NoGrantTypes,
    #[error("`{0}` must be configured")]
    MissingRepository(&'static str),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("cannot read key file `{path}`: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("an encryption key must be configured")]
    MissingEncryptionKey,
    #[error("invalid value `{value}` for `{key}`")]
    InvalidValue { key: String, value: String },
}
