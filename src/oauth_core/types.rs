//! Protocol-facing value types: clients, scopes and tokens.
//!
//! These are what grants, validators and response builders work with.
//! Storage layers keep their own record types and map at the repository
//! boundary (see `memory`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grant types known to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    Implicit,
    Password,
    ClientCredentials,
    RefreshToken,
    Firebase,
    Revoke,
}

impl GrantType {
    /// The `grant_type` value used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::Implicit => "implicit",
            GrantType::Password => "password",
            GrantType::ClientCredentials => "client_credentials",
            GrantType::RefreshToken => "refresh_token",
            GrantType::Firebase => "firebase",
            GrantType::Revoke => "revoke",
        }
    }

    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Some(match identifier {
            "authorization_code" => GrantType::AuthorizationCode,
            "implicit" => GrantType::Implicit,
            "password" => GrantType::Password,
            "client_credentials" => GrantType::ClientCredentials,
            "refresh_token" => GrantType::RefreshToken,
            "firebase" => GrantType::Firebase,
            "revoke" => GrantType::Revoke,
            _ => return None,
        })
    }
}

/// How an access token is presented by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    #[default]
    Bearer,
    Mac,
}

/// HMAC algorithms a MAC token can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MacAlgorithm {
    #[serde(rename = "hmac-sha-1")]
    HmacSha1,
    #[default]
    #[serde(rename = "hmac-sha-256")]
    HmacSha256,
}

impl MacAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            MacAlgorithm::HmacSha1 => "hmac-sha-1",
            MacAlgorithm::HmacSha256 => "hmac-sha-256",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "hmac-sha-1" => Some(MacAlgorithm::HmacSha1),
            "hmac-sha-256" => Some(MacAlgorithm::HmacSha256),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    #[default]
    Active,
    Disabled,
}

/// Token status. Moves from `Active` to `Revoked` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    #[default]
    Active,
    Revoked,
}

/// An OAuth 2.0 client application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    /// Unique client identifier.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Registered redirect URIs.
    pub redirect_uris: Vec<String>,
    /// Token type issued to this client.
    pub token_type: TokenKind,
    /// Grant types this client may use.
    pub grant_types: Vec<GrantType>,
    pub status: ClientStatus,
    /// `true` when the client holds a secret.
    pub confidential: bool,
}

impl Client {
    pub fn is_active(&self) -> bool {
        self.status == ClientStatus::Active
    }
}

/// A named permission unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub identifier: String,
    /// Granted when the request names no scope.
    pub is_default: bool,
    /// Restricts the scope to one user when set.
    pub user_id: Option<String>,
    /// Restricts the scope to one grant type when set.
    pub grant_type: Option<GrantType>,
}

impl Scope {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            is_default: false,
            user_id: None,
            grant_type: None,
        }
    }

    pub fn default_scope(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn for_grant(mut self, grant_type: GrantType) -> Self {
        self.grant_type = Some(grant_type);
        self
    }

    /// Whether this scope may be granted to `user_id` through `grant_type`.
    pub fn permits(&self, grant_type: GrantType, user_id: Option<&str>) -> bool {
        let user_ok = match &self.user_id {
            None => true,
            Some(owner) => Some(owner.as_str()) == user_id,
        };
        let grant_ok = self.grant_type.is_none_or(|g| g == grant_type);
        user_ok && grant_ok
    }
}

/// Key material bound to a MAC token.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct MacCredentials {
    pub key: String,
    pub algorithm: MacAlgorithm,
}

impl std::fmt::Debug for MacCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacCredentials")
            .field("key", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// An access token as seen by grants and response builders.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    /// Opaque identifier, becomes the JWT `jti`. Empty until issued.
    pub identifier: String,
    pub client: Client,
    /// `None` for client-only flows.
    pub user_id: Option<String>,
    pub scopes: Vec<Scope>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: TokenStatus,
    pub kind: TokenKind,
    /// Present only for `TokenKind::Mac`.
    pub mac: Option<MacCredentials>,
}

impl AccessToken {
    /// Creates an unsaved token. Identifier and expiry are set at issuance.
    pub fn new(client: Client, scopes: Vec<Scope>, user_id: Option<String>) -> Self {
        let now = Utc::now();
        let kind = client.token_type;
        let mut token = Self {
            identifier: String::new(),
            client,
            user_id,
            scopes: Vec::new(),
            issued_at: now,
            expires_at: now,
            status: TokenStatus::Active,
            kind,
            mac: None,
        };
        for scope in scopes {
            token.add_scope(scope);
        }
        token
    }

    /// Adds a scope unless one with the same identifier is present.
    pub fn add_scope(&mut self, scope: Scope) {
        if !self.scopes.iter().any(|s| s.identifier == scope.identifier) {
            self.scopes.push(scope);
        }
    }

    pub fn scope_identifiers(&self) -> Vec<String> {
        self.scopes.iter().map(|s| s.identifier.clone()).collect()
    }

    pub fn is_active(&self) -> bool {
        self.status == TokenStatus::Active
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// A refresh token. Points at its access token by identifier only.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshToken {
    pub identifier: String,
    pub access_token_id: String,
    pub expires_at: DateTime<Utc>,
    pub status: TokenStatus,
}

impl RefreshToken {
    pub fn new(access_token_id: impl Into<String>) -> Self {
        Self {
            identifier: String::new(),
            access_token_id: access_token_id.into(),
            expires_at: Utc::now(),
            status: TokenStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TokenStatus::Active
    }
}

/// A user resolved by a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub identifier: String,
}

/// Tokens produced by one successful grant run.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
}
