//! Repository contracts the token engine consumes.
//!
//! Every trait is storage-agnostic. Implementations map their own records to
//! the value types in `types` at this boundary.

use async_trait::async_trait;

use super::error::{FirebaseError, StorageError};
use super::types::{AccessToken, Client, GrantType, RefreshToken, Scope, TokenKind, User};

/// Trait for looking up and authenticating clients.
#[async_trait]
pub trait ClientRepository: Send + Sync + 'static {
    /// Returns the client with this identifier, active or not.
    async fn get_client_entity(&self, identifier: &str) -> Result<Option<Client>, StorageError>;

    /// True only if the client is active, may use `grant_type`, and either
    /// `secret` matches or the client is public.
    async fn validate_client(
        &self,
        identifier: &str,
        secret: Option<&str>,
        grant_type: GrantType,
    ) -> Result<bool, StorageError>;
}

/// Trait for access token persistence and revocation.
#[async_trait]
pub trait AccessTokenRepository: Send + Sync + 'static {
    /// Builds an unsaved token. Nothing is persisted.
    fn get_new_token(&self, client: &Client, scopes: Vec<Scope>, user_id: Option<&str>) -> AccessToken {
        AccessToken::new(client.clone(), scopes, user_id.map(str::to_string))
    }

    /// Persists a freshly issued token. Fails with
    /// `StorageError::UniqueViolation` when the identifier is taken.
    async fn persist_new_access_token(&self, token: &AccessToken) -> Result<(), StorageError>;

    /// Marks the token revoked. Unknown or already revoked tokens are a no-op.
    async fn revoke_access_token(&self, identifier: &str) -> Result<(), StorageError>;

    /// True when the token is revoked or cannot be found at all.
    async fn is_access_token_revoked(&self, identifier: &str) -> Result<bool, StorageError>;
}

/// Trait for refresh token persistence and revocation.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync + 'static {
    /// Builds an unsaved refresh token for `access_token`. `None` disables
    /// refresh tokens.
    fn get_new_refresh_token(&self, access_token: &AccessToken) -> Option<RefreshToken> {
        Some(RefreshToken::new(access_token.identifier.clone()))
    }

    /// Persists a refresh token. Fails with `StorageError::InvariantViolation`
    /// when the parent access token is not active.
    async fn persist_new_refresh_token(&self, token: &RefreshToken) -> Result<(), StorageError>;

    /// Marks the token revoked. Unknown or already revoked tokens are a no-op.
    async fn revoke_refresh_token(&self, identifier: &str) -> Result<(), StorageError>;

    /// True when the token is revoked or cannot be found at all.
    async fn is_refresh_token_revoked(&self, identifier: &str) -> Result<bool, StorageError>;

    /// Revokes every refresh token issued against `access_token_id`.
    async fn revoke_refresh_tokens_for_access_token(
        &self,
        access_token_id: &str,
    ) -> Result<(), StorageError>;
}

/// Trait for scope lookup and final scope resolution.
#[async_trait]
pub trait ScopeRepository: Send + Sync + 'static {
    async fn get_scope_entity_by_identifier(&self, identifier: &str) -> Result<Option<Scope>, StorageError>;

    /// Resolves the scopes a token will carry.
    ///
    /// An empty `requested` yields the client's default scopes. Scopes
    /// restricted to another user or another grant are always dropped, and
    /// a non-empty `requested` additionally limits the result to those
    /// identifiers. Unknown requested scopes are dropped without error.
    async fn finalize_scopes(
        &self,
        requested: &[Scope],
        grant_type: GrantType,
        client: &Client,
        user_id: Option<&str>,
    ) -> Result<Vec<Scope>, StorageError>;
}

/// Resolves users from federated Firebase ID tokens.
#[async_trait]
pub trait FirebaseUserRepository: Send + Sync + 'static {
    async fn get_user_entity_by_firebase_id(
        &self,
        firebase_id: &str,
        grant_type: GrantType,
        client: &Client,
    ) -> Result<User, FirebaseError>;
}

/// Resolves the local principal behind a validated access token.
#[async_trait]
pub trait IdentityRepository: Send + Sync + 'static {
    async fn find_identity_by_access_token(
        &self,
        access_token_id: &str,
        token_type: TokenKind,
    ) -> Result<Option<User>, StorageError>;
}
