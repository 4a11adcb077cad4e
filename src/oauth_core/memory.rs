//! In-memory repository implementations.
//!
//! Each repository keeps its own record type and maps it to the protocol
//! value types on the way in and out. Tokens are never deleted; revocation
//! only flips the record status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::crypto;
use super::error::{FirebaseError, StorageError};
use super::repository::{
    AccessTokenRepository, ClientRepository, FirebaseUserRepository, IdentityRepository,
    RefreshTokenRepository, ScopeRepository,
};
use super::types::{
    AccessToken, Client, GrantType, MacAlgorithm, MacCredentials, RefreshToken, Scope, TokenKind,
    TokenStatus, User,
};

#[derive(Debug, Clone)]
struct ClientRecord {
    client: Client,
    secret_hash: Option<String>,
}

/// Clients held in memory. Secrets are stored as SHA-256 digests.
#[derive(Clone, Default)]
pub struct InMemoryClientRepository {
    clients: Arc<DashMap<String, ClientRecord>>,
}

impl InMemoryClientRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client. A `secret` makes it confidential.
    pub fn with_client(self, client: Client, secret: Option<&str>) -> Self {
        self.insert(client, secret);
        self
    }

    pub fn insert(&self, mut client: Client, secret: Option<&str>) {
        client.confidential = secret.is_some();
        let record = ClientRecord {
            secret_hash: secret.map(crypto::hash_secret),
            client,
        };
        self.clients.insert(record.client.identifier.clone(), record);
    }
}

#[async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn get_client_entity(&self, identifier: &str) -> Result<Option<Client>, StorageError> {
        Ok(self.clients.get(identifier).map(|r| r.client.clone()))
    }

    async fn validate_client(
        &self,
        identifier: &str,
        secret: Option<&str>,
        grant_type: GrantType,
    ) -> Result<bool, StorageError> {
        let Some(record) = self.clients.get(identifier) else {
            return Ok(false);
        };
        let client = &record.client;
        if !client.is_active() {
            return Ok(false);
        }
        // refresh_token and revoke are open to every active client.
        let grant_permitted = matches!(grant_type, GrantType::RefreshToken | GrantType::Revoke)
            || client.grant_types.contains(&grant_type);
        if !grant_permitted {
            return Ok(false);
        }
        Ok(match (&record.secret_hash, secret) {
            (None, _) => true,
            (Some(hash), Some(secret)) => crypto::verify_secret(secret, hash),
            (Some(_), None) => false,
        })
    }
}

/// Scopes plus the client-to-scope links used by `finalize_scopes`.
#[derive(Clone, Default)]
pub struct InMemoryScopeRepository {
    scopes: Arc<DashMap<String, Scope>>,
    client_scopes: Arc<DashMap<String, Vec<String>>>,
}

impl InMemoryScopeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(self, scope: Scope) -> Self {
        self.scopes.insert(scope.identifier.clone(), scope);
        self
    }

    /// Makes `scope_id` available to `client_id`.
    pub fn with_client_scope(self, client_id: &str, scope_id: &str) -> Self {
        self.client_scopes
            .entry(client_id.to_string())
            .or_default()
            .push(scope_id.to_string());
        self
    }
}

#[async_trait]
impl ScopeRepository for InMemoryScopeRepository {
    async fn get_scope_entity_by_identifier(&self, identifier: &str) -> Result<Option<Scope>, StorageError> {
        Ok(self.scopes.get(identifier).map(|s| s.clone()))
    }

    async fn finalize_scopes(
        &self,
        requested: &[Scope],
        grant_type: GrantType,
        client: &Client,
        user_id: Option<&str>,
    ) -> Result<Vec<Scope>, StorageError> {
        let linked = self
            .client_scopes
            .get(&client.identifier)
            .map(|ids| ids.clone())
            .unwrap_or_default();

        let finalized = linked
            .iter()
            .filter_map(|id| self.scopes.get(id).map(|s| s.clone()))
            .filter(|scope| scope.permits(grant_type, user_id))
            .filter(|scope| {
                if requested.is_empty() {
                    scope.is_default
                } else {
                    requested.iter().any(|r| r.identifier == scope.identifier)
                }
            })
            .collect::<Vec<_>>();

        debug!(client_id = %client.identifier, grant_type = grant_type.as_str(), count = finalized.len(), "Finalized scopes");
        Ok(finalized)
    }
}

#[derive(Debug, Clone)]
struct AccessTokenRecord {
    identifier: String,
    client_id: String,
    user_id: Option<String>,
    scopes: Vec<String>,
    kind: TokenKind,
    /// Encrypted when the repository holds an encryption key.
    mac_key: Option<String>,
    mac_algorithm: Option<MacAlgorithm>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    status: TokenStatus,
    updated_at: DateTime<Utc>,
}

/// Access tokens held in memory.
#[derive(Clone, Default)]
pub struct InMemoryAccessTokenRepository {
    records: Arc<DashMap<String, AccessTokenRecord>>,
    encryption_key: Option<String>,
}

impl InMemoryAccessTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores MAC keys encrypted with `encryption_key`.
    pub fn with_encryption_key(encryption_key: impl Into<String>) -> Self {
        Self {
            records: Arc::default(),
            encryption_key: Some(encryption_key.into()),
        }
    }

    fn to_record(&self, token: &AccessToken) -> Result<AccessTokenRecord, StorageError> {
        let mac_key = match (&token.mac, &self.encryption_key) {
            (Some(mac), Some(key)) => Some(
                crypto::encrypt_payload(&mac.key, key).map_err(StorageError::Backend)?,
            ),
            (Some(mac), None) => Some(mac.key.clone()),
            (None, _) => None,
        };
        let now = Utc::now();
        Ok(AccessTokenRecord {
            identifier: token.identifier.clone(),
            client_id: token.client.identifier.clone(),
            user_id: token.user_id.clone(),
            scopes: token.scope_identifiers(),
            kind: token.kind,
            mac_key,
            mac_algorithm: token.mac.as_ref().map(|m| m.algorithm),
            issued_at: token.issued_at,
            expires_at: token.expires_at,
            status: TokenStatus::Active,
            updated_at: now,
        })
    }

    /// MAC credentials of a stored token, decrypted.
    pub fn mac_credentials(&self, identifier: &str) -> Result<Option<MacCredentials>, StorageError> {
        let Some(record) = self.records.get(identifier) else {
            return Ok(None);
        };
        let (Some(stored), Some(algorithm)) = (&record.mac_key, record.mac_algorithm) else {
            return Ok(None);
        };
        let key = match &self.encryption_key {
            Some(enc) => crypto::decrypt_payload(stored, enc).map_err(StorageError::Backend)?,
            None => stored.clone(),
        };
        Ok(Some(MacCredentials { key, algorithm }))
    }

    /// Status of a stored token.
    pub fn status_of(&self, identifier: &str) -> Option<TokenStatus> {
        self.records.get(identifier).map(|r| r.status)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl AccessTokenRepository for InMemoryAccessTokenRepository {
    async fn persist_new_access_token(&self, token: &AccessToken) -> Result<(), StorageError> {
        let record = self.to_record(token)?;
        match self.records.entry(record.identifier.clone()) {
            Entry::Occupied(_) => Err(StorageError::UniqueViolation(record.identifier)),
            Entry::Vacant(slot) => {
                info!(token_id = %record.identifier, client_id = %record.client_id, "Saved access token");
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn revoke_access_token(&self, identifier: &str) -> Result<(), StorageError> {
        if let Some(mut record) = self.records.get_mut(identifier) {
            if record.status == TokenStatus::Active {
                record.status = TokenStatus::Revoked;
                record.updated_at = Utc::now();
                info!(token_id = %identifier, "Revoked access token");
            }
        }
        Ok(())
    }

    async fn is_access_token_revoked(&self, identifier: &str) -> Result<bool, StorageError> {
        Ok(self
            .records
            .get(identifier)
            .is_none_or(|r| r.status == TokenStatus::Revoked))
    }
}

#[async_trait]
impl IdentityRepository for InMemoryAccessTokenRepository {
    async fn find_identity_by_access_token(
        &self,
        access_token_id: &str,
        token_type: TokenKind,
    ) -> Result<Option<User>, StorageError> {
        Ok(self.records.get(access_token_id).and_then(|r| {
            if r.status != TokenStatus::Active || r.kind != token_type {
                return None;
            }
            r.user_id.clone().map(|identifier| User { identifier })
        }))
    }
}

#[derive(Debug, Clone)]
struct RefreshTokenRecord {
    identifier: String,
    access_token_id: String,
    expires_at: DateTime<Utc>,
    status: TokenStatus,
    updated_at: DateTime<Utc>,
}

/// Refresh tokens held in memory. Parent status is read from the access
/// token repository at persistence time.
#[derive(Clone)]
pub struct InMemoryRefreshTokenRepository {
    records: Arc<DashMap<String, RefreshTokenRecord>>,
    access_tokens: Arc<dyn AccessTokenRepository>,
}

impl InMemoryRefreshTokenRepository {
    pub fn new(access_tokens: Arc<dyn AccessTokenRepository>) -> Self {
        Self {
            records: Arc::default(),
            access_tokens,
        }
    }

    pub fn status_of(&self, identifier: &str) -> Option<TokenStatus> {
        self.records.get(identifier).map(|r| r.status)
    }

    pub fn expiry_of(&self, identifier: &str) -> Option<DateTime<Utc>> {
        self.records.get(identifier).map(|r| r.expires_at)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryRefreshTokenRepository {
    async fn persist_new_refresh_token(&self, token: &RefreshToken) -> Result<(), StorageError> {
        if self
            .access_tokens
            .is_access_token_revoked(&token.access_token_id)
            .await?
        {
            return Err(StorageError::InvariantViolation(
                "Cannot persist RefreshToken with an invalid or revoked AccessToken.".into(),
            ));
        }
        let record = RefreshTokenRecord {
            identifier: token.identifier.clone(),
            access_token_id: token.access_token_id.clone(),
            expires_at: token.expires_at,
            status: TokenStatus::Active,
            updated_at: Utc::now(),
        };
        match self.records.entry(record.identifier.clone()) {
            Entry::Occupied(_) => Err(StorageError::UniqueViolation(record.identifier)),
            Entry::Vacant(slot) => {
                info!(token_id = %record.identifier, access_token_id = %record.access_token_id, "Saved refresh token");
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn revoke_refresh_token(&self, identifier: &str) -> Result<(), StorageError> {
        if let Some(mut record) = self.records.get_mut(identifier) {
            if record.status == TokenStatus::Active {
                record.status = TokenStatus::Revoked;
                record.updated_at = Utc::now();
                info!(token_id = %identifier, "Revoked refresh token");
            }
        }
        Ok(())
    }

    async fn is_refresh_token_revoked(&self, identifier: &str) -> Result<bool, StorageError> {
        Ok(self
            .records
            .get(identifier)
            .is_none_or(|r| r.status == TokenStatus::Revoked))
    }

    async fn revoke_refresh_tokens_for_access_token(
        &self,
        access_token_id: &str,
    ) -> Result<(), StorageError> {
        let now = Utc::now();
        for mut record in self.records.iter_mut() {
            if record.access_token_id == access_token_id && record.status == TokenStatus::Active {
                record.status = TokenStatus::Revoked;
                record.updated_at = now;
            }
        }
        Ok(())
    }
}

/// Firebase ID token lookups answered from a fixed table.
#[derive(Clone, Default)]
pub struct InMemoryFirebaseUserRepository {
    outcomes: Arc<DashMap<String, Result<User, FirebaseError>>>,
}

impl InMemoryFirebaseUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, firebase_id: &str, user_id: &str) -> Self {
        self.outcomes.insert(
            firebase_id.to_string(),
            Ok(User {
                identifier: user_id.to_string(),
            }),
        );
        self
    }

    pub fn with_failure(self, firebase_id: &str, error: FirebaseError) -> Self {
        self.outcomes.insert(firebase_id.to_string(), Err(error));
        self
    }
}

#[async_trait]
impl FirebaseUserRepository for InMemoryFirebaseUserRepository {
    async fn get_user_entity_by_firebase_id(
        &self,
        firebase_id: &str,
        _grant_type: GrantType,
        _client: &Client,
    ) -> Result<User, FirebaseError> {
        self.outcomes
            .get(firebase_id)
            .map(|o| o.clone())
            .unwrap_or(Err(FirebaseError::InvalidToken))
    }
}
