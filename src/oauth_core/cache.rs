//! Tag-invalidated caching for repositories.
//!
//! `Cached<R>` wraps any repository and answers read paths from a
//! `CacheBackend`. Every entry is stamped with the generation of its tag at
//! the moment the read began; revokes and writes bump the generation before
//! returning, so stale reads never outlive the operation that made them
//! stale.

use std::any::type_name;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::error::{FirebaseError, StorageError};
use super::repository::{
    AccessTokenRepository, ClientRepository, FirebaseUserRepository, IdentityRepository,
    RefreshTokenRepository, ScopeRepository,
};
use super::types::{AccessToken, Client, GrantType, RefreshToken, Scope, TokenKind, User};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Tag generations observed when a read started.
pub type TagStamp = Vec<(String, u64)>;

/// Storage for cached repository reads.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Current generation of each tag.
    async fn stamp(&self, tags: &[String]) -> Result<TagStamp, CacheError>;

    /// Stores `value`. The entry is dropped once any tag in `stamp` moves on.
    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
        stamp: TagStamp,
    ) -> Result<(), CacheError>;

    /// Invalidates every entry stamped with `tag`.
    async fn invalidate_tag(&self, tag: &str) -> Result<(), CacheError>;
}

struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
    stamp: TagStamp,
}

/// Writes between sweeps of expired entries.
const SWEEP_INTERVAL: usize = 256;

/// In-process cache backend.
///
/// Invalidating a tag drops the entries stamped with it, and every
/// `SWEEP_INTERVAL` writes the expired ones are swept. Generations are kept
/// per tag, one per cached repository.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    generations: Arc<DashMap<String, u64>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn generation(&self, tag: &str) -> u64 {
        self.generations.get(tag).map(|g| *g).unwrap_or(0)
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry.expires_at.is_none_or(|at| at > Instant::now())
            && entry
                .stamp
                .iter()
                .all(|(tag, generation)| self.generation(tag) == *generation)
    }

    /// Number of stored entries, fresh or not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired and invalidated entries.
    pub fn purge(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| self.is_fresh(entry));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Purged cache entries");
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let hit = self
            .entries
            .get(key)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.value.clone());
        if hit.is_none() {
            self.entries.remove(key);
        }
        Ok(hit)
    }

    async fn stamp(&self, tags: &[String]) -> Result<TagStamp, CacheError> {
        Ok(tags.iter().map(|t| (t.clone(), self.generation(t))).collect())
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
        stamp: TagStamp,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
            stamp,
        };
        if self.is_fresh(&entry) {
            self.entries.insert(key.to_string(), entry);
        }
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.purge();
        }
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<(), CacheError> {
        *self.generations.entry(tag.to_string()).or_insert(0) += 1;
        self.entries
            .retain(|_, entry| !entry.stamp.iter().any(|(stamped, _)| stamped == tag));
        Ok(())
    }
}

/// Duration and invalidation tag for one cached repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct CacheSettings {
    /// Entry lifetime. `None` keeps entries until their tag is invalidated.
    #[serde(default, with = "optional_seconds")]
    pub duration: Option<Duration>,
    /// Invalidation tag. Defaults to the wrapped repository's type name.
    #[serde(default)]
    pub dependency: Option<String>,
}

mod optional_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

/// Repositories whose reads can be cached.
pub trait RepositoryCache {
    fn set_cache(&mut self, duration: Option<Duration>, dependency: Option<String>);

    fn cache_duration(&self) -> Option<Duration>;

    /// Tag invalidated on every write.
    fn cache_dependency(&self) -> String;
}

/// Caching decorator around a repository.
pub struct Cached<R> {
    inner: R,
    cache: Arc<dyn CacheBackend>,
    namespace: &'static str,
    settings: CacheSettings,
}

impl<R> Cached<R> {
    pub fn new(inner: R, cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            inner,
            cache,
            namespace: type_name::<R>(),
            settings: CacheSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn key(&self, operation: &str, id: &str) -> String {
        format!("{}:{}:{}", self.namespace, operation, id)
    }

    /// Returns the cached value for `key` or loads, stores and returns it.
    async fn remember<T, F, Fut>(&self, key: String, load: F) -> Result<T, StorageError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, StorageError>> + Send,
    {
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(key = %key, "Repository cache hit");
                    return Ok(value);
                }
                Err(e) => warn!(key = %key, error = %e, "Discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Cache read failed, loading from repository"),
        }

        let stamp = self
            .cache
            .stamp(&[self.cache_dependency()])
            .await
            .unwrap_or_default();
        let value = load().await?;
        if !stamp.is_empty() {
            match serde_json::to_string(&value) {
                Ok(raw) => {
                    if let Err(e) = self.cache.set(&key, raw, self.settings.duration, stamp).await {
                        warn!(key = %key, error = %e, "Cache write failed");
                    }
                }
                Err(e) => warn!(key = %key, error = %e, "Value not cacheable"),
            }
        }
        Ok(value)
    }

    /// Invalidates every cached read of this repository.
    pub async fn invalidate(&self) -> Result<(), StorageError> {
        let tag = self.cache_dependency();
        self.cache
            .invalidate_tag(&tag)
            .await
            .map_err(|e| StorageError::Backend(format!("cache invalidation of `{}` failed: {}", tag, e)))
    }
}

impl<R> RepositoryCache for Cached<R> {
    fn set_cache(&mut self, duration: Option<Duration>, dependency: Option<String>) {
        self.settings = CacheSettings { duration, dependency };
    }

    fn cache_duration(&self) -> Option<Duration> {
        self.settings.duration
    }

    fn cache_dependency(&self) -> String {
        self.settings
            .dependency
            .clone()
            .unwrap_or_else(|| self.namespace.to_string())
    }
}

#[async_trait]
impl<R: AccessTokenRepository> AccessTokenRepository for Cached<R> {
    fn get_new_token(&self, client: &Client, scopes: Vec<Scope>, user_id: Option<&str>) -> AccessToken {
        self.inner.get_new_token(client, scopes, user_id)
    }

    async fn persist_new_access_token(&self, token: &AccessToken) -> Result<(), StorageError> {
        self.inner.persist_new_access_token(token).await?;
        self.invalidate().await
    }

    async fn revoke_access_token(&self, identifier: &str) -> Result<(), StorageError> {
        self.inner.revoke_access_token(identifier).await?;
        self.invalidate().await
    }

    #[instrument(skip(self), level = "debug")]
    async fn is_access_token_revoked(&self, identifier: &str) -> Result<bool, StorageError> {
        self.remember(self.key("revoked", identifier), || {
            self.inner.is_access_token_revoked(identifier)
        })
        .await
    }
}

#[async_trait]
impl<R: RefreshTokenRepository> RefreshTokenRepository for Cached<R> {
    fn get_new_refresh_token(&self, access_token: &AccessToken) -> Option<RefreshToken> {
        self.inner.get_new_refresh_token(access_token)
    }

    async fn persist_new_refresh_token(&self, token: &RefreshToken) -> Result<(), StorageError> {
        self.inner.persist_new_refresh_token(token).await?;
        self.invalidate().await
    }

    async fn revoke_refresh_token(&self, identifier: &str) -> Result<(), StorageError> {
        self.inner.revoke_refresh_token(identifier).await?;
        self.invalidate().await
    }

    #[instrument(skip(self), level = "debug")]
    async fn is_refresh_token_revoked(&self, identifier: &str) -> Result<bool, StorageError> {
        self.remember(self.key("revoked", identifier), || {
            self.inner.is_refresh_token_revoked(identifier)
        })
        .await
    }

    async fn revoke_refresh_tokens_for_access_token(
        &self,
        access_token_id: &str,
    ) -> Result<(), StorageError> {
        self.inner
            .revoke_refresh_tokens_for_access_token(access_token_id)
            .await?;
        self.invalidate().await
    }
}

#[async_trait]
impl<R: ScopeRepository> ScopeRepository for Cached<R> {
    async fn get_scope_entity_by_identifier(&self, identifier: &str) -> Result<Option<Scope>, StorageError> {
        self.remember(self.key("scope", identifier), || {
            self.inner.get_scope_entity_by_identifier(identifier)
        })
        .await
    }

    async fn finalize_scopes(
        &self,
        requested: &[Scope],
        grant_type: GrantType,
        client: &Client,
        user_id: Option<&str>,
    ) -> Result<Vec<Scope>, StorageError> {
        let mut ids = requested.iter().map(|s| s.identifier.as_str()).collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();
        let id = format!(
            "{}|{}|{}|{}",
            client.identifier,
            grant_type.as_str(),
            user_id.unwrap_or(""),
            ids.join(" ")
        );
        self.remember(self.key("finalize", &id), || {
            self.inner.finalize_scopes(requested, grant_type, client, user_id)
        })
        .await
    }
}

#[async_trait]
impl<R: ClientRepository> ClientRepository for Cached<R> {
    async fn get_client_entity(&self, identifier: &str) -> Result<Option<Client>, StorageError> {
        self.remember(self.key("client", identifier), || {
            self.inner.get_client_entity(identifier)
        })
        .await
    }

    async fn validate_client(
        &self,
        identifier: &str,
        secret: Option<&str>,
        grant_type: GrantType,
    ) -> Result<bool, StorageError> {
        // Secrets never become cache keys.
        self.inner.validate_client(identifier, secret, grant_type).await
    }
}

#[async_trait]
impl<R: IdentityRepository> IdentityRepository for Cached<R> {
    async fn find_identity_by_access_token(
        &self,
        access_token_id: &str,
        token_type: TokenKind,
    ) -> Result<Option<User>, StorageError> {
        self.inner
            .find_identity_by_access_token(access_token_id, token_type)
            .await
    }
}

#[async_trait]
impl<R: FirebaseUserRepository> FirebaseUserRepository for Cached<R> {
    async fn get_user_entity_by_firebase_id(
        &self,
        firebase_id: &str,
        grant_type: GrantType,
        client: &Client,
    ) -> Result<User, FirebaseError> {
        self.inner
            .get_user_entity_by_firebase_id(firebase_id, grant_type, client)
            .await
    }
}
