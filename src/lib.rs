pub mod oauth_core;

pub use oauth_core::cache::{Cached, CacheBackend, CacheSettings, MemoryCache, RepositoryCache};
pub use oauth_core::config::ServerConfig;
pub use oauth_core::error::{ConfigError, FirebaseError, OAuthError, StorageError};
pub use oauth_core::events::{AuthorizationEvent, EventEmitter, OAuthEvent};
pub use oauth_core::grant::{FirebaseGrant, Grant, GrantContext, RevokeGrant};
pub use oauth_core::jwt::{AccessTokenClaims, JwtSigner, JwtVerifier};
pub use oauth_core::mac::{MacHeader, MacTokenValidator};
pub use oauth_core::memory::{
    InMemoryAccessTokenRepository, InMemoryClientRepository, InMemoryFirebaseUserRepository,
    InMemoryRefreshTokenRepository, InMemoryScopeRepository,
};
pub use oauth_core::request::{ServerRequest, ServerResponse};
pub use oauth_core::resource::{
    AuthError, AuthMethod, AuthenticatedPrincipal, AuthorizationValidator, BearerTokenValidator, HttpBearerAuth, HttpMacAuth,
    RequestAuthenticator, ResourceServer,
};
pub use oauth_core::server::{AuthorizationServer, AuthorizationServerBuilder};
