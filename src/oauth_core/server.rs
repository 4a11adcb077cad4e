//! The authorization server facade: grant selection, token responses and
//! revocation.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, instrument, warn};

use super::config::ServerConfig;
use super::error::{ConfigError, OAuthError};
use super::events::{AuthorizationEvent, EventEmitter, OAuthEvent};
use super::grant::{Grant, GrantContext, RequestState};
use super::jwt::{JwtSigner, JwtVerifier, read_key_file};
use super::repository::{AccessTokenRepository, ClientRepository, ScopeRepository};
use super::request::{ServerRequest, ServerResponse};
use super::response::{revoke_response, token_response};
use super::types::{GrantType, MacAlgorithm};

const BASIC_CHALLENGE: &str = "Basic realm=\"OAuth\"";

struct EnabledGrant {
    grant: Arc<dyn Grant>,
    access_token_ttl: Duration,
}

pub struct AuthorizationServer {
    ctx: GrantContext,
    signer: JwtSigner,
    grants: Vec<EnabledGrant>,
    debug: bool,
}

impl AuthorizationServer {
    pub fn builder() -> AuthorizationServerBuilder {
        AuthorizationServerBuilder::default()
    }

    pub fn verifier(&self) -> &JwtVerifier {
        &self.ctx.verifier
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Identifiers of enabled grants, in registration order.
    pub fn enabled_grant_types(&self) -> Vec<&'static str> {
        self.grants.iter().map(|g| g.grant.identifier()).collect()
    }

    /// Runs the grant matching `grant_type` and builds the token response.
    #[instrument(skip_all, fields(grant_type = request.param("grant_type").unwrap_or_default()))]
    pub async fn respond_to_access_token_request(
        &self,
        request: &ServerRequest,
    ) -> Result<ServerResponse, OAuthError> {
        debug!(state = %RequestState::Received, "Token request received");
        let result = self.issue(request).await;
        if let Err(err) = &result {
            warn!(error = %err.full_message(), state = %RequestState::Failed, "Token request failed");
        }
        result
    }

    async fn issue(&self, request: &ServerRequest) -> Result<ServerResponse, OAuthError> {
        let enabled = self
            .grants
            .iter()
            .find(|g| g.grant.can_respond_to_access_token_request(request))
            .ok_or(OAuthError::UnsupportedGrantType)?;

        let tokens = enabled
            .grant
            .respond_to_access_token_request(&self.ctx, request, enabled.access_token_ttl)
            .await?;
        let response = token_response(&tokens, &self.signer, &self.ctx.encryption_key)?;

        info!(
            grant_type = enabled.grant.identifier(),
            client_id = %tokens.access_token.client.identifier,
            state = %RequestState::ResponseBuilt,
            "Token request completed"
        );
        self.ctx
            .emitter
            .emit(OAuthEvent::AuthenticationSucceeded(AuthorizationEvent {
                request: request.clone(),
                response: response.clone(),
            }));
        Ok(response)
    }

    /// Revokes the token named in the request through the `revoke` grant.
    #[instrument(skip_all)]
    pub async fn respond_to_revoke_token_request(
        &self,
        request: &ServerRequest,
    ) -> Result<ServerResponse, OAuthError> {
        debug!(state = %RequestState::Received, "Revoke request received");
        let enabled = self
            .grants
            .iter()
            .find(|g| g.grant.identifier() == GrantType::Revoke.as_str())
            .ok_or(OAuthError::UnsupportedGrantType)?;

        match enabled.grant.respond_to_revoke_token_request(&self.ctx, request).await {
            Ok(()) => {
                debug!(state = %RequestState::ResponseBuilt, "Revoke request completed");
                Ok(revoke_response())
            }
            Err(err) => {
                warn!(error = %err.full_message(), state = %RequestState::Failed, "Revoke request failed");
                Err(err)
            }
        }
    }

    /// Serializes an error for `request`, adding the Basic challenge when a
    /// client that sent an `Authorization` header failed authentication.
    pub fn error_response(&self, request: &ServerRequest, err: &OAuthError) -> ServerResponse {
        let response = err.to_response(self.debug);
        if matches!(err, OAuthError::InvalidClient) && request.header("authorization").is_some() {
            return response.with_header("WWW-Authenticate", BASIC_CHALLENGE);
        }
        response
    }

    /// Token endpoint entry point that always produces a response.
    pub async fn handle_token_request(&self, request: &ServerRequest) -> ServerResponse {
        match self.respond_to_access_token_request(request).await {
            Ok(response) => response,
            Err(err) => self.error_response(request, &err),
        }
    }

    /// Revoke endpoint entry point that always produces a response.
    pub async fn handle_revoke_request(&self, request: &ServerRequest) -> ServerResponse {
        match self.respond_to_revoke_token_request(request).await {
            Ok(response) => response,
            Err(err) => self.error_response(request, &err),
        }
    }
}

impl std::fmt::Debug for AuthorizationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationServer")
            .field("grants", &self.enabled_grant_types())
            .field("debug", &self.debug)
            .finish()
    }
}

pub struct AuthorizationServerBuilder {
    client_repository: Option<Arc<dyn ClientRepository>>,
    access_token_repository: Option<Arc<dyn AccessTokenRepository>>,
    scope_repository: Option<Arc<dyn ScopeRepository>>,
    signer: Option<JwtSigner>,
    verifier: Option<JwtVerifier>,
    encryption_key: Option<String>,
    emitter: EventEmitter,
    default_scope: String,
    mac_algorithm: MacAlgorithm,
    default_ttl: Duration,
    debug: bool,
    grants: Vec<EnabledGrant>,
}

impl Default for AuthorizationServerBuilder {
    fn default() -> Self {
        Self {
            client_repository: None,
            access_token_repository: None,
            scope_repository: None,
            signer: None,
            verifier: None,
            encryption_key: None,
            emitter: EventEmitter::new(),
            default_scope: String::new(),
            mac_algorithm: MacAlgorithm::default(),
            default_ttl: Duration::seconds(super::config::DEFAULT_ACCESS_TOKEN_TTL as i64),
            debug: false,
            grants: Vec::new(),
        }
    }
}

impl AuthorizationServerBuilder {
    /// Starts from a config, loading the key pair from the configured paths.
    /// Repositories and grants still have to be supplied; wrap them with
    /// [`ServerConfig::cached`] to apply the cache settings.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        let mut builder = Self::default()
            .default_scope(config.default_scope.clone())
            .mac_algorithm(config.mac_algorithm)
            .access_token_ttl(config.access_token_ttl()?)
            .debug(config.debug);
        if let Some(path) = &config.private_key_path {
            builder = builder.private_key_pem(&read_key_file(path)?)?;
        }
        if let Some(path) = &config.public_key_path {
            builder = builder.public_key_pem(&read_key_file(path)?)?;
        }
        if let Some(key) = &config.encryption_key {
            builder = builder.encryption_key(key.clone());
        }
        Ok(builder)
    }

    pub fn client_repository(mut self, repository: Arc<dyn ClientRepository>) -> Self {
        self.client_repository = Some(repository);
        self
    }

    pub fn access_token_repository(mut self, repository: Arc<dyn AccessTokenRepository>) -> Self {
        self.access_token_repository = Some(repository);
        self
    }

    pub fn scope_repository(mut self, repository: Arc<dyn ScopeRepository>) -> Self {
        self.scope_repository = Some(repository);
        self
    }

    pub fn signer(mut self, signer: JwtSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn private_key_pem(self, pem: &[u8]) -> Result<Self, ConfigError> {
        Ok(self.signer(JwtSigner::from_rsa_pem(pem)?))
    }

    pub fn verifier(mut self, verifier: JwtVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn public_key_pem(self, pem: &[u8]) -> Result<Self, ConfigError> {
        Ok(self.verifier(JwtVerifier::from_rsa_pem(pem)?))
    }

    pub fn encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    pub fn event_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn default_scope(mut self, scope: impl Into<String>) -> Self {
        self.default_scope = scope.into();
        self
    }

    pub fn mac_algorithm(mut self, algorithm: MacAlgorithm) -> Self {
        self.mac_algorithm = algorithm;
        self
    }

    /// Lifetime for grants enabled without an explicit TTL.
    pub fn access_token_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Enables a grant. A grant with the same identifier is replaced.
    pub fn enable_grant_type(mut self, grant: impl Grant, access_token_ttl: Option<Duration>) -> Self {
        self.grants.retain(|g| g.grant.identifier() != grant.identifier());
        self.grants.push(EnabledGrant {
            grant: Arc::new(grant),
            access_token_ttl: access_token_ttl.unwrap_or(self.default_ttl),
        });
        self
    }

    pub fn build(self) -> Result<AuthorizationServer, ConfigError> {
        if self.grants.is_empty() {
            return Err(ConfigError::NoGrantTypes);
        }
        let client_repository = self
            .client_repository
            .ok_or(ConfigError::MissingRepository("client_repository"))?;
        let access_token_repository = self
            .access_token_repository
            .ok_or(ConfigError::MissingRepository("access_token_repository"))?;
        let scope_repository = self
            .scope_repository
            .ok_or(ConfigError::MissingRepository("scope_repository"))?;
        let signer = self
            .signer
            .ok_or_else(|| ConfigError::InvalidKey("no private key configured".into()))?;
        let verifier = self
            .verifier
            .ok_or_else(|| ConfigError::InvalidKey("no public key configured".into()))?;
        verifier.check_pair(&signer)?;
        let encryption_key = self
            .encryption_key
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingEncryptionKey)?;

        let server = AuthorizationServer {
            ctx: GrantContext {
                client_repository,
                access_token_repository,
                scope_repository,
                verifier,
                encryption_key,
                emitter: self.emitter,
                default_scope: self.default_scope,
                mac_algorithm: self.mac_algorithm,
            },
            signer,
            grants: self.grants,
            debug: self.debug,
        };
        info!(grants = ?server.enabled_grant_types(), debug = server.debug, "Authorization server ready");
        Ok(server)
    }
}
