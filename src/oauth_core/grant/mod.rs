//! Grant handlers and the client/scope/token plumbing they share.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use super::crypto;
use super::error::{OAuthError, StorageError};
use super::events::{EventEmitter, OAuthEvent};
use super::jwt::JwtVerifier;
use super::repository::{AccessTokenRepository, ClientRepository, RefreshTokenRepository, ScopeRepository};
use super::request::ServerRequest;
use super::types::{AccessToken, Client, GrantType, IssuedTokens, MacAlgorithm, MacCredentials, RefreshToken, Scope, TokenKind};

pub mod firebase;
pub mod revoke;

pub use firebase::FirebaseGrant;
pub use revoke::{Invalidation, RevokeGrant};

/// Identifier collisions tolerated before issuance gives up.
pub const MAX_TOKEN_GENERATION_ATTEMPTS: usize = 10;

const SCOPE_DELIMITER: char = ' ';

/// Server-owned collaborators handed to every grant call.
#[derive(Clone)]
pub struct GrantContext {
    pub client_repository: Arc<dyn ClientRepository>,
    pub access_token_repository: Arc<dyn AccessTokenRepository>,
    pub scope_repository: Arc<dyn ScopeRepository>,
    pub verifier: JwtVerifier,
    pub encryption_key: String,
    pub emitter: EventEmitter,
    /// Used when a request carries no `scope` parameter.
    pub default_scope: String,
    pub mac_algorithm: MacAlgorithm,
}

/// Progress of a single token or revoke request, recorded in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    ClientValidated,
    ScopesFinalized,
    TokenIssued,
    ResponseBuilt,
    Failed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Received => "received",
            RequestState::ClientValidated => "client_validated",
            RequestState::ScopesFinalized => "scopes_finalized",
            RequestState::TokenIssued => "token_issued",
            RequestState::ResponseBuilt => "response_built",
            RequestState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::ResponseBuilt | RequestState::Failed)
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strategy for answering token or revoke requests.
#[async_trait]
pub trait Grant: Send + Sync + 'static {
    /// The `grant_type` this grant answers to.
    fn identifier(&self) -> &'static str;

    fn can_respond_to_access_token_request(&self, request: &ServerRequest) -> bool {
        request.param("grant_type") == Some(self.identifier())
    }

    async fn respond_to_access_token_request(
        &self,
        ctx: &GrantContext,
        request: &ServerRequest,
        access_token_ttl: Duration,
    ) -> Result<IssuedTokens, OAuthError>;

    async fn respond_to_revoke_token_request(
        &self,
        _ctx: &GrantContext,
        _request: &ServerRequest,
    ) -> Result<(), OAuthError> {
        Err(OAuthError::UnsupportedGrantType)
    }
}

/// Client id and secret, from Basic auth first and the body second.
pub fn client_credentials(request: &ServerRequest) -> Result<(String, Option<String>), OAuthError> {
    let (basic_id, basic_secret) = match request.basic_credentials() {
        Some((id, secret)) => (Some(id), Some(secret)),
        None => (None, None),
    };
    let client_id = basic_id
        .or_else(|| request.param("client_id").map(str::to_string))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| OAuthError::invalid_request("client_id"))?;
    let secret = basic_secret.or_else(|| request.param("client_secret").map(str::to_string));
    Ok((client_id, secret))
}

/// Authenticates the calling client for `grant_type`.
///
/// With `require_secret == false` a client that sends no secret only has to
/// exist and be active; a secret that is sent is always checked.
pub async fn validate_client(
    ctx: &GrantContext,
    request: &ServerRequest,
    grant_type: GrantType,
    require_secret: bool,
) -> Result<Client, OAuthError> {
    let (client_id, secret) = client_credentials(request)?;

    let client = ctx
        .client_repository
        .get_client_entity(&client_id)
        .await
        .map_err(|e| e.into_server_error("get_client_entity", &client_id))?;
    let Some(client) = client else {
        return Err(client_failure(ctx, request, &client_id, "unknown client"));
    };

    if require_secret || secret.is_some() {
        let valid = ctx
            .client_repository
            .validate_client(&client_id, secret.as_deref(), grant_type)
            .await
            .map_err(|e| e.into_server_error("validate_client", &client_id))?;
        if !valid {
            return Err(client_failure(ctx, request, &client_id, "client validation failed"));
        }
    } else if !client.is_active() {
        return Err(client_failure(ctx, request, &client_id, "client is disabled"));
    }

    debug!(client_id = %client.identifier, state = %RequestState::ClientValidated, "Client validated");
    Ok(client)
}

fn client_failure(ctx: &GrantContext, request: &ServerRequest, client_id: &str, reason: &str) -> OAuthError {
    warn!(client_id, reason, "Client authentication failed");
    ctx.emitter.emit(OAuthEvent::ClientAuthenticationFailed {
        request: request.clone(),
    });
    OAuthError::InvalidClient
}

/// Resolves a space-delimited scope string. Unknown identifiers fail with
/// `InvalidScope`.
pub async fn validate_scopes(ctx: &GrantContext, scopes: &str) -> Result<Vec<Scope>, OAuthError> {
    let mut valid = Vec::new();
    for identifier in scopes.trim().split(SCOPE_DELIMITER).filter(|s| !s.is_empty()) {
        let scope = ctx
            .scope_repository
            .get_scope_entity_by_identifier(identifier)
            .await
            .map_err(|e| e.into_server_error("get_scope_entity_by_identifier", identifier))?;
        match scope {
            Some(scope) => valid.push(scope),
            None => return Err(OAuthError::InvalidScope(identifier.to_string())),
        }
    }
    Ok(valid)
}

/// Builds, stamps and persists a new access token, regenerating the
/// identifier on collisions.
pub async fn issue_access_token(
    ctx: &GrantContext,
    request: &ServerRequest,
    ttl: Duration,
    client: &Client,
    user_id: Option<&str>,
    scopes: Vec<Scope>,
) -> Result<AccessToken, OAuthError> {
    let mut token = ctx.access_token_repository.get_new_token(client, scopes, user_id);
    let now = Utc::now();
    token.issued_at = now;
    token.expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
        error!(ttl_seconds = ttl.num_seconds(), client_id = %client.identifier, "Access token expiry out of range");
        OAuthError::ServerError("Unable to compute the access token expiry".to_string())
    })?;
    if token.kind == TokenKind::Mac {
        token.mac = Some(MacCredentials {
            key: crypto::generate_mac_key(),
            algorithm: ctx.mac_algorithm,
        });
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        token.identifier = crypto::generate_identifier();
        match ctx.access_token_repository.persist_new_access_token(&token).await {
            Ok(()) => break,
            Err(StorageError::UniqueViolation(id)) if attempt < MAX_TOKEN_GENERATION_ATTEMPTS => {
                warn!(token_id = %id, attempt, "Access token identifier collision, retrying");
            }
            Err(e) => return Err(e.into_server_error("persist_new_access_token", &token.identifier)),
        }
    }

    info!(
        token_id = %token.identifier,
        client_id = %client.identifier,
        kind = ?token.kind,
        state = %RequestState::TokenIssued,
        "Issued access token"
    );
    ctx.emitter.emit(OAuthEvent::AccessTokenIssued {
        request: request.clone(),
        access_token_id: token.identifier.clone(),
    });
    Ok(token)
}

/// Issues a refresh token for an active, persisted access token.
///
/// If the refresh token cannot be persisted the access token is revoked
/// before the error is returned, so a failed issuance never leaves a live
/// access token behind.
pub async fn issue_refresh_token(
    ctx: &GrantContext,
    request: &ServerRequest,
    refresh_tokens: &dyn RefreshTokenRepository,
    access_token: &AccessToken,
    expires_at: DateTime<Utc>,
) -> Result<Option<RefreshToken>, OAuthError> {
    if !access_token.is_active() || access_token.identifier.is_empty() {
        error!(token_id = %access_token.identifier, "Cannot issue a RefreshToken for an invalid or revoked AccessToken");
        return Err(OAuthError::Logic(
            "Cannot issue a RefreshToken for an invalid or revoked AccessToken.".into(),
        ));
    }

    let Some(mut token) = refresh_tokens.get_new_refresh_token(access_token) else {
        return Ok(None);
    };
    token.access_token_id = access_token.identifier.clone();
    token.expires_at = expires_at;

    let mut attempt = 0;
    let failure = loop {
        attempt += 1;
        token.identifier = crypto::generate_identifier();
        match refresh_tokens.persist_new_refresh_token(&token).await {
            Ok(()) => break None,
            Err(StorageError::UniqueViolation(id)) if attempt < MAX_TOKEN_GENERATION_ATTEMPTS => {
                warn!(token_id = %id, attempt, "Refresh token identifier collision, retrying");
            }
            Err(e) => break Some(e),
        }
    };

    if let Some(e) = failure {
        let err = e.into_server_error("persist_new_refresh_token", &token.identifier);
        if let Err(revoke_err) = ctx
            .access_token_repository
            .revoke_access_token(&access_token.identifier)
            .await
        {
            error!(error = %revoke_err, token_id = %access_token.identifier, "Could not revoke access token after refresh token failure");
        } else {
            warn!(token_id = %access_token.identifier, "Revoked access token after refresh token failure");
        }
        return Err(err);
    }

    info!(token_id = %token.identifier, access_token_id = %access_token.identifier, "Issued refresh token");
    ctx.emitter.emit(OAuthEvent::RefreshTokenIssued {
        request: request.clone(),
        refresh_token_id: token.identifier.clone(),
    });
    Ok(Some(token))
}
