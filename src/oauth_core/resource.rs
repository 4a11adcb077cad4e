//! Resource-server side: token validators, auth methods and the
//! per-request authenticator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use super::error::OAuthError;
use super::jwt::{JwtError, JwtVerifier};
use super::mac::MacTokenValidator;
use super::repository::{AccessTokenRepository, IdentityRepository};
use super::request::{ServerRequest, ServerResponse, TokenAttributes};
use super::types::{TokenKind, User};

/// Validates the credentials of a resource request and attaches the token
/// attributes on success.
#[async_trait]
pub trait AuthorizationValidator: Send + Sync + 'static {
    async fn validate_authorization(&self, request: ServerRequest) -> Result<ServerRequest, OAuthError>;
}

/// Validates `Authorization: Bearer <jwt>` requests.
pub struct BearerTokenValidator {
    access_tokens: Arc<dyn AccessTokenRepository>,
    verifier: JwtVerifier,
}

impl BearerTokenValidator {
    pub fn new(access_tokens: Arc<dyn AccessTokenRepository>, verifier: JwtVerifier) -> Self {
        Self {
            access_tokens,
            verifier,
        }
    }
}

#[async_trait]
impl AuthorizationValidator for BearerTokenValidator {
    #[instrument(skip_all, level = "debug")]
    async fn validate_authorization(&self, request: ServerRequest) -> Result<ServerRequest, OAuthError> {
        let header = request.header("authorization").unwrap_or_default();
        if header.is_empty() {
            return Err(OAuthError::access_denied("Missing \"Authorization\" header"));
        }
        let jwt = match header.split_once(char::is_whitespace) {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
            _ => header.trim(),
        };

        let claims = self.verifier.verify(jwt).map_err(|e| match e {
            JwtError::Malformed => OAuthError::access_denied("The JWT string is malformed"),
            _ => OAuthError::access_denied("Access token could not be verified"),
        })?;

        let revoked = self
            .access_tokens
            .is_access_token_revoked(&claims.jti)
            .await
            .map_err(|e| e.into_server_error("is_access_token_revoked", &claims.jti))?;
        if revoked {
            return Err(OAuthError::access_denied("Access token has been revoked"));
        }

        Ok(request.with_token_attributes(TokenAttributes {
            access_token_id: claims.jti,
            client_id: claims.aud,
            user_id: claims.sub,
            scopes: claims.scopes,
        }))
    }
}

/// Thin wrapper running one validator over a request.
#[derive(Clone)]
pub struct ResourceServer {
    validator: Arc<dyn AuthorizationValidator>,
}

impl ResourceServer {
    pub fn new(validator: Arc<dyn AuthorizationValidator>) -> Self {
        Self { validator }
    }

    pub async fn validate_authenticated_request(
        &self,
        request: ServerRequest,
    ) -> Result<ServerRequest, OAuthError> {
        self.validator.validate_authorization(request).await
    }
}

/// One way of authenticating resource requests.
pub trait AuthMethod: Send + Sync + 'static {
    /// Authorization scheme this method answers to, e.g. `Bearer`.
    fn scheme(&self) -> &'static str;

    fn token_type(&self) -> TokenKind;

    /// `WWW-Authenticate` value sent with a 401.
    fn challenge(&self) -> &'static str;

    fn validator(&self) -> Arc<dyn AuthorizationValidator>;

    /// Whether the `Authorization` header uses this method's scheme.
    fn matches(&self, header: &str) -> bool {
        let scheme = self.scheme();
        header.len() > scheme.len()
            && header.is_char_boundary(scheme.len())
            && header[..scheme.len()].eq_ignore_ascii_case(scheme)
            && header[scheme.len()..].starts_with(char::is_whitespace)
    }
}

pub struct HttpBearerAuth {
    validator: Arc<BearerTokenValidator>,
}

impl HttpBearerAuth {
    pub fn new(access_tokens: Arc<dyn AccessTokenRepository>, verifier: JwtVerifier) -> Self {
        Self {
            validator: Arc::new(BearerTokenValidator::new(access_tokens, verifier)),
        }
    }
}

impl AuthMethod for HttpBearerAuth {
    fn scheme(&self) -> &'static str {
        "Bearer"
    }

    fn token_type(&self) -> TokenKind {
        TokenKind::Bearer
    }

    fn challenge(&self) -> &'static str {
        "Bearer realm=\"api\""
    }

    fn validator(&self) -> Arc<dyn AuthorizationValidator> {
        self.validator.clone()
    }
}

pub struct HttpMacAuth {
    validator: Arc<MacTokenValidator>,
}

impl HttpMacAuth {
    pub fn new(access_tokens: Arc<dyn AccessTokenRepository>, verifier: JwtVerifier) -> Self {
        Self {
            validator: Arc::new(MacTokenValidator::new(access_tokens, verifier)),
        }
    }
}

impl AuthMethod for HttpMacAuth {
    fn scheme(&self) -> &'static str {
        "MAC"
    }

    fn token_type(&self) -> TokenKind {
        TokenKind::Mac
    }

    fn challenge(&self) -> &'static str {
        "MAC error=\"Invalid credentials\""
    }

    fn validator(&self) -> Arc<dyn AuthorizationValidator> {
        self.validator.clone()
    }
}

/// The caller behind an authenticated request. Scopes apply to this
/// request only.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedPrincipal {
    pub identity: User,
    pub access_token_id: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub token_type: TokenKind,
}

impl AuthenticatedPrincipal {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Authentication failure as returned to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct AuthError {
    pub status: u16,
    pub message: String,
    /// Numeric OAuth error code, 0 for generic failures.
    pub code: u16,
    /// `WWW-Authenticate` value to send with a 401.
    pub challenge: Option<String>,
}

impl AuthError {
    fn from_oauth(err: &OAuthError, challenge: &str) -> Self {
        let status = err.http_status();
        Self {
            status,
            message: err.full_message(),
            code: err.code(),
            challenge: (status == 401).then(|| challenge.to_string()),
        }
    }

    fn unexpected(detail: &str, debug: bool) -> Self {
        Self {
            status: 500,
            message: if debug {
                format!("Unable to validate the request. {}", detail)
            } else {
                "Unable to validate the request.".to_string()
            },
            code: 0,
            challenge: None,
        }
    }

    pub fn to_response(&self) -> ServerResponse {
        let mut response = ServerResponse::json(
            self.status,
            &json!({ "status": self.status, "code": self.code, "message": self.message }),
        );
        if let Some(challenge) = &self.challenge {
            response = response.with_header("www-authenticate", challenge.clone());
        }
        response
    }
}

/// Picks an auth method by header scheme and resolves the principal.
pub struct RequestAuthenticator {
    methods: Vec<Box<dyn AuthMethod>>,
    identities: Arc<dyn IdentityRepository>,
    debug: bool,
}

impl RequestAuthenticator {
    pub fn new(identities: Arc<dyn IdentityRepository>) -> Self {
        Self {
            methods: Vec::new(),
            identities,
            debug: false,
        }
    }

    pub fn with_method(mut self, method: impl AuthMethod) -> Self {
        self.methods.push(Box::new(method));
        self
    }

    /// Echo internal error detail in 500 responses.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// `Ok(None)` when no configured scheme matches the request; the caller
    /// decides whether anonymous access is allowed.
    pub async fn authenticate(
        &self,
        request: &ServerRequest,
    ) -> Result<Option<AuthenticatedPrincipal>, AuthError> {
        let Some(header) = request.header("authorization") else {
            return Ok(None);
        };
        let Some(method) = self.methods.iter().find(|m| m.matches(header)) else {
            return Ok(None);
        };

        let server = ResourceServer::new(method.validator());
        let validated = match server.validate_authenticated_request(request.clone()).await {
            Ok(validated) => validated,
            Err(err) if err.is_server_error() => {
                error!(error = %err, hint = ?err.hint(), scheme = method.scheme(), "Request validation failed unexpectedly");
                return Err(AuthError::unexpected(&err.full_message(), self.debug));
            }
            Err(err) => {
                warn!(error = %err, hint = ?err.hint(), scheme = method.scheme(), "Request authentication failed");
                return Err(AuthError::from_oauth(&err, method.challenge()));
            }
        };

        let Some(attributes) = validated.token_attributes().cloned() else {
            return Err(AuthError::unexpected("validator attached no token attributes", self.debug));
        };

        let identity = self
            .identities
            .find_identity_by_access_token(&attributes.access_token_id, method.token_type())
            .await
            .map_err(|e| {
                error!(error = %e, token_id = %attributes.access_token_id, "Identity lookup failed");
                AuthError::unexpected(&e.to_string(), self.debug)
            })?;

        match identity {
            Some(identity) if Some(&identity.identifier) == attributes.user_id.as_ref() => {
                debug!(user_id = %identity.identifier, token_id = %attributes.access_token_id, "Request authenticated");
                Ok(Some(AuthenticatedPrincipal {
                    identity,
                    access_token_id: attributes.access_token_id,
                    client_id: attributes.client_id,
                    scopes: attributes.scopes,
                    token_type: method.token_type(),
                }))
            }
            _ => {
                warn!(token_id = %attributes.access_token_id, "Token subject does not resolve to its principal");
                Err(AuthError::from_oauth(&OAuthError::AccessDenied(None), method.challenge()))
            }
        }
    }
}
