//! Lifecycle events emitted by grants and the authorization server.

use std::sync::Arc;

use tracing::debug;

use super::error::OAuthError;
use super::jwt::{AccessTokenClaims, JwtVerifier};
use super::request::{ServerRequest, ServerResponse};

/// A token request that completed, with the response sent back.
#[derive(Debug, Clone)]
pub struct AuthorizationEvent {
    pub request: ServerRequest,
    pub response: ServerResponse,
}

impl AuthorizationEvent {
    /// The JWT access token carried by the response body, if any.
    pub fn access_token(&self) -> Option<String> {
        let body = self.response.json_body().ok()?;
        body.get("access_token")?.as_str().map(str::to_string)
    }

    /// Verifies the issued access token and returns its claims.
    pub fn token_claims(&self, verifier: &JwtVerifier) -> Result<AccessTokenClaims, OAuthError> {
        let token = self
            .access_token()
            .ok_or_else(|| OAuthError::ServerError("response carries no access token".into()))?;
        verifier
            .verify(&token)
            .map_err(|e| OAuthError::access_denied(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub enum OAuthEvent {
    ClientAuthenticationFailed { request: ServerRequest },
    UserAuthenticationFailed { request: ServerRequest },
    RefreshTokenClientFailed { request: ServerRequest },
    AccessTokenIssued { request: ServerRequest, access_token_id: String },
    RefreshTokenIssued { request: ServerRequest, refresh_token_id: String },
    AuthenticationSucceeded(AuthorizationEvent),
    TokenRevoked { request: ServerRequest, client_id: String },
}

impl OAuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OAuthEvent::ClientAuthenticationFailed { .. } => "client.authentication.failed",
            OAuthEvent::UserAuthenticationFailed { .. } => "user.authentication.failed",
            OAuthEvent::RefreshTokenClientFailed { .. } => "refresh_token.client.failed",
            OAuthEvent::AccessTokenIssued { .. } => "access_token.issued",
            OAuthEvent::RefreshTokenIssued { .. } => "refresh_token.issued",
            OAuthEvent::AuthenticationSucceeded(_) => "user.authentication.succeed",
            OAuthEvent::TokenRevoked { .. } => "token.revoked",
        }
    }

    pub fn request(&self) -> &ServerRequest {
        match self {
            OAuthEvent::ClientAuthenticationFailed { request }
            | OAuthEvent::UserAuthenticationFailed { request }
            | OAuthEvent::RefreshTokenClientFailed { request }
            | OAuthEvent::AccessTokenIssued { request, .. }
            | OAuthEvent::RefreshTokenIssued { request, .. }
            | OAuthEvent::TokenRevoked { request, .. } => request,
            OAuthEvent::AuthenticationSucceeded(event) => &event.request,
        }
    }
}

type Listener = Arc<dyn Fn(&OAuthEvent) + Send + Sync>;

/// Delivers events to listeners synchronously, in registration order.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Vec<Listener>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: Fn(&OAuthEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&OAuthEvent) + Send + Sync + 'static,
    {
        self.add_listener(listener);
        self
    }

    pub fn emit(&self, event: OAuthEvent) {
        debug!(event = event.name(), listeners = self.listeners.len(), "Emitting OAuth event");
        for listener in &self.listeners {
            listener(&event);
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn listeners_receive_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (seen.clone(), seen.clone());
        let emitter = EventEmitter::new()
            .with_listener(move |e| a.lock().unwrap().push(format!("a:{}", e.name())))
            .with_listener(move |e| b.lock().unwrap().push(format!("b:{}", e.name())));

        emitter.emit(OAuthEvent::UserAuthenticationFailed {
            request: ServerRequest::new("POST", "/token"),
        });
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["a:user.authentication.failed", "b:user.authentication.failed"]
        );
    }

    #[test]
    fn authorization_event_extracts_token() {
        let event = AuthorizationEvent {
            request: ServerRequest::new("POST", "/token"),
            response: ServerResponse::json(200, &serde_json::json!({ "access_token": "a.b.c" })),
        };
        assert_eq!(event.access_token().as_deref(), Some("a.b.c"));

        let empty = AuthorizationEvent {
            request: ServerRequest::new("POST", "/token"),
            response: ServerResponse::new(200),
        };
        assert_eq!(empty.access_token(), None);
    }
}
