//! Token revocation for access tokens (JWT) and refresh tokens (encrypted
//! payload), tried in the order suggested by `token_type_hint`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tracing::{debug, info, instrument, warn};

use super::{Grant, GrantContext, validate_client};
use crate::oauth_core::error::OAuthError;
use crate::oauth_core::events::OAuthEvent;
use crate::oauth_core::jwt::JwtVerifier;
use crate::oauth_core::repository::RefreshTokenRepository;
use crate::oauth_core::request::ServerRequest;
use crate::oauth_core::response::RefreshTokenPayload;
use crate::oauth_core::types::{GrantType, IssuedTokens};

/// Outcome of trying to revoke a token as one particular kind.
#[derive(Debug)]
pub enum Invalidation {
    /// The token was of this kind and is now revoked.
    Revoked,
    /// The token is not of this kind; the next kind may be tried.
    Unparseable,
    /// The token is of this kind but may not be revoked by this caller.
    Rejected(OAuthError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenCandidate {
    Access,
    Refresh,
}

pub struct RevokeGrant {
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
    verifier: JwtVerifier,
}

impl RevokeGrant {
    pub fn new(refresh_tokens: Arc<dyn RefreshTokenRepository>, verifier: JwtVerifier) -> Self {
        Self {
            refresh_tokens,
            verifier,
        }
    }

    fn candidates(hint: Option<&str>) -> [TokenCandidate; 2] {
        match hint {
            Some("refresh_token") => [TokenCandidate::Refresh, TokenCandidate::Access],
            _ => [TokenCandidate::Access, TokenCandidate::Refresh],
        }
    }

    async fn invalidate_access_token(
        &self,
        ctx: &GrantContext,
        request: &ServerRequest,
        token: &str,
        client_id: &str,
    ) -> Invalidation {
        if JwtVerifier::parse_unverified(token).is_err() {
            return Invalidation::Unparseable;
        }
        let claims = match self.verifier.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "Access token failed verification");
                return Invalidation::Rejected(OAuthError::access_denied(
                    "Access token could not be verified.",
                ));
            }
        };
        if claims.aud != client_id {
            return Invalidation::Rejected(client_mismatch(ctx, request, client_id));
        }

        if let Err(e) = ctx.access_token_repository.revoke_access_token(&claims.jti).await {
            return Invalidation::Rejected(e.into_server_error("revoke_access_token", &claims.jti));
        }
        if let Err(e) = self
            .refresh_tokens
            .revoke_refresh_tokens_for_access_token(&claims.jti)
            .await
        {
            return Invalidation::Rejected(
                e.into_server_error("revoke_refresh_tokens_for_access_token", &claims.jti),
            );
        }
        info!(token_id = %claims.jti, client_id, "Revoked access token on request");
        Invalidation::Revoked
    }

    async fn invalidate_refresh_token(
        &self,
        ctx: &GrantContext,
        request: &ServerRequest,
        token: &str,
        client_id: &str,
    ) -> Invalidation {
        let payload = match RefreshTokenPayload::decrypt(token, &ctx.encryption_key) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "Token is not a refresh token");
                return Invalidation::Unparseable;
            }
        };
        if payload.client_id != client_id {
            return Invalidation::Rejected(client_mismatch(ctx, request, client_id));
        }

        if let Err(e) = ctx
            .access_token_repository
            .revoke_access_token(&payload.access_token_id)
            .await
        {
            return Invalidation::Rejected(
                e.into_server_error("revoke_access_token", &payload.access_token_id),
            );
        }
        if let Err(e) = self
            .refresh_tokens
            .revoke_refresh_token(&payload.refresh_token_id)
            .await
        {
            return Invalidation::Rejected(
                e.into_server_error("revoke_refresh_token", &payload.refresh_token_id),
            );
        }
        info!(token_id = %payload.refresh_token_id, client_id, "Revoked refresh token on request");
        Invalidation::Revoked
    }
}

fn client_mismatch(ctx: &GrantContext, request: &ServerRequest, client_id: &str) -> OAuthError {
    warn!(client_id, "Token revocation requested by a client the token was not issued to");
    ctx.emitter.emit(OAuthEvent::RefreshTokenClientFailed {
        request: request.clone(),
    });
    OAuthError::invalid_refresh_token("Token is not linked to client.")
}

#[async_trait]
impl Grant for RevokeGrant {
    fn identifier(&self) -> &'static str {
        GrantType::Revoke.as_str()
    }

    /// Revocation never answers the token endpoint.
    fn can_respond_to_access_token_request(&self, _request: &ServerRequest) -> bool {
        false
    }

    async fn respond_to_access_token_request(
        &self,
        _ctx: &GrantContext,
        _request: &ServerRequest,
        _access_token_ttl: Duration,
    ) -> Result<IssuedTokens, OAuthError> {
        Err(OAuthError::Logic("This grant does not use this method.".into()))
    }

    #[instrument(skip_all, fields(grant = "revoke"))]
    async fn respond_to_revoke_token_request(
        &self,
        ctx: &GrantContext,
        request: &ServerRequest,
    ) -> Result<(), OAuthError> {
        let client = validate_client(ctx, request, GrantType::Revoke, false).await?;
        let token = request
            .non_empty_param("token")
            .ok_or_else(|| OAuthError::invalid_request("token"))?;

        for candidate in Self::candidates(request.param("token_type_hint")) {
            let outcome = match candidate {
                TokenCandidate::Access => {
                    self.invalidate_access_token(ctx, request, token, &client.identifier).await
                }
                TokenCandidate::Refresh => {
                    self.invalidate_refresh_token(ctx, request, token, &client.identifier).await
                }
            };
            match outcome {
                Invalidation::Revoked => {
                    ctx.emitter.emit(OAuthEvent::TokenRevoked {
                        request: request.clone(),
                        client_id: client.identifier.clone(),
                    });
                    return Ok(());
                }
                Invalidation::Unparseable => continue,
                Invalidation::Rejected(err) => return Err(err),
            }
        }

        Err(OAuthError::InvalidRequest {
            parameter: "token".into(),
            hint: Some("The token is neither an access token nor a refresh token.".into()),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oauth_core::grant::test::{Fixture, fixture};
    use crate::oauth_core::grant::{FirebaseGrant, issue_access_token, test::client};
    use crate::oauth_core::jwt::test::{OTHER_PRIVATE_KEY, PRIVATE_KEY, claims};
    use crate::oauth_core::jwt::JwtSigner;
    use crate::oauth_core::memory::InMemoryFirebaseUserRepository;
    use crate::oauth_core::repository::AccessTokenRepository;
    use crate::oauth_core::types::TokenKind;

    struct Issued {
        access_jwt: String,
        access_id: String,
        refresh: String,
        refresh_id: String,
    }

    async fn issue(f: &Fixture) -> Issued {
        let users = InMemoryFirebaseUserRepository::new().with_user("fid", "u1");
        let firebase = FirebaseGrant::new(Arc::new(users), f.refresh.clone());
        let req = ServerRequest::new("POST", "/oauth2/token")
            .with_param("grant_type", "firebase")
            .with_param("client_id", "c1")
            .with_param("client_secret", "s1")
            .with_param("fid", "fid");
        let tokens = firebase
            .respond_to_access_token_request(&f.ctx, &req, Duration::hours(1))
            .await
            .unwrap();
        let signer = JwtSigner::from_rsa_pem(PRIVATE_KEY).unwrap();
        let payload = RefreshTokenPayload::from_tokens(&tokens).unwrap();
        Issued {
            access_jwt: signer.sign_access_token(&tokens.access_token).unwrap(),
            access_id: tokens.access_token.identifier.clone(),
            refresh: payload.encrypt(&f.ctx.encryption_key).unwrap(),
            refresh_id: payload.refresh_token_id,
        }
    }

    fn grant(f: &Fixture) -> RevokeGrant {
        RevokeGrant::new(f.refresh.clone(), f.ctx.verifier.clone())
    }

    fn revoke_request(client_id: &str, token: &str) -> ServerRequest {
        ServerRequest::new("POST", "/oauth2/revoke")
            .with_param("client_id", client_id)
            .with_param("token", token)
    }

    #[tokio::test]
    async fn never_answers_token_requests() {
        let f = fixture();
        let g = grant(&f);
        let req = ServerRequest::new("POST", "/oauth2/token").with_param("grant_type", "revoke");
        assert!(!g.can_respond_to_access_token_request(&req));
        let result = g.respond_to_access_token_request(&f.ctx, &req, Duration::hours(1)).await;
        assert!(matches!(result, Err(OAuthError::Logic(_))));
    }

    #[tokio::test]
    async fn revoking_access_token_cascades_to_refresh_tokens() {
        let f = fixture();
        let issued = issue(&f).await;
        grant(&f)
            .respond_to_revoke_token_request(&f.ctx, &revoke_request("c1", &issued.access_jwt))
            .await
            .unwrap();
        assert!(f.access.is_access_token_revoked(&issued.access_id).await.unwrap());
        assert!(f.refresh.is_refresh_token_revoked(&issued.refresh_id).await.unwrap());
        assert_eq!(f.events.lock().unwrap().last(), Some(&"token.revoked"));
    }

    #[tokio::test]
    async fn refresh_token_revokes_both() {
        let f = fixture();
        let issued = issue(&f).await;
        let req = revoke_request("c1", &issued.refresh).with_param("token_type_hint", "refresh_token");
        grant(&f).respond_to_revoke_token_request(&f.ctx, &req).await.unwrap();
        assert!(f.access.is_access_token_revoked(&issued.access_id).await.unwrap());
        assert!(f.refresh.is_refresh_token_revoked(&issued.refresh_id).await.unwrap());
    }

    #[tokio::test]
    async fn refresh_token_without_hint_falls_through() {
        let f = fixture();
        let issued = issue(&f).await;
        grant(&f)
            .respond_to_revoke_token_request(&f.ctx, &revoke_request("c1", &issued.refresh))
            .await
            .unwrap();
        assert!(f.refresh.is_refresh_token_revoked(&issued.refresh_id).await.unwrap());
    }

    #[tokio::test]
    async fn access_token_with_refresh_hint_falls_through() {
        let f = fixture();
        let issued = issue(&f).await;
        let req = revoke_request("c1", &issued.access_jwt).with_param("token_type_hint", "refresh_token");
        grant(&f).respond_to_revoke_token_request(&f.ctx, &req).await.unwrap();
        assert!(f.access.is_access_token_revoked(&issued.access_id).await.unwrap());
    }

    #[tokio::test]
    async fn other_clients_cannot_revoke() {
        let f = fixture();
        let issued = issue(&f).await;
        let g = grant(&f);
        for token in [&issued.access_jwt, &issued.refresh] {
            let result = g.respond_to_revoke_token_request(&f.ctx, &revoke_request("c2", token)).await;
            assert_eq!(
                result.unwrap_err(),
                OAuthError::invalid_refresh_token("Token is not linked to client.")
            );
        }
        assert!(!f.access.is_access_token_revoked(&issued.access_id).await.unwrap());
        assert!(!f.refresh.is_refresh_token_revoked(&issued.refresh_id).await.unwrap());
        assert_eq!(
            f.events.lock().unwrap().iter().filter(|e| **e == "refresh_token.client.failed").count(),
            2
        );
    }

    #[tokio::test]
    async fn unverifiable_jwt_does_not_fall_through() {
        let f = fixture();
        let forged = JwtSigner::from_rsa_pem(OTHER_PRIVATE_KEY).unwrap().sign(&claims(3600, 0)).unwrap();
        let result = grant(&f)
            .respond_to_revoke_token_request(&f.ctx, &revoke_request("c1", &forged))
            .await;
        assert_eq!(
            result.unwrap_err(),
            OAuthError::access_denied("Access token could not be verified.")
        );

        let expired = JwtSigner::from_rsa_pem(PRIVATE_KEY).unwrap().sign(&claims(-60, -120)).unwrap();
        let result = grant(&f)
            .respond_to_revoke_token_request(&f.ctx, &revoke_request("c1", &expired))
            .await;
        assert!(matches!(result, Err(OAuthError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn garbage_token_is_invalid_request() {
        let f = fixture();
        let result = grant(&f)
            .respond_to_revoke_token_request(&f.ctx, &revoke_request("c1", "not-a-token"))
            .await
            .unwrap_err();
        assert!(matches!(&result, OAuthError::InvalidRequest { parameter, .. } if parameter == "token"));
        assert_eq!(result.http_status(), 400);
    }

    #[tokio::test]
    async fn missing_token_or_client() {
        let f = fixture();
        let g = grant(&f);
        let no_token = ServerRequest::new("POST", "/oauth2/revoke").with_param("client_id", "c1");
        assert_eq!(
            g.respond_to_revoke_token_request(&f.ctx, &no_token).await.unwrap_err(),
            OAuthError::invalid_request("token")
        );
        let no_client = ServerRequest::new("POST", "/oauth2/revoke").with_param("token", "x");
        assert_eq!(
            g.respond_to_revoke_token_request(&f.ctx, &no_client).await.unwrap_err(),
            OAuthError::invalid_request("client_id")
        );
    }

    #[tokio::test]
    async fn revoking_twice_is_harmless() {
        let f = fixture();
        let c1 = client("c1", TokenKind::Bearer, vec![GrantType::Firebase]);
        let req = ServerRequest::new("POST", "/oauth2/token");
        let access = issue_access_token(&f.ctx, &req, Duration::hours(1), &c1, Some("u1"), vec![])
            .await
            .unwrap();
        let jwt = JwtSigner::from_rsa_pem(PRIVATE_KEY).unwrap().sign_access_token(&access).unwrap();
        let g = grant(&f);
        for _ in 0..2 {
            g.respond_to_revoke_token_request(&f.ctx, &revoke_request("c1", &jwt))
                .await
                .unwrap();
        }
        assert!(f.access.is_access_token_revoked(&access.identifier).await.unwrap());
    }
}
