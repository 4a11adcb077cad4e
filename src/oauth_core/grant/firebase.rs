//! Exchanges a Firebase ID token for an access/refresh token pair.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Months, Utc};
use tracing::{debug, error, info, instrument};

use super::{Grant, GrantContext, RequestState, issue_access_token, issue_refresh_token, validate_client, validate_scopes};
use crate::oauth_core::error::{FirebaseError, OAuthError};
use crate::oauth_core::events::OAuthEvent;
use crate::oauth_core::repository::{FirebaseUserRepository, RefreshTokenRepository};
use crate::oauth_core::request::ServerRequest;
use crate::oauth_core::types::{Client, GrantType, IssuedTokens, User};

/// Refresh tokens live one calendar month.
const REFRESH_TOKEN_MONTHS: u32 = 1;

pub struct FirebaseGrant {
    firebase_users: Arc<dyn FirebaseUserRepository>,
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
}

impl FirebaseGrant {
    pub fn new(
        firebase_users: Arc<dyn FirebaseUserRepository>,
        refresh_tokens: Arc<dyn RefreshTokenRepository>,
    ) -> Self {
        Self {
            firebase_users,
            refresh_tokens,
        }
    }

    async fn validate_user(
        &self,
        ctx: &GrantContext,
        request: &ServerRequest,
        client: &Client,
    ) -> Result<User, OAuthError> {
        let firebase_id = request
            .non_empty_param("fid")
            .ok_or_else(|| OAuthError::invalid_request("fid"))?;

        match self
            .firebase_users
            .get_user_entity_by_firebase_id(firebase_id, GrantType::Firebase, client)
            .await
        {
            Ok(user) => Ok(user),
            Err(err @ FirebaseError::RevokedIdToken(_)) => {
                error!(client_id = %client.identifier, error = %err, "Authentication failed for Firebase ID token");
                ctx.emitter.emit(OAuthEvent::UserAuthenticationFailed {
                    request: request.clone(),
                });
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Grant for FirebaseGrant {
    fn identifier(&self) -> &'static str {
        GrantType::Firebase.as_str()
    }

    #[instrument(skip_all, fields(grant = "firebase"))]
    async fn respond_to_access_token_request(
        &self,
        ctx: &GrantContext,
        request: &ServerRequest,
        access_token_ttl: Duration,
    ) -> Result<IssuedTokens, OAuthError> {
        let client = validate_client(ctx, request, GrantType::Firebase, true).await?;
        let requested = request.param("scope").unwrap_or(ctx.default_scope.as_str());
        let scopes = validate_scopes(ctx, requested).await?;
        let user = self.validate_user(ctx, request, &client).await?;

        let scopes = ctx
            .scope_repository
            .finalize_scopes(&scopes, GrantType::Firebase, &client, Some(&user.identifier))
            .await
            .map_err(|e| e.into_server_error("finalize_scopes", &client.identifier))?;
        debug!(scopes = scopes.len(), state = %RequestState::ScopesFinalized, "Scopes finalized");

        let access_token = issue_access_token(
            ctx,
            request,
            access_token_ttl,
            &client,
            Some(&user.identifier),
            scopes,
        )
        .await?;

        let refresh_expiry = Utc::now()
            .checked_add_months(Months::new(REFRESH_TOKEN_MONTHS))
            .ok_or_else(|| OAuthError::ServerError("refresh token expiry out of range".into()))?;
        let refresh_token = issue_refresh_token(
            ctx,
            request,
            self.refresh_tokens.as_ref(),
            &access_token,
            refresh_expiry,
        )
        .await?;

        info!(client_id = %client.identifier, user_id = %user.identifier, "Firebase grant issued tokens");
        Ok(IssuedTokens {
            access_token,
            refresh_token,
        })
    }
}
