#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use oauth2_lib::url_encoding::encode_url_owned;
use oauth2_server::oauth_core::cache::{CacheBackend, Cached, MemoryCache};
use oauth2_server::oauth_core::types::{Client, ClientStatus, GrantType, Scope, TokenKind};
use oauth2_server::{
    AuthorizationServer, EventEmitter, FirebaseError, FirebaseGrant, HttpBearerAuth, HttpMacAuth,
    InMemoryAccessTokenRepository, InMemoryClientRepository, InMemoryFirebaseUserRepository,
    InMemoryRefreshTokenRepository, InMemoryScopeRepository, JwtVerifier, OAuthEvent,
    RequestAuthenticator, RevokeGrant, ServerRequest,
};

pub const PRIVATE_KEY: &[u8] = include_bytes!("../fixtures/private.key");
pub const PUBLIC_KEY: &[u8] = include_bytes!("../fixtures/public.key");
pub const ENCRYPTION_KEY: &str = "integration-encryption-key";

pub struct Harness {
    pub server: AuthorizationServer,
    pub access_tokens: Arc<Cached<InMemoryAccessTokenRepository>>,
    pub refresh_tokens: Arc<InMemoryRefreshTokenRepository>,
    pub events: Arc<Mutex<Vec<OAuthEvent>>>,
}

impl Harness {
    pub fn verifier(&self) -> JwtVerifier {
        self.server.verifier().clone()
    }

    pub fn authenticator(&self) -> RequestAuthenticator {
        RequestAuthenticator::new(self.access_tokens.clone())
            .with_method(HttpBearerAuth::new(self.access_tokens.clone(), self.verifier()))
            .with_method(HttpMacAuth::new(self.access_tokens.clone(), self.verifier()))
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }
}

fn client(id: &str, token_type: TokenKind) -> Client {
    Client {
        identifier: id.into(),
        name: format!("{} app", id),
        redirect_uris: vec![],
        token_type,
        grant_types: vec![GrantType::Firebase],
        status: ClientStatus::Active,
        confidential: true,
    }
}

pub fn harness() -> Harness {
    let clients = InMemoryClientRepository::new()
        .with_client(client("c1", TokenKind::Bearer), Some("s1"))
        .with_client(client("c2", TokenKind::Bearer), Some("s2"))
        .with_client(client("mac-app", TokenKind::Mac), Some("s3"));
    let scopes = InMemoryScopeRepository::new()
        .with_scope(Scope::new("basic").default_scope())
        .with_scope(Scope::new("profile"))
        .with_client_scope("c1", "basic")
        .with_client_scope("c1", "profile")
        .with_client_scope("c2", "basic")
        .with_client_scope("mac-app", "basic");
    let users = InMemoryFirebaseUserRepository::new()
        .with_user("valid-token-123", "u1")
        .with_user("mac-user-token", "u7")
        .with_failure("revoked-token", FirebaseError::RevokedIdToken("revoked".into()));

    let cache: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());
    let access_tokens = Arc::new(Cached::new(
        InMemoryAccessTokenRepository::with_encryption_key(ENCRYPTION_KEY),
        cache.clone(),
    ));
    let refresh_tokens = Arc::new(InMemoryRefreshTokenRepository::new(access_tokens.clone()));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let emitter = EventEmitter::new().with_listener(move |e: &OAuthEvent| sink.lock().unwrap().push(e.clone()));

    let verifier = JwtVerifier::from_rsa_pem(PUBLIC_KEY).unwrap();
    let server = AuthorizationServer::builder()
        .client_repository(Arc::new(clients))
        .access_token_repository(access_tokens.clone())
        .scope_repository(Arc::new(Cached::new(scopes, cache)))
        .private_key_pem(PRIVATE_KEY)
        .unwrap()
        .verifier(verifier.clone())
        .encryption_key(ENCRYPTION_KEY)
        .event_emitter(emitter)
        .enable_grant_type(FirebaseGrant::new(Arc::new(users), refresh_tokens.clone()), None)
        .enable_grant_type(RevokeGrant::new(refresh_tokens.clone(), verifier), None)
        .build()
        .unwrap();

    Harness {
        server,
        access_tokens,
        refresh_tokens,
        events,
    }
}

pub fn firebase_request(client_id: &str, secret: &str, fid: &str) -> ServerRequest {
    ServerRequest::new("POST", "/oauth2/token").with_form_body(&format!(
        "grant_type=firebase&client_id={}&client_secret={}&fid={}",
        encode_url_owned(client_id),
        encode_url_owned(secret),
        encode_url_owned(fid)
    ))
}

pub fn revoke_request(client_id: &str, secret: &str, token: &str) -> ServerRequest {
    ServerRequest::new("POST", "/oauth2/revoke")
        .with_param("client_id", client_id)
        .with_param("client_secret", secret)
        .with_param("token", token)
}
