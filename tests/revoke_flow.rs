mod common;

use common::{firebase_request, harness, revoke_request, Harness};
use oauth2_server::oauth_core::repository::{AccessTokenRepository, RefreshTokenRepository};
use oauth2_server::oauth_core::response::RefreshTokenPayload;
use oauth2_server::ServerRequest;

struct Pair {
    access_token: String,
    refresh_token: String,
    payload: RefreshTokenPayload,
}

async fn login(h: &Harness) -> Pair {
    let body = h
        .server
        .respond_to_access_token_request(&firebase_request("c1", "s1", "valid-token-123"))
        .await
        .unwrap()
        .json_body()
        .unwrap();
    let refresh_token = body["refresh_token"].as_str().unwrap().to_string();
    Pair {
        access_token: body["access_token"].as_str().unwrap().to_string(),
        payload: RefreshTokenPayload::decrypt(&refresh_token, common::ENCRYPTION_KEY).unwrap(),
        refresh_token,
    }
}

fn bearer(token: &str) -> ServerRequest {
    ServerRequest::new("GET", "/v1/me").with_header("Authorization", format!("Bearer {}", token))
}

#[tokio::test]
async fn refresh_payload_links_both_tokens() {
    let h = harness();
    let pair = login(&h).await;
    let claims = h.verifier().verify(&pair.access_token).unwrap();
    assert_eq!(pair.payload.client_id, "c1");
    assert_eq!(pair.payload.access_token_id, claims.jti);
    assert_eq!(pair.payload.user_id.as_deref(), Some("u1"));
    assert!(pair.payload.expire_time > claims.exp);
}

#[tokio::test]
async fn revoking_access_token_blocks_later_requests() {
    let h = harness();
    let pair = login(&h).await;
    let authenticator = h.authenticator();
    assert!(authenticator.authenticate(&bearer(&pair.access_token)).await.unwrap().is_some());

    let resp = h
        .server
        .respond_to_revoke_token_request(&revoke_request("c1", "s1", &pair.access_token))
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert!(resp.body.is_empty());

    // The cached "not revoked" read must not survive the revoke.
    let err = authenticator.authenticate(&bearer(&pair.access_token)).await.unwrap_err();
    assert_eq!(err.status, 401);
    assert!(h
        .refresh_tokens
        .is_refresh_token_revoked(&pair.payload.refresh_token_id)
        .await
        .unwrap());
    assert_eq!(h.event_names().last(), Some(&"token.revoked"));
}

#[tokio::test]
async fn revoking_refresh_token_revokes_its_access_token() {
    let h = harness();
    let pair = login(&h).await;
    let req = revoke_request("c1", "s1", &pair.refresh_token).with_param("token_type_hint", "refresh_token");
    h.server.respond_to_revoke_token_request(&req).await.unwrap();

    assert!(h
        .access_tokens
        .is_access_token_revoked(&pair.payload.access_token_id)
        .await
        .unwrap());
    assert!(h
        .refresh_tokens
        .is_refresh_token_revoked(&pair.payload.refresh_token_id)
        .await
        .unwrap());
}

#[tokio::test]
async fn wrong_hint_still_finds_the_token() {
    let h = harness();
    let pair = login(&h).await;
    let req = revoke_request("c1", "s1", &pair.refresh_token).with_param("token_type_hint", "access_token");
    h.server.respond_to_revoke_token_request(&req).await.unwrap();
    assert!(h
        .refresh_tokens
        .is_refresh_token_revoked(&pair.payload.refresh_token_id)
        .await
        .unwrap());
}

#[tokio::test]
async fn other_client_cannot_revoke() {
    let h = harness();
    let pair = login(&h).await;
    let resp = h
        .server
        .handle_revoke_request(&revoke_request("c2", "s2", &pair.access_token))
        .await;
    assert_eq!(resp.status, 401);
    assert_eq!(resp.json_body().unwrap()["error"], "invalid_request");
    assert!(!h
        .access_tokens
        .is_access_token_revoked(&pair.payload.access_token_id)
        .await
        .unwrap());
    assert!(h.event_names().contains(&"refresh_token.client.failed"));
}

#[tokio::test]
async fn garbage_token_is_a_bad_request() {
    let h = harness();
    let resp = h
        .server
        .handle_revoke_request(&revoke_request("c1", "s1", "definitely-not-a-token"))
        .await;
    assert_eq!(resp.status, 400);
    assert_eq!(resp.json_body().unwrap()["error"], "invalid_request");
}

#[tokio::test]
async fn public_revoke_without_secret_is_allowed() {
    let h = harness();
    let pair = login(&h).await;
    let req = ServerRequest::new("POST", "/oauth2/revoke")
        .with_param("client_id", "c1")
        .with_param("token", &pair.access_token);
    h.server.respond_to_revoke_token_request(&req).await.unwrap();
    assert!(h
        .access_tokens
        .is_access_token_revoked(&pair.payload.access_token_id)
        .await
        .unwrap());
}

#[tokio::test]
async fn repeated_revoke_is_idempotent() {
    let h = harness();
    let pair = login(&h).await;
    for _ in 0..2 {
        let resp = h
            .server
            .handle_revoke_request(&revoke_request("c1", "s1", &pair.access_token))
            .await;
        assert_eq!(resp.status, 200);
    }
}
