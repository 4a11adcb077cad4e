mod common;

use chrono::Utc;
use common::{firebase_request, harness};
use oauth2_server::oauth_core::mac::{MacSigningKey, sign_request};
use oauth2_server::oauth_core::types::{MacAlgorithm, TokenKind};
use oauth2_server::{OAuthEvent, ServerRequest};

#[tokio::test]
async fn firebase_login_issues_bearer_pair() {
    let h = harness();
    let resp = h
        .server
        .respond_to_access_token_request(&firebase_request("c1", "s1", "valid-token-123"))
        .await
        .unwrap();

    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("cache-control"), Some("no-store"));
    assert_eq!(resp.header("pragma"), Some("no-cache"));
    let body = resp.json_body().unwrap();
    assert_eq!(body["token_type"], "Bearer");
    let expires_in = body["expires_in"].as_i64().unwrap();
    assert!(expires_in > 0 && expires_in <= 3600);
    assert!(body["refresh_token"].as_str().is_some_and(|t| !t.is_empty()));

    let claims = h.verifier().verify(body["access_token"].as_str().unwrap()).unwrap();
    assert_eq!(claims.sub.as_deref(), Some("u1"));
    assert_eq!(claims.aud, "c1");
    assert_eq!(claims.scopes, vec!["basic"]);
    assert!(claims.mac_key.is_none());

    assert_eq!(
        h.event_names(),
        vec!["access_token.issued", "refresh_token.issued", "user.authentication.succeed"]
    );
    let events = h.events.lock().unwrap();
    let Some(OAuthEvent::AuthenticationSucceeded(event)) = events.last() else {
        panic!("expected a success event");
    };
    assert_eq!(event.token_claims(&h.verifier()).unwrap().jti, claims.jti);
    assert_eq!(event.request.param("fid"), Some("valid-token-123"));
}

#[tokio::test]
async fn requested_scopes_narrow_the_grant() {
    let h = harness();
    let req = ServerRequest::new("POST", "/oauth2/token")
        .with_form_body("grant_type=firebase&client_id=c1&client_secret=s1&fid=valid-token-123&scope=profile");
    let body = h.server.respond_to_access_token_request(&req).await.unwrap().json_body().unwrap();
    let claims = h.verifier().verify(body["access_token"].as_str().unwrap()).unwrap();
    assert_eq!(claims.scopes, vec!["profile"]);
}

#[tokio::test]
async fn issued_bearer_token_authenticates_resource_requests() {
    let h = harness();
    let body = h
        .server
        .respond_to_access_token_request(&firebase_request("c1", "s1", "valid-token-123"))
        .await
        .unwrap()
        .json_body()
        .unwrap();
    let request = ServerRequest::new("GET", "/v1/me").with_header(
        "Authorization",
        format!("Bearer {}", body["access_token"].as_str().unwrap()),
    );

    let principal = h.authenticator().authenticate(&request).await.unwrap().unwrap();
    assert_eq!(principal.identity.identifier, "u1");
    assert_eq!(principal.token_type, TokenKind::Bearer);
    assert!(principal.has_scope("basic"));
    assert!(!principal.has_scope("profile"));
}

#[tokio::test]
async fn mac_client_gets_key_material_and_can_sign() {
    let h = harness();
    let body = h
        .server
        .respond_to_access_token_request(&firebase_request("mac-app", "s3", "mac-user-token"))
        .await
        .unwrap()
        .json_body()
        .unwrap();

    assert_eq!(body["token_type"], "mac");
    assert_eq!(body["mac_algorithm"], "hmac-sha-256");
    let kid = body["kid"].as_str().unwrap();
    let mac_key = body["mac_key"].as_str().unwrap();
    let access_token = body["access_token"].as_str().unwrap();
    assert_eq!(h.verifier().verify(access_token).unwrap().jti, kid);

    let unsigned = ServerRequest::new("GET", "/v1/me?fields=id").with_header("Host", "api.example.com");
    let key = MacSigningKey {
        access_token,
        kid,
        mac_key,
        algorithm: MacAlgorithm::HmacSha256,
    };
    let signed = sign_request(&unsigned, &key, Utc::now().timestamp(), &["host"], Some("1"));
    let request = unsigned.clone().with_header("Authorization", signed.to_header_value());
    let principal = h.authenticator().authenticate(&request).await.unwrap().unwrap();
    assert_eq!(principal.identity.identifier, "u7");
    assert_eq!(principal.token_type, TokenKind::Mac);

    let wrong = MacSigningKey {
        mac_key: "wrong-key",
        ..key
    };
    let tampered = sign_request(&unsigned, &wrong, 0, &["host"], None);
    let request = unsigned.with_header("Authorization", tampered.to_header_value());
    let err = h.authenticator().authenticate(&request).await.unwrap_err();
    assert_eq!(err.status, 401);
    assert_eq!(err.challenge.as_deref(), Some("MAC error=\"Invalid credentials\""));
}

#[tokio::test]
async fn mac_token_is_not_accepted_as_bearer() {
    let h = harness();
    let body = h
        .server
        .respond_to_access_token_request(&firebase_request("mac-app", "s3", "mac-user-token"))
        .await
        .unwrap()
        .json_body()
        .unwrap();
    let request = ServerRequest::new("GET", "/v1/me").with_header(
        "Authorization",
        format!("Bearer {}", body["access_token"].as_str().unwrap()),
    );
    let err = h.authenticator().authenticate(&request).await.unwrap_err();
    assert_eq!(err.status, 401);
}

#[tokio::test]
async fn revoked_firebase_token_is_reported() {
    let h = harness();
    let resp = h
        .server
        .handle_token_request(&firebase_request("c1", "s1", "revoked-token"))
        .await;
    assert_eq!(resp.status, 401);
    assert_eq!(resp.json_body().unwrap()["error"], "firebase_revoked_id_token");
    assert_eq!(h.event_names(), vec!["user.authentication.failed"]);
}
