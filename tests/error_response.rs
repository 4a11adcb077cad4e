mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::{firebase_request, harness};
use oauth2_server::{OAuthError, ServerRequest};

#[tokio::test]
async fn token_endpoint_errors() {
    let h = harness();
    let cases = vec![
        (firebase_request("c1", "wrong", "valid-token-123"), 401, "invalid_client"),
        (firebase_request("ghost", "s1", "valid-token-123"), 401, "invalid_client"),
        (firebase_request("c1", "s1", ""), 400, "invalid_request"),
        (firebase_request("c1", "s1", "unknown-fid"), 401, "invalid_token"),
        (
            ServerRequest::new("POST", "/oauth2/token").with_form_body("grant_type=password&client_id=c1"),
            400,
            "unsupported_grant_type",
        ),
        (
            ServerRequest::new("POST", "/oauth2/token").with_form_body("grant_type=revoke&client_id=c1"),
            400,
            "unsupported_grant_type",
        ),
        (
            ServerRequest::new("POST", "/oauth2/token")
                .with_form_body("grant_type=firebase&client_id=c1&client_secret=s1&fid=valid-token-123&scope=admin"),
            400,
            "invalid_scope",
        ),
    ];

    for (request, status, error) in cases {
        let resp = h.server.handle_token_request(&request).await;
        assert_eq!(resp.status, status, "{:?}", request.param("fid"));
        assert_eq!(resp.header("cache-control"), Some("no-store"));
        let body = resp.json_body().unwrap();
        assert_eq!(body["error"], error);
        assert!(body["error_description"].as_str().is_some_and(|d| !d.is_empty()));
    }
}

#[tokio::test]
async fn basic_auth_failure_carries_challenge() {
    let h = harness();
    let request = ServerRequest::new("POST", "/oauth2/token")
        .with_header("Authorization", format!("Basic {}", STANDARD.encode("c1:wrong")))
        .with_form_body("grant_type=firebase&fid=valid-token-123");
    let resp = h.server.handle_token_request(&request).await;
    assert_eq!(resp.status, 401);
    assert_eq!(resp.header("www-authenticate"), Some("Basic realm=\"OAuth\""));
}

#[tokio::test]
async fn basic_auth_success() {
    let h = harness();
    let request = ServerRequest::new("POST", "/oauth2/token")
        .with_header("Authorization", format!("Basic {}", STANDARD.encode("c1:s1")))
        .with_form_body("grant_type=firebase&fid=valid-token-123");
    let resp = h.server.handle_token_request(&request).await;
    assert_eq!(resp.status, 200);
}

#[test]
fn server_errors_hide_detail_outside_debug() {
    let err = OAuthError::ServerError("connection refused".into());
    let body = err.to_response(false).json_body().unwrap();
    assert_eq!(body["error"], "server_error");
    assert!(body.get("hint").is_none());

    let body = err.to_response(true).json_body().unwrap();
    assert_eq!(body["hint"], "connection refused");
}
