//! MAC access authentication: header parsing, canonical request strings and
//! the request validator.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::crypto;
use super::error::OAuthError;
use super::jwt::JwtVerifier;
use super::repository::AccessTokenRepository;
use super::request::{ServerRequest, TokenAttributes};
use super::resource::AuthorizationValidator;
use super::types::MacAlgorithm;

const REQUIRED_PARAMS: [&str; 4] = ["kid", "ts", "access_token", "mac"];

/// Parameters of an `Authorization: MAC ...` header.
#[derive(Debug, Clone, PartialEq)]
pub struct MacHeader {
    pub kid: String,
    pub ts: String,
    pub access_token: String,
    pub mac: String,
    /// Names of the headers covered by the signature.
    pub h: Vec<String>,
    pub seq_nr: Option<String>,
    /// Channel binding. Parsed, not signed.
    pub cb: Option<String>,
}

impl MacHeader {
    pub fn parse(header: &str) -> Result<Self, OAuthError> {
        let params = strip_scheme(header);

        let mut pairs: Vec<(String, String)> = Vec::new();
        for param in params.split(',') {
            let Some((key, value)) = param.split_once('=') else {
                return Err(OAuthError::access_denied("Error parsing MAC params."));
            };
            pairs.push((key.trim().to_string(), value.trim().trim_matches('"').to_string()));
        }

        let get = |name: &str| {
            pairs
                .iter()
                .rev()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        for name in REQUIRED_PARAMS {
            if get(name).is_none() {
                return Err(OAuthError::access_denied(format!(
                    "Required MAC param `{}` missing.",
                    name
                )));
            }
        }

        Ok(Self {
            kid: get("kid").unwrap_or_default(),
            ts: get("ts").unwrap_or_default(),
            access_token: get("access_token").unwrap_or_default(),
            mac: get("mac").unwrap_or_default(),
            h: get("h")
                .map(|h| h.split(':').map(str::to_string).collect())
                .unwrap_or_else(|| vec!["host".to_string()]),
            seq_nr: get("seq-nr"),
            cb: get("cb"),
        })
    }

    /// Start line, covered header values, `ts` and `seq-nr`. Empty fields
    /// are skipped; every field ends with a newline.
    pub fn canonical_string(&self, request: &ServerRequest) -> String {
        let mut values = vec![request.start_line()];
        values.extend(self.h.iter().map(|name| request.header_line(name)));
        values.push(self.ts.clone());
        values.push(self.seq_nr.clone().unwrap_or_default());

        let mut canonical = values
            .into_iter()
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        canonical.push('\n');
        canonical
    }

    /// Renders the header a client would send.
    pub fn to_header_value(&self) -> String {
        let mut out = format!(
            "MAC kid=\"{}\", ts=\"{}\", access_token=\"{}\", mac=\"{}\", h=\"{}\"",
            self.kid,
            self.ts,
            self.access_token,
            self.mac,
            self.h.join(":")
        );
        if let Some(seq_nr) = &self.seq_nr {
            out.push_str(&format!(", seq-nr=\"{}\"", seq_nr));
        }
        if let Some(cb) = &self.cb {
            out.push_str(&format!(", cb=\"{}\"", cb));
        }
        out
    }
}

fn strip_scheme(header: &str) -> &str {
    let trimmed = header.trim_start();
    match trimmed.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("MAC ") || prefix.eq_ignore_ascii_case("MAC\t") => {
            &trimmed[4..]
        }
        _ => trimmed,
    }
}

/// Credentials a client receives in a MAC token response.
#[derive(Clone, Copy)]
pub struct MacSigningKey<'a> {
    pub access_token: &'a str,
    pub kid: &'a str,
    pub mac_key: &'a str,
    pub algorithm: MacAlgorithm,
}

/// Signs a request on behalf of a MAC token holder.
pub fn sign_request(
    request: &ServerRequest,
    key: &MacSigningKey<'_>,
    ts: i64,
    headers: &[&str],
    seq_nr: Option<&str>,
) -> MacHeader {
    let mut header = MacHeader {
        kid: key.kid.to_string(),
        ts: ts.to_string(),
        access_token: key.access_token.to_string(),
        mac: String::new(),
        h: headers.iter().map(|h| h.to_string()).collect(),
        seq_nr: seq_nr.map(str::to_string),
        cb: None,
    };
    header.mac = crypto::mac_signature(key.algorithm, &header.canonical_string(request), key.mac_key);
    header
}

/// Validates MAC-signed resource requests.
pub struct MacTokenValidator {
    access_tokens: Arc<dyn AccessTokenRepository>,
    verifier: JwtVerifier,
}

impl MacTokenValidator {
    pub fn new(access_tokens: Arc<dyn AccessTokenRepository>, verifier: JwtVerifier) -> Self {
        Self {
            access_tokens,
            verifier,
        }
    }

    async fn validate(&self, request: &ServerRequest, header: &str) -> Result<TokenAttributes, OAuthError> {
        let mac = MacHeader::parse(header)?;

        let claims = JwtVerifier::parse_unverified(&mac.access_token)
            .map_err(|_| OAuthError::access_denied("Invalid JWT."))?;
        let mac_key = claims
            .mac_key
            .as_deref()
            .ok_or_else(|| OAuthError::access_denied("Access token is not a MAC token."))?;
        let algorithm = claims
            .mac_algorithm
            .as_deref()
            .and_then(MacAlgorithm::from_name)
            .unwrap_or_default();

        let canonical = mac.canonical_string(request);
        if !crypto::verify_mac_signature(algorithm, &canonical, mac_key, &mac.mac) {
            return Err(OAuthError::access_denied("MAC validation failed."));
        }

        let claims = self
            .verifier
            .verify(&mac.access_token)
            .map_err(|_| OAuthError::access_denied("Invalid JWT."))?;
        if claims.jti != mac.kid {
            return Err(OAuthError::access_denied("MAC key identifier does not match the access token."));
        }

        let revoked = self
            .access_tokens
            .is_access_token_revoked(&claims.jti)
            .await
            .map_err(|e| e.into_server_error("is_access_token_revoked", &claims.jti))?;
        if revoked {
            return Err(OAuthError::access_denied("Access token has been revoked."));
        }

        Ok(TokenAttributes {
            access_token_id: claims.jti,
            client_id: claims.aud,
            user_id: claims.sub,
            scopes: claims.scopes,
        })
    }
}

#[async_trait]
impl AuthorizationValidator for MacTokenValidator {
    #[instrument(skip_all, level = "debug")]
    async fn validate_authorization(&self, request: ServerRequest) -> Result<ServerRequest, OAuthError> {
        let header = request.header("authorization").unwrap_or_default().to_string();
        if header.is_empty() || header == "0" {
            return Err(OAuthError::access_denied("Missing \"Authorization\" header."));
        }

        match self.validate(&request, &header).await {
            Ok(attributes) => {
                debug!(token_id = %attributes.access_token_id, "MAC request validated");
                Ok(request.with_token_attributes(attributes))
            }
            Err(err @ OAuthError::AccessDenied(_)) => Err(err),
            Err(err) => {
                debug!(error = %err, "MAC validation failed unexpectedly");
                Err(OAuthError::access_denied("Unable to validate the MAC request."))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn request() -> ServerRequest {
        ServerRequest::new("GET", "/v1/me?fields=id")
            .with_header("Host", "api.example.com")
            .with_header("Content-Type", "application/json")
    }

    #[test]
    fn parses_required_and_optional_params() {
        let header = MacHeader::parse(
            r#"MAC kid="k1", ts="1700000000", access_token="a.b.c", mac="bWFj", h="host:content-type", seq-nr="7", cb="tls-unique:abc""#,
        )
        .unwrap();
        assert_eq!(header.kid, "k1");
        assert_eq!(header.ts, "1700000000");
        assert_eq!(header.access_token, "a.b.c");
        assert_eq!(header.mac, "bWFj");
        assert_eq!(header.h, vec!["host", "content-type"]);
        assert_eq!(header.seq_nr.as_deref(), Some("7"));
        assert_eq!(header.cb.as_deref(), Some("tls-unique:abc"));
    }

    #[test]
    fn defaults_to_host_header() {
        let header = MacHeader::parse(r#"MAC kid="k", ts="1", access_token="t", mac="m""#).unwrap();
        assert_eq!(header.h, vec!["host"]);
        assert_eq!(header.seq_nr, None);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            MacHeader::parse(r#"MAC kid="k", ts, access_token="t", mac="m""#),
            Err(OAuthError::access_denied("Error parsing MAC params."))
        );
        assert_eq!(
            MacHeader::parse(r#"MAC kid="k", access_token="t", mac="m""#),
            Err(OAuthError::access_denied("Required MAC param `ts` missing."))
        );
    }

    #[test]
    fn canonical_string_layout() {
        let header = MacHeader::parse(
            r#"MAC kid="k", ts="1700000000", access_token="t", mac="m", h="host:content-type", seq-nr="7""#,
        )
        .unwrap();
        assert_eq!(
            header.canonical_string(&request()),
            "GET /v1/me?fields=id HTTP/1.1\napi.example.com\napplication/json\n1700000000\n7\n"
        );
    }

    #[test]
    fn canonical_string_skips_empty_fields() {
        let header = MacHeader::parse(r#"MAC kid="k", ts="1700000000", access_token="t", mac="m", h="host:x-missing""#).unwrap();
        assert_eq!(
            header.canonical_string(&request()),
            "GET /v1/me?fields=id HTTP/1.1\napi.example.com\n1700000000\n"
        );
    }

    #[test]
    fn signed_header_round_trips_through_parser() {
        let key = MacSigningKey {
            access_token: "a.b.c",
            kid: "k1",
            mac_key: "secret",
            algorithm: MacAlgorithm::HmacSha256,
        };
        let signed = sign_request(&request(), &key, 1700000000, &["host"], Some("3"));
        let parsed = MacHeader::parse(&signed.to_header_value()).unwrap();
        assert_eq!(parsed, signed);
        assert!(crypto::verify_mac_signature(
            MacAlgorithm::HmacSha256,
            &parsed.canonical_string(&request()),
            "secret",
            &parsed.mac
        ));
    }
}
