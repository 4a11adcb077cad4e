//! Framework-neutral request and response carriers.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use oauth2_lib::url_encoding::parse_form;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Claims a validator attaches to an authenticated request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAttributes {
    pub access_token_id: String,
    pub client_id: String,
    pub user_id: Option<String>,
    pub scopes: Vec<String>,
}

/// An inbound HTTP request as the token engine sees it.
///
/// Parameters come from the parsed form body only; query parameters are
/// never consulted.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub method: String,
    /// Request target as it appeared on the start line.
    pub target: String,
    /// Protocol version without the `HTTP/` prefix.
    pub version: String,
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
    token_attributes: Option<TokenAttributes>,
}

impl ServerRequest {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            version: "1.1".to_string(),
            headers: Vec::new(),
            params: Vec::new(),
            token_attributes: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replaces the parameters with those of an urlencoded body.
    pub fn with_form_body(mut self, body: &str) -> Self {
        self.params = parse_form(body);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a header joined with `", "`. Empty when absent.
    pub fn header_line(&self, name: &str) -> String {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// First body parameter with this name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Body parameter that is present and non-empty.
    pub fn non_empty_param(&self, name: &str) -> Option<&str> {
        self.param(name).filter(|v| !v.is_empty())
    }

    /// `METHOD SP request-target SP HTTP/version`
    pub fn start_line(&self) -> String {
        format!("{} {} HTTP/{}", self.method, self.target, self.version)
    }

    /// Client id and secret from `Authorization: Basic`, if well formed.
    pub fn basic_credentials(&self) -> Option<(String, String)> {
        let header = self.header("authorization")?;
        let (scheme, encoded) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (id, secret) = decoded.split_once(':')?;
        Some((id.to_string(), secret.to_string()))
    }

    pub fn token_attributes(&self) -> Option<&TokenAttributes> {
        self.token_attributes.as_ref()
    }

    pub fn with_token_attributes(mut self, attributes: TokenAttributes) -> Self {
        self.token_attributes = Some(attributes);
        self
    }
}

/// An outbound HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ServerResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            headers: vec![(
                "content-type".to_string(),
                "application/json; charset=UTF-8".to_string(),
            )],
            body: serde_json::to_vec(body).unwrap_or_default(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json_body(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.body)
    }
}
