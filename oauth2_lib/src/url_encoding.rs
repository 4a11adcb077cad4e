use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, percent_encode};

/// Encode set for application/x-www-form-urlencoded values. Unreserved
/// characters are left as is.
const FORM_URLENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encodes a string for use inside a form body or query string.
///
/// # Example
/// ```
/// use oauth2_lib::url_encoding::encode_url_owned;
/// assert_eq!(encode_url_owned("a b&c"), "a%20b%26c");
/// ```
pub fn encode_url_owned(input: &str) -> String {
    percent_encode(input.as_bytes(), FORM_URLENCODE_SET).to_string()
}

/// Decodes one form component. `+` is read as a space before percent
/// decoding; invalid UTF-8 is replaced lossily.
pub fn decode_form_component(input: &str) -> String {
    let spaced = input.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Parses an `application/x-www-form-urlencoded` body into ordered pairs.
///
/// Empty segments are skipped. A segment without `=` yields an empty value.
///
/// # Example
/// ```
/// use oauth2_lib::url_encoding::parse_form;
/// let pairs = parse_form("grant_type=firebase&fid=abc%2B1&scope=read+write");
/// assert_eq!(pairs[1], ("fid".to_string(), "abc+1".to_string()));
/// assert_eq!(pairs[2].1, "read write");
/// ```
pub fn parse_form(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((key, value)) => (decode_form_component(key), decode_form_component(value)),
            None => (decode_form_component(segment), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_then_parse_keeps_reserved_characters() {
        let token = "ab+/cd==";
        let body = format!("token={}&token_type_hint=refresh_token", encode_url_owned(token));
        let pairs = parse_form(&body);
        assert_eq!(pairs[0], ("token".to_string(), token.to_string()));
        assert_eq!(pairs[1].1, "refresh_token");
    }

    #[test]
    fn parse_form_handles_missing_values() {
        let pairs = parse_form("a&&b=");
        assert_eq!(pairs, vec![("a".to_string(), String::new()), ("b".to_string(), String::new())]);
    }
}
