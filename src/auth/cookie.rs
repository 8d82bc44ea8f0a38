//! Cookie codec for the session cookie.
//!
//! The cookie only ever carries the opaque session token.

use std::collections::HashMap;

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use percent_encoding::percent_decode_str;

use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieAttributes {
    pub max_age: i64,
    pub secure: bool,
}

/// Parse a `Cookie` request header into name/value pairs.
/// Values are percent-decoded; later duplicates lose to the first.
pub fn parse(header: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for part in header.split(';') {
        let Some((name, value)) = part.trim().split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = percent_decode_str(value.trim())
            .decode_utf8_lossy()
            .into_owned();
        out.entry(name.to_string()).or_insert(value);
    }
    out
}

/// Build a `Set-Cookie` value: `HttpOnly; Path=/; SameSite=Lax; Max-Age=..`
/// plus `Secure` when requested.
pub fn encode(name: &str, value: &str, attrs: CookieAttributes) -> String {
    let mut cookie = format!(
        "{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        attrs.max_age.max(0)
    );
    if attrs.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn session_cookie(cfg: &SessionConfig, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&encode(
        &cfg.cookie_name,
        token,
        CookieAttributes {
            max_age: cfg.ttl_seconds,
            secure: cfg.cookie_secure,
        },
    ))
}

pub fn clear_session_cookie(cfg: &SessionConfig) -> HeaderValue {
    let value = encode(
        &cfg.cookie_name,
        "",
        CookieAttributes {
            max_age: 0,
            secure: cfg.cookie_secure,
        },
    );
    // Only a cookie name with invalid header bytes can fail here.
    HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("session=; Path=/; HttpOnly; Max-Age=0"))
}

/// Session token from the request cookies, if any.
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|h| parse(h).remove(cookie_name))
        .filter(|t| !t.is_empty())
}
