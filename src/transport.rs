//! Token extraction from requests and cookie rendering.

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, header};
use serde_json::Value;

use crate::config::{Configuration, Transport};
use crate::error::{Error, Result, ToInternal};

/// What the engine sees of an incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub headers: HeaderMap,
    /// Parsed JSON body, if any.
    pub body: Option<Value>,
}

impl RequestContext {
    pub fn new(headers: HeaderMap, body: Option<Value>) -> Self {
        Self { headers, body }
    }

    /// Build a context from raw request parts. An empty body is no body.
    pub fn from_parts(headers: HeaderMap, body: &Bytes) -> Result<Self> {
        let body = if body.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(serde_json::from_slice(body)?)
        };

        Ok(Self { headers, body })
    }

    /// Value of the `name` cookie.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim_matches('"'))
            .filter(|value| !value.is_empty())
    }

    /// String field of the JSON body.
    pub fn body_field(&self, name: &str) -> Option<&str> {
        self.body.as_ref()?.get(name)?.as_str()
    }
}

/// Find the access token according to the transport mode.
///
/// `Ok(None)` means no token was presented at all. A header with an
/// unexpected scheme is an invalid token, not a missing one.
pub fn extract_access_token<'a>(
    config: &Configuration,
    request: &'a RequestContext,
) -> Result<Option<&'a str>> {
    if config.transport() == Transport::Cookie {
        if let Some(token) = request.cookie(config.cookie_access_token_name()) {
            return Ok(Some(token));
        }
        if config.cookie_strict() {
            return Ok(None);
        }
    }

    let Some(value) = request.headers.get(config.authorization_header()) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| Error::InvalidToken)?.trim();
    let prefix = config.authorization_header_prefix();

    if prefix.is_empty() {
        return Ok(Some(value).filter(|value| !value.is_empty()));
    }

    match value.split_once(' ') {
        Some((scheme, token))
            if scheme.eq_ignore_ascii_case(prefix) && !token.trim().is_empty() =>
        {
            Ok(Some(token.trim()))
        },
        _ => {
            tracing::debug!("authorization header has an unexpected scheme");
            Err(Error::InvalidToken)
        },
    }
}

/// Find the refresh token: cookie in cookie mode, JSON body otherwise.
pub fn extract_refresh_token<'a>(
    config: &Configuration,
    request: &'a RequestContext,
) -> Option<&'a str> {
    if config.transport() == Transport::Cookie {
        if let Some(token) = request.cookie(config.cookie_refresh_token_name()) {
            return Some(token);
        }
        if config.cookie_strict() {
            return None;
        }
    }

    request
        .body_field(config.refresh_token_name())
        .filter(|token| !token.is_empty())
}

/// Render a `Set-Cookie` value carrying `token` for `max_age` seconds.
pub fn set_cookie(
    config: &Configuration,
    name: &str,
    token: &str,
    max_age: u64,
) -> Result<HeaderValue> {
    let mut cookie = format!("{name}={token}; Path=/; Max-Age={max_age}; SameSite=Lax");

    if let Some(domain) = config.cookie_domain() {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if config.cookie_httponly() {
        cookie.push_str("; HttpOnly");
    }

    HeaderValue::from_str(&cookie).catch()
}
