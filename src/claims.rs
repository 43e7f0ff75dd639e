//! Claim sets and their payload representation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Configuration;

/// Payload keys owned by the engine whatever the configuration says.
pub const RESERVED_CLAIMS: &[&str] =
    &[TOKEN_TYPE_CLAIM, TOKEN_ID_CLAIM, ISSUER_CLAIM, AUDIENCE_CLAIM];

pub(crate) const TOKEN_TYPE_CLAIM: &str = "token_type";
pub(crate) const TOKEN_ID_CLAIM: &str = "jti";
pub(crate) const ISSUER_CLAIM: &str = "iss";
pub(crate) const AUDIENCE_CLAIM: &str = "aud";

/// Kind of token, carried in every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "access" => Some(TokenType::Access),
            "refresh" => Some(TokenType::Refresh),
            _ => None,
        }
    }
}

/// Decoded payload of a token.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSet {
    /// Subject identifier, stored under the configured `user_id` key.
    pub subject: String,
    pub token_type: TokenType,
    pub issued_at: u64,
    pub expires_at: u64,
    pub not_before: Option<u64>,
    /// `None` when the token carries no scope claim at all.
    pub scopes: Option<Vec<String>>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub token_id: Option<String>,
    /// Integrator supplied claims.
    pub custom: Map<String, Value>,
}

impl ClaimSet {
    /// Build the payload mapping. Keys come out sorted.
    pub fn to_payload(&self, config: &Configuration) -> BTreeMap<String, Value> {
        let mut payload: BTreeMap<String, Value> = self
            .custom
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        payload.insert(config.user_id().to_owned(), Value::String(self.subject.clone()));
        payload.insert(TOKEN_TYPE_CLAIM.to_owned(), self.token_type.as_str().into());
        payload.insert(config.claim_iat().to_owned(), self.issued_at.into());
        payload.insert(config.claim_exp().to_owned(), self.expires_at.into());

        if let Some(nbf) = self.not_before {
            payload.insert(config.claim_nbf().to_owned(), nbf.into());
        }
        if let Some(scopes) = &self.scopes {
            payload.insert(config.scopes_name().to_owned(), scopes.clone().into());
        }
        if let Some(issuer) = &self.issuer {
            payload.insert(ISSUER_CLAIM.to_owned(), issuer.clone().into());
        }
        if let Some(audience) = &self.audience {
            payload.insert(AUDIENCE_CLAIM.to_owned(), audience.clone().into());
        }
        if let Some(jti) = &self.token_id {
            payload.insert(TOKEN_ID_CLAIM.to_owned(), jti.clone().into());
        }

        payload
    }

    /// Rebuild a claim set from a decoded payload.
    ///
    /// Returns `None` when a mandatory claim is missing or mistyped.
    pub fn from_payload(mut payload: Map<String, Value>, config: &Configuration) -> Option<Self> {
        let subject = match payload.remove(config.user_id())? {
            Value::String(subject) if !subject.is_empty() => subject,
            Value::Number(number) => number.to_string(),
            _ => return None,
        };
        let token_type = TokenType::parse(payload.remove(TOKEN_TYPE_CLAIM)?.as_str()?)?;
        let issued_at = payload.remove(config.claim_iat())?.as_u64()?;
        let expires_at = payload.remove(config.claim_exp())?.as_u64()?;

        let not_before = match payload.remove(config.claim_nbf()) {
            Some(value) => Some(value.as_u64()?),
            None => None,
        };
        let scopes = match payload.remove(config.scopes_name()) {
            Some(value) => Some(parse_scopes(value)?),
            None => None,
        };
        let issuer = optional_string(payload.remove(ISSUER_CLAIM))?;
        let audience = optional_string(payload.remove(AUDIENCE_CLAIM))?;
        let token_id = optional_string(payload.remove(TOKEN_ID_CLAIM))?;

        Some(Self {
            subject,
            token_type,
            issued_at,
            expires_at,
            not_before,
            scopes,
            issuer,
            audience,
            token_id,
            custom: payload,
        })
    }

    /// Whether `key` is interpreted by the engine under `config`.
    pub fn is_reserved(key: &str, config: &Configuration) -> bool {
        RESERVED_CLAIMS.contains(&key)
            || [
                config.user_id(),
                config.claim_iat(),
                config.claim_exp(),
                config.claim_nbf(),
                config.scopes_name(),
            ]
            .contains(&key)
    }
}

// A single string is accepted as a one element list.
fn parse_scopes(value: Value) -> Option<Vec<String>> {
    match value {
        Value::String(scope) => Some(vec![scope]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(scope) => Some(scope),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn optional_string(value: Option<Value>) -> Option<Option<String>> {
    match value {
        None => Some(None),
        Some(Value::String(value)) => Some(Some(value)),
        Some(_) => None,
    }
}
