//! Configuration profile of a mounted instance.
//!
//! A profile is a flat mapping of named options. It is built once from the
//! defaults below overlaid with caller overrides, validated, then shared
//! read-only behind an [`Arc`](std::sync::Arc) by every component.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::claims::RESERVED_CLAIMS;
use crate::codec::Algorithm;

const DEFAULT_EXPIRATION_DELTA: u64 = 60 * 30; // 30 minutes.
const DEFAULT_REFRESH_EXPIRATION_DELTA: u64 = 60 * 60 * 24 * 30; // 30 days.

/// Errors detected while building a [`Configuration`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown option `{0}`")]
    UnknownOption(String),
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("invalid configuration: {0}")]
    Parse(String),
    #[error("unsupported algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("algorithm {0} requires a non-empty `secret`")]
    MissingSecret(Algorithm),
    #[error("algorithm {0} requires `private_key` or `public_key`")]
    MissingKey(Algorithm),
    #[error("`private_key` is required to sign {0} tokens")]
    MissingSigningKey(Algorithm),
    #[error("invalid key material: {0}")]
    Key(String),
    #[error("missing `{0}` callback")]
    MissingCallback(&'static str),
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Where access tokens travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// `Authorization`-style header.
    Header,
    /// Named cookie.
    Cookie,
}

/// Every behavioural switch of the engine.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    secret: Option<String>,
    algorithm: Algorithm,
    private_key: Option<String>,
    public_key: Option<String>,

    expiration_delta: u64,
    refresh_token_expiration_delta: u64,
    refresh_token_enabled: bool,

    cookie_set: bool,
    cookie_strict: bool,
    cookie_access_token_name: String,
    cookie_refresh_token_name: String,
    cookie_domain: Option<String>,
    cookie_httponly: bool,
    authorization_header: String,
    authorization_header_prefix: String,
    access_token_name: String,
    refresh_token_name: String,

    user_id: String,
    scopes_enabled: bool,
    scopes_name: String,
    claim_iat: String,
    claim_exp: String,
    claim_nbf: String,
    claim_nbf_delta: Option<u64>,
    claim_iss: Option<String>,
    claim_aud: Option<String>,
    leeway: u64,
    verify_exp: bool,

    url_prefix: String,
    path_to_authenticate: String,
    path_to_retrieve_user: String,
    path_to_verify: String,
    path_to_refresh: String,
    path_to_jwks: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            secret: None,
            algorithm: Algorithm::Hs256,
            private_key: None,
            public_key: None,
            expiration_delta: DEFAULT_EXPIRATION_DELTA,
            refresh_token_expiration_delta: DEFAULT_REFRESH_EXPIRATION_DELTA,
            refresh_token_enabled: false,
            cookie_set: false,
            cookie_strict: true,
            cookie_access_token_name: "access_token".into(),
            cookie_refresh_token_name: "refresh_token".into(),
            cookie_domain: None,
            cookie_httponly: true,
            authorization_header: "authorization".into(),
            authorization_header_prefix: "Bearer".into(),
            access_token_name: "access_token".into(),
            refresh_token_name: "refresh_token".into(),
            user_id: "user_id".into(),
            scopes_enabled: false,
            scopes_name: "scopes".into(),
            claim_iat: "iat".into(),
            claim_exp: "exp".into(),
            claim_nbf: "nbf".into(),
            claim_nbf_delta: None,
            claim_iss: None,
            claim_aud: None,
            leeway: 0,
            verify_exp: true,
            url_prefix: "/auth".into(),
            path_to_authenticate: "/".into(),
            path_to_retrieve_user: "/me".into(),
            path_to_verify: "/verify".into(),
            path_to_refresh: "/refresh".into(),
            path_to_jwks: "/jwks.json".into(),
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("algorithm", &self.algorithm)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("expiration_delta", &self.expiration_delta)
            .field("refresh_token_enabled", &self.refresh_token_enabled)
            .field("cookie_set", &self.cookie_set)
            .field("scopes_enabled", &self.scopes_enabled)
            .field("url_prefix", &self.url_prefix)
            .finish_non_exhaustive()
    }
}

impl Configuration {
    /// Start an override list on top of the defaults.
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Merge `overrides` over the defaults and validate the result.
    pub fn from_overrides(overrides: Map<String, Value>) -> Result<Self, ConfigError> {
        let defaults = match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(ConfigError::Parse("defaults are not a mapping".into())),
            Err(err) => return Err(ConfigError::Parse(err.to_string())),
        };
        let mut merged = defaults.clone();

        for (key, value) in overrides {
            if !defaults.contains_key(&key) {
                return Err(ConfigError::UnknownOption(key));
            }
            if let ("algorithm", Some(name)) = (key.as_str(), value.as_str()) {
                name.parse::<Algorithm>()?;
            }

            // Check the value alone so a type error names its option.
            let mut single = defaults.clone();
            single.insert(key.clone(), value.clone());
            if let Err(err) = serde_json::from_value::<Self>(Value::Object(single)) {
                return Err(ConfigError::invalid(&key, err.to_string()));
            }

            merged.insert(key, value);
        }

        let config: Self = serde_json::from_value(Value::Object(merged))
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    /// Read a YAML file holding the flat option mapping.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let overrides: Map<String, Value> = serde_yaml::from_reader(file)
            .map_err(|err| ConfigError::Parse(err.to_string()))?;

        Self::from_overrides(overrides)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.algorithm.is_symmetric() {
            if self.secret.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::MissingSecret(self.algorithm));
            }
        } else if self.private_key.is_none() {
            if self.public_key.is_none() {
                return Err(ConfigError::MissingKey(self.algorithm));
            }
            // Refresh grants sign tokens, a verify-only profile cannot.
            if self.refresh_token_enabled {
                return Err(ConfigError::MissingSigningKey(self.algorithm));
            }
        }

        if self.expiration_delta == 0 {
            return Err(ConfigError::invalid("expiration_delta", "must be positive"));
        }
        if self.refresh_token_expiration_delta == 0 {
            return Err(ConfigError::invalid(
                "refresh_token_expiration_delta",
                "must be positive",
            ));
        }
        if self.claim_nbf_delta.is_some_and(|delta| delta > self.expiration_delta) {
            return Err(ConfigError::invalid(
                "claim_nbf_delta",
                "not-before would fall after expiry",
            ));
        }

        for (key, value) in [
            ("cookie_access_token_name", &self.cookie_access_token_name),
            ("cookie_refresh_token_name", &self.cookie_refresh_token_name),
            ("authorization_header", &self.authorization_header),
            ("access_token_name", &self.access_token_name),
            ("refresh_token_name", &self.refresh_token_name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(key, "must not be empty"));
            }
        }
        axum::http::HeaderName::try_from(self.authorization_header.as_str())
            .map_err(|err| ConfigError::invalid("authorization_header", err.to_string()))?;

        if !self.url_prefix.starts_with('/')
            || (self.url_prefix.len() > 1 && self.url_prefix.ends_with('/'))
        {
            return Err(ConfigError::invalid(
                "url_prefix",
                "must start with `/` and must not end with one",
            ));
        }
        let mut paths = HashSet::new();
        for (key, path) in [
            ("path_to_authenticate", &self.path_to_authenticate),
            ("path_to_retrieve_user", &self.path_to_retrieve_user),
            ("path_to_verify", &self.path_to_verify),
            ("path_to_refresh", &self.path_to_refresh),
            ("path_to_jwks", &self.path_to_jwks),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::invalid(key, "must start with `/`"));
            }
            if !paths.insert(path.as_str()) {
                return Err(ConfigError::invalid(key, "path already used"));
            }
        }

        // Payload keys must be distinct, otherwise claims overwrite each other.
        let mut keys: HashSet<&str> = RESERVED_CLAIMS.iter().copied().collect();
        for (key, name) in [
            ("user_id", &self.user_id),
            ("scopes_name", &self.scopes_name),
            ("claim_iat", &self.claim_iat),
            ("claim_exp", &self.claim_exp),
            ("claim_nbf", &self.claim_nbf),
        ] {
            if name.is_empty() {
                return Err(ConfigError::invalid(key, "must not be empty"));
            }
            if !keys.insert(name.as_str()) {
                return Err(ConfigError::invalid(key, "payload key already used"));
            }
        }

        Ok(())
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn private_key(&self) -> Option<&str> {
        self.private_key.as_deref()
    }

    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    /// Access token lifetime, in seconds.
    pub fn expiration_delta(&self) -> u64 {
        self.expiration_delta
    }

    /// Refresh token lifetime, in seconds.
    pub fn refresh_token_expiration_delta(&self) -> u64 {
        self.refresh_token_expiration_delta
    }

    pub fn refresh_token_enabled(&self) -> bool {
        self.refresh_token_enabled
    }

    pub fn transport(&self) -> Transport {
        if self.cookie_set {
            Transport::Cookie
        } else {
            Transport::Header
        }
    }

    /// In cookie mode, refuse to fall back to the header.
    pub fn cookie_strict(&self) -> bool {
        self.cookie_strict
    }

    pub fn cookie_access_token_name(&self) -> &str {
        &self.cookie_access_token_name
    }

    pub fn cookie_refresh_token_name(&self) -> &str {
        &self.cookie_refresh_token_name
    }

    pub fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    pub fn cookie_httponly(&self) -> bool {
        self.cookie_httponly
    }

    pub fn authorization_header(&self) -> &str {
        &self.authorization_header
    }

    /// Header scheme. Empty means the header holds the bare token.
    pub fn authorization_header_prefix(&self) -> &str {
        &self.authorization_header_prefix
    }

    pub fn access_token_name(&self) -> &str {
        &self.access_token_name
    }

    pub fn refresh_token_name(&self) -> &str {
        &self.refresh_token_name
    }

    /// Key of the subject identifier, in subjects and in payloads.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn scopes_enabled(&self) -> bool {
        self.scopes_enabled
    }

    pub fn scopes_name(&self) -> &str {
        &self.scopes_name
    }

    pub fn claim_iat(&self) -> &str {
        &self.claim_iat
    }

    pub fn claim_exp(&self) -> &str {
        &self.claim_exp
    }

    pub fn claim_nbf(&self) -> &str {
        &self.claim_nbf
    }

    pub fn claim_nbf_delta(&self) -> Option<u64> {
        self.claim_nbf_delta
    }

    pub fn claim_iss(&self) -> Option<&str> {
        self.claim_iss.as_deref()
    }

    pub fn claim_aud(&self) -> Option<&str> {
        self.claim_aud.as_deref()
    }

    /// Clock skew tolerance, in seconds.
    pub fn leeway(&self) -> u64 {
        self.leeway
    }

    pub fn verify_exp(&self) -> bool {
        self.verify_exp
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn path_to_authenticate(&self) -> &str {
        &self.path_to_authenticate
    }

    pub fn path_to_retrieve_user(&self) -> &str {
        &self.path_to_retrieve_user
    }

    pub fn path_to_verify(&self) -> &str {
        &self.path_to_verify
    }

    pub fn path_to_refresh(&self) -> &str {
        &self.path_to_refresh
    }

    pub fn path_to_jwks(&self) -> &str {
        &self.path_to_jwks
    }
}

/// Ordered list of overrides applied over the defaults.
#[derive(Debug, Default, Clone)]
pub struct ConfigurationBuilder {
    overrides: Map<String, Value>,
}

impl ConfigurationBuilder {
    /// Override one option. Later calls win.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.overrides.insert(key.to_owned(), value.into());
        self
    }

    pub fn build(self) -> Result<Configuration, ConfigError> {
        Configuration::from_overrides(self.overrides)
    }
}
