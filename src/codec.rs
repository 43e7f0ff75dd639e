//! Compact signed token representation.
//!
//! A token is `base64url(header).base64url(payload).base64url(signature)`,
//! produced and checked by `jsonwebtoken`. The signature is always checked
//! before the payload is looked at; time, issuer and audience checks then run
//! on the configured claim names.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::claims::ClaimSet;
use crate::clock::Clock;
use crate::config::{ConfigError, Configuration};
use crate::error::{Result, ToInternal};
use crate::verifier::ValidationOutcome;

/// Tokens longer than this are rejected before any decoding.
pub const MAX_TOKEN_LENGTH: usize = 8 * 1024;

/// Signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    Hs256,
    Hs384,
    Hs512,
    Es256,
    Rs256,
    Rs384,
    Rs512,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Hs256 => "HS256",
            Algorithm::Hs384 => "HS384",
            Algorithm::Hs512 => "HS512",
            Algorithm::Es256 => "ES256",
            Algorithm::Rs256 => "RS256",
            Algorithm::Rs384 => "RS384",
            Algorithm::Rs512 => "RS512",
        }
    }

    /// Whether the algorithm uses a shared secret.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Algorithm::Hs256 | Algorithm::Hs384 | Algorithm::Hs512)
    }

    fn jwt(self) -> jsonwebtoken::Algorithm {
        match self {
            Algorithm::Hs256 => jsonwebtoken::Algorithm::HS256,
            Algorithm::Hs384 => jsonwebtoken::Algorithm::HS384,
            Algorithm::Hs512 => jsonwebtoken::Algorithm::HS512,
            Algorithm::Es256 => jsonwebtoken::Algorithm::ES256,
            Algorithm::Rs256 => jsonwebtoken::Algorithm::RS256,
            Algorithm::Rs384 => jsonwebtoken::Algorithm::RS384,
            Algorithm::Rs512 => jsonwebtoken::Algorithm::RS512,
        }
    }
}

impl FromStr for Algorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(Algorithm::Hs256),
            "HS384" => Ok(Algorithm::Hs384),
            "HS512" => Ok(Algorithm::Hs512),
            "ES256" => Ok(Algorithm::Es256),
            "RS256" => Ok(Algorithm::Rs256),
            "RS384" => Ok(Algorithm::Rs384),
            "RS512" => Ok(Algorithm::Rs512),
            other => Err(ConfigError::UnsupportedAlgorithm(other.to_owned())),
        }
    }
}

impl TryFrom<String> for Algorithm {
    type Error = ConfigError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Algorithm> for String {
    fn from(value: Algorithm) -> Self {
        value.as_str().to_owned()
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An encoded and signed token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignedToken(String);

impl SignedToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for SignedToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a token was turned down. Only ever logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    TooLong,
    Malformed,
    AlgorithmMismatch,
    BadSignature,
    BadPayload,
    IssuedInFuture,
    NotYetValid,
    IssuerMismatch,
    AudienceMismatch,
    Expired,
}

impl From<jsonwebtoken::errors::Error> for Rejection {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => Rejection::BadSignature,
            ErrorKind::InvalidAlgorithm => Rejection::AlgorithmMismatch,
            _ => Rejection::Malformed,
        }
    }
}

/// Key material of a profile, loaded once.
struct Keys {
    /// `None` for verify-only profiles.
    encoding: Option<EncodingKey>,
    decoding: DecodingKey,
    validation: Validation,
    /// Public JWK, asymmetric profiles only.
    jwk: Option<Value>,
}

impl Keys {
    fn load(config: &Configuration) -> std::result::Result<Self, ConfigError> {
        let algorithm = config.algorithm();

        let (encoding, decoding, jwk) = match algorithm {
            Algorithm::Hs256 | Algorithm::Hs384 | Algorithm::Hs512 => {
                let secret = config
                    .secret()
                    .filter(|secret| !secret.is_empty())
                    .ok_or(ConfigError::MissingSecret(algorithm))?;

                (
                    Some(EncodingKey::from_secret(secret.as_bytes())),
                    DecodingKey::from_secret(secret.as_bytes()),
                    None,
                )
            },
            Algorithm::Es256 => {
                use p256::ecdsa::{SigningKey, VerifyingKey};
                use p256::elliptic_curve::sec1::ToEncodedPoint;
                use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};

                let signing = config
                    .private_key()
                    .map(SigningKey::from_pkcs8_pem)
                    .transpose()
                    .map_err(key_error)?;
                let configured = config
                    .public_key()
                    .map(VerifyingKey::from_public_key_pem)
                    .transpose()
                    .map_err(key_error)?;
                let verifying =
                    paired(algorithm, signing.as_ref().map(VerifyingKey::from), configured)?;

                let encoding = config
                    .private_key()
                    .map(|pem| EncodingKey::from_ec_pem(pem.as_bytes()))
                    .transpose()
                    .map_err(key_error)?;

                let point = p256::PublicKey::from(&verifying).to_encoded_point(false);
                let (Some(x), Some(y)) = (point.x(), point.y()) else {
                    return Err(ConfigError::Key("EC public key is not a curve point".into()));
                };
                let x = Base64UrlUnpadded::encode_string(x);
                let y = Base64UrlUnpadded::encode_string(y);

                (
                    encoding,
                    DecodingKey::from_ec_components(&x, &y).map_err(key_error)?,
                    Some(json!({ "kty": "EC", "crv": "P-256", "x": x, "y": y })),
                )
            },
            Algorithm::Rs256 | Algorithm::Rs384 | Algorithm::Rs512 => {
                use rsa::pkcs1::EncodeRsaPrivateKey;
                use rsa::traits::PublicKeyParts;

                let signing = config.private_key().map(rsa_private_key).transpose()?;
                let configured = config.public_key().map(rsa_public_key).transpose()?;
                let verifying = paired(
                    algorithm,
                    signing.as_ref().map(rsa::RsaPublicKey::from),
                    configured,
                )?;

                // PKCS#1 DER whatever the PEM flavour was.
                let encoding = signing
                    .as_ref()
                    .map(|key| key.to_pkcs1_der())
                    .transpose()
                    .map_err(key_error)?
                    .map(|der| EncodingKey::from_rsa_der(der.as_bytes()));

                let n = Base64UrlUnpadded::encode_string(&verifying.n().to_bytes_be());
                let e = Base64UrlUnpadded::encode_string(&verifying.e().to_bytes_be());

                (
                    encoding,
                    DecodingKey::from_rsa_components(&n, &e).map_err(key_error)?,
                    Some(json!({ "kty": "RSA", "n": n, "e": e })),
                )
            },
        };

        let jwk = jwk.map(|mut jwk| {
            jwk["alg"] = algorithm.as_str().into();
            jwk["use"] = "sig".into();
            jwk["key_ops"] = json!(["verify"]);
            jwk
        });

        Ok(Self {
            encoding,
            decoding,
            validation: validation(algorithm),
            jwk,
        })
    }
}

/// Only the header algorithm and the signature are left to `jsonwebtoken`.
fn validation(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm.jwt());
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

/// Public key to verify with. When both halves are configured they must match.
fn paired<K: PartialEq>(
    algorithm: Algorithm,
    derived: Option<K>,
    configured: Option<K>,
) -> std::result::Result<K, ConfigError> {
    match (derived, configured) {
        (Some(derived), Some(configured)) if derived != configured => Err(ConfigError::Key(
            "`public_key` does not match `private_key`".into(),
        )),
        (_, Some(key)) | (Some(key), None) => Ok(key),
        (None, None) => Err(ConfigError::MissingKey(algorithm)),
    }
}

fn key_error(err: impl fmt::Display) -> ConfigError {
    ConfigError::Key(err.to_string())
}

fn rsa_private_key(pem: &str) -> std::result::Result<rsa::RsaPrivateKey, ConfigError> {
    use rsa::pkcs1::DecodeRsaPrivateKey;
    use rsa::pkcs8::DecodePrivateKey;

    rsa::RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| rsa::RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(key_error)
}

fn rsa_public_key(pem: &str) -> std::result::Result<rsa::RsaPublicKey, ConfigError> {
    use rsa::pkcs1::DecodeRsaPublicKey;
    use rsa::pkcs8::DecodePublicKey;

    rsa::RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| rsa::RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(key_error)
}

/// Encodes, signs, decodes and validates tokens under one profile.
#[derive(Clone)]
pub struct ClaimCodec {
    config: Arc<Configuration>,
    clock: Arc<dyn Clock>,
    keys: Arc<Keys>,
}

impl fmt::Debug for ClaimCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimCodec")
            .field("algorithm", &self.config.algorithm())
            .field("can_sign", &self.can_sign())
            .finish()
    }
}

impl ClaimCodec {
    /// Load key material for the profile algorithm.
    pub fn new(
        config: Arc<Configuration>,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        let keys = Keys::load(&config)?;

        Ok(Self {
            config,
            clock,
            keys: Arc::new(keys),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.config.algorithm()
    }

    /// `false` for asymmetric profiles configured with a public key only.
    pub fn can_sign(&self) -> bool {
        self.keys.encoding.is_some()
    }

    /// Serialize, sign and assemble a token.
    pub fn encode(&self, claims: &ClaimSet) -> Result<SignedToken> {
        let key = self
            .keys
            .encoding
            .as_ref()
            .ok_or(ConfigError::MissingSigningKey(self.algorithm()))?;

        // `BTreeMap` keeps keys sorted: equal claims give equal bytes.
        let payload = claims.to_payload(&self.config);
        let token = jsonwebtoken::encode(&Header::new(self.algorithm().jwt()), &payload, key)
            .catch()?;

        Ok(SignedToken(token))
    }

    /// Check a token and return its claims.
    pub fn decode(&self, token: &str) -> ValidationOutcome {
        if token.is_empty() {
            return ValidationOutcome::MissingToken;
        }

        match self.check(token) {
            Ok(claims) => ValidationOutcome::Valid(claims),
            Err(Rejection::Expired) => {
                tracing::debug!("token rejected: expired");
                ValidationOutcome::ExpiredToken
            },
            Err(reason) => {
                tracing::debug!(?reason, "token rejected");
                ValidationOutcome::InvalidToken
            },
        }
    }

    fn check(&self, token: &str) -> std::result::Result<ClaimSet, Rejection> {
        if token.len() > MAX_TOKEN_LENGTH {
            return Err(Rejection::TooLong);
        }

        let data = jsonwebtoken::decode::<Map<String, Value>>(
            token,
            &self.keys.decoding,
            &self.keys.validation,
        )?;
        let claims =
            ClaimSet::from_payload(data.claims, &self.config).ok_or(Rejection::BadPayload)?;

        self.check_claims(&claims)?;

        Ok(claims)
    }

    fn check_claims(&self, claims: &ClaimSet) -> std::result::Result<(), Rejection> {
        if let Some(issuer) = self.config.claim_iss() {
            if claims.issuer.as_deref() != Some(issuer) {
                return Err(Rejection::IssuerMismatch);
            }
        }
        if let Some(audience) = self.config.claim_aud() {
            if claims.audience.as_deref() != Some(audience) {
                return Err(Rejection::AudienceMismatch);
            }
        }

        let now = self.clock.now();
        let leeway = self.config.leeway();

        if claims.issued_at > now.saturating_add(leeway) {
            return Err(Rejection::IssuedInFuture);
        }
        if claims
            .not_before
            .is_some_and(|nbf| nbf > now.saturating_add(leeway))
        {
            return Err(Rejection::NotYetValid);
        }
        if self.config.verify_exp() && now >= claims.expires_at.saturating_add(leeway) {
            return Err(Rejection::Expired);
        }

        Ok(())
    }

    /// Public key set (RFC 7517) for asymmetric profiles.
    pub fn jwks(&self) -> Option<Value> {
        self.keys
            .jwk
            .as_ref()
            .map(|key| json!({ "keys": [key] }))
    }
}
