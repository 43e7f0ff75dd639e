//! Token validation and scope checks.

use std::sync::Arc;

use crate::claims::{ClaimSet, TokenType};
use crate::codec::ClaimCodec;
use crate::error::{Error, Result};

/// Result of validating a presented token.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid(ClaimSet),
    ExpiredToken,
    /// Malformed, badly signed or with an unexpected algorithm.
    InvalidToken,
    MissingToken,
    ScopeDenied,
    /// Never produced by the built-in flows. Custom [`Authentication`]
    /// implementations return it when they verify requests but do not
    /// support refresh; the verify endpoint answers 500.
    ///
    /// [`Authentication`]: crate::facade::Authentication
    RefreshTokenNotImplemented,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }

    pub fn claims(&self) -> Option<&ClaimSet> {
        match self {
            ValidationOutcome::Valid(claims) => Some(claims),
            _ => None,
        }
    }

    /// Short machine readable reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Valid(_) => "valid",
            ValidationOutcome::ExpiredToken => "expired_token",
            ValidationOutcome::InvalidToken => "invalid_token",
            ValidationOutcome::MissingToken => "missing_token",
            ValidationOutcome::ScopeDenied => "scope_denied",
            ValidationOutcome::RefreshTokenNotImplemented => "refresh_not_implemented",
        }
    }

    pub fn into_result(self) -> Result<ClaimSet> {
        match self {
            ValidationOutcome::Valid(claims) => Ok(claims),
            ValidationOutcome::ExpiredToken => Err(Error::ExpiredToken),
            ValidationOutcome::InvalidToken => Err(Error::InvalidToken),
            ValidationOutcome::MissingToken => Err(Error::MissingToken),
            ValidationOutcome::ScopeDenied => Err(Error::ScopeDenied),
            ValidationOutcome::RefreshTokenNotImplemented => {
                Err(Error::RefreshTokenNotImplemented)
            },
        }
    }
}

/// Decides whether granted scopes satisfy a requirement.
pub trait ScopeValidator: Send + Sync {
    /// `granted` is `None` when the token has no scope claim.
    fn is_satisfied(&self, granted: Option<&[String]>, required: &[&str]) -> bool;
}

/// Every required scope must be granted, compared exactly.
#[derive(Debug, Default, Clone, Copy)]
pub struct SupersetScopes;

impl ScopeValidator for SupersetScopes {
    fn is_satisfied(&self, granted: Option<&[String]>, required: &[&str]) -> bool {
        let Some(granted) = granted else {
            return false;
        };

        required
            .iter()
            .all(|scope| granted.iter().any(|granted| granted == scope))
    }
}

/// Transport agnostic validation of extracted tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    codec: ClaimCodec,
    scopes: Arc<dyn ScopeValidator>,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(codec: ClaimCodec) -> Self {
        Self {
            codec,
            scopes: Arc::new(SupersetScopes),
        }
    }

    /// Replace the default superset check.
    pub fn with_scope_validator(mut self, validator: Arc<dyn ScopeValidator>) -> Self {
        self.scopes = validator;
        self
    }

    pub fn codec(&self) -> &ClaimCodec {
        &self.codec
    }

    /// Validate an access token, then check `required` scopes if any.
    pub fn verify<S: AsRef<str>>(&self, token: &str, required: &[S]) -> ValidationOutcome {
        let outcome = self.check(token, required);
        metrics::counter!("gatekey_tokens_verified_total", "outcome" => outcome.as_str())
            .increment(1);
        outcome
    }

    /// Same as [`TokenVerifier::verify`], with `None` meaning no token was found.
    pub fn verify_optional<S: AsRef<str>>(
        &self,
        token: Option<&str>,
        required: &[S],
    ) -> ValidationOutcome {
        match token {
            Some(token) => self.verify(token, required),
            None => {
                metrics::counter!("gatekey_tokens_verified_total", "outcome" => "missing_token")
                    .increment(1);
                ValidationOutcome::MissingToken
            },
        }
    }

    /// Validate a refresh token. Scopes are not looked at.
    pub fn verify_refresh(&self, token: &str) -> ValidationOutcome {
        match self.codec.decode(token) {
            ValidationOutcome::Valid(claims) if claims.token_type != TokenType::Refresh => {
                tracing::debug!(
                    subject = %claims.subject,
                    "access token presented as refresh token"
                );
                ValidationOutcome::InvalidToken
            },
            outcome => outcome,
        }
    }

    fn check<S: AsRef<str>>(&self, token: &str, required: &[S]) -> ValidationOutcome {
        let claims = match self.codec.decode(token) {
            ValidationOutcome::Valid(claims) => claims,
            outcome => return outcome,
        };

        if claims.token_type != TokenType::Access {
            tracing::debug!(subject = %claims.subject, "refresh token presented as access token");
            return ValidationOutcome::InvalidToken;
        }

        if !required.is_empty() {
            let required: Vec<&str> = required.iter().map(AsRef::as_ref).collect();
            if !self.scopes.is_satisfied(claims.scopes.as_deref(), &required) {
                tracing::debug!(subject = %claims.subject, ?required, "insufficient scopes");
                return ValidationOutcome::ScopeDenied;
            }
        }

        ValidationOutcome::Valid(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::tests::{NOW, hs256};
    use serde_json::Map;

    fn verifier() -> TokenVerifier {
        let codec =
            ClaimCodec::new(Arc::new(hs256("a")), Arc::new(ManualClock::new(NOW))).unwrap();
        TokenVerifier::new(codec)
    }

    fn token(verifier: &TokenVerifier, token_type: TokenType, scopes: Option<&[&str]>) -> String {
        let claims = ClaimSet {
            subject: "alice".into(),
            token_type,
            issued_at: NOW,
            expires_at: NOW + 60,
            not_before: None,
            scopes: scopes.map(|scopes| scopes.iter().map(|s| s.to_string()).collect()),
            issuer: None,
            audience: None,
            token_id: None,
            custom: Map::new(),
        };
        verifier.codec().encode(&claims).unwrap().into_inner()
    }

    #[test]
    fn test_scope_superset() {
        let verifier = verifier();
        let token = token(&verifier, TokenType::Access, Some(&["read", "write"]));

        assert!(verifier.verify::<&str>(&token, &[]).is_valid());
        assert!(verifier.verify(&token, &["read"]).is_valid());
        assert!(verifier.verify(&token, &["write", "read"]).is_valid());
        assert_eq!(
            verifier.verify(&token, &["read", "admin"]),
            ValidationOutcome::ScopeDenied
        );
        // Exact match only.
        assert_eq!(verifier.verify(&token, &["rea"]), ValidationOutcome::ScopeDenied);
    }

    #[test]
    fn test_absent_scope_claim_is_denied() {
        let verifier = verifier();
        let token = token(&verifier, TokenType::Access, None);

        assert!(verifier.verify::<&str>(&token, &[]).is_valid());
        assert_eq!(verifier.verify(&token, &["read"]), ValidationOutcome::ScopeDenied);
    }

    #[test]
    fn test_missing_invalid_expired_are_distinct() {
        let verifier = verifier();

        assert_eq!(
            verifier.verify_optional::<&str>(None, &[]),
            ValidationOutcome::MissingToken
        );
        assert_eq!(verifier.verify::<&str>("", &[]), ValidationOutcome::MissingToken);
        assert_eq!(
            verifier.verify::<&str>("not.a.token", &[]),
            ValidationOutcome::InvalidToken
        );

        let codec = ClaimCodec::new(Arc::new(hs256("a")), Arc::new(ManualClock::new(NOW + 60)))
            .unwrap();
        let late = TokenVerifier::new(codec);
        let token = token(&verifier, TokenType::Access, None);
        assert_eq!(late.verify::<&str>(&token, &[]), ValidationOutcome::ExpiredToken);
    }

    #[test]
    fn test_token_types_are_not_interchangeable() {
        let verifier = verifier();
        let access = token(&verifier, TokenType::Access, None);
        let refresh = token(&verifier, TokenType::Refresh, None);

        assert_eq!(
            verifier.verify::<&str>(&refresh, &[]),
            ValidationOutcome::InvalidToken
        );
        assert_eq!(verifier.verify_refresh(&access), ValidationOutcome::InvalidToken);
        assert!(verifier.verify_refresh(&refresh).is_valid());
    }

    #[test]
    fn test_custom_scope_validator() {
        struct AnyOf;

        impl ScopeValidator for AnyOf {
            fn is_satisfied(&self, granted: Option<&[String]>, required: &[&str]) -> bool {
                granted.is_some_and(|granted| {
                    required.iter().any(|scope| granted.iter().any(|g| g == scope))
                })
            }
        }

        let verifier = verifier().with_scope_validator(Arc::new(AnyOf));
        let token = token(&verifier, TokenType::Access, Some(&["read"]));

        assert!(verifier.verify(&token, &["read", "admin"]).is_valid());
        assert_eq!(verifier.verify(&token, &["admin"]), ValidationOutcome::ScopeDenied);
    }

    #[test]
    fn test_into_result() {
        assert!(matches!(
            ValidationOutcome::ScopeDenied.into_result(),
            Err(Error::ScopeDenied)
        ));
        assert!(matches!(
            ValidationOutcome::RefreshTokenNotImplemented.into_result(),
            Err(Error::RefreshTokenNotImplemented)
        ));
    }
}
