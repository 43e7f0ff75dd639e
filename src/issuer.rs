//! Access and refresh token minting.

use std::sync::Arc;

use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::{Map, Value};

use crate::claims::{ClaimSet, TokenType};
use crate::clock::Clock;
use crate::codec::{ClaimCodec, SignedToken};
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::ports::{PayloadExtender, ScopeProvider};
use crate::subject::Subject;

const TOKEN_ID_LENGTH: usize = 16;

/// Builds claim sets from subjects and signs them.
#[derive(Clone)]
pub struct TokenIssuer {
    config: Arc<Configuration>,
    codec: ClaimCodec,
    clock: Arc<dyn Clock>,
    scopes: Option<Arc<dyn ScopeProvider>>,
    extender: Option<Arc<dyn PayloadExtender>>,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("codec", &self.codec)
            .field("scopes", &self.scopes.is_some())
            .field("extender", &self.extender.is_some())
            .finish()
    }
}

impl TokenIssuer {
    pub fn new(config: Arc<Configuration>, codec: ClaimCodec, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            codec,
            clock,
            scopes: None,
            extender: None,
        }
    }

    pub fn with_scope_provider(mut self, provider: Arc<dyn ScopeProvider>) -> Self {
        self.scopes = Some(provider);
        self
    }

    pub fn with_payload_extender(mut self, extender: Arc<dyn PayloadExtender>) -> Self {
        self.extender = Some(extender);
        self
    }

    pub fn has_scope_provider(&self) -> bool {
        self.scopes.is_some()
    }

    /// Identifier of `subject` under the configured key.
    pub fn subject_id(&self, subject: &dyn Subject) -> Result<String> {
        subject
            .identifier(self.config.user_id())
            .ok_or_else(|| Error::InvalidSubject {
                key: self.config.user_id().to_owned(),
            })
    }

    /// Mint an access token for `subject`.
    ///
    /// `extra_claims` are merged last and win over payload extensions.
    pub async fn issue_access(
        &self,
        subject: &dyn Subject,
        extra_claims: Map<String, Value>,
    ) -> Result<SignedToken> {
        let subject_id = self.subject_id(subject)?;

        let scopes = if self.config.scopes_enabled() {
            let provider = self.scopes.as_ref().ok_or(Error::ScopesNotImplemented)?;
            Some(provider.scopes(subject).await?)
        } else {
            None
        };

        let mut custom = match &self.extender {
            Some(extender) => extender.extend(subject).await?,
            None => Map::new(),
        };
        custom.extend(extra_claims);

        let claims = self.build_claims(subject_id, TokenType::Access, scopes, custom)?;
        let token = self.codec.encode(&claims)?;
        count_issued(TokenType::Access);
        Ok(token)
    }

    /// Mint a refresh token for `subject`. Refresh tokens never carry scopes.
    pub fn issue_refresh(&self, subject: &dyn Subject) -> Result<SignedToken> {
        let token = self.mint_refresh(subject)?;
        count_issued(TokenType::Refresh);
        Ok(token)
    }

    /// Signed refresh token, not counted as issued until handed out.
    pub(crate) fn mint_refresh(&self, subject: &dyn Subject) -> Result<SignedToken> {
        if !self.config.refresh_token_enabled() {
            return Err(Error::RefreshDisabled);
        }

        let subject_id = self.subject_id(subject)?;
        let claims = self.build_claims(subject_id, TokenType::Refresh, None, Map::new())?;
        self.codec.encode(&claims)
    }

    /// Compute standard claims from the clock and the profile.
    pub fn build_claims(
        &self,
        subject: String,
        token_type: TokenType,
        scopes: Option<Vec<String>>,
        custom: Map<String, Value>,
    ) -> Result<ClaimSet> {
        if let Some(key) = custom.keys().find(|key| ClaimSet::is_reserved(key, &self.config)) {
            return Err(Error::ReservedClaim(key.clone()));
        }

        let now = self.clock.now();
        let lifetime = match token_type {
            TokenType::Access => self.config.expiration_delta(),
            TokenType::Refresh => self.config.refresh_token_expiration_delta(),
        };

        Ok(ClaimSet {
            subject,
            token_type,
            issued_at: now,
            expires_at: now.saturating_add(lifetime),
            not_before: self
                .config
                .claim_nbf_delta()
                .map(|delta| now.saturating_add(delta)),
            scopes,
            issuer: self.config.claim_iss().map(str::to_owned),
            audience: self.config.claim_aud().map(str::to_owned),
            token_id: Some(token_id()),
            custom,
        })
    }

}

pub(crate) fn count_issued(token_type: TokenType) {
    metrics::counter!("gatekey_tokens_issued_total", "type" => token_type.as_str()).increment(1);
}

fn token_id() -> String {
    let mut bytes = [0u8; TOKEN_ID_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
