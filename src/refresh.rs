//! Refresh token grant, rotation and revocation.
//!
//! Per subject the lifecycle is `NoRefreshIssued -> RefreshIssued`, then
//! either renewed (a new token supersedes the old one) or revoked. Revocation
//! only blocks future renewals: access tokens already issued stay valid until
//! they expire.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::claims::{ClaimSet, TokenType};
use crate::codec::SignedToken;
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::issuer::{TokenIssuer, count_issued};
use crate::ports::RefreshTokenStore;
use crate::subject::Subject;
use crate::verifier::TokenVerifier;

/// Stored in place of a token once a subject is revoked.
const REVOKED: &str = "";

/// Tokens handed out together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: SignedToken,
    pub refresh_token: Option<SignedToken>,
}

/// Logical refresh state of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    NoRefreshIssued,
    RefreshIssued,
    Revoked,
}

/// Drives refresh tokens through the integrator store.
#[derive(Clone)]
pub struct RefreshCoordinator {
    config: Arc<Configuration>,
    issuer: TokenIssuer,
    verifier: TokenVerifier,
    store: Option<Arc<dyn RefreshTokenStore>>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("enabled", &self.config.refresh_token_enabled())
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        config: Arc<Configuration>,
        issuer: TokenIssuer,
        verifier: TokenVerifier,
        store: Option<Arc<dyn RefreshTokenStore>>,
    ) -> Self {
        Self {
            config,
            issuer,
            verifier,
            store,
        }
    }

    /// Store to use, or why refresh cannot be used.
    ///
    /// A missing store is only reported here, at first use.
    pub fn ensure_available(&self) -> Result<&dyn RefreshTokenStore> {
        if !self.config.refresh_token_enabled() {
            return Err(Error::RefreshDisabled);
        }

        self.store
            .as_deref()
            .ok_or(Error::RefreshTokenNotImplemented)
    }

    /// Issue an access and refresh token pair and record the refresh token.
    pub async fn grant(&self, subject: &dyn Subject) -> Result<TokenPair> {
        let store = self.ensure_available()?;
        let user_id = self.issuer.subject_id(subject)?;

        let access_token = self.issuer.issue_access(subject, Map::new()).await?;
        let refresh_token = self.issuer.issue_refresh(subject)?;
        store.store(&user_id, refresh_token.as_str()).await?;

        tracing::info!(%user_id, "refresh token granted");

        Ok(TokenPair {
            access_token,
            refresh_token: Some(refresh_token),
        })
    }

    /// Validate a presented refresh token without consuming it.
    pub fn check(&self, presented: &str) -> Result<ClaimSet> {
        self.ensure_available()?;
        self.verifier.verify_refresh(presented).into_result()
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The new access token is built from a subject holding only the
    /// identifier; use [`RefreshCoordinator::renew_for`] to provide a richer one.
    pub async fn renew(&self, presented: &str) -> Result<TokenPair> {
        let claims = self.check(presented)?;
        let subject = self.minimal_subject(&claims);

        self.renew_for(presented, &claims, &subject).await
    }

    /// Exchange a refresh token already checked with [`RefreshCoordinator::check`].
    ///
    /// Scopes and payload extensions are resolved again for `subject`.
    pub async fn renew_for(
        &self,
        presented: &str,
        claims: &ClaimSet,
        subject: &dyn Subject,
    ) -> Result<TokenPair> {
        let store = self.ensure_available()?;

        if self.issuer.subject_id(subject)? != claims.subject {
            tracing::debug!(subject = %claims.subject, "renewal subject does not match token");
            return Err(Error::InvalidToken);
        }

        // Nothing is resolved or counted for a token that loses the rotation.
        let refresh_token = self.issuer.mint_refresh(subject)?;
        if !store
            .rotate(&claims.subject, presented, refresh_token.as_str())
            .await?
        {
            tracing::warn!(
                user_id = %claims.subject,
                "superseded or revoked refresh token presented"
            );
            return Err(Error::InvalidToken);
        }
        count_issued(TokenType::Refresh);

        tracing::info!(user_id = %claims.subject, "refresh token renewed");
        let access_token = self.issuer.issue_access(subject, Map::new()).await?;

        Ok(TokenPair {
            access_token,
            refresh_token: Some(refresh_token),
        })
    }

    /// Block further renewals for `user_id`.
    pub async fn revoke(&self, user_id: &str) -> Result<()> {
        let store = self.ensure_available()?;
        store.store(user_id, REVOKED).await?;

        tracing::info!(%user_id, "refresh token revoked");
        Ok(())
    }

    pub async fn status(&self, user_id: &str) -> Result<RefreshStatus> {
        let store = self.ensure_available()?;

        Ok(match store.retrieve(user_id).await?.as_deref() {
            None => RefreshStatus::NoRefreshIssued,
            Some(REVOKED) => RefreshStatus::Revoked,
            Some(_) => RefreshStatus::RefreshIssued,
        })
    }

    /// Subject holding only the identifier of `claims`.
    pub(crate) fn minimal_subject(&self, claims: &ClaimSet) -> Map<String, Value> {
        Map::from_iter([(
            self.config.user_id().to_owned(),
            Value::String(claims.subject.clone()),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::ClaimCodec;
    use crate::codec::tests::NOW;
    use crate::ports::ScopeProvider;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Setup {
        clock: Arc<ManualClock>,
        verifier: TokenVerifier,
        coordinator: RefreshCoordinator,
        store: MemoryStore,
    }

    fn setup(config: Configuration, with_store: bool) -> Setup {
        let config = Arc::new(config);
        let clock = Arc::new(ManualClock::new(NOW));
        let codec = ClaimCodec::new(config.clone(), clock.clone()).unwrap();
        let issuer = TokenIssuer::new(config.clone(), codec.clone(), clock.clone());
        let verifier = TokenVerifier::new(codec);
        let store = MemoryStore::new();
        let coordinator = RefreshCoordinator::new(
            config,
            issuer,
            verifier.clone(),
            with_store.then(|| Arc::new(store.clone()) as Arc<dyn RefreshTokenStore>),
        );

        Setup {
            clock,
            verifier,
            coordinator,
            store,
        }
    }

    fn enabled() -> Configuration {
        Configuration::builder()
            .set("secret", "a")
            .set("refresh_token_enabled", true)
            .build()
            .unwrap()
    }

    fn alice() -> Value {
        json!({ "user_id": "alice" })
    }

    #[tokio::test]
    async fn test_grant_stores_refresh_token() {
        let setup = setup(enabled(), true);
        assert_eq!(
            setup.coordinator.status("alice").await.unwrap(),
            RefreshStatus::NoRefreshIssued
        );

        let pair = setup.coordinator.grant(&alice()).await.unwrap();
        let refresh = pair.refresh_token.unwrap();

        assert!(setup.verifier.verify::<&str>(pair.access_token.as_str(), &[]).is_valid());
        assert_eq!(
            setup.store.retrieve("alice").await.unwrap().as_deref(),
            Some(refresh.as_str())
        );
        assert_eq!(
            setup.coordinator.status("alice").await.unwrap(),
            RefreshStatus::RefreshIssued
        );
    }

    #[tokio::test]
    async fn test_not_configured() {
        let setup = setup(enabled(), false);

        assert!(matches!(
            setup.coordinator.grant(&alice()).await,
            Err(Error::RefreshTokenNotImplemented)
        ));
        assert!(matches!(
            setup.coordinator.renew("a.b.c").await,
            Err(Error::RefreshTokenNotImplemented)
        ));
    }

    #[tokio::test]
    async fn test_disabled() {
        let setup = setup(Configuration::builder().set("secret", "a").build().unwrap(), true);

        assert!(matches!(
            setup.coordinator.grant(&alice()).await,
            Err(Error::RefreshDisabled)
        ));
    }

    #[tokio::test]
    async fn test_renewal_rejects_replay() {
        let setup = setup(enabled(), true);
        let first = setup.coordinator.grant(&alice()).await.unwrap();
        let r1 = first.refresh_token.unwrap();

        setup.clock.advance(10);
        let second = setup.coordinator.renew(r1.as_str()).await.unwrap();
        let r2 = second.refresh_token.unwrap();
        assert_ne!(r1, r2);
        assert!(setup.verifier.verify::<&str>(second.access_token.as_str(), &[]).is_valid());

        assert!(matches!(
            setup.coordinator.renew(r1.as_str()).await,
            Err(Error::InvalidToken)
        ));
        // Failed replay did not rotate.
        assert_eq!(
            setup.store.retrieve("alice").await.unwrap().as_deref(),
            Some(r2.as_str())
        );
        assert!(setup.coordinator.renew(r2.as_str()).await.is_ok());
    }

    #[tokio::test]
    async fn test_renewal_requires_refresh_type() {
        let setup = setup(enabled(), true);
        let pair = setup.coordinator.grant(&alice()).await.unwrap();

        assert!(matches!(
            setup.coordinator.renew(pair.access_token.as_str()).await,
            Err(Error::InvalidToken)
        ));
        assert!(matches!(setup.coordinator.renew("").await, Err(Error::MissingToken)));
    }

    #[tokio::test]
    async fn test_expired_refresh_token() {
        let setup = setup(enabled(), true);
        let pair = setup.coordinator.grant(&alice()).await.unwrap();

        setup.clock.advance(2_592_000);
        assert!(matches!(
            setup
                .coordinator
                .renew(pair.refresh_token.unwrap().as_str())
                .await,
            Err(Error::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_revoke() {
        let setup = setup(enabled(), true);
        let pair = setup.coordinator.grant(&alice()).await.unwrap();

        setup.coordinator.revoke("alice").await.unwrap();
        assert_eq!(
            setup.coordinator.status("alice").await.unwrap(),
            RefreshStatus::Revoked
        );
        assert!(matches!(
            setup
                .coordinator
                .renew(pair.refresh_token.unwrap().as_str())
                .await,
            Err(Error::InvalidToken)
        ));
        // Already issued access tokens are untouched.
        assert!(setup.verifier.verify::<&str>(pair.access_token.as_str(), &[]).is_valid());
    }

    #[tokio::test]
    async fn test_renewal_resolves_scopes_again() {
        struct Counting(AtomicUsize);

        #[async_trait]
        impl ScopeProvider for Counting {
            async fn scopes(&self, _subject: &dyn Subject) -> Result<Vec<String>> {
                let calls = self.0.fetch_add(1, Ordering::SeqCst);
                Ok(vec![format!("v{calls}")])
            }
        }

        let config = Arc::new(
            Configuration::builder()
                .set("secret", "a")
                .set("refresh_token_enabled", true)
                .set("scopes_enabled", true)
                .build()
                .unwrap(),
        );
        let clock = Arc::new(ManualClock::new(NOW));
        let codec = ClaimCodec::new(config.clone(), clock.clone()).unwrap();
        let scopes = Arc::new(Counting(AtomicUsize::new(0)));
        let issuer = TokenIssuer::new(config.clone(), codec.clone(), clock)
            .with_scope_provider(scopes.clone());
        let verifier = TokenVerifier::new(codec);
        let coordinator = RefreshCoordinator::new(
            config,
            issuer,
            verifier.clone(),
            Some(Arc::new(MemoryStore::new())),
        );

        let pair = coordinator.grant(&alice()).await.unwrap();
        assert!(verifier.verify(pair.access_token.as_str(), &["v0"]).is_valid());

        let refresh = pair.refresh_token.unwrap();
        let renewed = coordinator.renew(refresh.as_str()).await.unwrap();
        assert!(verifier.verify(renewed.access_token.as_str(), &["v1"]).is_valid());
        assert!(!verifier.verify(renewed.access_token.as_str(), &["v0"]).is_valid());

        // A replayed token loses the rotation before scopes are resolved.
        assert!(matches!(
            coordinator.renew(refresh.as_str()).await,
            Err(Error::InvalidToken)
        ));
        assert_eq!(scopes.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_renew_for_other_subject() {
        let setup = setup(enabled(), true);
        let pair = setup.coordinator.grant(&alice()).await.unwrap();
        let refresh = pair.refresh_token.unwrap();

        let claims = setup.coordinator.check(refresh.as_str()).unwrap();
        assert!(matches!(
            setup
                .coordinator
                .renew_for(refresh.as_str(), &claims, &json!({ "user_id": "bob" }))
                .await,
            Err(Error::InvalidToken)
        ));
    }
}
