//! Composition root of the login and verification flows.
//!
//! [`Authentication`] is the seam integrators replace to alter a flow (for
//! example to add a second factor) while reusing the [`Components`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::issuer::TokenIssuer;
use crate::ports::{Authenticate, RetrieveUser};
use crate::refresh::{RefreshCoordinator, TokenPair};
use crate::subject::Subject;
use crate::transport::{RequestContext, extract_access_token, extract_refresh_token};
use crate::verifier::{TokenVerifier, ValidationOutcome};

/// Flows exposed by a mounted instance.
#[async_trait]
pub trait Authentication: Send + Sync {
    /// Authenticate the credentials of `request` and issue tokens.
    async fn login(&self, request: &RequestContext) -> Result<TokenPair>;

    /// Validate the access token carried by `request`.
    async fn verify_request(
        &self,
        request: &RequestContext,
        required_scopes: &[String],
    ) -> ValidationOutcome;

    /// Exchange the refresh token carried by `request` for a new pair.
    async fn refresh(&self, request: &RequestContext) -> Result<TokenPair>;

    /// Identity of the access token holder.
    async fn retrieve_user(&self, request: &RequestContext) -> Result<Option<Map<String, Value>>>;
}

/// Engine parts shared by every [`Authentication`] implementation.
#[derive(Debug, Clone)]
pub struct Components {
    pub config: Arc<Configuration>,
    pub issuer: TokenIssuer,
    pub verifier: TokenVerifier,
    pub refresh: RefreshCoordinator,
}

/// Default flows.
pub struct Authenticator {
    components: Components,
    authenticate: Arc<dyn Authenticate>,
    retriever: Option<Arc<dyn RetrieveUser>>,
}

impl Authenticator {
    pub fn new(
        components: Components,
        authenticate: Arc<dyn Authenticate>,
        retriever: Option<Arc<dyn RetrieveUser>>,
    ) -> Self {
        Self {
            components,
            authenticate,
            retriever,
        }
    }

    /// Subject to renew for: the stored user when a retriever exists.
    async fn renewal_subject(
        &self,
        request: &RequestContext,
        claims: &crate::claims::ClaimSet,
    ) -> Result<Box<dyn Subject>> {
        match &self.retriever {
            Some(retriever) => retriever
                .retrieve_user(request, claims)
                .await?
                .ok_or_else(|| {
                    tracing::debug!(
                        subject = %claims.subject,
                        "refresh token holder no longer exists"
                    );
                    Error::InvalidToken
                }),
            None => Ok(Box::new(self.components.refresh.minimal_subject(claims))),
        }
    }
}

#[async_trait]
impl Authentication for Authenticator {
    async fn login(&self, request: &RequestContext) -> Result<TokenPair> {
        let subject = self.authenticate.authenticate(request).await?;
        let Components {
            config,
            issuer,
            refresh,
            ..
        } = &self.components;

        let pair = if config.refresh_token_enabled() {
            refresh.grant(subject.as_ref()).await?
        } else {
            TokenPair {
                access_token: issuer.issue_access(subject.as_ref(), Map::new()).await?,
                refresh_token: None,
            }
        };

        tracing::info!(user_id = %issuer.subject_id(subject.as_ref())?, "user authenticated");
        Ok(pair)
    }

    async fn verify_request(
        &self,
        request: &RequestContext,
        required_scopes: &[String],
    ) -> ValidationOutcome {
        match extract_access_token(&self.components.config, request) {
            Ok(token) => self
                .components
                .verifier
                .verify_optional(token, required_scopes),
            Err(_) => ValidationOutcome::InvalidToken,
        }
    }

    async fn refresh(&self, request: &RequestContext) -> Result<TokenPair> {
        let refresh = &self.components.refresh;
        refresh.ensure_available()?;

        let presented = extract_refresh_token(&self.components.config, request)
            .ok_or(Error::MissingToken)?;
        let claims = refresh.check(presented)?;
        let subject = self.renewal_subject(request, &claims).await?;

        refresh.renew_for(presented, &claims, subject.as_ref()).await
    }

    async fn retrieve_user(&self, request: &RequestContext) -> Result<Option<Map<String, Value>>> {
        let retriever = self.retriever.as_ref().ok_or(Error::MeEndpointNotSetup)?;
        let claims = self.verify_request(request, &[]).await.into_result()?;

        Ok(retriever
            .retrieve_user(request, &claims)
            .await?
            .map(|subject| subject.to_map()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::ClaimSet;
    use crate::clock::ManualClock;
    use crate::codec::ClaimCodec;
    use crate::codec::tests::NOW;
    use crate::store::MemoryStore;
    use axum::http::{HeaderMap, HeaderValue, header};
    use serde_json::json;

    struct Passwords;

    #[async_trait]
    impl Authenticate for Passwords {
        async fn authenticate(&self, request: &RequestContext) -> Result<Box<dyn Subject>> {
            match (request.body_field("username"), request.body_field("password")) {
                (Some("alice"), Some("wonderland")) => {
                    Ok(Box::new(json!({ "user_id": "alice", "name": "Alice" })))
                },
                _ => Err(Error::AuthenticationFailed("bad credentials".into())),
            }
        }
    }

    struct Directory;

    #[async_trait]
    impl RetrieveUser for Directory {
        async fn retrieve_user(
            &self,
            _request: &RequestContext,
            claims: &ClaimSet,
        ) -> Result<Option<Box<dyn Subject>>> {
            let user = json!({ "user_id": "alice", "name": "Alice" });
            Ok((claims.subject == "alice").then(|| Box::new(user) as Box<dyn Subject>))
        }
    }

    fn authenticator(config: Configuration, retriever: bool) -> Authenticator {
        let config = Arc::new(config);
        let clock = Arc::new(ManualClock::new(NOW));
        let codec = ClaimCodec::new(config.clone(), clock.clone()).unwrap();
        let issuer = TokenIssuer::new(config.clone(), codec.clone(), clock);
        let verifier = TokenVerifier::new(codec);
        let refresh = RefreshCoordinator::new(
            config.clone(),
            issuer.clone(),
            verifier.clone(),
            Some(Arc::new(MemoryStore::new())),
        );

        Authenticator::new(
            Components {
                config,
                issuer,
                verifier,
                refresh,
            },
            Arc::new(Passwords),
            retriever.then(|| Arc::new(Directory) as Arc<dyn RetrieveUser>),
        )
    }

    fn credentials(password: &str) -> RequestContext {
        RequestContext::new(
            HeaderMap::new(),
            Some(json!({ "username": "alice", "password": password })),
        )
    }

    fn bearer(token: &str) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        RequestContext::new(headers, None)
    }

    fn refresh_body(token: &str) -> RequestContext {
        RequestContext::new(HeaderMap::new(), Some(json!({ "refresh_token": token })))
    }

    #[tokio::test]
    async fn test_login_failure_is_propagated() {
        let config = Configuration::builder().set("secret", "a").build().unwrap();
        let auth = authenticator(config, false);

        let err = auth.login(&credentials("nope")).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(reason) if reason == "bad credentials"));
    }

    #[tokio::test]
    async fn test_login_without_refresh() {
        let config = Configuration::builder().set("secret", "a").build().unwrap();
        let auth = authenticator(config, false);

        let pair = auth.login(&credentials("wonderland")).await.unwrap();
        assert!(pair.refresh_token.is_none());

        let outcome = auth.verify_request(&bearer(pair.access_token.as_str()), &[]).await;
        assert_eq!(outcome.claims().map(|c| c.subject.as_str()), Some("alice"));
    }

    #[tokio::test]
    async fn test_verify_request_outcomes() {
        let config = Configuration::builder().set("secret", "a").build().unwrap();
        let auth = authenticator(config, false);

        assert_eq!(
            auth.verify_request(&RequestContext::default(), &[]).await,
            ValidationOutcome::MissingToken
        );
        assert_eq!(
            auth.verify_request(&bearer("garbage"), &[]).await,
            ValidationOutcome::InvalidToken
        );

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic YWxpY2U6cHc="));
        assert_eq!(
            auth.verify_request(&RequestContext::new(headers, None), &[]).await,
            ValidationOutcome::InvalidToken
        );
    }

    #[tokio::test]
    async fn test_refresh_flow() {
        let auth = authenticator(
            Configuration::builder()
                .set("secret", "a")
                .set("refresh_token_enabled", true)
                .build()
                .unwrap(),
            true,
        );

        let pair = auth.login(&credentials("wonderland")).await.unwrap();
        let refresh = pair.refresh_token.unwrap();

        let renewed = auth.refresh(&refresh_body(refresh.as_str())).await.unwrap();
        assert!(
            auth.verify_request(&bearer(renewed.access_token.as_str()), &[])
                .await
                .is_valid()
        );

        assert!(matches!(
            auth.refresh(&refresh_body(refresh.as_str())).await,
            Err(Error::InvalidToken)
        ));
        assert!(matches!(
            auth.refresh(&RequestContext::default()).await,
            Err(Error::MissingToken)
        ));
    }

    #[tokio::test]
    async fn test_refresh_disabled() {
        let config = Configuration::builder().set("secret", "a").build().unwrap();
        let auth = authenticator(config, false);
        assert!(matches!(
            auth.refresh(&refresh_body("a.b.c")).await,
            Err(Error::RefreshDisabled)
        ));
    }

    #[tokio::test]
    async fn test_retrieve_user() {
        let config = || Configuration::builder().set("secret", "a").build().unwrap();

        let without = authenticator(config(), false);
        let pair = without.login(&credentials("wonderland")).await.unwrap();
        assert!(matches!(
            without.retrieve_user(&bearer(pair.access_token.as_str())).await,
            Err(Error::MeEndpointNotSetup)
        ));

        let with = authenticator(config(), true);
        let me = with
            .retrieve_user(&bearer(pair.access_token.as_str()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(me["name"], "Alice");

        assert!(matches!(
            with.retrieve_user(&RequestContext::default()).await,
            Err(Error::MissingToken)
        ));
    }
}
