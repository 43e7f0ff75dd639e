//! Gatekey is a pluggable token authentication engine.
//!
//! It authenticates credentials once through an integrator callback, then
//! issues and verifies signed access and refresh tokens, checks scopes and
//! carries tokens in a header or in cookies.
//!
//! Each [`Auth`] instance owns its own [`Configuration`]. The signing secret
//! (or key pair) is the trust boundary: instances sharing it accept each
//! other's tokens, instances with different secrets never do.

#![forbid(unsafe_code)]

pub mod claims;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod facade;
pub mod issuer;
pub mod ports;
pub mod refresh;
mod router;
pub mod store;
pub mod subject;
pub mod telemetry;
pub mod transport;
pub mod verifier;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::http::{StatusCode, header};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};

pub use claims::{ClaimSet, TokenType};
pub use clock::{Clock, SystemClock};
pub use codec::{Algorithm, ClaimCodec, SignedToken};
pub use config::{ConfigError, Configuration};
pub use error::{Error, Result};
pub use facade::{Authentication, Authenticator, Components};
pub use issuer::TokenIssuer;
pub use ports::{Authenticate, PayloadExtender, RefreshTokenStore, RetrieveUser, ScopeProvider};
pub use refresh::{RefreshCoordinator, RefreshStatus, TokenPair};
pub use store::MemoryStore;
pub use subject::Subject;
pub use transport::RequestContext;
pub use verifier::{ScopeValidator, SupersetScopes, TokenVerifier, ValidationOutcome};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: axum::http::Method,
    path: &str,
    headers: &[(header::HeaderName, String)],
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        request = request.header(name, value);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

type AuthenticationFactory = Box<dyn FnOnce(&Components) -> Arc<dyn Authentication>>;

/// A mounted authentication instance.
#[derive(Clone)]
pub struct Auth {
    components: Components,
    authentication: Arc<dyn Authentication>,
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("components", &self.components)
            .finish_non_exhaustive()
    }
}

impl Auth {
    pub fn builder(config: Configuration) -> AuthBuilder {
        AuthBuilder::new(config)
    }

    pub fn config(&self) -> &Configuration {
        &self.components.config
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    pub fn authentication(&self) -> &Arc<dyn Authentication> {
        &self.authentication
    }

    pub async fn login(&self, request: &RequestContext) -> Result<TokenPair> {
        self.authentication.login(request).await
    }

    pub async fn verify_request(
        &self,
        request: &RequestContext,
        required_scopes: &[String],
    ) -> ValidationOutcome {
        self.authentication
            .verify_request(request, required_scopes)
            .await
    }

    pub async fn refresh(&self, request: &RequestContext) -> Result<TokenPair> {
        self.authentication.refresh(request).await
    }

    /// Validate an already extracted access token.
    pub fn verify<S: AsRef<str>>(&self, token: &str, required_scopes: &[S]) -> ValidationOutcome {
        self.components.verifier.verify(token, required_scopes)
    }

    /// Endpoints of this instance under its URL prefix, without middleware.
    pub fn routes(&self) -> Router {
        router::routes(self.clone())
    }
}

/// Collects callbacks before mounting an [`Auth`].
pub struct AuthBuilder {
    config: Configuration,
    clock: Arc<dyn Clock>,
    authenticate: Option<Arc<dyn Authenticate>>,
    retrieve_user: Option<Arc<dyn RetrieveUser>>,
    refresh_store: Option<Arc<dyn RefreshTokenStore>>,
    scope_provider: Option<Arc<dyn ScopeProvider>>,
    payload_extender: Option<Arc<dyn PayloadExtender>>,
    scope_validator: Option<Arc<dyn ScopeValidator>>,
    authentication: Option<AuthenticationFactory>,
}

impl AuthBuilder {
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            authenticate: None,
            retrieve_user: None,
            refresh_store: None,
            scope_provider: None,
            payload_extender: None,
            scope_validator: None,
            authentication: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn authenticate(mut self, authenticate: Arc<dyn Authenticate>) -> Self {
        self.authenticate = Some(authenticate);
        self
    }

    pub fn retrieve_user(mut self, retrieve_user: Arc<dyn RetrieveUser>) -> Self {
        self.retrieve_user = Some(retrieve_user);
        self
    }

    pub fn refresh_store(mut self, store: Arc<dyn RefreshTokenStore>) -> Self {
        self.refresh_store = Some(store);
        self
    }

    pub fn scope_provider(mut self, provider: Arc<dyn ScopeProvider>) -> Self {
        self.scope_provider = Some(provider);
        self
    }

    pub fn payload_extender(mut self, extender: Arc<dyn PayloadExtender>) -> Self {
        self.payload_extender = Some(extender);
        self
    }

    pub fn scope_validator(mut self, validator: Arc<dyn ScopeValidator>) -> Self {
        self.scope_validator = Some(validator);
        self
    }

    /// Replace the default [`Authenticator`] with a custom implementation.
    pub fn authentication<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&Components) -> Arc<dyn Authentication> + 'static,
    {
        self.authentication = Some(Box::new(factory));
        self
    }

    /// Load keys, wire components and check callbacks.
    ///
    /// A missing refresh store or scope provider is only logged here; using
    /// the feature fails later with a dedicated error.
    pub fn build(self) -> std::result::Result<Auth, ConfigError> {
        let config = Arc::new(self.config);
        let codec = ClaimCodec::new(config.clone(), self.clock.clone())?;
        if !codec.can_sign() {
            tracing::info!(
                algorithm = %codec.algorithm(),
                "no private key, instance can only verify tokens"
            );
        }

        let mut issuer = TokenIssuer::new(config.clone(), codec.clone(), self.clock);
        if let Some(provider) = self.scope_provider {
            issuer = issuer.with_scope_provider(provider);
        }
        if let Some(extender) = self.payload_extender {
            issuer = issuer.with_payload_extender(extender);
        }

        let mut verifier = TokenVerifier::new(codec);
        if let Some(validator) = self.scope_validator {
            verifier = verifier.with_scope_validator(validator);
        }

        if config.refresh_token_enabled() && self.refresh_store.is_none() {
            tracing::warn!("refresh tokens are enabled without a refresh token store");
        }
        if config.scopes_enabled() && !issuer.has_scope_provider() {
            tracing::warn!("scopes are enabled without a scope provider");
        }

        let refresh = RefreshCoordinator::new(
            config.clone(),
            issuer.clone(),
            verifier.clone(),
            self.refresh_store,
        );
        let components = Components {
            config,
            issuer,
            verifier,
            refresh,
        };

        let authentication = match self.authentication {
            Some(factory) => factory(&components),
            None => Arc::new(Authenticator::new(
                components.clone(),
                self.authenticate
                    .ok_or(ConfigError::MissingCallback("authenticate"))?,
                self.retrieve_user,
            )),
        };

        Ok(Auth {
            components,
            authentication,
        })
    }
}

/// Create router with tracing, timeout and metrics middleware.
pub fn app(auth: &Auth) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(
                        size_bytes = chunk.len(),
                        latency = ?latency,
                        "sending body chunk"
                    )
                })
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(true)
                        .level(tracing::Level::INFO),
                )
                .on_request(DefaultOnRequest::new())
                .on_response(
                    DefaultOnResponse::new()
                        .include_headers(true)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]));

    auth.routes()
        .route_layer(axum::middleware::from_fn(telemetry::track))
        .layer(middleware)
}
