//! Error handler for gatekey.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the engine and by integrator callbacks.
///
/// Token rejections carry no detail on purpose: the reason is logged at
/// `debug` level where it is detected, never returned.
#[derive(Debug, Error)]
pub enum Error {
    /// Raised by the `authenticate` callback; propagated untouched.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    ExpiredToken,
    #[error("missing token")]
    MissingToken,
    #[error("insufficient scopes")]
    ScopeDenied,

    #[error("refresh tokens are enabled but no refresh token store is configured")]
    RefreshTokenNotImplemented,
    #[error("scopes are enabled but no scope provider is configured")]
    ScopesNotImplemented,
    #[error("no user retriever is configured")]
    MeEndpointNotSetup,
    #[error("refresh tokens are disabled")]
    RefreshDisabled,

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("subject has no usable `{key}` identifier")]
    InvalidSubject { key: String },
    #[error("claim `{0}` is reserved")]
    ReservedClaim(String),

    #[error("error parsing request body")]
    ParsingBody(#[from] serde_json::Error),

    #[error("internal error")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap any foreign error, typically raised inside a callback.
    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(err))
    }
}

/// Turn foreign results into [`Error::Internal`].
pub trait ToInternal<T> {
    fn catch(self) -> Result<T>;
}

impl<T, E> ToInternal<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn catch(self) -> Result<T> {
        self.map_err(Error::internal)
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/problem+json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let unauthorized = ResponseError::default()
            .title("Missing or invalid credentials.")
            .details(&self.to_string())
            .status(StatusCode::UNAUTHORIZED);

        let response = match &self {
            Error::AuthenticationFailed(_) => unauthorized
                .title("Authentication failed.")
                .details("credentials were rejected"),

            Error::InvalidToken | Error::ExpiredToken | Error::MissingToken => {
                unauthorized
            },

            Error::ScopeDenied => unauthorized
                .title("Insufficient scopes.")
                .status(StatusCode::FORBIDDEN),

            Error::ParsingBody(err) => ResponseError::default()
                .title("Server error during data parsing.")
                .details(&err.to_string())
                .status(StatusCode::BAD_REQUEST),

            Error::RefreshDisabled => ResponseError::default()
                .title("Refresh tokens are disabled.")
                .status(StatusCode::NOT_FOUND),

            err => {
                tracing::error!(error = %err, "server returned 500 status");

                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/problem+json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
