//! Check the presented access token.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::Auth;
use crate::transport::RequestContext;
use crate::verifier::ValidationOutcome;

#[derive(Debug, Default, Deserialize)]
pub struct Params {
    /// Comma separated scopes the token must carry.
    scopes: Option<String>,
}

pub async fn handler(
    State(auth): State<Auth>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let required: Vec<String> = params
        .scopes
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|scope| !scope.is_empty())
        .map(str::to_owned)
        .collect();

    let request = RequestContext::new(headers, None);
    let outcome = auth.verify_request(&request, &required).await;

    let status = match outcome {
        ValidationOutcome::Valid(_) => return (StatusCode::OK, Json(json!({ "valid": true }))),
        ValidationOutcome::ScopeDenied => StatusCode::FORBIDDEN,
        ValidationOutcome::RefreshTokenNotImplemented => StatusCode::INTERNAL_SERVER_ERROR,
        ValidationOutcome::ExpiredToken
        | ValidationOutcome::InvalidToken
        | ValidationOutcome::MissingToken => StatusCode::UNAUTHORIZED,
    };

    (
        status,
        Json(json!({ "valid": false, "reason": outcome.as_str() })),
    )
}
