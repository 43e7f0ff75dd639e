//! Based on JWK (RFC 7517 <https://datatracker.ietf.org/doc/html/rfc7517>).

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::Value;

use crate::Auth;

pub async fn handler(State(auth): State<Auth>) -> Result<Json<Value>, StatusCode> {
    auth.components()
        .verifier
        .codec()
        .jwks()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
