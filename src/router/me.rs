//! Identity of the access token holder.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde_json::{Value, json};

use crate::Auth;
use crate::error::Result;
use crate::transport::RequestContext;

pub async fn handler(State(auth): State<Auth>, headers: HeaderMap) -> Result<Json<Value>> {
    let request = RequestContext::new(headers, None);
    let me = auth.authentication().retrieve_user(&request).await?;

    Ok(Json(json!({ "me": me })))
}
