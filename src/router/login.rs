//! Authenticate credentials and hand out tokens.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;

use crate::Auth;
use crate::error::Result;
use crate::transport::RequestContext;

pub async fn handler(
    State(auth): State<Auth>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let request = RequestContext::from_parts(headers, &body)?;
    let pair = auth.login(&request).await?;

    super::tokens_response(&auth, pair)
}
