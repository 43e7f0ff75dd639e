//! HTTP endpoints of a mounted instance.

pub mod jwks;
pub mod login;
pub mod me;
pub mod refresh;
pub mod verify;

use axum::Json;
use axum::Router;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Map, Value};

use crate::Auth;
use crate::config::Transport;
use crate::error::Result;
use crate::refresh::TokenPair;
use crate::transport::set_cookie;

/// Routes under `url_prefix`. Refresh and JWKS are only mounted when usable.
pub fn routes(auth: Auth) -> Router {
    let config = auth.config();

    let mut routes = Router::new()
        .route(config.path_to_authenticate(), post(login::handler))
        .route(config.path_to_verify(), get(verify::handler))
        .route(config.path_to_retrieve_user(), get(me::handler));

    if config.refresh_token_enabled() {
        routes = routes.route(config.path_to_refresh(), post(refresh::handler));
    }
    if auth.components().verifier.codec().jwks().is_some() {
        routes = routes.route(config.path_to_jwks(), get(jwks::handler));
    }

    let prefix = config.url_prefix().to_owned();
    let routes = routes.with_state(auth);

    if prefix == "/" {
        routes
    } else {
        Router::new().nest(&prefix, routes)
    }
}

/// Hand tokens out as a JSON body, or as cookies in cookie mode.
fn tokens_response(auth: &Auth, pair: TokenPair) -> Result<Response> {
    let config = auth.config();

    if config.transport() == Transport::Cookie {
        let mut cookies = vec![set_cookie(
            config,
            config.cookie_access_token_name(),
            pair.access_token.as_str(),
            config.expiration_delta(),
        )?];
        if let Some(refresh_token) = &pair.refresh_token {
            cookies.push(set_cookie(
                config,
                config.cookie_refresh_token_name(),
                refresh_token.as_str(),
                config.refresh_token_expiration_delta(),
            )?);
        }

        let mut response = Json(serde_json::json!({ "authenticated": true })).into_response();
        for cookie in cookies {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        return Ok(response);
    }

    let mut body = Map::new();
    body.insert(
        config.access_token_name().to_owned(),
        Value::String(pair.access_token.into_inner()),
    );
    if let Some(refresh_token) = pair.refresh_token {
        body.insert(
            config.refresh_token_name().to_owned(),
            Value::String(refresh_token.into_inner()),
        );
    }

    Ok(Json(Value::Object(body)).into_response())
}
