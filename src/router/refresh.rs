//! Exchange a refresh token for a new pair.

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
    let pair = auth.refresh(&request).await?;

    super::tokens_response(&auth, pair)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode, header};
    use serde_json::json;

    use crate::router::tests::{base, body, login, mount};
    use crate::*;

    #[tokio::test]
    async fn test_refresh_handler_rotates() {
        let (auth, clock) = mount(base());
        let tokens = login(&auth).await;
        let refresh = tokens["refresh_token"].as_str().unwrap().to_owned();

        clock.advance(1800);
        let response = make_request(
            app(&auth),
            Method::POST,
            "/auth/refresh",
            &[],
            json!({ "refresh_token": refresh }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let renewed = body(response).await;
        assert!(
            auth.verify(renewed["access_token"].as_str().unwrap(), &["user"])
                .is_valid()
        );
        assert_ne!(renewed["refresh_token"], refresh.as_str());

        // Replay of the superseded token.
        let response = make_request(
            app(&auth),
            Method::POST,
            "/auth/refresh",
            &[],
            json!({ "refresh_token": refresh }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_from_cookie() {
        let (auth, _) = mount(base().set("cookie_set", true));
        let pair = auth
            .components()
            .refresh
            .grant(&json!({ "user_id": "alice" }))
            .await
            .unwrap();

        let response = make_request(
            app(&auth),
            Method::POST,
            "/auth/refresh",
            &[(
                header::COOKIE,
                format!("refresh_token={}", pair.refresh_token.unwrap()),
            )],
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[tokio::test]
    async fn test_refresh_missing_token() {
        let (auth, _) = mount(base());

        let response =
            make_request(app(&auth), Method::POST, "/auth/refresh", &[], String::new()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
