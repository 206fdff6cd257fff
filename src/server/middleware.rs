// ABOUTME: Authentication middleware for the API and the streaming endpoints.
// ABOUTME: Tokens are compared in constant time.

use super::{error_body, AppContext};
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Admin auth: `Authorization: Bearer <token>` must equal the configured
/// admin token.
pub async fn auth(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let Some(header) = header else {
        return error_body(StatusCode::UNAUTHORIZED, "missing authorization header").into_response();
    };

    let Some(token) = header.strip_prefix("Bearer ") else {
        return error_body(StatusCode::UNAUTHORIZED, "invalid authorization format").into_response();
    };

    if !tokens_match(token, &ctx.config.auth.token) {
        return error_body(StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }

    next.run(request).await
}

#[derive(Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Streaming auth: the Bearer header still works, but browsers cannot set
/// headers on WebSocket requests, so `?token=` is accepted too: matching
/// either the admin token or the read-only stream token.
pub async fn stream_auth(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<TokenQuery>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(header) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            if tokens_match(token, &ctx.config.auth.token) {
                return next.run(request).await;
            }
        }
    }

    if let Some(ref token) = query.token {
        if tokens_match(token, &ctx.config.auth.token)
            || tokens_match(token, &ctx.config.auth.stream_token)
        {
            return next.run(request).await;
        }
    }

    error_body(StatusCode::UNAUTHORIZED, "invalid or missing token").into_response()
}

/// Constant-time equality. An unconfigured (empty) expected token never
/// matches; length is not treated as secret.
fn tokens_match(provided: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_expected_token_never_matches() {
        assert!(!tokens_match("", ""));
        assert!(!tokens_match("anything", ""));
    }

    #[test]
    fn exact_match_only() {
        assert!(tokens_match("secret", "secret"));
        assert!(!tokens_match("secret2", "secret"));
        assert!(!tokens_match("secre", "secret"));
    }
}
