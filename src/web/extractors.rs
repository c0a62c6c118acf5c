//! Request extractors
//!
//! The session layer fronting this service authenticates callers and
//! forwards the resolved user id in the `X-User-Id` header.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

pub struct UserId(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .map(UserId)
            .ok_or((
                StatusCode::UNAUTHORIZED,
                "missing or invalid X-User-Id header",
            ))
    }
}
