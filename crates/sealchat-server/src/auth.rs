//! The authenticated principal.
//!
//! Session management lives in front of this server; by the time a request
//! arrives here the user id has been placed in `X-User-Id`.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use sealchat_shared::constants::USER_ID_HEADER;
use sealchat_shared::types::UserId;

use crate::error::ServerError;

/// Extractor for the calling user. Rejects with 401 when absent.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        principal(&parts.headers)
            .map(AuthUser)
            .ok_or(ServerError::Unauthenticated)
    }
}

pub fn principal(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
