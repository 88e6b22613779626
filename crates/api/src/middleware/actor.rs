//! Caller identity taken from request headers.
//!
//! Authentication happens upstream; the gateway forwards who the caller is
//! in `x-actor-id`, `x-actor-name` and `x-actor-roles` (comma-separated).

use axum::http::{HeaderMap, request::Parts};
use axum::extract::FromRequestParts;

use flowgate_core::workflow::Actor;
use flowgate_shared::AppError;
use flowgate_shared::types::UserId;

use crate::error::ApiError;

/// Header carrying the caller's user ID.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
/// Header carrying the caller's display name.
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";
/// Header carrying the caller's roles.
pub const ACTOR_ROLES_HEADER: &str = "x-actor-roles";

/// Extractor for the acting user.
///
/// ```ignore
/// async fn handler(ActorIdentity(actor): ActorIdentity) -> impl IntoResponse {
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ActorIdentity(pub Actor);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| AppError::Unauthorized(format!("{name} is not valid text")))
        })
        .transpose()
}

impl ActorIdentity {
    /// Builds the actor from request headers.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let raw_id = header(headers, ACTOR_ID_HEADER)?
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Unauthorized(format!("{ACTOR_ID_HEADER} header is required")))?;
        let id: UserId = raw_id
            .parse()
            .map_err(|_| AppError::Unauthorized(format!("{ACTOR_ID_HEADER} must be a UUID")))?;

        let name = header(headers, ACTOR_NAME_HEADER)?
            .filter(|s| !s.is_empty())
            .map_or_else(|| id.to_string(), str::to_string);
        let roles = header(headers, ACTOR_ROLES_HEADER)?
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_lowercase);

        Ok(Self(Actor::new(id, name).with_roles(roles)))
    }
}

impl<S> FromRequestParts<S> for ActorIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers)?)
    }
}
