use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use super::claims::AccessClaims;
use super::cookies::{read_cookie, ACCESS_COOKIE};
use super::jwt::{JwtKeys, TokenError};
use crate::error::AppError;

/// Validated access-token claims of the caller.
///
/// Reads `Authorization: Bearer <token>`, falling back to the `accessToken`
/// cookie when the header is absent. Any failure rejects the request with 401
/// before the handler runs.
#[derive(Debug, Clone)]
pub struct AuthUser(pub AccessClaims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = match parts.headers.get(AUTHORIZATION) {
            Some(value) => {
                let value = value
                    .to_str()
                    .map_err(|_| AppError::unauthorized("Unauthorized: Invalid Authorization header"))?;
                value
                    .strip_prefix("Bearer ")
                    .or_else(|| value.strip_prefix("bearer "))
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| AppError::unauthorized("Unauthorized: Invalid auth scheme"))?
            }
            None => read_cookie(&parts.headers, ACCESS_COOKIE)
                .ok_or_else(|| AppError::unauthorized("Unauthorized: No token provided"))?,
        };

        let keys = JwtKeys::from_ref(state);
        match keys.verify_access(&token) {
            Ok(claims) => Ok(AuthUser(claims)),
            Err(TokenError::Expired) => {
                warn!("expired access token");
                Err(AppError::unauthorized("Unauthorized: Token expired"))
            }
            Err(e) => {
                warn!(error = %e, "invalid access token");
                Err(AppError::unauthorized("Unauthorized: Invalid token"))
            }
        }
    }
}
