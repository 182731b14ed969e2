use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::headers::authorization::Bearer;
use axum::headers::Authorization;
use axum::http::request::Parts;
use axum::TypedHeader;
use stackyn_common::{Error, ErrorKind, Id};

use crate::ApiState;

/// Resolves "the calling user" from a bearer token, grounded on
/// `auth/src/user.rs`'s `Key`/`FromRequestParts` pattern. Full OTP/JWT
/// issuance is out of scope; the bearer token carried here is the
/// caller's opaque [`Id`] directly rather than a resolved session, since
/// account issuance has no endpoint in this surface.
#[derive(Clone, Copy, Debug)]
pub struct AuthUser {
    pub user_id: Id,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    ApiState: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| Error::new(ErrorKind::Unauthorized, "missing bearer token"))?;

        let user_id: Id = bearer
            .token()
            .trim()
            .parse()
            .map_err(|_| Error::new(ErrorKind::Unauthorized, "malformed bearer token"))?;

        let ApiState { pool, .. } = ApiState::from_ref(state);
        let (exists,): (bool,) = sqlx::query_as("SELECT exists(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&pool)
            .await?;
        if !exists {
            return Err(Error::new(ErrorKind::Unauthorized, "unknown bearer token"));
        }

        Ok(AuthUser { user_id })
    }
}
