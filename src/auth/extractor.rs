use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use uuid::Uuid;

use crate::auth::token::AccessClaims;
use crate::error::{AppError, AuthError};
use crate::AppState;

/// Caller identity taken from a valid `Authorization: Bearer` access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub claims: AccessClaims,
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn authenticate(req: &HttpRequest) -> Result<AuthenticatedUser, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| AppError::InternalError("application state not configured".into()))?;
    let token = bearer_token(req).ok_or(AuthError::Unauthorized)?;

    let claims = state.auth_service.authenticate(token)?;
    let user_id = claims.user_id()?;
    Ok(AuthenticatedUser { user_id, claims })
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}
