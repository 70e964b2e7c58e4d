use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use diesel::prelude::*;
use log::{debug, info};
use std::sync::Arc;

use super::{
    error::AuthError,
    types::AuthenticatedUser,
    utils::{extract_bearer_token, is_jwt_format},
};
use crate::core::shared::enums::UserRole;
use crate::core::shared::error::ApiError;
use crate::core::shared::models::User;
use crate::core::shared::schema::users;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_blocking;

/// Resolves the bearer token into `VerifiedClaims` and, once provisioned,
/// an `AuthenticatedUser`, both stored in request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let anonymous = state.auth.is_anonymous_allowed(&path);

    let claims = match extract_bearer_token(request.headers(), &state.auth.bearer_prefix) {
        Some(token) if is_jwt_format(token) => state.auth.decode_token(token),
        Some(_) => Err(AuthError::InvalidToken),
        None => Err(AuthError::MissingToken),
    };

    let claims = match claims {
        Ok(claims) => claims,
        Err(e) if anonymous => {
            debug!("Anonymous access to {path} ({e})");
            return next.run(request).await;
        }
        Err(e) => {
            info!("Rejected {} {path}: {e}", request.method());
            return e.into_response();
        }
    };

    request.extensions_mut().insert(claims.clone());

    let user_id = claims.user_id;
    let user = run_blocking(&state.conn, move |conn| {
        users::table
            .find(user_id)
            .select(User::as_select())
            .first::<User>(conn)
            .optional()
            .map_err(ApiError::from)
    })
    .await;

    match user {
        Ok(Some(user)) => {
            request
                .extensions_mut()
                .insert(AuthenticatedUser::from(&user));
        }
        Ok(None) => {
            if !anonymous && !state.auth.is_provisioning_path(&path) {
                return AuthError::UserNotProvisioned.into_response();
            }
        }
        Err(e) if anonymous => {
            debug!("User lookup failed on anonymous path {path}: {e}");
        }
        Err(e) => return e.into_response(),
    }

    next.run(request).await
}

pub fn require_role(user: &AuthenticatedUser, roles: &[UserRole]) -> Result<(), ApiError> {
    if user.has_role(roles) {
        Ok(())
    } else {
        Err(AuthError::InsufficientRole.into())
    }
}

pub fn require_staff(user: &AuthenticatedUser) -> Result<(), ApiError> {
    require_role(user, &UserRole::STAFF)
}

pub fn require_lead(user: &AuthenticatedUser) -> Result<(), ApiError> {
    require_role(user, &UserRole::LEADS)
}

pub fn require_admin(user: &AuthenticatedUser) -> Result<(), ApiError> {
    require_role(user, &[UserRole::Admin])
}
