use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::Serialize;
use std::sync::Arc;

use super::types::VerifiedClaims;
use crate::core::cache::TAG_USERS;
use crate::core::shared::enums::UserRole;
use crate::core::shared::error::{ApiError, ApiResult};
use crate::core::shared::models::User;
use crate::core::shared::schema::users;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_blocking;

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub user: User,
    pub created: bool,
}

/// Creates the local user row for a freshly signed-up identity. Repeated calls
/// return the existing row.
pub async fn bootstrap_user(
    State(state): State<Arc<AppState>>,
    claims: VerifiedClaims,
) -> ApiResult<Json<BootstrapResponse>> {
    let email = claims
        .email
        .clone()
        .ok_or_else(|| ApiError::bad_request("Token carries no email claim"))?;

    let response = run_blocking(&state.conn, move |conn| {
        let now = Utc::now();
        let new_user = User {
            id: claims.user_id,
            email,
            name: claims.name.clone(),
            role: UserRole::Customer.as_str().to_string(),
            test_batch_id: None,
            test_expires_at: None,
            created_at: now,
            updated_at: now,
        };

        let inserted = diesel::insert_into(users::table)
            .values(&new_user)
            .on_conflict(users::id)
            .do_nothing()
            .execute(conn)?;

        let user = users::table
            .find(claims.user_id)
            .select(User::as_select())
            .first::<User>(conn)?;

        Ok(BootstrapResponse {
            user,
            created: inserted == 1,
        })
    })
    .await?;

    if response.created {
        info!("Provisioned user {} ({})", response.user.id, response.user.email);
        state.query_cache.invalidate_tag(TAG_USERS).await;
    }

    Ok(Json(response))
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/auth/bootstrap", post(bootstrap_user))
}
