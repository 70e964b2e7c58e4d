use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{record, AuditEntry};
use crate::core::cache::{TAG_TEAMS, TAG_TICKETS, TAG_USERS};
use crate::core::shared::enums::{AuditAction, EntityKind, UserRole};
use crate::core::shared::error::{ApiError, ApiResult};
use crate::core::shared::models::User;
use crate::core::shared::schema::{team_members, tickets, users};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{clamp_limit, run_blocking};
use crate::security::auth_api::{require_admin, require_staff, AuthenticatedUser};

const MAX_NAME_CHARS: usize = 200;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListUsersRequest {
    pub role: Option<UserRole>,
    pub search: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UserIdRequest {
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub id: Uuid,
    pub role: UserRole,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: String,
}

fn load_user(conn: &mut PgConnection, id: Uuid) -> Result<User, ApiError> {
    users::table
        .find(id)
        .select(User::as_select())
        .first::<User>(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("User"))
}

/// Admins manage roles, but never their own.
pub fn check_role_change(actor: &AuthenticatedUser, target: Uuid) -> Result<(), ApiError> {
    require_admin(actor)?;
    if actor.user_id == target {
        return Err(ApiError::forbidden("You cannot change your own role"));
    }
    Ok(())
}

/// Strips staff-only links from a user who is no longer staff: open
/// assignments are cleared and team memberships removed, each with an
/// audit row. Returns `(tickets_unassigned, teams_left)`.
fn release_staff_links(
    conn: &mut PgConnection,
    actor: Uuid,
    user_id: Uuid,
) -> Result<(usize, usize), ApiError> {
    let now = Utc::now();
    let unassigned = diesel::update(tickets::table.filter(tickets::assignee_id.eq(user_id)))
        .set((
            tickets::assignee_id.eq(None::<Uuid>),
            tickets::updated_at.eq(now),
        ))
        .returning(tickets::id)
        .get_results::<Uuid>(conn)?;
    for ticket_id in &unassigned {
        record(
            conn,
            AuditEntry::new(AuditAction::Assign, EntityKind::Ticket, *ticket_id)
                .by(actor)
                .with_before(&serde_json::json!({"assignee_id": user_id}))
                .with_after(&serde_json::json!({"assignee_id": null})),
        )?;
    }

    let left = diesel::delete(team_members::table.filter(team_members::user_id.eq(user_id)))
        .returning(team_members::team_id)
        .get_results::<Uuid>(conn)?;
    for team_id in &left {
        record(
            conn,
            AuditEntry::new(AuditAction::MemberRemove, EntityKind::Team, *team_id)
                .by(actor)
                .with_before(&serde_json::json!({"user_id": user_id})),
        )?;
    }

    Ok((unassigned.len(), left.len()))
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> ApiResult<Json<User>> {
    let row = run_blocking(&state.conn, move |conn| load_user(conn, user.user_id)).await?;
    Ok(Json(row))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<ListUsersRequest>,
) -> ApiResult<Json<Vec<User>>> {
    require_staff(&user)?;

    let pool = state.conn.clone();
    let role = req.role.map(|r| r.as_str().to_string());
    let search = req
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")));
    let limit = clamp_limit(req.limit);

    let rows = state
        .query_cache
        .get_or_load("user.list", &req, &[TAG_USERS], || async move {
            run_blocking(&pool, move |conn| {
                let mut q = users::table.select(User::as_select()).into_boxed();
                if let Some(role) = role {
                    q = q.filter(users::role.eq(role));
                }
                if let Some(pattern) = search {
                    q = q.filter(
                        users::email
                            .ilike(pattern.clone())
                            .or(users::name.ilike(pattern)),
                    );
                }
                Ok(q
                    .order((users::name.asc(), users::email.asc()))
                    .limit(limit)
                    .load::<User>(conn)?)
            })
            .await
        })
        .await?;

    Ok(Json(rows))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<UserIdRequest>,
) -> ApiResult<Json<User>> {
    if !user.is_staff() && user.user_id != req.id {
        return Err(ApiError::not_found("User"));
    }
    let row = run_blocking(&state.conn, move |conn| load_user(conn, req.id)).await?;
    Ok(Json(row))
}

pub async fn update_role(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<UpdateRoleRequest>,
) -> ApiResult<Json<User>> {
    check_role_change(&user, req.id)?;

    let (updated, (unassigned, teams_left)) = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let before = load_user(conn, req.id)?;
            let after = diesel::update(users::table.find(req.id))
                .set((
                    users::role.eq(req.role.as_str()),
                    users::updated_at.eq(Utc::now()),
                ))
                .returning(User::as_returning())
                .get_result::<User>(conn)?;
            record(
                conn,
                AuditEntry::new(AuditAction::RoleChange, EntityKind::User, req.id)
                    .by(user.user_id)
                    .with_before(&serde_json::json!({"role": before.role}))
                    .with_after(&serde_json::json!({"role": after.role})),
            )?;
            let released = if req.role.is_staff() {
                (0, 0)
            } else {
                release_staff_links(conn, user.user_id, req.id)?
            };
            Ok((after, released))
        })
    })
    .await?;

    info!("User {} is now {}", updated.id, updated.role);
    if unassigned > 0 || teams_left > 0 {
        info!(
            "Released {} assignments and {} team memberships of {}",
            unassigned, teams_left, updated.id
        );
    }
    // Role changes alter ticket visibility.
    state.invalidate(&[TAG_USERS, TAG_TICKETS, TAG_TEAMS]).await;
    Ok(Json(updated))
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<User>> {
    let name = req.name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
        return Err(ApiError::bad_request(format!(
            "Name must be between 1 and {MAX_NAME_CHARS} characters"
        )));
    }

    let updated = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let before = load_user(conn, user.user_id)?;
            let after = diesel::update(users::table.find(user.user_id))
                .set((users::name.eq(Some(name)), users::updated_at.eq(Utc::now())))
                .returning(User::as_returning())
                .get_result::<User>(conn)?;
            record(
                conn,
                AuditEntry::new(AuditAction::Update, EntityKind::User, user.user_id)
                    .by(user.user_id)
                    .with_before(&serde_json::json!({"name": before.name}))
                    .with_after(&serde_json::json!({"name": after.name})),
            )?;
            Ok(after)
        })
    })
    .await?;

    state.invalidate(&[TAG_USERS]).await;
    Ok(Json(updated))
}

pub fn configure_users_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rpc/user.me", post(me))
        .route("/rpc/user.list", post(list_users))
        .route("/rpc/user.get", post(get_user))
        .route("/rpc/user.updateRole", post(update_role))
        .route("/rpc/user.updateProfile", post(update_profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_admins_change_roles() {
        let target = Uuid::new_v4();
        let admin = AuthenticatedUser::new(Uuid::new_v4(), "a@example.test", UserRole::Admin);
        let manager = AuthenticatedUser::new(Uuid::new_v4(), "m@example.test", UserRole::Manager);

        assert!(check_role_change(&admin, target).is_ok());
        assert!(check_role_change(&manager, target).is_err());
    }

    #[test]
    fn test_admin_cannot_demote_self() {
        let admin = AuthenticatedUser::new(Uuid::new_v4(), "a@example.test", UserRole::Admin);
        let err = check_role_change(&admin, admin.user_id).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn test_role_request_rejects_unknown_roles() {
        let ok: Result<UpdateRoleRequest, _> = serde_json::from_value(
            serde_json::json!({"id": Uuid::new_v4(), "role": "MANAGER"}),
        );
        assert!(ok.is_ok());
        let bad: Result<UpdateRoleRequest, _> = serde_json::from_value(
            serde_json::json!({"id": Uuid::new_v4(), "role": "OWNER"}),
        );
        assert!(bad.is_err());
    }
}
