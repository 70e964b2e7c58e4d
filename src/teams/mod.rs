pub mod routing;

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{record, AuditEntry};
use crate::core::cache::{TAG_TEAMS, TAG_TICKETS};
use crate::core::shared::enums::{AuditAction, EntityKind, TicketStatus};
use crate::core::shared::error::{ApiError, ApiResult};
use crate::core::shared::models::{normalize_tags, Team, TeamMember, Ticket, User};
use crate::core::shared::schema::{team_members, teams, tickets, users};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_blocking;
use crate::security::auth_api::{require_lead, require_staff, AuthenticatedUser};
use crate::tickets::load_visible_ticket;
use crate::tickets::query::{sort_tickets, SortCriterion, SortDirection, SortField};

use self::routing::{route_teams, TeamMatch};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSummary {
    #[serde(flatten)]
    pub team: Team,
    pub member_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamDetail {
    #[serde(flatten)]
    pub team: Team,
    pub members: Vec<User>,
}

#[derive(Debug, Deserialize)]
pub struct TeamIdRequest {
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTeamRequest {
    pub id: Uuid,
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct MembershipRequest {
    pub team_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MembershipResponse {
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub changed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TeamTicketsRequest {
    pub team_id: Uuid,
    #[serde(default)]
    pub include_closed: bool,
}

#[derive(Debug, Deserialize)]
pub struct RouteTicketRequest {
    pub ticket_id: Uuid,
}

fn validate_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 200 {
        return Err(ApiError::bad_request("Team name must be between 1 and 200 characters"));
    }
    Ok(name.to_string())
}

fn load_team(conn: &mut PgConnection, id: Uuid) -> Result<Team, ApiError> {
    teams::table
        .find(id)
        .select(Team::as_select())
        .first::<Team>(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Team"))
}

pub async fn list_teams(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> ApiResult<Json<Vec<TeamSummary>>> {
    require_staff(&user)?;
    let pool = state.conn.clone();

    let summaries = state
        .query_cache
        .get_or_load("team.list", &(), &[TAG_TEAMS], || async move {
            run_blocking(&pool, |conn| {
                let rows = teams::table
                    .select(Team::as_select())
                    .order(teams::name.asc())
                    .load::<Team>(conn)?;
                let counts: HashMap<Uuid, i64> = team_members::table
                    .group_by(team_members::team_id)
                    .select((team_members::team_id, count_star()))
                    .load::<(Uuid, i64)>(conn)?
                    .into_iter()
                    .collect();
                Ok(rows
                    .into_iter()
                    .map(|team| TeamSummary {
                        member_count: counts.get(&team.id).copied().unwrap_or(0),
                        team,
                    })
                    .collect::<Vec<_>>())
            })
            .await
        })
        .await?;

    Ok(Json(summaries))
}

pub async fn get_team(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<TeamIdRequest>,
) -> ApiResult<Json<TeamDetail>> {
    require_staff(&user)?;

    let detail = run_blocking(&state.conn, move |conn| {
        let team = load_team(conn, req.id)?;
        let members = team_members::table
            .inner_join(users::table)
            .filter(team_members::team_id.eq(team.id))
            .select(User::as_select())
            .order(users::email.asc())
            .load::<User>(conn)?;
        Ok(TeamDetail { team, members })
    })
    .await?;

    Ok(Json(detail))
}

pub async fn create_team(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateTeamRequest>,
) -> ApiResult<Json<Team>> {
    require_lead(&user)?;
    let now = Utc::now();
    let team = Team {
        id: Uuid::new_v4(),
        name: validate_name(&req.name)?,
        tags: normalize_tags(&req.tags),
        created_at: now,
        updated_at: now,
    };

    let team = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            diesel::insert_into(teams::table).values(&team).execute(conn)?;
            record(
                conn,
                AuditEntry::new(AuditAction::Create, EntityKind::Team, team.id)
                    .by(user.user_id)
                    .with_after(&team),
            )?;
            Ok(team)
        })
    })
    .await?;

    info!("Team {} ({}) created", team.name, team.id);
    state.invalidate(&[TAG_TEAMS]).await;
    Ok(Json(team))
}

pub async fn update_team(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<UpdateTeamRequest>,
) -> ApiResult<Json<Team>> {
    require_lead(&user)?;
    let name = req.name.as_deref().map(validate_name).transpose()?;
    let tags = req.tags.as_ref().map(|t| normalize_tags(t));

    let team = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let before = load_team(conn, req.id)?;
            let mut after = before.clone();
            if let Some(name) = name {
                after.name = name;
            }
            if let Some(tags) = tags {
                after.tags = tags;
            }
            after.updated_at = Utc::now();

            diesel::update(teams::table.find(after.id))
                .set((
                    teams::name.eq(&after.name),
                    teams::tags.eq(&after.tags),
                    teams::updated_at.eq(after.updated_at),
                ))
                .execute(conn)?;
            record(
                conn,
                AuditEntry::new(AuditAction::Update, EntityKind::Team, after.id)
                    .by(user.user_id)
                    .with_before(&before)
                    .with_after(&after),
            )?;
            Ok(after)
        })
    })
    .await?;

    state.invalidate(&[TAG_TEAMS]).await;
    Ok(Json(team))
}

pub async fn delete_team(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<TeamIdRequest>,
) -> ApiResult<Json<Team>> {
    require_lead(&user)?;

    let team = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let team = load_team(conn, req.id)?;
            diesel::delete(team_members::table.filter(team_members::team_id.eq(team.id)))
                .execute(conn)?;
            diesel::delete(teams::table.find(team.id)).execute(conn)?;
            record(
                conn,
                AuditEntry::new(AuditAction::Delete, EntityKind::Team, team.id)
                    .by(user.user_id)
                    .with_before(&team),
            )?;
            Ok(team)
        })
    })
    .await?;

    info!("Team {} deleted", team.id);
    state.invalidate(&[TAG_TEAMS]).await;
    Ok(Json(team))
}

pub async fn add_member(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<MembershipRequest>,
) -> ApiResult<Json<MembershipResponse>> {
    require_lead(&user)?;

    let response = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            load_team(conn, req.team_id)?;
            let member = users::table
                .find(req.user_id)
                .select(User::as_select())
                .first::<User>(conn)
                .optional()?
                .ok_or_else(|| ApiError::not_found("User"))?;
            if !member.role().is_staff() {
                return Err(ApiError::bad_request("Only staff can join a team"));
            }

            let membership = TeamMember {
                team_id: req.team_id,
                user_id: req.user_id,
                created_at: Utc::now(),
            };
            let inserted = diesel::insert_into(team_members::table)
                .values(&membership)
                .on_conflict_do_nothing()
                .execute(conn)?;

            if inserted > 0 {
                record(
                    conn,
                    AuditEntry::new(AuditAction::MemberAdd, EntityKind::Team, req.team_id)
                        .by(user.user_id)
                        .with_after(&membership),
                )?;
            }
            Ok(MembershipResponse {
                team_id: req.team_id,
                user_id: req.user_id,
                changed: inserted > 0,
            })
        })
    })
    .await?;

    if response.changed {
        state.invalidate(&[TAG_TEAMS]).await;
    }
    Ok(Json(response))
}

pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<MembershipRequest>,
) -> ApiResult<Json<MembershipResponse>> {
    require_lead(&user)?;

    let response = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let removed = diesel::delete(
                team_members::table
                    .filter(team_members::team_id.eq(req.team_id))
                    .filter(team_members::user_id.eq(req.user_id)),
            )
            .execute(conn)?;

            if removed > 0 {
                record(
                    conn,
                    AuditEntry::new(AuditAction::MemberRemove, EntityKind::Team, req.team_id)
                        .by(user.user_id)
                        .with_before(&serde_json::json!({"user_id": req.user_id})),
                )?;
            }
            Ok(MembershipResponse {
                team_id: req.team_id,
                user_id: req.user_id,
                changed: removed > 0,
            })
        })
    })
    .await?;

    if response.changed {
        state.invalidate(&[TAG_TEAMS]).await;
    }
    Ok(Json(response))
}

pub async fn team_tickets(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<TeamTicketsRequest>,
) -> ApiResult<Json<Vec<Ticket>>> {
    require_staff(&user)?;
    let pool = state.conn.clone();
    let (team_id, include_closed) = (req.team_id, req.include_closed);

    let rows = state
        .query_cache
        .get_or_load(
            "team.tickets",
            &req,
            &[TAG_TEAMS, TAG_TICKETS],
            || async move {
                run_blocking(&pool, move |conn| {
                    let team = load_team(conn, team_id)?;
                    if team.tags.is_empty() {
                        return Ok(Vec::new());
                    }
                    let mut q = tickets::table
                        .select(Ticket::as_select())
                        .filter(tickets::tags.overlaps_with(team.tags))
                        .into_boxed();
                    if !include_closed {
                        q = q.filter(tickets::status.ne_all(vec![
                            TicketStatus::Resolved.as_str(),
                            TicketStatus::Closed.as_str(),
                        ]));
                    }
                    let mut rows = q.order(tickets::created_at.desc()).load::<Ticket>(conn)?;
                    sort_tickets(
                        &mut rows,
                        &[
                            SortCriterion::new(SortField::Priority, SortDirection::Desc),
                            SortCriterion::new(SortField::UpdatedAt, SortDirection::Desc),
                        ],
                        user.user_id,
                    );
                    Ok(rows)
                })
                .await
            },
        )
        .await?;

    Ok(Json(rows))
}

pub async fn route_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<RouteTicketRequest>,
) -> ApiResult<Json<Vec<TeamMatch>>> {
    require_staff(&user)?;

    let matches = run_blocking(&state.conn, move |conn| {
        let ticket = load_visible_ticket(conn, &user, req.ticket_id)?;
        let all_teams = teams::table
            .select(Team::as_select())
            .load::<Team>(conn)?;
        Ok(route_teams(&ticket.tags, &all_teams))
    })
    .await?;

    Ok(Json(matches))
}

pub fn configure_teams_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rpc/team.list", post(list_teams))
        .route("/rpc/team.get", post(get_team))
        .route("/rpc/team.create", post(create_team))
        .route("/rpc/team.update", post(update_team))
        .route("/rpc/team.delete", post(delete_team))
        .route("/rpc/team.addMember", post(add_member))
        .route("/rpc/team.removeMember", post(remove_member))
        .route("/rpc/team.tickets", post(team_tickets))
        .route("/rpc/team.route", post(route_ticket))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_name_validation() {
        assert_eq!(validate_name("  Billing Squad ").unwrap(), "Billing Squad");
        assert!(validate_name("").is_err());
        assert!(validate_name(&"n".repeat(201)).is_err());
    }

    #[test]
    fn test_summary_flattens_team() {
        let now = Utc::now();
        let summary = TeamSummary {
            team: Team {
                id: Uuid::new_v4(),
                name: "Payments".to_string(),
                tags: vec!["billing".to_string()],
                created_at: now,
                updated_at: now,
            },
            member_count: 3,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["name"], "Payments");
        assert_eq!(json["member_count"], 3);
    }
}
