pub mod query;

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{record, AuditEntry};
use crate::core::cache::{messages_tag, TAG_MARKETPLACE, TAG_TICKETS};
use crate::core::shared::enums::{
    AuditAction, EntityKind, MarketplaceStatus, TicketPriority, TicketStatus, UserRole,
};
use crate::core::shared::error::{ApiError, ApiResult};
use crate::core::shared::models::{normalize_tags, Ticket, User};
use crate::core::shared::schema::{marketplace_conversations, messages, tickets, users};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{clamp_limit, run_blocking};
use crate::security::auth_api::{require_lead, require_staff, AuthenticatedUser};

use self::query::{
    compute_stats, filter_sort_paginate, SortCriterion, TagFilter, TicketPage, TicketStats,
};

pub const MAX_TITLE_CHARS: usize = 300;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketFilter {
    #[serde(default)]
    pub status: Vec<TicketStatus>,
    #[serde(default)]
    pub priority: Vec<TicketPriority>,
    pub assignee_id: Option<Uuid>,
    #[serde(default)]
    pub unassigned: bool,
    pub search: Option<String>,
    #[serde(default, flatten)]
    pub tags: TagFilter,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTicketsRequest {
    #[serde(default)]
    pub filter: TicketFilter,
    #[serde(default)]
    pub sort: Vec<SortCriterion>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TicketIdRequest {
    pub id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TicketPriority>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub customer_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTicketRequest {
    pub id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AssignTicketRequest {
    pub id: Uuid,
    pub assignee_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub id: Uuid,
    pub status: TicketStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteTicketResponse {
    pub id: Uuid,
    pub deleted_messages: usize,
}

/// Fields for a new ticket, already validated and normalized.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub title: String,
    pub description: Option<String>,
    pub priority: TicketPriority,
    pub tags: Vec<String>,
    pub customer_id: Option<Uuid>,
}

pub fn validate_title(title: &str) -> Result<String, ApiError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("Title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::bad_request(format!(
            "Title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

fn clean_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

/// Customers see tickets they are the customer or creator of. Staff see all.
pub fn can_view(user: &AuthenticatedUser, ticket: &Ticket) -> bool {
    user.is_staff() || ticket.is_owned_by(user.user_id)
}

/// Loads a ticket the caller may see. Invisible tickets are reported as missing.
pub fn load_visible_ticket(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    id: Uuid,
) -> Result<Ticket, ApiError> {
    let ticket = tickets::table
        .find(id)
        .select(Ticket::as_select())
        .first::<Ticket>(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Ticket"))?;
    if can_view(user, &ticket) {
        Ok(ticket)
    } else {
        Err(ApiError::not_found("Ticket"))
    }
}

/// Inserts a ticket created by `actor` and writes its CREATE audit row.
/// Call inside a transaction.
pub fn insert_ticket(
    conn: &mut PgConnection,
    actor: &AuthenticatedUser,
    input: NewTicket,
) -> Result<Ticket, ApiError> {
    let now = Utc::now();
    let ticket = Ticket {
        id: Uuid::new_v4(),
        title: input.title,
        description: input.description,
        status: TicketStatus::Open.as_str().to_string(),
        priority: input.priority.as_str().to_string(),
        customer_id: input.customer_id,
        assignee_id: None,
        created_by: actor.user_id,
        tags: input.tags,
        test_batch_id: None,
        test_expires_at: None,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(tickets::table)
        .values(&ticket)
        .execute(conn)?;

    record(
        conn,
        AuditEntry::new(AuditAction::Create, EntityKind::Ticket, ticket.id)
            .by(actor.user_id)
            .with_after(&ticket),
    )?;

    Ok(ticket)
}

fn write_ticket(conn: &mut PgConnection, ticket: &Ticket) -> Result<(), ApiError> {
    diesel::update(tickets::table.find(ticket.id))
        .set((
            tickets::title.eq(&ticket.title),
            tickets::description.eq(&ticket.description),
            tickets::status.eq(&ticket.status),
            tickets::priority.eq(&ticket.priority),
            tickets::assignee_id.eq(ticket.assignee_id),
            tickets::tags.eq(&ticket.tags),
            tickets::updated_at.eq(ticket.updated_at),
        ))
        .execute(conn)?;
    Ok(())
}

fn load_visible_rows(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    filter: &TicketFilter,
) -> Result<Vec<Ticket>, ApiError> {
    let mut q = tickets::table.select(Ticket::as_select()).into_boxed();

    if !user.is_staff() {
        q = q.filter(
            tickets::customer_id
                .eq(user.user_id)
                .or(tickets::created_by.eq(user.user_id)),
        );
    }

    if !filter.status.is_empty() {
        let statuses: Vec<&str> = filter.status.iter().map(|s| s.as_str()).collect();
        q = q.filter(tickets::status.eq_any(statuses));
    }

    if !filter.priority.is_empty() {
        let priorities: Vec<&str> = filter.priority.iter().map(|p| p.as_str()).collect();
        q = q.filter(tickets::priority.eq_any(priorities));
    }

    if let Some(assignee_id) = filter.assignee_id {
        q = q.filter(tickets::assignee_id.eq(assignee_id));
    } else if filter.unassigned {
        q = q.filter(tickets::assignee_id.is_null());
    }

    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.replace('%', "\\%").replace('_', "\\_"));
        q = q.filter(
            tickets::title
                .ilike(pattern.clone())
                .or(tickets::description.ilike(pattern)),
        );
    }

    Ok(q.order(tickets::created_at.desc()).load::<Ticket>(conn)?)
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<ListTicketsRequest>,
) -> ApiResult<Json<TicketPage>> {
    let pool = state.conn.clone();
    let key = (user.user_id, user.role, &req);
    let me = user.user_id;
    let filter = req.filter.clone();
    let tag_filter = req.filter.tags.clone();
    let sort = req.sort.clone();
    let limit = clamp_limit(req.limit);
    let offset = req.offset.unwrap_or(0).max(0);

    let page = state
        .query_cache
        .get_or_load("ticket.list", &key, &[TAG_TICKETS], || async move {
            let rows =
                run_blocking(&pool, move |conn| load_visible_rows(conn, &user, &filter)).await?;
            Ok(filter_sort_paginate(rows, &tag_filter, &sort, me, limit, offset))
        })
        .await?;

    Ok(Json(page))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<TicketIdRequest>,
) -> ApiResult<Json<Ticket>> {
    let ticket = run_blocking(&state.conn, move |conn| load_visible_ticket(conn, &user, req.id)).await?;
    Ok(Json(ticket))
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateTicketRequest>,
) -> ApiResult<Json<Ticket>> {
    let customer_id = if user.is_staff() {
        req.customer_id
    } else {
        Some(user.user_id)
    };
    let input = NewTicket {
        title: validate_title(&req.title)?,
        description: clean_description(req.description),
        priority: req.priority.unwrap_or_default(),
        tags: normalize_tags(&req.tags),
        customer_id,
    };

    let actor = user.clone();
    let ticket = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| insert_ticket(conn, &actor, input))
    })
    .await?;

    info!("Ticket {} created by {}", ticket.id, user.user_id);
    state.invalidate(&[TAG_TICKETS]).await;
    Ok(Json(ticket))
}

/// Applies an update request to `ticket` in place, enforcing who may change what.
pub fn apply_update(
    user: &AuthenticatedUser,
    ticket: &mut Ticket,
    req: UpdateTicketRequest,
) -> Result<(), ApiError> {
    if !user.is_staff() {
        if !ticket.is_owned_by(user.user_id) {
            return Err(ApiError::not_found("Ticket"));
        }
        if req.status.is_some() || req.priority.is_some() || req.tags.is_some() {
            return Err(ApiError::forbidden(
                "Customers may only edit the title and description",
            ));
        }
    }

    if let Some(title) = req.title {
        ticket.title = validate_title(&title)?;
    }
    if let Some(description) = req.description {
        ticket.description = clean_description(Some(description));
    }
    if let Some(status) = req.status {
        ticket.status = status.as_str().to_string();
    }
    if let Some(priority) = req.priority {
        ticket.priority = priority.as_str().to_string();
    }
    if let Some(tags) = req.tags {
        ticket.tags = normalize_tags(&tags);
    }
    ticket.updated_at = Utc::now();
    Ok(())
}

pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<UpdateTicketRequest>,
) -> ApiResult<Json<Ticket>> {
    let ticket = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let before = load_visible_ticket(conn, &user, req.id)?;
            let mut after = before.clone();
            apply_update(&user, &mut after, req)?;
            write_ticket(conn, &after)?;
            record(
                conn,
                AuditEntry::new(AuditAction::Update, EntityKind::Ticket, after.id)
                    .by(user.user_id)
                    .with_before(&before)
                    .with_after(&after),
            )?;
            Ok(after)
        })
    })
    .await?;

    state.invalidate(&[TAG_TICKETS]).await;
    Ok(Json(ticket))
}

/// Agents may take a ticket or release it. Leads may hand it to any staff member.
pub fn check_assignment(
    user: &AuthenticatedUser,
    assignee: Option<&User>,
) -> Result<(), ApiError> {
    require_staff(user)?;
    let Some(assignee) = assignee else {
        return Ok(());
    };
    if !assignee.role().is_staff() {
        return Err(ApiError::bad_request("Tickets can only be assigned to staff"));
    }
    if user.role == UserRole::Agent && assignee.id != user.user_id {
        return Err(ApiError::forbidden("Agents can only assign tickets to themselves"));
    }
    Ok(())
}

pub async fn assign_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<AssignTicketRequest>,
) -> ApiResult<Json<Ticket>> {
    require_staff(&user)?;

    let ticket = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let before = load_visible_ticket(conn, &user, req.id)?;
            let assignee = match req.assignee_id {
                Some(id) => Some(
                    users::table
                        .find(id)
                        .select(User::as_select())
                        .first::<User>(conn)
                        .optional()?
                        .ok_or_else(|| ApiError::not_found("Assignee"))?,
                ),
                None => None,
            };
            check_assignment(&user, assignee.as_ref())?;

            let mut after = before.clone();
            after.assignee_id = req.assignee_id;
            after.updated_at = Utc::now();
            write_ticket(conn, &after)?;
            record(
                conn,
                AuditEntry::new(AuditAction::Assign, EntityKind::Ticket, after.id)
                    .by(user.user_id)
                    .with_before(&serde_json::json!({"assignee_id": before.assignee_id}))
                    .with_after(&serde_json::json!({"assignee_id": after.assignee_id})),
            )?;
            Ok(after)
        })
    })
    .await?;

    state.invalidate(&[TAG_TICKETS]).await;
    Ok(Json(ticket))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<Ticket>> {
    require_staff(&user)?;

    let ticket = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let before = load_visible_ticket(conn, &user, req.id)?;
            let mut after = before.clone();
            after.status = req.status.as_str().to_string();
            after.updated_at = Utc::now();
            write_ticket(conn, &after)?;
            record(
                conn,
                AuditEntry::new(AuditAction::StatusChange, EntityKind::Ticket, after.id)
                    .by(user.user_id)
                    .with_before(&serde_json::json!({"status": before.status}))
                    .with_after(&serde_json::json!({"status": after.status})),
            )?;
            Ok(after)
        })
    })
    .await?;

    state.invalidate(&[TAG_TICKETS]).await;
    Ok(Json(ticket))
}

pub async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<TicketIdRequest>,
) -> ApiResult<Json<DeleteTicketResponse>> {
    require_lead(&user)?;

    let response = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let before = load_visible_ticket(conn, &user, req.id)?;

            diesel::update(
                marketplace_conversations::table
                    .filter(marketplace_conversations::ticket_id.eq(before.id)),
            )
            .set((
                marketplace_conversations::ticket_id.eq(None::<Uuid>),
                marketplace_conversations::status.eq(MarketplaceStatus::Processed.as_str()),
                marketplace_conversations::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;

            let deleted_messages =
                diesel::delete(messages::table.filter(messages::ticket_id.eq(before.id)))
                    .execute(conn)?;
            diesel::delete(tickets::table.find(before.id)).execute(conn)?;

            record(
                conn,
                AuditEntry::new(AuditAction::Delete, EntityKind::Ticket, before.id)
                    .by(user.user_id)
                    .with_before(&before),
            )?;

            Ok(DeleteTicketResponse {
                id: before.id,
                deleted_messages,
            })
        })
    })
    .await?;

    info!("Ticket {} deleted", response.id);
    let thread = messages_tag(response.id);
    state.invalidate(&[TAG_TICKETS, TAG_MARKETPLACE, thread.as_str()]).await;
    Ok(Json(response))
}

pub async fn ticket_stats(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> ApiResult<Json<TicketStats>> {
    let pool = state.conn.clone();
    let key = (user.user_id, user.role);

    let stats = state
        .query_cache
        .get_or_load("ticket.stats", &key, &[TAG_TICKETS], || async move {
            run_blocking(&pool, move |conn| {
                let mut q = tickets::table
                    .select((tickets::status, tickets::priority, tickets::assignee_id))
                    .into_boxed();
                if !user.is_staff() {
                    q = q.filter(
                        tickets::customer_id
                            .eq(user.user_id)
                            .or(tickets::created_by.eq(user.user_id)),
                    );
                }
                let rows: Vec<(String, String, Option<Uuid>)> = q.load(conn)?;
                Ok(compute_stats(
                    rows.iter().map(|(s, p, a)| (s.as_str(), p.as_str(), *a)),
                ))
            })
            .await
        })
        .await?;

    Ok(Json(stats))
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rpc/ticket.list", post(list_tickets))
        .route("/rpc/ticket.get", post(get_ticket))
        .route("/rpc/ticket.create", post(create_ticket))
        .route("/rpc/ticket.update", post(update_ticket))
        .route("/rpc/ticket.assign", post(assign_ticket))
        .route("/rpc/ticket.updateStatus", post(update_status))
        .route("/rpc/ticket.delete", post(delete_ticket))
        .route("/rpc/ticket.stats", post(ticket_stats))
}
