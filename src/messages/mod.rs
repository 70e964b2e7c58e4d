use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{record, AuditEntry};
use crate::core::cache::{messages_tag, TAG_TICKETS};
use crate::core::shared::enums::{AuditAction, EntityKind, TicketStatus, UserRole};
use crate::core::shared::error::{ApiError, ApiResult};
use crate::core::shared::models::{Message, Ticket, User};
use crate::core::shared::schema::{messages, tickets, users};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_blocking;
use crate::security::auth_api::AuthenticatedUser;
use crate::tickets::load_visible_ticket;

#[derive(Debug, Serialize, Deserialize)]
pub struct ListMessagesRequest {
    pub ticket_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub ticket_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAuthor {
    pub id: Uuid,
    pub name: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub author: Option<MessageAuthor>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMessageResponse {
    pub message: Message,
    pub ticket: Ticket,
}

/// Drops internal notes for roles that must never see them.
pub fn visible_messages<T, F>(role: UserRole, items: Vec<T>, is_internal: F) -> Vec<T>
where
    F: Fn(&T) -> bool,
{
    if role.is_staff() {
        items
    } else {
        items.into_iter().filter(|m| !is_internal(m)).collect()
    }
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<ListMessagesRequest>,
) -> ApiResult<Json<Vec<MessageView>>> {
    let pool = state.conn.clone();
    let role = user.role;
    let key = (user.user_id, role, req.ticket_id);
    let thread = messages_tag(req.ticket_id);

    let rows = state
        .query_cache
        .get_or_load("message.list", &key, &[thread.as_str(), TAG_TICKETS], || async move {
            run_blocking(&pool, move |conn| {
                load_visible_ticket(conn, &user, req.ticket_id)?;

                let mut q = messages::table
                    .left_join(users::table)
                    .filter(messages::ticket_id.eq(req.ticket_id))
                    .select((Message::as_select(), Option::<User>::as_select()))
                    .into_boxed();
                if !user.is_staff() {
                    q = q.filter(messages::is_internal.eq(false));
                }
                let rows: Vec<(Message, Option<User>)> =
                    q.order(messages::created_at.asc()).load(conn)?;

                Ok(rows
                    .into_iter()
                    .map(|(message, author)| MessageView {
                        message,
                        author: author.map(|a| MessageAuthor {
                            id: a.id,
                            name: a.display_name().to_string(),
                            role: a.role(),
                        }),
                    })
                    .collect::<Vec<_>>())
            })
            .await
        })
        .await?;

    Ok(Json(visible_messages(role, rows, |m| m.message.is_internal)))
}

/// Status a ticket moves to after a message, if any. A staff reply visible
/// to the customer takes an OPEN ticket into progress.
pub fn status_after_message(
    author_role: UserRole,
    is_internal: bool,
    current: TicketStatus,
) -> Option<TicketStatus> {
    if author_role.is_staff() && !is_internal && current == TicketStatus::Open {
        Some(TicketStatus::InProgress)
    } else {
        None
    }
}

pub async fn create_message(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateMessageRequest>,
) -> ApiResult<Json<CreateMessageResponse>> {
    if req.is_internal && !user.is_staff() {
        return Err(ApiError::forbidden("Only staff can post internal notes"));
    }
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::bad_request("Message must not be empty"));
    }

    let response = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let mut ticket = load_visible_ticket(conn, &user, req.ticket_id)?;
            let now = Utc::now();

            let message = Message {
                id: Uuid::new_v4(),
                ticket_id: ticket.id,
                author_id: user.user_id,
                content,
                is_internal: req.is_internal,
                created_at: now,
            };
            diesel::insert_into(messages::table)
                .values(&message)
                .execute(conn)?;

            ticket.updated_at = now;
            if let Some(next) = status_after_message(user.role, message.is_internal, ticket.status()) {
                ticket.status = next.as_str().to_string();
            }
            diesel::update(tickets::table.find(ticket.id))
                .set((
                    tickets::status.eq(&ticket.status),
                    tickets::updated_at.eq(now),
                ))
                .execute(conn)?;

            record(
                conn,
                AuditEntry::new(AuditAction::Create, EntityKind::Message, message.id)
                    .by(user.user_id)
                    .with_after(&message),
            )?;

            Ok(CreateMessageResponse { message, ticket })
        })
    })
    .await?;

    let thread = messages_tag(response.ticket.id);
    state.invalidate(&[thread.as_str(), TAG_TICKETS]).await;
    Ok(Json(response))
}

pub fn configure_messages_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rpc/message.list", post(list_messages))
        .route("/rpc/message.create", post(create_message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(is_internal: bool) -> Message {
        Message {
            id: Uuid::new_v4(),
            ticket_id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            content: "hello".to_string(),
            is_internal,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_customers_never_see_internal_notes() {
        let thread = vec![message(false), message(true), message(false), message(true)];
        let visible = visible_messages(UserRole::Customer, thread.clone(), |m| m.is_internal);
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|m| !m.is_internal));

        for role in UserRole::STAFF {
            let all = visible_messages(role, thread.clone(), |m| m.is_internal);
            assert_eq!(all.len(), 4);
        }
    }

    #[test]
    fn test_staff_public_reply_starts_progress() {
        assert_eq!(
            status_after_message(UserRole::Agent, false, TicketStatus::Open),
            Some(TicketStatus::InProgress)
        );
        assert_eq!(status_after_message(UserRole::Agent, true, TicketStatus::Open), None);
        assert_eq!(status_after_message(UserRole::Customer, false, TicketStatus::Open), None);
        assert_eq!(status_after_message(UserRole::Admin, false, TicketStatus::Pending), None);
    }

    #[test]
    fn test_message_view_flattens() {
        let view = MessageView {
            message: message(false),
            author: None,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["content"], "hello");
        assert!(json["author"].is_null());
    }
}
