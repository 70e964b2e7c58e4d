//! Append-only audit trail.
//!
//! Rows are written with [`record`] on the same connection, inside the same
//! transaction, as the mutation they describe. A failed audit insert rolls the
//! mutation back.

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::cache::TAG_AUDIT;
use crate::core::shared::enums::{AuditAction, EntityKind};
use crate::core::shared::error::{ApiError, ApiResult};
use crate::core::shared::models::AuditLog;
use crate::core::shared::schema::audit_logs;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{clamp_limit, run_blocking};
use crate::security::auth_api::{require_lead, AuthenticatedUser};

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub entity: EntityKind,
    pub entity_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, entity: EntityKind, entity_id: Uuid) -> Self {
        Self {
            action,
            entity,
            entity_id,
            actor_id: None,
            before: None,
            after: None,
        }
    }

    pub fn by(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_before<T: Serialize>(mut self, before: &T) -> Self {
        self.before = serde_json::to_value(before).ok();
        self
    }

    pub fn with_after<T: Serialize>(mut self, after: &T) -> Self {
        self.after = serde_json::to_value(after).ok();
        self
    }
}

pub fn record(conn: &mut PgConnection, entry: AuditEntry) -> Result<AuditLog, ApiError> {
    let row = AuditLog {
        id: Uuid::new_v4(),
        action: entry.action.as_str().to_string(),
        entity_type: entry.entity.as_str().to_string(),
        entity_id: entry.entity_id,
        actor_id: entry.actor_id,
        before_state: entry.before,
        after_state: entry.after,
        created_at: Utc::now(),
    };

    diesel::insert_into(audit_logs::table)
        .values(&row)
        .execute(conn)?;

    Ok(row)
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListAuditRequest {
    pub entity_type: Option<EntityKind>,
    pub entity_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub limit: Option<i64>,
}

pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<ListAuditRequest>,
) -> ApiResult<Json<Vec<AuditLog>>> {
    require_lead(&user)?;

    let pool = state.conn.clone();
    let entity_type = req.entity_type.map(|e| e.as_str().to_string());
    let (entity_id, actor_id) = (req.entity_id, req.actor_id);
    let limit = clamp_limit(req.limit);
    let logs = state
        .query_cache
        .get_or_load("audit.list", &req, &[TAG_AUDIT], || async move {
            run_blocking(&pool, move |conn| {
                let mut query = audit_logs::table.select(AuditLog::as_select()).into_boxed();
                if let Some(kind) = entity_type {
                    query = query.filter(audit_logs::entity_type.eq(kind));
                }
                if let Some(id) = entity_id {
                    query = query.filter(audit_logs::entity_id.eq(id));
                }
                if let Some(actor) = actor_id {
                    query = query.filter(audit_logs::actor_id.eq(actor));
                }
                Ok(query
                    .order(audit_logs::created_at.desc())
                    .limit(limit)
                    .load::<AuditLog>(conn)?)
            })
            .await
        })
        .await?;

    Ok(Json(logs))
}

pub fn configure_audit_routes() -> Router<Arc<AppState>> {
    Router::new().route("/rpc/audit.list", post(list_audit_logs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_builder_snapshots() {
        let actor = Uuid::new_v4();
        let entity = Uuid::new_v4();
        let entry = AuditEntry::new(AuditAction::StatusChange, EntityKind::Ticket, entity)
            .by(actor)
            .with_before(&json!({"status": "OPEN"}))
            .with_after(&json!({"status": "RESOLVED"}));

        assert_eq!(entry.actor_id, Some(actor));
        assert_eq!(entry.entity_id, entity);
        assert_eq!(entry.before.unwrap()["status"], "OPEN");
        assert_eq!(entry.after.unwrap()["status"], "RESOLVED");
    }

    #[test]
    fn test_list_request_accepts_wire_names() {
        let req: ListAuditRequest =
            serde_json::from_value(json!({"entity_type": "MARKETPLACE_CONVERSATION", "limit": 10}))
                .unwrap();
        assert_eq!(req.entity_type, Some(EntityKind::MarketplaceConversation));
        assert_eq!(req.limit, Some(10));
    }
}
