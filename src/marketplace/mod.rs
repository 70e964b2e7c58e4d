//! Marketplace transcripts to support tickets.
//!
//! A pasted transcript is stored, sent to the language model under a trace
//! run, parsed into a [`TicketDraft`] and kept for review. Staff turn the
//! draft into a ticket, and their edits go back to the trace service as
//! `human_edit` feedback.

pub mod parser;
pub mod prompts;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{record, AuditEntry};
use crate::core::cache::{TAG_MARKETPLACE, TAG_TICKETS};
use crate::core::shared::enums::{AuditAction, EntityKind, MarketplaceStatus, TicketPriority};
use crate::core::shared::error::{ApiError, ApiResult};
use crate::core::shared::models::{MarketplaceConversation, Ticket};
use crate::core::shared::schema::marketplace_conversations;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{clamp_limit, run_blocking};
use crate::llm::observability::{TraceFeedback, TraceRun};
use crate::llm::GenerateOptions;
use crate::security::auth_api::{require_staff, AuthenticatedUser};
use crate::tickets::{insert_ticket, validate_title, NewTicket};

use self::parser::{clean_tags, parse_extraction, TicketDraft};
use self::prompts::{build_extraction_prompt, EXTRACTION_SYSTEM_PROMPT};

pub const MAX_RAW_TEXT_CHARS: usize = 100_000;

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub raw_text: String,
    #[serde(default)]
    pub create_ticket: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub conversation: MarketplaceConversation,
    pub draft: Option<TicketDraft>,
    pub ticket: Option<Ticket>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListConversationsRequest {
    pub status: Option<MarketplaceStatus>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationIdRequest {
    pub id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateFromConversationRequest {
    pub conversation_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TicketPriority>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateFromConversationResponse {
    pub ticket: Ticket,
    pub conversation: MarketplaceConversation,
    pub edited: bool,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub run_id: Uuid,
    pub key: Option<String>,
    pub score: Option<f64>,
    pub comment: Option<String>,
    pub correction: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RecentRunsQuery {
    pub limit: Option<usize>,
}

/// The draft with the reviewer's edits applied, and whether anything changed.
pub fn apply_edits(
    draft: &TicketDraft,
    req: &CreateFromConversationRequest,
) -> Result<(TicketDraft, bool), ApiError> {
    let mut edited = draft.clone();
    if let Some(title) = &req.title {
        edited.title = validate_title(title)?;
    }
    if let Some(description) = &req.description {
        edited.description = description.trim().to_string();
    }
    if let Some(priority) = req.priority {
        edited.priority = priority;
    }
    if let Some(tags) = &req.tags {
        edited.tags = clean_tags(&json!(tags));
    }
    let changed = edited != *draft;
    Ok((edited, changed))
}

fn load_conversation(conn: &mut PgConnection, id: Uuid) -> Result<MarketplaceConversation, ApiError> {
    marketplace_conversations::table
        .find(id)
        .select(MarketplaceConversation::as_select())
        .first::<MarketplaceConversation>(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Conversation"))
}

/// Creates the ticket for a processed conversation and links the two.
/// Call inside a transaction.
fn create_linked_ticket(
    conn: &mut PgConnection,
    actor: &AuthenticatedUser,
    conversation: &MarketplaceConversation,
    draft: &TicketDraft,
) -> Result<(Ticket, MarketplaceConversation), ApiError> {
    if conversation.ticket_id.is_some() {
        return Err(ApiError::Conflict(
            "Conversation already has a ticket".to_string(),
        ));
    }
    if conversation.status() != MarketplaceStatus::Processed {
        return Err(ApiError::Conflict(format!(
            "Conversation is {}, not PROCESSED",
            conversation.status()
        )));
    }

    let ticket = insert_ticket(
        conn,
        actor,
        NewTicket {
            title: validate_title(&draft.title)?,
            description: Some(draft.description.clone()).filter(|d| !d.is_empty()),
            priority: draft.priority,
            tags: draft.tags.clone(),
            customer_id: None,
        },
    )?;

    let linked = diesel::update(marketplace_conversations::table.find(conversation.id))
        .set((
            marketplace_conversations::ticket_id.eq(Some(ticket.id)),
            marketplace_conversations::status.eq(MarketplaceStatus::TicketCreated.as_str()),
            marketplace_conversations::updated_at.eq(Utc::now()),
        ))
        .returning(MarketplaceConversation::as_returning())
        .get_result::<MarketplaceConversation>(conn)?;

    record(
        conn,
        AuditEntry::new(
            AuditAction::Update,
            EntityKind::MarketplaceConversation,
            conversation.id,
        )
        .by(actor.user_id)
        .with_before(&json!({"status": conversation.status, "ticket_id": null}))
        .with_after(&json!({"status": linked.status, "ticket_id": ticket.id})),
    )?;

    Ok((ticket, linked))
}

async fn run_extraction(state: &AppState, conversation_id: Uuid, raw_text: &str) -> (TraceRun, Result<TicketDraft, String>) {
    let run = state.tracer.start_run(
        "marketplace.extract",
        "llm",
        json!({
            "conversation_id": conversation_id,
            "transcript_chars": raw_text.chars().count(),
            "model": state.llm_provider.model_name(),
        }),
    );

    let options = GenerateOptions {
        json_mode: true,
        ..Default::default()
    };
    let user_prompt = build_extraction_prompt(raw_text);

    match state
        .llm_provider
        .generate(EXTRACTION_SYSTEM_PROMPT, &user_prompt, &options)
        .await
    {
        Ok(completion) => {
            let draft = parse_extraction(&completion.content, raw_text);
            let outputs = json!({
                "draft": draft,
                "model": completion.model,
                "usage": completion.usage,
            });
            let run = state.tracer.end_run(run, Ok(outputs)).await;
            (run, Ok(draft))
        }
        Err(e) => {
            warn!("Extraction failed for conversation {conversation_id}: {e}");
            let run = state.tracer.end_run(run, Err(e.to_string())).await;
            (run, Err(e.to_string()))
        }
    }
}

pub async fn process_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<ProcessRequest>,
) -> ApiResult<Json<ProcessResponse>> {
    require_staff(&user)?;
    let raw_text = req.raw_text.trim().to_string();
    if raw_text.is_empty() {
        return Err(ApiError::bad_request("Transcript must not be empty"));
    }
    if raw_text.chars().count() > MAX_RAW_TEXT_CHARS {
        return Err(ApiError::bad_request(format!(
            "Transcript must be at most {MAX_RAW_TEXT_CHARS} characters"
        )));
    }

    tracing::debug!("Processing transcript of {} chars", raw_text.chars().count());
    let now = Utc::now();
    let pending = MarketplaceConversation {
        id: Uuid::new_v4(),
        raw_text: raw_text.clone(),
        processed: None,
        status: MarketplaceStatus::Pending.as_str().to_string(),
        error: None,
        trace_id: None,
        ticket_id: None,
        created_by: user.user_id,
        created_at: now,
        updated_at: now,
    };

    let actor = user.clone();
    let pending = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            diesel::insert_into(marketplace_conversations::table)
                .values(&pending)
                .execute(conn)?;
            record(
                conn,
                AuditEntry::new(AuditAction::Create, EntityKind::MarketplaceConversation, pending.id)
                    .by(actor.user_id),
            )?;
            Ok(pending)
        })
    })
    .await?;

    let (run, outcome) = run_extraction(&state, pending.id, &raw_text).await;

    let create_ticket = req.create_ticket;
    let actor = user.clone();
    let draft = outcome.as_ref().ok().cloned();
    let response = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let (status, processed, error) = match &outcome {
                Ok(draft) => (
                    MarketplaceStatus::Processed,
                    serde_json::to_value(draft).ok(),
                    None,
                ),
                Err(e) => (MarketplaceStatus::Failed, None, Some(e.clone())),
            };

            let conversation = diesel::update(marketplace_conversations::table.find(pending.id))
                .set((
                    marketplace_conversations::status.eq(status.as_str()),
                    marketplace_conversations::processed.eq(processed),
                    marketplace_conversations::error.eq(error),
                    marketplace_conversations::trace_id.eq(Some(run.id)),
                    marketplace_conversations::updated_at.eq(Utc::now()),
                ))
                .returning(MarketplaceConversation::as_returning())
                .get_result::<MarketplaceConversation>(conn)?;

            match (&outcome, create_ticket) {
                (Ok(draft), true) => {
                    let (ticket, conversation) =
                        create_linked_ticket(conn, &actor, &conversation, draft)?;
                    Ok(ProcessResponse {
                        conversation,
                        draft: Some(draft.clone()),
                        ticket: Some(ticket),
                    })
                }
                _ => Ok(ProcessResponse {
                    conversation,
                    draft,
                    ticket: None,
                }),
            }
        })
    })
    .await?;

    info!(
        "Conversation {} processed as {}",
        response.conversation.id, response.conversation.status
    );
    state.invalidate(&[TAG_MARKETPLACE, TAG_TICKETS]).await;
    Ok(Json(response))
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<ListConversationsRequest>,
) -> ApiResult<Json<Vec<MarketplaceConversation>>> {
    require_staff(&user)?;
    let pool = state.conn.clone();
    let status = req.status.map(|s| s.as_str().to_string());
    let limit = clamp_limit(req.limit);

    let rows = state
        .query_cache
        .get_or_load("marketplace.list", &req, &[TAG_MARKETPLACE], || async move {
            run_blocking(&pool, move |conn| {
                let mut q = marketplace_conversations::table
                    .select(MarketplaceConversation::as_select())
                    .into_boxed();
                if let Some(status) = status {
                    q = q.filter(marketplace_conversations::status.eq(status));
                }
                Ok(q
                    .order(marketplace_conversations::created_at.desc())
                    .limit(limit)
                    .load::<MarketplaceConversation>(conn)?)
            })
            .await
        })
        .await?;

    Ok(Json(rows))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<ConversationIdRequest>,
) -> ApiResult<Json<MarketplaceConversation>> {
    require_staff(&user)?;
    tracing::debug!("Loading conversation {}", req.id);
    let row = run_blocking(&state.conn, move |conn| load_conversation(conn, req.id)).await?;
    Ok(Json(row))
}

pub async fn create_ticket_from_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateFromConversationRequest>,
) -> ApiResult<Json<CreateFromConversationResponse>> {
    require_staff(&user)?;

    let actor = user.clone();
    let (response, trace_id, corrected) = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let conversation = marketplace_conversations::table
                .find(req.conversation_id)
                .select(MarketplaceConversation::as_select())
                .for_update()
                .first::<MarketplaceConversation>(conn)
                .optional()?
                .ok_or_else(|| ApiError::not_found("Conversation"))?;

            let draft: TicketDraft = conversation
                .processed
                .clone()
                .and_then(|v| serde_json::from_value(v).ok())
                .ok_or_else(|| {
                    ApiError::Conflict(format!(
                        "Conversation is {}, not PROCESSED",
                        conversation.status()
                    ))
                })?;

            let (final_draft, edited) = apply_edits(&draft, &req)?;
            let (ticket, conversation) =
                create_linked_ticket(conn, &actor, &conversation, &final_draft)?;

            let trace_id = conversation.trace_id;
            Ok((
                CreateFromConversationResponse {
                    ticket,
                    conversation,
                    edited,
                },
                trace_id,
                final_draft,
            ))
        })
    })
    .await?;

    if response.edited {
        if let Some(run_id) = trace_id {
            state
                .tracer
                .record_feedback(
                    run_id,
                    "human_edit",
                    Some(0.0),
                    Some(format!("Edited before creating ticket {}", response.ticket.id)),
                    serde_json::to_value(&corrected).ok(),
                )
                .await;
        }
    }

    info!(
        "Ticket {} created from conversation {}",
        response.ticket.id, response.conversation.id
    );
    state.invalidate(&[TAG_MARKETPLACE, TAG_TICKETS]).await;
    Ok(Json(response))
}

pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<FeedbackRequest>,
) -> ApiResult<Json<TraceFeedback>> {
    require_staff(&user)?;
    if let Some(score) = req.score {
        if !(0.0..=1.0).contains(&score) {
            return Err(ApiError::bad_request("Score must be between 0 and 1"));
        }
    }
    let key = req
        .key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .unwrap_or("user_rating")
        .to_string();

    let feedback = state
        .tracer
        .record_feedback(req.run_id, &key, req.score, req.comment, req.correction)
        .await;
    Ok(Json(feedback))
}

pub async fn recent_runs(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<RecentRunsQuery>,
) -> ApiResult<Json<Vec<TraceRun>>> {
    require_staff(&user)?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.tracer.recent_runs(limit).await))
}

pub fn configure_marketplace_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rpc/marketplace.process", post(process_conversation))
        .route("/rpc/marketplace.list", post(list_conversations))
        .route("/rpc/marketplace.get", post(get_conversation))
        .route("/rpc/marketplace.createTicket", post(create_ticket_from_conversation))
        .route("/api/ai/feedback", post(submit_feedback))
        .route("/api/ai/runs", get(recent_runs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::{create_test_state, MockLLMProvider};
    use crate::llm::observability::RunStatus;

    fn draft() -> TicketDraft {
        TicketDraft {
            title: "Parcel missing".to_string(),
            description: "Order 4411 never arrived".to_string(),
            priority: TicketPriority::High,
            tags: vec!["shipping".to_string()],
            customer_name: None,
            suggested_reply: Some("Sorry about that".to_string()),
        }
    }

    #[test]
    fn test_untouched_draft_is_not_an_edit() {
        let req = CreateFromConversationRequest {
            conversation_id: Uuid::new_v4(),
            title: Some("Parcel missing".to_string()),
            ..Default::default()
        };
        let (result, edited) = apply_edits(&draft(), &req).unwrap();
        assert!(!edited);
        assert_eq!(result, draft());
    }

    #[test]
    fn test_edits_are_detected_and_cleaned() {
        let req = CreateFromConversationRequest {
            conversation_id: Uuid::new_v4(),
            priority: Some(TicketPriority::Urgent),
            tags: Some(vec!["Lost Package".to_string(), "lost package".to_string()]),
            ..Default::default()
        };
        let (result, edited) = apply_edits(&draft(), &req).unwrap();
        assert!(edited);
        assert_eq!(result.priority, TicketPriority::Urgent);
        assert_eq!(result.tags, vec!["lost-package".to_string()]);
    }

    #[test]
    fn test_blank_title_edit_is_rejected() {
        let req = CreateFromConversationRequest {
            conversation_id: Uuid::new_v4(),
            title: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(apply_edits(&draft(), &req).is_err());
    }

    #[tokio::test]
    async fn test_extraction_run_records_draft() {
        let state = create_test_state(MockLLMProvider::with_response(
            r#"{"title": "Refund missing", "priority": "LOW", "tags": ["Billing"]}"#,
        ));
        let (run, outcome) = run_extraction(&state, Uuid::new_v4(), "Buyer: where is my refund").await;

        let draft = outcome.unwrap();
        assert_eq!(draft.title, "Refund missing");
        assert_eq!(draft.tags, vec!["billing".to_string()]);
        assert_eq!(run.status, RunStatus::Ok);
        assert_eq!(run.name, "marketplace.extract");
        assert_eq!(state.tracer.recent_runs(1).await[0].id, run.id);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_traced() {
        let state = create_test_state(MockLLMProvider::failing());
        let (run, outcome) = run_extraction(&state, Uuid::new_v4(), "Buyer: hello").await;

        assert!(outcome.is_err());
        assert_eq!(run.status, RunStatus::Error);
        assert!(run.error.is_some());
    }
}
