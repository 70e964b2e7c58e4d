//! Generated test data: users and tickets stamped with a batch id and an
//! expiry, plus the cleanup that removes them again.

pub mod cleanup;
pub mod generator;
pub mod weighted;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::shared::enums::UserRole;
use crate::core::shared::error::{ApiError, ApiResult};
use crate::core::shared::models::User;
use crate::core::shared::schema::{tickets, users};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_blocking;
use crate::security::auth_api::{require_admin, AuthError, AuthenticatedUser};

use self::cleanup::{delete_batch, delete_expired, CleanupReport};
use self::generator::{generate_tickets, generate_users, TestBatch};

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

#[derive(Debug, Deserialize)]
pub struct CreateUsersRequest {
    pub count: usize,
    pub expires_in_hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketsRequest {
    pub count: usize,
    pub batch_id: Option<String>,
    pub expires_in_hours: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeneratedBatch {
    pub batch: TestBatch,
    pub users: usize,
    pub tickets: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub users: usize,
    pub tickets: usize,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
}

fn check_count(count: usize, max: usize) -> Result<(), ApiError> {
    if count == 0 || count > max {
        return Err(ApiError::bad_request(format!(
            "count must be between 1 and {max}"
        )));
    }
    Ok(())
}

pub const MAX_EXPIRY_HOURS: i64 = 24 * 365;

fn expiry_hours(requested: Option<i64>, default: i64) -> Result<i64, ApiError> {
    match requested {
        Some(h) if !(1..=MAX_EXPIRY_HOURS).contains(&h) => Err(ApiError::bad_request(format!(
            "expires_in_hours must be between 1 and {MAX_EXPIRY_HOURS}"
        ))),
        Some(h) => Ok(h),
        None => Ok(default),
    }
}

fn new_batch(hours: i64) -> Result<TestBatch, ApiError> {
    TestBatch::new(hours).ok_or_else(|| ApiError::bad_request("expires_in_hours is out of range"))
}

/// Groups `(batch_id, expires_at)` markers from users and tickets into one
/// summary per batch. The earliest expiry wins.
pub fn summarize_batches(
    user_markers: &[(Option<String>, Option<DateTime<Utc>>)],
    ticket_markers: &[(Option<String>, Option<DateTime<Utc>>)],
    now: DateTime<Utc>,
) -> Vec<BatchSummary> {
    let mut batches: BTreeMap<String, BatchSummary> = BTreeMap::new();
    let sources = user_markers
        .iter()
        .map(|m| (m, true))
        .chain(ticket_markers.iter().map(|m| (m, false)));

    for ((batch_id, expires_at), is_user) in sources {
        let Some(batch_id) = batch_id else { continue };
        let entry = batches
            .entry(batch_id.clone())
            .or_insert_with(|| BatchSummary {
                batch_id: batch_id.clone(),
                users: 0,
                tickets: 0,
                expires_at: None,
                expired: false,
            });
        if is_user {
            entry.users += 1;
        } else {
            entry.tickets += 1;
        }
        entry.expires_at = match (entry.expires_at, *expires_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    let mut out: Vec<BatchSummary> = batches
        .into_values()
        .map(|mut b| {
            b.expired = b.expires_at.is_some_and(|e| e < now);
            b
        })
        .collect();
    out.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then(a.batch_id.cmp(&b.batch_id)));
    out
}

pub async fn create_test_users(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateUsersRequest>,
) -> ApiResult<Json<GeneratedBatch>> {
    require_admin(&user)?;
    let settings = &state.config.test_data;
    check_count(req.count, settings.max_batch_size)?;
    let hours = expiry_hours(req.expires_in_hours, settings.default_expiry_hours)?;

    let batch = new_batch(hours)?;
    let rows = generate_users(&batch, req.count, &mut rand::thread_rng());

    let inserted = run_blocking(&state.conn, move |conn| {
        Ok(diesel::insert_into(users::table).values(&rows).execute(conn)?)
    })
    .await?;

    info!("Generated {} test users in batch {}", inserted, batch.id);
    state.query_cache.clear().await;
    Ok(Json(GeneratedBatch {
        batch,
        users: inserted,
        tickets: 0,
    }))
}

pub async fn create_test_tickets(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateTicketsRequest>,
) -> ApiResult<Json<GeneratedBatch>> {
    require_admin(&user)?;
    let settings = &state.config.test_data;
    check_count(req.count, settings.max_batch_size)?;
    let hours = expiry_hours(req.expires_in_hours, settings.default_expiry_hours)?;
    let count = req.count;
    let creator = user.user_id;
    tracing::debug!("Generating {} test tickets, batch {:?}", count, req.batch_id);

    let result = run_blocking(&state.conn, move |conn| {
        conn.transaction(|conn| {
            let mut rng = rand::thread_rng();
            let (batch, batch_users, new_users) = match req.batch_id {
                Some(batch_id) => {
                    let existing = users::table
                        .filter(users::test_batch_id.eq(&batch_id))
                        .select(User::as_select())
                        .load::<User>(conn)?;
                    let first = existing
                        .first()
                        .ok_or_else(|| ApiError::not_found("Test batch"))?;
                    let created_at = first.created_at;
                    let expires_at = first.test_expires_at.unwrap_or(created_at);
                    (
                        TestBatch::with_id(batch_id, created_at, expires_at),
                        existing,
                        0,
                    )
                }
                None => {
                    let batch = new_batch(hours)?;
                    let generated = generate_users(&batch, (count / 4).max(2), &mut rng);
                    let n = diesel::insert_into(users::table)
                        .values(&generated)
                        .execute(conn)?;
                    (batch, generated, n)
                }
            };

            let customers: Vec<Uuid> = batch_users
                .iter()
                .filter(|u| u.role() == UserRole::Customer)
                .map(|u| u.id)
                .collect();
            let agents: Vec<Uuid> = batch_users
                .iter()
                .filter(|u| u.role().is_staff())
                .map(|u| u.id)
                .collect();

            let rows = generate_tickets(&batch, &customers, &agents, creator, count, &mut rng);
            let inserted = diesel::insert_into(tickets::table)
                .values(&rows)
                .execute(conn)?;

            Ok(GeneratedBatch {
                batch,
                users: new_users,
                tickets: inserted,
            })
        })
    })
    .await?;

    info!(
        "Generated {} test tickets in batch {}",
        result.tickets, result.batch.id
    );
    state.query_cache.clear().await;
    Ok(Json(result))
}

pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> ApiResult<Json<Vec<BatchSummary>>> {
    require_admin(&user)?;
    tracing::debug!("Listing test data batches");
    let summaries = run_blocking(&state.conn, |conn| {
        let user_markers = users::table
            .filter(users::test_batch_id.is_not_null())
            .select((users::test_batch_id, users::test_expires_at))
            .load::<(Option<String>, Option<DateTime<Utc>>)>(conn)?;
        let ticket_markers = tickets::table
            .filter(tickets::test_batch_id.is_not_null())
            .select((tickets::test_batch_id, tickets::test_expires_at))
            .load::<(Option<String>, Option<DateTime<Utc>>)>(conn)?;
        Ok(summarize_batches(&user_markers, &ticket_markers, Utc::now()))
    })
    .await?;
    Ok(Json(summaries))
}

pub async fn delete_test_batch(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<CleanupReport>> {
    require_admin(&user)?;
    if !batch_id.starts_with("tb_") {
        return Err(ApiError::bad_request("Not a test batch id"));
    }
    let report = run_blocking(&state.conn, move |conn| delete_batch(conn, &batch_id)).await?;
    if report.total() == 0 {
        return Err(ApiError::not_found("Test batch"));
    }
    state.query_cache.clear().await;
    Ok(Json(report))
}

fn cron_secret_matches(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected.filter(|s| !s.is_empty()) else {
        return false;
    };
    headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|given| given == expected)
}

/// Deletes every expired batch. Reachable without a token when the caller
/// presents the configured cron secret.
pub async fn cleanup_expired(
    State(state): State<Arc<AppState>>,
    user: Option<AuthenticatedUser>,
    headers: HeaderMap,
) -> ApiResult<Json<CleanupReport>> {
    let by_cron = cron_secret_matches(&headers, state.config.test_data.cron_secret.as_deref());
    if !by_cron {
        match &user {
            Some(user) => require_admin(user)?,
            None => return Err(AuthError::MissingToken.into()),
        }
    }

    let report = run_blocking(&state.conn, |conn| delete_expired(conn, Utc::now())).await?;
    if report.total() > 0 {
        state.query_cache.clear().await;
    }
    Ok(Json(report))
}

/// Starts the periodic expiry sweep when `cleanup_interval_secs` is set.
pub fn spawn_cleanup_scheduler(state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let every = state.config.test_data.cleanup_interval_secs;
    if every == 0 {
        return None;
    }
    info!("Test data cleanup scheduled every {every}s");
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(every));
        interval.tick().await;
        loop {
            interval.tick().await;
            match run_blocking(&state.conn, |conn| delete_expired(conn, Utc::now())).await {
                Ok(report) if report.total() > 0 => state.query_cache.clear().await,
                Ok(_) => {}
                Err(e) => error!("Scheduled test data cleanup failed: {e}"),
            }
        }
    }))
}

pub fn configure_testdata_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/test-data/users", post(create_test_users))
        .route("/api/test-data/tickets", post(create_test_tickets))
        .route("/api/test-data/batches", get(list_batches))
        .route("/api/test-data/batches/:batch_id", delete(delete_test_batch))
        .route("/api/test-data/cleanup", post(cleanup_expired))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_count_bounds() {
        assert!(check_count(0, 500).is_err());
        assert!(check_count(1, 500).is_ok());
        assert!(check_count(500, 500).is_ok());
        assert!(check_count(501, 500).is_err());
    }

    #[test]
    fn test_expiry_defaults_and_rejects_non_positive() {
        assert_eq!(expiry_hours(None, 24).unwrap(), 24);
        assert_eq!(expiry_hours(Some(2), 24).unwrap(), 2);
        assert!(expiry_hours(Some(0), 24).is_err());
        assert!(expiry_hours(Some(-5), 24).is_err());
    }

    #[test]
    fn test_expiry_rejects_huge_values() {
        assert_eq!(expiry_hours(Some(MAX_EXPIRY_HOURS), 24).unwrap(), MAX_EXPIRY_HOURS);
        let err = expiry_hours(Some(10_000_000_000), 24).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert!(new_batch(10_000_000_000).is_err());
        assert!(new_batch(MAX_EXPIRY_HOURS).is_ok());
    }

    #[test]
    fn test_cron_secret() {
        let mut headers = HeaderMap::new();
        assert!(!cron_secret_matches(&headers, Some("s3cret")));
        headers.insert(CRON_SECRET_HEADER, HeaderValue::from_static("s3cret"));
        assert!(cron_secret_matches(&headers, Some("s3cret")));
        assert!(!cron_secret_matches(&headers, Some("other")));
        assert!(!cron_secret_matches(&headers, None));
        assert!(!cron_secret_matches(&headers, Some("")));
    }

    #[test]
    fn test_batches_are_grouped_with_earliest_expiry() {
        let now = Utc::now();
        let soon = now + ChronoDuration::hours(1);
        let later = now + ChronoDuration::hours(5);
        let past = now - ChronoDuration::hours(1);

        let users = vec![
            (Some("tb_a".to_string()), Some(later)),
            (Some("tb_a".to_string()), Some(soon)),
            (Some("tb_old".to_string()), Some(past)),
            (None, None),
        ];
        let tickets = vec![(Some("tb_a".to_string()), Some(later))];

        let summaries = summarize_batches(&users, &tickets, now);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].batch_id, "tb_old");
        assert!(summaries[0].expired);
        assert_eq!(summaries[1].users, 2);
        assert_eq!(summaries[1].tickets, 1);
        assert_eq!(summaries[1].expires_at, Some(soon));
        assert!(!summaries[1].expired);
    }
}
