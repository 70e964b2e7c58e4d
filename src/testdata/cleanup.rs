//! Deleting generated data without tripping foreign keys.
//!
//! Rows are removed in [`cleanup_plan`] order inside one transaction. Real
//! rows that only point at test rows are detached instead of deleted.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::core::shared::enums::{EntityKind, MarketplaceStatus};
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{
    audit_logs, marketplace_conversations, messages, team_members, tickets, users,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStep {
    Messages,
    AuditLogs,
    TeamMemberships,
    MarketplaceConversations,
    UnassignTickets,
    Tickets,
    Users,
}

const PLAN: [CleanupStep; 7] = [
    CleanupStep::Messages,
    CleanupStep::AuditLogs,
    CleanupStep::TeamMemberships,
    CleanupStep::MarketplaceConversations,
    CleanupStep::UnassignTickets,
    CleanupStep::Tickets,
    CleanupStep::Users,
];

pub fn cleanup_plan() -> &'static [CleanupStep] {
    &PLAN
}

/// Which generated rows a cleanup run targets.
#[derive(Debug, Clone)]
pub enum CleanupScope {
    Batch(String),
    ExpiredBefore(DateTime<Utc>),
}

#[derive(Debug, Clone, Serialize)]
pub struct StepCount {
    pub step: CleanupStep,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub batch_ids: Vec<String>,
    pub steps: Vec<StepCount>,
}

impl CleanupReport {
    pub fn rows(&self, step: CleanupStep) -> usize {
        self.steps
            .iter()
            .filter(|s| s.step == step)
            .map(|s| s.rows)
            .sum()
    }

    pub fn total(&self) -> usize {
        self.steps.iter().map(|s| s.rows).sum()
    }
}

struct Targets {
    batch_ids: BTreeSet<String>,
    user_ids: Vec<Uuid>,
    ticket_ids: Vec<Uuid>,
}

fn collect_targets(conn: &mut PgConnection, scope: &CleanupScope) -> QueryResult<Targets> {
    let (batch_users, batch_tickets): (Vec<(Uuid, Option<String>)>, Vec<(Uuid, Option<String>)>) =
        match scope {
            CleanupScope::Batch(id) => (
                users::table
                    .filter(users::test_batch_id.eq(id))
                    .select((users::id, users::test_batch_id))
                    .load(conn)?,
                tickets::table
                    .filter(tickets::test_batch_id.eq(id))
                    .select((tickets::id, tickets::test_batch_id))
                    .load(conn)?,
            ),
            CleanupScope::ExpiredBefore(now) => (
                users::table
                    .filter(users::test_batch_id.is_not_null())
                    .filter(users::test_expires_at.lt(*now))
                    .select((users::id, users::test_batch_id))
                    .load(conn)?,
                tickets::table
                    .filter(tickets::test_batch_id.is_not_null())
                    .filter(tickets::test_expires_at.lt(*now))
                    .select((tickets::id, tickets::test_batch_id))
                    .load(conn)?,
            ),
        };

    let batch_ids = batch_users
        .iter()
        .chain(batch_tickets.iter())
        .filter_map(|(_, batch)| batch.clone())
        .collect();
    let user_ids: Vec<Uuid> = batch_users.into_iter().map(|(id, _)| id).collect();

    let mut ticket_ids: BTreeSet<Uuid> = batch_tickets.into_iter().map(|(id, _)| id).collect();
    if !user_ids.is_empty() {
        let owned: Vec<Uuid> = tickets::table
            .filter(
                tickets::created_by
                    .eq_any(user_ids.clone())
                    .or(tickets::customer_id.eq_any(user_ids.clone())),
            )
            .select(tickets::id)
            .load(conn)?;
        ticket_ids.extend(owned);
    }

    Ok(Targets {
        batch_ids,
        user_ids,
        ticket_ids: ticket_ids.into_iter().collect(),
    })
}

fn run_step(conn: &mut PgConnection, step: CleanupStep, t: &Targets) -> QueryResult<usize> {
    let users_ = t.user_ids.clone();
    let tickets_ = t.ticket_ids.clone();
    match step {
        CleanupStep::Messages => diesel::delete(
            messages::table.filter(
                messages::ticket_id
                    .eq_any(tickets_)
                    .or(messages::author_id.eq_any(users_)),
            ),
        )
        .execute(conn),
        CleanupStep::AuditLogs => diesel::delete(
            audit_logs::table.filter(
                audit_logs::entity_type
                    .eq(EntityKind::Ticket.as_str())
                    .and(audit_logs::entity_id.eq_any(tickets_))
                    .or(audit_logs::entity_type
                        .eq(EntityKind::User.as_str())
                        .and(audit_logs::entity_id.eq_any(users_.clone())))
                    .or(audit_logs::actor_id.eq_any(users_)),
            ),
        )
        .execute(conn),
        CleanupStep::TeamMemberships => {
            diesel::delete(team_members::table.filter(team_members::user_id.eq_any(users_)))
                .execute(conn)
        }
        CleanupStep::MarketplaceConversations => {
            let deleted = diesel::delete(
                marketplace_conversations::table
                    .filter(marketplace_conversations::created_by.eq_any(users_)),
            )
            .execute(conn)?;
            let unlinked = diesel::update(
                marketplace_conversations::table
                    .filter(marketplace_conversations::ticket_id.eq_any(tickets_)),
            )
            .set((
                marketplace_conversations::ticket_id.eq(None::<Uuid>),
                marketplace_conversations::status.eq(MarketplaceStatus::Processed.as_str()),
                marketplace_conversations::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
            Ok(deleted + unlinked)
        }
        CleanupStep::UnassignTickets => diesel::update(
            tickets::table
                .filter(tickets::assignee_id.eq_any(users_))
                .filter(tickets::id.ne_all(tickets_)),
        )
        .set((
            tickets::assignee_id.eq(None::<Uuid>),
            tickets::updated_at.eq(Utc::now()),
        ))
        .execute(conn),
        CleanupStep::Tickets => {
            diesel::delete(tickets::table.filter(tickets::id.eq_any(tickets_))).execute(conn)
        }
        CleanupStep::Users => {
            diesel::delete(users::table.filter(users::id.eq_any(users_))).execute(conn)
        }
    }
}

pub fn run_cleanup(conn: &mut PgConnection, scope: CleanupScope) -> Result<CleanupReport, ApiError> {
    let report = conn.transaction(|conn| {
        let targets = collect_targets(conn, &scope)?;
        let mut steps = Vec::with_capacity(PLAN.len());
        for step in cleanup_plan() {
            let rows = run_step(conn, *step, &targets)?;
            steps.push(StepCount { step: *step, rows });
        }
        Ok::<_, ApiError>(CleanupReport {
            batch_ids: targets.batch_ids.into_iter().collect(),
            steps,
        })
    })?;

    if report.total() > 0 {
        info!(
            "Test data cleanup removed {} rows across {} batches",
            report.total(),
            report.batch_ids.len()
        );
    }
    Ok(report)
}

pub fn delete_batch(conn: &mut PgConnection, batch_id: &str) -> Result<CleanupReport, ApiError> {
    run_cleanup(conn, CleanupScope::Batch(batch_id.to_string()))
}

pub fn delete_expired(conn: &mut PgConnection, now: DateTime<Utc>) -> Result<CleanupReport, ApiError> {
    run_cleanup(conn, CleanupScope::ExpiredBefore(now))
}
