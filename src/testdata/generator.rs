//! Synthetic users and tickets tagged with a batch id and an expiry.

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::weighted::weighted_choice;
use crate::core::shared::enums::{TicketPriority, TicketStatus, UserRole};
use crate::core::shared::models::{Ticket, User};

const ROLE_WEIGHTS: [(UserRole, u32); 4] = [
    (UserRole::Customer, 70),
    (UserRole::Agent, 20),
    (UserRole::Manager, 7),
    (UserRole::Admin, 3),
];

const PRIORITY_WEIGHTS: [(TicketPriority, u32); 4] = [
    (TicketPriority::Low, 30),
    (TicketPriority::Medium, 40),
    (TicketPriority::High, 20),
    (TicketPriority::Urgent, 10),
];

const STATUS_WEIGHTS: [(TicketStatus, u32); 5] = [
    (TicketStatus::Open, 35),
    (TicketStatus::InProgress, 25),
    (TicketStatus::Pending, 15),
    (TicketStatus::Resolved, 15),
    (TicketStatus::Closed, 10),
];

const FIRST_NAMES: &[&str] = &[
    "Ana", "Bruno", "Chen", "Dara", "Emeka", "Fatima", "Gustavo", "Hana", "Ivan", "Jonas",
    "Keiko", "Lucia", "Mateo", "Nadia", "Omar", "Priya",
];

const LAST_NAMES: &[&str] = &[
    "Almeida", "Brooks", "Costa", "Dubois", "Eriksen", "Fischer", "Garcia", "Haddad", "Ito",
    "Kowalski", "Lopez", "Mensah", "Novak", "Okafor",
];

const SUBJECTS: &[&str] = &[
    "Cannot log in to my account",
    "Refund not received",
    "Package arrived damaged",
    "Invoice shows the wrong amount",
    "App crashes on startup",
    "Need to change shipping address",
    "Subscription renewed unexpectedly",
    "Two-factor code never arrives",
    "Export to CSV is empty",
    "Order stuck in processing",
];

const TAG_POOL: &[&str] = &[
    "billing", "shipping", "login", "bug", "refund", "mobile", "account", "feature-request",
];

pub const ASSIGN_PROBABILITY: f64 = 0.6;
pub const MAX_TAGS_PER_TICKET: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestBatch {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TestBatch {
    /// `None` when the expiry falls outside the representable date range.
    pub fn new(expires_in_hours: i64) -> Option<Self> {
        let created_at = Utc::now();
        let expires_at = created_at.checked_add_signed(Duration::try_hours(expires_in_hours)?)?;
        Some(Self {
            id: format!("tb_{}", Uuid::new_v4().simple()),
            created_at,
            expires_at,
        })
    }

    pub fn with_id(id: String, created_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            expires_at,
        }
    }
}

fn pick<'a, R: Rng + ?Sized>(pool: &[&'a str], rng: &mut R) -> &'a str {
    pool.choose(rng).copied().unwrap_or_default()
}

pub fn generate_users<R: Rng + ?Sized>(batch: &TestBatch, n: usize, rng: &mut R) -> Vec<User> {
    (0..n)
        .map(|i| {
            let role = weighted_choice(&ROLE_WEIGHTS, rng)
                .copied()
                .unwrap_or(UserRole::Customer);
            User {
                id: Uuid::new_v4(),
                email: format!("test+{}-{}@example.test", batch.id, i),
                name: Some(format!("{} {}", pick(FIRST_NAMES, rng), pick(LAST_NAMES, rng))),
                role: role.as_str().to_string(),
                test_batch_id: Some(batch.id.clone()),
                test_expires_at: Some(batch.expires_at),
                created_at: batch.created_at,
                updated_at: batch.created_at,
            }
        })
        .collect()
}

/// Tickets for `customers`, assigned to one of `agents` 60% of the time when
/// any exist. Creation times are spread over the last 30 days. `creator` owns
/// tickets only when there are no customers to own them.
pub fn generate_tickets<R: Rng + ?Sized>(
    batch: &TestBatch,
    customers: &[Uuid],
    agents: &[Uuid],
    creator: Uuid,
    n: usize,
    rng: &mut R,
) -> Vec<Ticket> {
    (0..n)
        .map(|_| {
            let customer = customers.choose(rng).copied();
            let assignee = if !agents.is_empty() && rng.gen_bool(ASSIGN_PROBABILITY) {
                agents.choose(rng).copied()
            } else {
                None
            };
            let tag_count = rng.gen_range(0..=MAX_TAGS_PER_TICKET);
            let mut tags: Vec<String> = TAG_POOL
                .choose_multiple(rng, tag_count)
                .map(|t| t.to_string())
                .collect();
            tags.sort();

            let created_at = batch.created_at - Duration::minutes(rng.gen_range(0..60 * 24 * 30));
            let subject = pick(SUBJECTS, rng);
            let priority = weighted_choice(&PRIORITY_WEIGHTS, rng)
                .copied()
                .unwrap_or_default();
            let status = weighted_choice(&STATUS_WEIGHTS, rng)
                .copied()
                .unwrap_or_default();

            Ticket {
                id: Uuid::new_v4(),
                title: subject.to_string(),
                description: Some(format!("Generated test ticket: {}.", subject.to_lowercase())),
                status: status.as_str().to_string(),
                priority: priority.as_str().to_string(),
                customer_id: customer,
                assignee_id: assignee,
                created_by: customer.unwrap_or(creator),
                tags,
                test_batch_id: Some(batch.id.clone()),
                test_expires_at: Some(batch.expires_at),
                created_at,
                updated_at: created_at,
            }
        })
        .collect()
}
