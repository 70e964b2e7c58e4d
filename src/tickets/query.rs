//! In-memory stages of the ticket list query.
//!
//! Role visibility and the column filters run in SQL. The tag filter, the
//! multi-criteria sort and pagination run here on the visible rows, in
//! that order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::core::shared::enums::{TicketPriority, TicketStatus};
use crate::core::shared::models::Ticket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    AssignedToMe,
    Priority,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterion {
    pub field: SortField,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortCriterion {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub include_untagged: bool,
}

impl TagFilter {
    pub fn is_active(&self) -> bool {
        !self.tags.is_empty() || self.include_untagged
    }

    /// A ticket passes when it carries any selected tag, or carries none and
    /// untagged tickets were asked for.
    pub fn matches(&self, ticket_tags: &[String]) -> bool {
        if !self.is_active() {
            return true;
        }
        if ticket_tags.is_empty() {
            return self.include_untagged;
        }
        ticket_tags
            .iter()
            .any(|t| self.tags.iter().any(|s| s.eq_ignore_ascii_case(t)))
    }
}

fn compare(a: &Ticket, b: &Ticket, criterion: &SortCriterion, current_user: Uuid) -> Ordering {
    let ordering = match criterion.field {
        SortField::AssignedToMe => {
            let a_mine = a.assignee_id == Some(current_user);
            let b_mine = b.assignee_id == Some(current_user);
            a_mine.cmp(&b_mine)
        }
        SortField::Priority => a.priority().rank().cmp(&b.priority().rank()),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    };
    match criterion.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

/// Stable multi-key sort. Criteria apply in order, each with its own
/// direction. Full ties keep their input order. No criteria means
/// `updated_at` descending.
pub fn sort_tickets(tickets: &mut [Ticket], criteria: &[SortCriterion], current_user: Uuid) {
    let default = [SortCriterion::new(SortField::UpdatedAt, SortDirection::Desc)];
    let criteria = if criteria.is_empty() { &default[..] } else { criteria };

    tickets.sort_by(|a, b| {
        criteria
            .iter()
            .map(|c| compare(a, b, c, current_user))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketPage {
    pub tickets: Vec<Ticket>,
    pub total: usize,
    pub limit: i64,
    pub offset: i64,
}

/// Tag filter, then sort, then the page window. `total` counts every row
/// that survived the filter.
pub fn filter_sort_paginate(
    tickets: Vec<Ticket>,
    tag_filter: &TagFilter,
    criteria: &[SortCriterion],
    current_user: Uuid,
    limit: i64,
    offset: i64,
) -> TicketPage {
    let mut visible: Vec<Ticket> = tickets
        .into_iter()
        .filter(|t| tag_filter.matches(&t.tags))
        .collect();
    sort_tickets(&mut visible, criteria, current_user);

    let total = visible.len();
    let offset = offset.max(0);
    let tickets = visible
        .into_iter()
        .skip(offset as usize)
        .take(limit.max(0) as usize)
        .collect();

    TicketPage {
        tickets,
        total,
        limit,
        offset,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_priority: BTreeMap<String, i64>,
    pub unassigned: i64,
    pub active: i64,
}

/// Counts per status and priority. Every known value is present, zero or not.
pub fn compute_stats<'a, I>(rows: I) -> TicketStats
where
    I: IntoIterator<Item = (&'a str, &'a str, Option<Uuid>)>,
{
    let mut stats = TicketStats {
        by_status: TicketStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect(),
        by_priority: TicketPriority::ALL
            .iter()
            .map(|p| (p.as_str().to_string(), 0))
            .collect(),
        ..Default::default()
    };

    for (status, priority, assignee) in rows {
        stats.total += 1;
        let status: TicketStatus = status.parse().unwrap_or_default();
        *stats.by_status.entry(status.as_str().to_string()).or_insert(0) += 1;
        let priority = TicketPriority::clamp_from(priority);
        *stats
            .by_priority
            .entry(priority.as_str().to_string())
            .or_insert(0) += 1;
        if assignee.is_none() {
            stats.unassigned += 1;
        }
        if status.is_active() {
            stats.active += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn ticket(title: &str, priority: &str, assignee: Option<Uuid>, minutes: i64, tags: &[&str]) -> Ticket {
        let base = Utc.with_ymd_and_hms(2024, 11, 1, 12, 0, 0).unwrap();
        Ticket {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            status: "OPEN".to_string(),
            priority: priority.to_string(),
            customer_id: None,
            assignee_id: assignee,
            created_by: Uuid::new_v4(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            test_batch_id: None,
            test_expires_at: None,
            created_at: base,
            updated_at: base + Duration::minutes(minutes),
        }
    }

    fn titles(tickets: &[Ticket]) -> Vec<&str> {
        tickets.iter().map(|t| t.title.as_str()).collect()
    }

    #[test]
    fn test_default_sort_is_updated_desc() {
        let me = Uuid::new_v4();
        let mut list = vec![
            ticket("old", "LOW", None, 1, &[]),
            ticket("new", "LOW", None, 30, &[]),
            ticket("mid", "LOW", None, 10, &[]),
        ];
        sort_tickets(&mut list, &[], me);
        assert_eq!(titles(&list), vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_criteria_order_and_directions() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut list = vec![
            ticket("a", "LOW", Some(me), 5, &[]),
            ticket("b", "URGENT", Some(other), 5, &[]),
            ticket("c", "URGENT", Some(me), 1, &[]),
            ticket("d", "URGENT", Some(me), 9, &[]),
            ticket("e", "HIGH", None, 5, &[]),
        ];
        let criteria = [
            SortCriterion::new(SortField::AssignedToMe, SortDirection::Desc),
            SortCriterion::new(SortField::Priority, SortDirection::Desc),
            SortCriterion::new(SortField::UpdatedAt, SortDirection::Asc),
        ];
        sort_tickets(&mut list, &criteria, me);
        assert_eq!(titles(&list), vec!["c", "d", "a", "b", "e"]);

        let reversed = [
            SortCriterion::new(SortField::Priority, SortDirection::Asc),
            SortCriterion::new(SortField::AssignedToMe, SortDirection::Desc),
        ];
        sort_tickets(&mut list, &reversed, me);
        assert_eq!(titles(&list), vec!["a", "e", "c", "d", "b"]);
    }

    #[test]
    fn test_sort_is_stable_on_full_ties() {
        let me = Uuid::new_v4();
        let mut list: Vec<Ticket> = (0..20)
            .map(|i| ticket(&format!("t{i:02}"), "MEDIUM", None, 0, &[]))
            .collect();
        let expected: Vec<String> = list.iter().map(|t| t.title.clone()).collect();
        sort_tickets(
            &mut list,
            &[SortCriterion::new(SortField::Priority, SortDirection::Desc)],
            me,
        );
        let got: Vec<String> = list.iter().map(|t| t.title.clone()).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_tag_filter() {
        let inactive = TagFilter::default();
        assert!(inactive.matches(&[]));
        assert!(inactive.matches(&["billing".to_string()]));

        let billing = TagFilter {
            tags: vec!["billing".to_string()],
            include_untagged: false,
        };
        assert!(billing.matches(&["Billing".to_string(), "refund".to_string()]));
        assert!(!billing.matches(&["shipping".to_string()]));
        assert!(!billing.matches(&[]));

        let with_untagged = TagFilter {
            include_untagged: true,
            ..billing.clone()
        };
        assert!(with_untagged.matches(&[]));

        let only_untagged = TagFilter {
            tags: vec![],
            include_untagged: true,
        };
        assert!(only_untagged.matches(&[]));
        assert!(!only_untagged.matches(&["billing".to_string()]));
    }

    #[test]
    fn test_filter_sort_paginate_counts_before_window() {
        let me = Uuid::new_v4();
        let list = vec![
            ticket("x", "LOW", None, 1, &["billing"]),
            ticket("y", "LOW", None, 2, &["shipping"]),
            ticket("z", "LOW", None, 3, &[]),
            ticket("w", "LOW", None, 4, &["billing"]),
        ];
        let filter = TagFilter {
            tags: vec!["billing".to_string()],
            include_untagged: true,
        };
        let page = filter_sort_paginate(list, &filter, &[], me, 2, 1);
        assert_eq!(page.total, 3);
        assert_eq!(titles(&page.tickets), vec!["z", "x"]);
    }

    #[test]
    fn test_compute_stats() {
        let agent = Uuid::new_v4();
        let rows = vec![
            ("OPEN", "HIGH", None),
            ("OPEN", "LOW", Some(agent)),
            ("CLOSED", "weird", None),
        ];
        let stats = compute_stats(rows);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status["OPEN"], 2);
        assert_eq!(stats.by_status["PENDING"], 0);
        assert_eq!(stats.by_priority["MEDIUM"], 1);
        assert_eq!(stats.unassigned, 2);
        assert_eq!(stats.active, 2);
    }
}
