use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use supportdesk::core::shared::models::Ticket;
use supportdesk::tickets::query::{
    filter_sort_paginate, sort_tickets, SortCriterion, SortDirection, SortField, TagFilter,
};

fn ticket(n: i64, priority: &str, assignee: Option<Uuid>, tags: &[&str]) -> Ticket {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let author = Uuid::new_v4();
    Ticket {
        id: Uuid::new_v4(),
        title: format!("ticket {n}"),
        description: None,
        status: "OPEN".to_string(),
        priority: priority.to_string(),
        customer_id: Some(author),
        assignee_id: assignee,
        created_by: author,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        test_batch_id: None,
        test_expires_at: None,
        created_at: base,
        updated_at: base + Duration::minutes(n),
    }
}

fn titles(tickets: &[Ticket]) -> Vec<&str> {
    tickets.iter().map(|t| t.title.as_str()).collect()
}

#[test]
fn test_mine_then_priority_then_recency() {
    let me = Uuid::new_v4();
    let other = Uuid::new_v4();
    let mut tickets = vec![
        ticket(1, "LOW", Some(me), &[]),
        ticket(2, "URGENT", Some(other), &[]),
        ticket(3, "URGENT", Some(me), &[]),
        ticket(4, "LOW", Some(me), &[]),
        ticket(5, "MEDIUM", None, &[]),
    ];
    let criteria = [
        SortCriterion::new(SortField::AssignedToMe, SortDirection::Desc),
        SortCriterion::new(SortField::Priority, SortDirection::Desc),
        SortCriterion::new(SortField::UpdatedAt, SortDirection::Desc),
    ];
    sort_tickets(&mut tickets, &criteria, me);
    assert_eq!(
        titles(&tickets),
        vec!["ticket 3", "ticket 4", "ticket 1", "ticket 2", "ticket 5"]
    );
}

#[test]
fn test_sort_is_stable_on_full_ties() {
    let me = Uuid::new_v4();
    let mut tickets = vec![
        ticket(1, "HIGH", None, &[]),
        ticket(1, "HIGH", None, &[]),
        ticket(1, "HIGH", None, &[]),
    ];
    let before: Vec<Uuid> = tickets.iter().map(|t| t.id).collect();
    sort_tickets(
        &mut tickets,
        &[SortCriterion::new(SortField::Priority, SortDirection::Asc)],
        me,
    );
    let after: Vec<Uuid> = tickets.iter().map(|t| t.id).collect();
    assert_eq!(before, after);
}

#[test]
fn test_total_counts_filtered_rows_not_the_page() {
    let me = Uuid::new_v4();
    let tickets: Vec<Ticket> = (0..30)
        .map(|n| {
            let tags: &[&str] = if n % 3 == 0 { &["billing"] } else { &["login"] };
            ticket(n, "MEDIUM", None, tags)
        })
        .collect();
    let filter = TagFilter {
        tags: vec!["BILLING".to_string()],
        include_untagged: false,
    };

    let page = filter_sort_paginate(tickets, &filter, &[], me, 4, 8);
    assert_eq!(page.total, 10);
    assert_eq!(page.tickets.len(), 2);
    assert!(page.tickets.iter().all(|t| t.tags == vec!["billing".to_string()]));
}

#[test]
fn test_untagged_only_filter() {
    let me = Uuid::new_v4();
    let tickets = vec![
        ticket(1, "LOW", None, &[]),
        ticket(2, "LOW", None, &["bug"]),
    ];
    let filter = TagFilter {
        tags: vec![],
        include_untagged: true,
    };
    let page = filter_sort_paginate(tickets, &filter, &[], me, 50, 0);
    assert_eq!(titles(&page.tickets), vec!["ticket 1"]);
}
