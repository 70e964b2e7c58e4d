use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::core::shared::models::Team;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMatch {
    pub team_id: Uuid,
    pub name: String,
    pub matched_tags: Vec<String>,
    pub score: usize,
}

/// Teams whose tags overlap the ticket's tags, best overlap first. Equal
/// scores are ordered by team name. Teams with no overlap are left out.
pub fn route_teams(ticket_tags: &[String], teams: &[Team]) -> Vec<TeamMatch> {
    let wanted: HashSet<&str> = ticket_tags.iter().map(String::as_str).collect();

    let mut matches: Vec<TeamMatch> = teams
        .iter()
        .filter_map(|team| {
            let mut seen = HashSet::new();
            let matched_tags: Vec<String> = team
                .tags
                .iter()
                .filter(|t| wanted.contains(t.as_str()) && seen.insert(t.as_str()))
                .cloned()
                .collect();
            if matched_tags.is_empty() {
                return None;
            }
            Some(TeamMatch {
                team_id: team.id,
                name: team.name.clone(),
                score: matched_tags.len(),
                matched_tags,
            })
        })
        .collect();

    matches.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn team(name: &str, tags: &[&str]) -> Team {
        Team {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_ranked_by_overlap_then_name() {
        let teams = vec![
            team("Payments", &["billing"]),
            team("Logistics", &["shipping", "returns"]),
            team("Accounts", &["billing", "refund"]),
            team("Platform", &["api"]),
            team("Finance", &["refund"]),
        ];
        let tags = vec!["billing".to_string(), "refund".to_string()];
        let ranked = route_teams(&tags, &teams);

        let names: Vec<&str> = ranked.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Accounts", "Finance", "Payments"]);
        assert_eq!(ranked[0].score, 2);
        assert_eq!(ranked[0].matched_tags, vec!["billing".to_string(), "refund".to_string()]);
    }

    #[test]
    fn test_untagged_ticket_routes_nowhere() {
        let teams = vec![team("Payments", &["billing"])];
        assert!(route_teams(&[], &teams).is_empty());
    }
}
