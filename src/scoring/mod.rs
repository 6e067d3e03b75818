pub mod filter;

pub use filter::ResultFilter;

use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::models::ResultItem;

/// Points for winning a competition.
pub const FIRST_PLACE_POINTS: u32 = 10;
/// Points for the runner-up.
pub const SECOND_PLACE_POINTS: u32 = 5;

/// Team name → cumulative score. Teams with no placement are absent.
pub type ScoreMap = BTreeMap<String, u32>;

/// Sum placement points per team over `items`.
///
/// Pure: the result depends only on the multiset of items, never their order.
/// A placement without a team is skipped.
pub fn aggregate(items: &[ResultItem]) -> ScoreMap {
    let mut scores = ScoreMap::new();
    for item in items {
        if let Some(team) = item.first_place.scoring_team() {
            *scores.entry(team.to_string()).or_insert(0) += FIRST_PLACE_POINTS;
        }
        if let Some(team) = item.second_place.scoring_team() {
            *scores.entry(team.to_string()).or_insert(0) += SECOND_PLACE_POINTS;
        }
    }
    scores
}

/// Score for `team`, 0 when it has not placed yet.
pub fn score_for(scores: &ScoreMap, team: &str) -> u32 {
    scores.get(team).copied().unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamStanding {
    pub rank: usize,
    pub team: String,
    pub score: u32,
}

/// Order the configured teams for the score card: highest score on top.
/// Ties keep the configured order, so the first listed team leads a draw.
pub fn standings(scores: &ScoreMap, teams: &[String]) -> Vec<TeamStanding> {
    let mut rows: Vec<(String, u32)> = teams
        .iter()
        .map(|t| (t.clone(), score_for(scores, t)))
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1));
    rows.into_iter()
        .enumerate()
        .map(|(i, (team, score))| TeamStanding {
            rank: i + 1,
            team,
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Placement;
    use chrono::Utc;

    fn result(first: &str, second: &str) -> ResultItem {
        ResultItem {
            id: None,
            category: "Junior".into(),
            competition: "Quran Recitation".into(),
            gender: Some("Boys".into()),
            first_place: Placement::new("Ali", first),
            second_place: Placement::new("Sam", second),
            announced_at: Some(Utc::now()),
        }
    }

    fn teams() -> Vec<String> {
        vec!["Yaqooth".to_string(), "Marjaan".to_string()]
    }

    #[test]
    fn test_aggregate_single_result() {
        let scores = aggregate(&[result("Yaqooth", "Marjaan")]);
        let expected: ScoreMap = [("Yaqooth".to_string(), 10), ("Marjaan".to_string(), 5)]
            .into_iter()
            .collect();
        assert_eq!(scores, expected);
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate(&[]).is_empty());
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let items = vec![
            result("Yaqooth", "Marjaan"),
            result("Marjaan", "Yaqooth"),
            result("Marjaan", ""),
            result("Yaqooth", "Marjaan"),
        ];
        let baseline = aggregate(&items);

        let mut reversed = items.clone();
        reversed.reverse();
        assert_eq!(aggregate(&reversed), baseline);

        let mut rotated = items.clone();
        rotated.rotate_left(1);
        assert_eq!(aggregate(&rotated), baseline);

        assert_eq!(score_for(&baseline, "Yaqooth"), 25);
        assert_eq!(score_for(&baseline, "Marjaan"), 30);
    }

    #[test]
    fn test_aggregate_skips_missing_teams() {
        let scores = aggregate(&[result("", "  "), result("Yaqooth", "")]);
        assert_eq!(scores.len(), 1);
        assert_eq!(score_for(&scores, "Yaqooth"), 10);
        assert!(!scores.contains_key(""));
    }

    #[test]
    fn test_aggregate_only_placed_teams_present() {
        let scores = aggregate(&[result("Yaqooth", "Yaqooth")]);
        assert_eq!(score_for(&scores, "Yaqooth"), 15);
        assert!(!scores.contains_key("Marjaan"));
        assert_eq!(score_for(&scores, "Marjaan"), 0);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let items = vec![result("Marjaan", "Yaqooth")];
        assert_eq!(aggregate(&items), aggregate(&items));
    }

    #[test]
    fn test_standings_leader_on_top() {
        let scores = aggregate(&[result("Marjaan", "Yaqooth")]);
        let table = standings(&scores, &teams());
        assert_eq!(table[0].team, "Marjaan");
        assert_eq!(table[0].score, 10);
        assert_eq!(table[1].team, "Yaqooth");
        assert_eq!(table[1].rank, 2);
    }

    #[test]
    fn test_standings_tie_keeps_configured_order() {
        let table = standings(&ScoreMap::new(), &teams());
        assert_eq!(table[0].team, "Yaqooth");
        assert_eq!(table[0].score, 0);
        assert_eq!(table[1].team, "Marjaan");
    }
}
