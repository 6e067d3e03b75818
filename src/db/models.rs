use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;

/// Categories the fest runs competitions in, youngest first.
pub const CATEGORIES: &[&str] = &[
    "Kiddies",
    "Children",
    "Sub-Junior",
    "Junior",
    "Senior",
    "General",
];

/// Genders a competition may be split by. Mixed events carry none.
pub const GENDERS: &[&str] = &["Boys", "Girls"];

/// A winner: participant name and the team (house) they compete for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Empty when the source did not record a team; such a placement scores nothing.
    #[serde(default, deserialize_with = "null_as_default")]
    pub team: String,
}

impl Placement {
    pub fn new(name: &str, team: &str) -> Self {
        Placement {
            name: name.to_string(),
            team: team.to_string(),
        }
    }

    /// The team to credit, if any.
    pub fn scoring_team(&self) -> Option<&str> {
        let team = self.team.trim();
        if team.is_empty() {
            None
        } else {
            Some(team)
        }
    }
}

/// One announced competition outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultItem {
    /// Source-assigned identifier (row id or document id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub category: String,
    pub competition: String,
    /// "Boys" | "Girls"; `None` when the competition is not split by gender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, alias = "firstPlace", deserialize_with = "null_as_default")]
    pub first_place: Placement,
    #[serde(default, alias = "secondPlace", deserialize_with = "null_as_default")]
    pub second_place: Placement,
    /// Ordering key, newest first. Untimestamped records sort last.
    #[serde(
        default,
        alias = "addedAt",
        skip_serializing_if = "Option::is_none"
    )]
    pub announced_at: Option<DateTime<Utc>>,
}

/// Treat an explicit `null` the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ResultItem {
    /// Collapse blank optional fields so `Some("")` never leaks into filtering.
    pub fn normalized(mut self) -> Self {
        if self
            .gender
            .as_deref()
            .map(|g| g.trim().is_empty())
            .unwrap_or(false)
        {
            self.gender = None;
        }
        self
    }

    /// Title line shown on the dashboard, e.g. "Quran Recitation - Junior (Boys)".
    pub fn title(&self) -> String {
        match &self.gender {
            Some(g) => format!("{} - {} ({})", self.competition, self.category, g),
            None => format!("{} - {}", self.competition, self.category),
        }
    }
}

/// Kind of change a source reports for its results collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// A change notification. Carries no payload: receivers re-read the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub id: Option<String>,
}

/// Newest first; ties broken by id so the order is stable across fetches.
/// Records without a timestamp go last, in the order the source gave them.
pub fn sort_newest_first(items: &mut [ResultItem]) {
    items.sort_by(|a, b| match (a.announced_at, b.announced_at) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| compare_ids(&b.id, &a.id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// Row ids are numeric strings, so "10" must sort after "9".
/// Numeric ids rank below any other id.
fn compare_ids(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a.as_deref(), b.as_deref()) {
        (Some(x), Some(y)) => match (x.parse::<i64>(), y.parse::<i64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => x.cmp(y),
        },
        _ => a.cmp(b),
    }
}
