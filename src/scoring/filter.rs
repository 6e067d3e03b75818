use std::collections::HashSet;

use crate::db::models::{ResultItem, CATEGORIES, GENDERS};

/// Keep the items whose category and gender are selected and which match `query`.
///
/// - `category` must be in `categories`.
/// - `gender`, when the item has one, must be in `genders`. Mixed events
///   (no gender) pass this check.
/// - `query` is a case-insensitive substring match against competition,
///   category, gender, and both placements' names and teams. Empty matches all.
///
/// An empty `categories` or `genders` selection means "deselect all" and
/// yields nothing.
pub fn filter(
    items: &[ResultItem],
    categories: &HashSet<String>,
    genders: &HashSet<String>,
    query: &str,
) -> Vec<ResultItem> {
    if categories.is_empty() || genders.is_empty() {
        return Vec::new();
    }
    let q = query.to_lowercase();
    items
        .iter()
        .filter(|item| selected(item, categories, genders) && matches_query(item, &q))
        .cloned()
        .collect()
}

fn selected(item: &ResultItem, categories: &HashSet<String>, genders: &HashSet<String>) -> bool {
    if !categories.contains(&item.category) {
        return false;
    }
    match &item.gender {
        Some(g) => genders.contains(g),
        None => true,
    }
}

/// `q` must already be lowercase.
fn matches_query(item: &ResultItem, q: &str) -> bool {
    if q.is_empty() {
        return true;
    }
    let hit = |s: &str| s.to_lowercase().contains(q);
    hit(&item.competition)
        || hit(&item.category)
        || item.gender.as_deref().map(hit).unwrap_or(false)
        || hit(&item.first_place.name)
        || hit(&item.first_place.team)
        || hit(&item.second_place.name)
        || hit(&item.second_place.team)
}

/// A dashboard selection: which categories and genders are ticked, plus the search box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFilter {
    pub categories: HashSet<String>,
    pub genders: HashSet<String>,
    pub query: String,
}

impl Default for ResultFilter {
    /// Everything selected, empty search.
    fn default() -> Self {
        ResultFilter {
            categories: CATEGORIES.iter().map(|c| c.to_string()).collect(),
            genders: GENDERS.iter().map(|g| g.to_string()).collect(),
            query: String::new(),
        }
    }
}

impl ResultFilter {
    pub fn apply(&self, items: &[ResultItem]) -> Vec<ResultItem> {
        filter(items, &self.categories, &self.genders, &self.query)
    }

    /// True when nothing is narrowed down.
    pub fn is_pass_through(&self) -> bool {
        *self == ResultFilter::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Placement;
    use chrono::Utc;

    fn set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn item(category: &str, gender: Option<&str>, competition: &str) -> ResultItem {
        ResultItem {
            id: None,
            category: category.into(),
            competition: competition.into(),
            gender: gender.map(|g| g.to_string()),
            first_place: Placement::new("Ali", "Yaqooth"),
            second_place: Placement::new("Sam", "Marjaan"),
            announced_at: Some(Utc::now()),
        }
    }

    fn sample() -> Vec<ResultItem> {
        vec![
            item("Junior", Some("Boys"), "Quran Recitation"),
            item("Senior", Some("Girls"), "Essay Writing"),
            item("Kiddies", None, "Colouring"),
            item("Senior", Some("Boys"), "Junior Mentor Quiz"),
        ]
    }

    #[test]
    fn test_exact_category_gender_selection() {
        let items = vec![item("Junior", Some("Boys"), "Quran Recitation")];
        let hit = filter(&items, &set(&["Junior"]), &set(&["Boys"]), "");
        assert_eq!(hit, items);

        let miss = filter(&items, &set(&["Senior"]), &set(&["Boys"]), "");
        assert!(miss.is_empty());
    }

    #[test]
    fn test_empty_categories_yields_nothing() {
        let all = ResultFilter::default();
        assert!(filter(&sample(), &HashSet::new(), &all.genders, "").is_empty());
    }

    #[test]
    fn test_empty_genders_yields_nothing() {
        let all = ResultFilter::default();
        assert!(filter(&sample(), &all.categories, &HashSet::new(), "").is_empty());
    }

    #[test]
    fn test_item_without_gender_passes_gender_check() {
        let hit = filter(&sample(), &set(&["Kiddies"]), &set(&["Girls"]), "");
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].competition, "Colouring");
    }

    #[test]
    fn test_query_is_case_insensitive_across_fields() {
        let all = ResultFilter::default();
        let hit = filter(&sample(), &all.categories, &all.genders, "junior");
        let names: Vec<_> = hit.iter().map(|i| i.competition.as_str()).collect();
        assert_eq!(names, vec!["Quran Recitation", "Junior Mentor Quiz"]);

        let by_team = filter(&sample(), &all.categories, &all.genders, "MARJ");
        assert_eq!(by_team.len(), 4);

        let by_gender = filter(&sample(), &all.categories, &all.genders, "girls");
        assert_eq!(by_gender.len(), 1);
    }

    #[test]
    fn test_selection_and_query_compose() {
        let f = ResultFilter {
            categories: set(&["Senior"]),
            query: "essay".into(),
            ..ResultFilter::default()
        };
        let hit = f.apply(&sample());
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].category, "Senior");
    }

    #[test]
    fn test_default_is_pass_through() {
        let f = ResultFilter::default();
        assert!(f.is_pass_through());
        assert_eq!(f.apply(&sample()).len(), 4);

        let narrowed = ResultFilter {
            query: "quiz".into(),
            ..ResultFilter::default()
        };
        assert!(!narrowed.is_pass_through());
    }
}
