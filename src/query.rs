use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

pub const GUARDIAN_SEARCH_URL: &str = "https://content.guardianapis.com/search";
pub const PAGE_SIZE: u32 = 10;
pub const SHOW_TAGS: &str = "contributor";
const LOGICAL_OR: &str = " OR ";

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid base endpoint {base:?}: {source}")]
    InvalidBase {
        base: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderBy {
    #[default]
    Newest,
    Relevance,
}

impl OrderBy {
    pub const ALL: [OrderBy; 2] = [OrderBy::Newest, OrderBy::Relevance];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderBy::Newest => "newest",
            OrderBy::Relevance => "relevance",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            OrderBy::Newest => "Newest",
            OrderBy::Relevance => "Relevance",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "newest" => Some(OrderBy::Newest),
            "relevance" => Some(OrderBy::Relevance),
            _ => None,
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category keywords in insertion order, without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct CategorySet {
    items: Vec<String>,
}

impl CategorySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, keyword: &str) -> bool {
        let keyword = keyword.trim().to_ascii_lowercase();
        if keyword.is_empty() || self.contains(&keyword) {
            return false;
        }
        self.items.push(keyword);
        true
    }

    pub fn remove(&mut self, keyword: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| !item.eq_ignore_ascii_case(keyword.trim()));
        self.items.len() != before
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.items
            .iter()
            .any(|item| item.eq_ignore_ascii_case(keyword.trim()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Query text sent as `q`: the keywords joined as a disjunction.
    pub fn disjunction(&self) -> String {
        self.items.join(LOGICAL_OR)
    }
}

impl From<Vec<String>> for CategorySet {
    fn from(items: Vec<String>) -> Self {
        let mut set = CategorySet::new();
        for item in &items {
            set.insert(item);
        }
        set
    }
}

impl From<CategorySet> for Vec<String> {
    fn from(set: CategorySet) -> Self {
        set.items
    }
}

impl<'a> FromIterator<&'a str> for CategorySet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = CategorySet::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}

/// Everything except the page number needed to address the search endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub base_url: String,
    pub api_key: String,
    pub order_by: OrderBy,
    pub categories: CategorySet,
}

impl FeedQuery {
    pub fn page_url(&self, page: u32) -> Result<String, QueryError> {
        let mut url = Url::parse(&self.base_url).map_err(|source| QueryError::InvalidBase {
            base: self.base_url.clone(),
            source,
        })?;
        url.query_pairs_mut()
            .append_pair("q", &self.categories.disjunction())
            .append_pair("order-by", self.order_by.as_str())
            .append_pair("page-size", &PAGE_SIZE.to_string())
            .append_pair("page", &page.to_string())
            .append_pair("show-tags", SHOW_TAGS)
            .append_pair("api-key", &self.api_key);
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(categories: &[&str]) -> FeedQuery {
        FeedQuery {
            base_url: GUARDIAN_SEARCH_URL.to_string(),
            api_key: "test".to_string(),
            order_by: OrderBy::Relevance,
            categories: categories.iter().copied().collect(),
        }
    }

    #[test]
    fn page_url_has_six_parameters_in_order() {
        let built = query(&["science", "technology", "mathematics"])
            .page_url(3)
            .unwrap();
        let parsed = Url::parse(&built).unwrap();
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        let keys: Vec<&str> = pairs.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(
            keys,
            ["q", "order-by", "page-size", "page", "show-tags", "api-key"]
        );
        assert_eq!(pairs[0].1, "science OR technology OR mathematics");
        assert_eq!(pairs[1].1, "relevance");
        assert_eq!(pairs[2].1, "10");
        assert_eq!(pairs[3].1, "3");
        assert_eq!(pairs[4].1, "contributor");
        assert_eq!(pairs[5].1, "test");
        assert_eq!(built.matches("q=").count(), 1);
    }

    #[test]
    fn single_category_has_no_combiner() {
        let built = query(&["engineering"]).page_url(1).unwrap();
        assert!(built.starts_with("https://content.guardianapis.com/search?q=engineering&"));
    }

    #[test]
    fn empty_category_set_still_builds() {
        let built = query(&[]).page_url(1).unwrap();
        assert!(built.contains("?q=&order-by=relevance"));
    }

    #[test]
    fn invalid_base_is_a_configuration_error() {
        let mut bad = query(&["science"]);
        bad.base_url = "not a url".into();
        assert!(matches!(
            bad.page_url(1),
            Err(QueryError::InvalidBase { .. })
        ));
    }

    #[test]
    fn category_set_dedupes_and_keeps_order() {
        let mut set: CategorySet = ["technology", "Science", "technology"].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), ["technology", "science"]);
        assert!(set.remove("SCIENCE"));
        assert!(!set.contains("science"));
        assert_eq!(set.disjunction(), "technology");
    }

    #[test]
    fn order_by_keys() {
        assert_eq!(OrderBy::from_key("Relevance"), Some(OrderBy::Relevance));
        assert_eq!(OrderBy::from_key("oldest"), None);
        assert_eq!(OrderBy::default().as_str(), "newest");
    }
}
